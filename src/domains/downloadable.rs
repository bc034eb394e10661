use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Discriminator routing a downloadable item to its handler.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DownloadType {
    PatientMessage,
    SoftwareUpdate,
    Other(String),
}

impl DownloadType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::PatientMessage => "PATIENTMESSAGE",
            Self::SoftwareUpdate => "SOFTWAREUPDATE",
            Self::Other(key) => key.as_str(),
        }
    }
}

impl From<&str> for DownloadType {
    fn from(value: &str) -> Self {
        match value.trim() {
            "PATIENTMESSAGE" => Self::PatientMessage,
            "SOFTWAREUPDATE" => Self::SoftwareUpdate,
            other => Self::Other(other.to_string()),
        }
    }
}

impl FromStr for DownloadType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl fmt::Display for DownloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for DownloadType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DownloadType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from(raw.as_str()))
    }
}

/// A unit of pending content returned by the concentrator's download list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadableItem {
    pub downloadable_uuid: String,
    pub download_type: DownloadType,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl DownloadableItem {
    pub fn new(
        downloadable_uuid: impl Into<String>,
        download_type: DownloadType,
        data: Value,
    ) -> Self {
        Self {
            downloadable_uuid: downloadable_uuid.into(),
            download_type,
            data,
            signature: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn known_and_unknown_types_parse() {
        assert_eq!(DownloadType::from("PATIENTMESSAGE"), DownloadType::PatientMessage);
        assert_eq!(DownloadType::from("SOFTWAREUPDATE"), DownloadType::SoftwareUpdate);
        assert_eq!(
            DownloadType::from("CONFIG"),
            DownloadType::Other("CONFIG".to_string())
        );
        assert_eq!(DownloadType::Other("CONFIG".to_string()).to_string(), "CONFIG");
    }

    #[test]
    fn list_payload_deserializes() {
        let items: Vec<DownloadableItem> = serde_json::from_value(json!([
            {"downloadableUuid": "d-1", "downloadType": "PATIENTMESSAGE", "data": {"text": "hi"}},
            {"downloadableUuid": "d-2", "downloadType": "SOMETHINGNEW"}
        ]))
        .unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].download_type, DownloadType::PatientMessage);
        assert_eq!(items[0].data["text"], "hi");
        assert_eq!(items[1].data, Value::Null);
        assert_eq!(
            serde_json::to_value(&items[0]).unwrap()["downloadType"],
            "PATIENTMESSAGE"
        );
    }
}
