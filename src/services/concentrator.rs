use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::config::PollerConfig;
use crate::error::{Result, TransportError};
use crate::interfaces::transport::{DownloadSource, ListResponse};

/// HTTP client for the concentrator's pending-downloads resource.
pub struct ConcentratorClient {
    client: reqwest::Client,
    base_url: String,
    resource_path: String,
}

impl ConcentratorClient {
    pub fn new(base_url: &str, resource_path: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.to_string(),
            resource_path: resource_path.to_string(),
        })
    }

    pub fn from_config(config: &PollerConfig) -> Result<Self> {
        Self::new(
            config.base_url()?,
            config.resource_path(),
            Duration::from_secs(config.timeout_seconds()),
        )
    }

    pub fn list_url(&self, device_id: &str, patient_id: &str) -> String {
        let path = self
            .resource_path
            .replace("{deviceId}", &urlencoding::encode(device_id))
            .replace("{patientId}", &urlencoding::encode(patient_id));
        join_url(&self.base_url, &path)
    }
}

#[async_trait]
impl DownloadSource for ConcentratorClient {
    async fn fetch_pending(&self, device_id: &str, patient_id: &str) -> Result<ListResponse> {
        let url = self.list_url(device_id, patient_id);
        debug!(%url, "requesting downloadable list");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e: reqwest::Error| TransportError::Http(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e: reqwest::Error| TransportError::Http(e.to_string()))?;
        Ok(ListResponse { status, body })
    }
}

fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        base.to_string()
    } else {
        format!("{base}/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_url_substitutes_and_encodes_ids() {
        let client = ConcentratorClient::new(
            "https://concentrator.example/medipi/",
            "/download/{deviceId}/{patientId}",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            client.list_url("device 1", "9876543210"),
            "https://concentrator.example/medipi/download/device%201/9876543210"
        );
    }

    #[test]
    fn from_config_requires_base_url() {
        let err = ConcentratorClient::from_config(&PollerConfig::default()).err().unwrap();
        assert!(matches!(err, TransportError::Config(_)));
    }
}
