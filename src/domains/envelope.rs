use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use base64::Engine;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, TransportError};

/// OID applied to addresses that do not name their own address type.
pub const ITK_ADDRESS_OID: &str = "2.16.840.1.113883.2.1.3.2.4.18.22";
/// OID applied to audit identities that do not name their own identity type.
pub const ITK_IDENTITY_OID: &str = "2.16.840.1.113883.2.1.3.2.4.18.27";
/// Handling specification key carrying the interaction an envelope represents.
pub const INTERACTION_ID_KEY: &str = "urn:nhs-itk:ns:201005:interaction";

/// Fresh upper-case UUID, the form used for tracking and message ids.
pub fn new_id() -> String {
    Uuid::new_v4().to_string().to_uppercase()
}

#[derive(Deserialize)]
struct RawAddress {
    #[serde(default)]
    oid: Option<String>,
    uri: String,
}

/// Sender or recipient of an envelope: an address-type OID plus a URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawAddress")]
pub struct Address {
    oid: String,
    uri: String,
}

impl Address {
    pub fn new(oid: impl Into<String>, uri: impl Into<String>) -> Result<Self> {
        let oid = oid.into().trim().to_string();
        let uri = uri.into().trim().to_string();
        if uri.is_empty() {
            return Err(TransportError::InvalidEnvelope(
                "address uri is empty".to_string(),
            ));
        }
        if oid.is_empty() {
            return Err(TransportError::InvalidEnvelope(format!(
                "address oid is empty for {uri}"
            )));
        }
        Ok(Self { oid, uri })
    }

    /// Parses `oid|uri`, or a bare uri which takes the default address OID.
    pub fn parse(value: &str) -> Result<Self> {
        match value.split_once('|') {
            Some((oid, uri)) => Self::new(oid, uri),
            None => Self::new(ITK_ADDRESS_OID, value),
        }
    }

    pub fn oid(&self) -> &str {
        &self.oid
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }
}

impl TryFrom<RawAddress> for Address {
    type Error = TransportError;

    fn try_from(raw: RawAddress) -> Result<Self> {
        Self::new(raw.oid.unwrap_or_else(|| ITK_ADDRESS_OID.to_string()), raw.uri)
    }
}

impl FromStr for Address {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.oid, self.uri)
    }
}

#[derive(Deserialize)]
struct RawIdentity {
    #[serde(default)]
    oid: Option<String>,
    id: String,
}

/// Audit identity stamped on an envelope to record who is responsible for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawIdentity")]
pub struct Identity {
    oid: String,
    id: String,
}

impl Identity {
    pub fn new(oid: impl Into<String>, id: impl Into<String>) -> Result<Self> {
        let oid = oid.into().trim().to_string();
        let id = id.into().trim().to_string();
        if id.is_empty() || oid.is_empty() {
            return Err(TransportError::InvalidEnvelope(
                "audit identity is empty".to_string(),
            ));
        }
        Ok(Self { oid, id })
    }

    /// Parses `oid|id`, or a bare id which takes the default identity OID.
    pub fn parse(value: &str) -> Result<Self> {
        match value.split_once('|') {
            Some((oid, id)) => Self::new(oid, id),
            None => Self::new(ITK_IDENTITY_OID, value),
        }
    }

    pub fn oid(&self) -> &str {
        &self.oid
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl TryFrom<RawIdentity> for Identity {
    type Error = TransportError;

    fn try_from(raw: RawIdentity) -> Result<Self> {
        Self::new(
            raw.oid.unwrap_or_else(|| ITK_IDENTITY_OID.to_string()),
            raw.id,
        )
    }
}

fn new_payload_id() -> String {
    format!("uuid_{}", new_id())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPayload {
    id: String,
    mime_type: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    base64: bool,
    #[serde(default)]
    profile_id: Option<String>,
}

/// One body carried by an envelope. Locally built payloads get a generated
/// id; payloads read off the wire must carry their own, since acknowledgements
/// echo it back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawPayload")]
pub struct Payload {
    id: String,
    mime_type: String,
    body: String,
    base64: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    profile_id: Option<String>,
}

impl TryFrom<RawPayload> for Payload {
    type Error = TransportError;

    fn try_from(raw: RawPayload) -> Result<Self> {
        let id = raw.id.trim().to_string();
        if id.is_empty() {
            return Err(TransportError::InvalidEnvelope(
                "payload id is empty".to_string(),
            ));
        }
        Ok(Self {
            id,
            mime_type: raw.mime_type,
            body: raw.body,
            base64: raw.base64,
            profile_id: raw.profile_id,
        })
    }
}

impl Payload {
    pub fn new(mime_type: impl Into<String>) -> Self {
        Self {
            id: new_payload_id(),
            mime_type: mime_type.into(),
            body: String::new(),
            base64: false,
            profile_id: None,
        }
    }

    /// Payload whose body is the base64 encoding of `bytes`.
    pub fn encoded(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        let mut payload = Self::new(mime_type);
        payload.set_body(base64::engine::general_purpose::STANDARD.encode(bytes), true);
        payload
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.set_body(body, false);
        self
    }

    pub fn with_profile_id(mut self, profile_id: impl Into<String>) -> Self {
        self.profile_id = Some(profile_id.into());
        self
    }

    pub fn set_body(&mut self, body: impl Into<String>, base64: bool) {
        self.body = body.into();
        self.base64 = base64;
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn is_base64(&self) -> bool {
        self.base64
    }

    pub fn profile_id(&self) -> Option<&str> {
        self.profile_id.as_deref()
    }

    pub fn decoded_body(&self) -> Result<Vec<u8>> {
        if !self.base64 {
            return Ok(self.body.as_bytes().to_vec());
        }
        base64::engine::general_purpose::STANDARD
            .decode(self.body.trim())
            .map_err(|e| TransportError::InvalidEnvelope(format!("payload {}: {e}", self.id)))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEnvelope {
    #[serde(default = "new_id")]
    tracking_id: String,
    sender: Address,
    recipients: Vec<Address>,
    service: String,
    #[serde(default)]
    handling_specifications: BTreeMap<String, String>,
    #[serde(default)]
    audit: Vec<Identity>,
    payloads: Vec<Payload>,
}

/// An addressed, auditable unit of exchange.
///
/// Every instance built through [`Envelope::new`] gets a fresh tracking id, so
/// a reply is never confused with the envelope it answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawEnvelope")]
pub struct Envelope {
    tracking_id: String,
    sender: Address,
    recipients: Vec<Address>,
    service: String,
    handling_specifications: BTreeMap<String, String>,
    audit: Vec<Identity>,
    payloads: Vec<Payload>,
}

impl Envelope {
    pub fn new(
        sender: Address,
        recipients: Vec<Address>,
        service: impl Into<String>,
        payloads: Vec<Payload>,
    ) -> Result<Self> {
        Self::assemble(new_id(), sender, recipients, service.into(), payloads)
    }

    fn assemble(
        tracking_id: String,
        sender: Address,
        recipients: Vec<Address>,
        service: String,
        payloads: Vec<Payload>,
    ) -> Result<Self> {
        if tracking_id.trim().is_empty() {
            return Err(TransportError::InvalidEnvelope(
                "tracking id is empty".to_string(),
            ));
        }
        if recipients.is_empty() {
            return Err(TransportError::InvalidEnvelope(
                "envelope has no recipients".to_string(),
            ));
        }
        if service.trim().is_empty() {
            return Err(TransportError::InvalidEnvelope(
                "service is empty".to_string(),
            ));
        }
        if payloads.is_empty() {
            return Err(TransportError::InvalidEnvelope(
                "envelope has no payloads".to_string(),
            ));
        }
        Ok(Self {
            tracking_id,
            sender,
            recipients,
            service,
            handling_specifications: BTreeMap::new(),
            audit: Vec::new(),
            payloads,
        })
    }

    pub fn with_interaction_id(mut self, interaction_id: impl Into<String>) -> Self {
        self.add_handling_specification(INTERACTION_ID_KEY, interaction_id);
        self
    }

    pub fn with_audit(mut self, audit: Vec<Identity>) -> Self {
        self.audit = audit;
        self
    }

    pub fn add_handling_specification(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.handling_specifications.insert(key.into(), value.into());
    }

    pub fn handling_specification(&self, key: &str) -> Option<&str> {
        self.handling_specifications.get(key).map(String::as_str)
    }

    pub fn handling_specifications(&self) -> &BTreeMap<String, String> {
        &self.handling_specifications
    }

    pub fn interaction_id(&self) -> Option<&str> {
        self.handling_specification(INTERACTION_ID_KEY)
    }

    pub fn tracking_id(&self) -> &str {
        &self.tracking_id
    }

    pub fn sender(&self) -> &Address {
        &self.sender
    }

    pub fn recipients(&self) -> &[Address] {
        &self.recipients
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn audit(&self) -> &[Identity] {
        &self.audit
    }

    pub fn payloads(&self) -> &[Payload] {
        &self.payloads
    }

    pub fn payload(&self, index: usize) -> Option<&Payload> {
        self.payloads.get(index)
    }

    pub fn payload_id(&self, index: usize) -> Option<&str> {
        self.payload(index).map(Payload::id)
    }
}

impl TryFrom<RawEnvelope> for Envelope {
    type Error = TransportError;

    fn try_from(raw: RawEnvelope) -> Result<Self> {
        let mut envelope = Self::assemble(
            raw.tracking_id,
            raw.sender,
            raw.recipients,
            raw.service,
            raw.payloads,
        )?;
        envelope.handling_specifications = raw.handling_specifications;
        envelope.audit = raw.audit;
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mailbox() -> Address {
        Address::parse("urn:oid:1.2.3|https://a.example/mailbox").unwrap()
    }

    #[test]
    fn address_parses_oid_and_uri() {
        let address = mailbox();
        assert_eq!(address.oid(), "urn:oid:1.2.3");
        assert_eq!(address.uri(), "https://a.example/mailbox");
        assert_eq!(address.to_string(), "urn:oid:1.2.3|https://a.example/mailbox");

        let bare: Address = "urn:nhs-uk:addressing:ods:X09".parse().unwrap();
        assert_eq!(bare.oid(), ITK_ADDRESS_OID);
    }

    #[test]
    fn empty_addressing_is_rejected() {
        assert!(matches!(
            Address::parse(""),
            Err(TransportError::InvalidEnvelope(_))
        ));
        assert!(Address::new("", "https://a.example").is_err());
        assert!(Identity::parse("  ").is_err());
    }

    #[test]
    fn envelopes_get_distinct_tracking_ids() {
        let envelope = || {
            Envelope::new(mailbox(), vec![mailbox()], "urn:svc", vec![Payload::new("text/plain")])
                .unwrap()
        };
        let (a, b) = (envelope(), envelope());
        assert_ne!(a.tracking_id(), b.tracking_id());
        assert_eq!(a.tracking_id(), a.tracking_id().to_uppercase());
    }

    #[test]
    fn construction_requires_recipients_service_and_payloads() {
        let payloads = vec![Payload::new("text/plain")];
        assert!(Envelope::new(mailbox(), Vec::new(), "urn:svc", payloads.clone()).is_err());
        assert!(Envelope::new(mailbox(), vec![mailbox()], " ", payloads).is_err());
        assert!(Envelope::new(mailbox(), vec![mailbox()], "urn:svc", Vec::new()).is_err());
    }

    #[test]
    fn handling_specifications_and_payload_lookup() {
        let payload = Payload::new("text/xml").with_id("P1").with_body("<a/>");
        let mut envelope = Envelope::new(mailbox(), vec![mailbox()], "urn:svc", vec![payload])
            .unwrap()
            .with_interaction_id("I1");
        envelope.add_handling_specification("urn:nhs-itk:ns:201005:ackrequested", "true");

        assert_eq!(envelope.interaction_id(), Some("I1"));
        assert_eq!(
            envelope.handling_specification("urn:nhs-itk:ns:201005:ackrequested"),
            Some("true")
        );
        assert_eq!(envelope.payload_id(0), Some("P1"));
        assert!(envelope.payload(1).is_none());
    }

    #[test]
    fn base64_payload_decodes() {
        let payload = Payload::encoded("application/octet-stream", b"reading=98");
        assert!(payload.is_base64());
        assert_eq!(payload.decoded_body().unwrap(), b"reading=98".to_vec());

        let plain = Payload::new("text/plain").with_body("hello");
        assert_eq!(plain.decoded_body().unwrap(), b"hello".to_vec());
    }

    #[test]
    fn deserialization_validates_addressing() {
        let value = json!({
            "trackingId": "T1",
            "sender": {"oid": "urn:oid:1.2.3", "uri": "https://a.example/mailbox"},
            "recipients": [{"uri": "urn:nhs-uk:addressing:ods:X09"}],
            "service": "urn:nhs-itk:services:201005:SendCDADocument-v2-0",
            "handlingSpecifications": {"urn:nhs-itk:ns:201005:interaction": "I1"},
            "payloads": [{"id": "P1", "mimeType": "text/xml", "body": "<a/>"}]
        });
        let envelope: Envelope = serde_json::from_value(value).unwrap();
        assert_eq!(envelope.tracking_id(), "T1");
        assert_eq!(envelope.recipients()[0].oid(), ITK_ADDRESS_OID);
        assert_eq!(envelope.interaction_id(), Some("I1"));

        let bad = json!({
            "sender": {"uri": ""},
            "recipients": [{"uri": "x"}],
            "service": "urn:svc",
            "payloads": [{"mimeType": "text/xml"}]
        });
        assert!(serde_json::from_value::<Envelope>(bad).is_err());
    }

    #[test]
    fn wire_payloads_must_carry_an_id() {
        let envelope = |payload: serde_json::Value| {
            json!({
                "sender": {"uri": "https://a.example/mailbox"},
                "recipients": [{"uri": "urn:nhs-uk:addressing:ods:X09"}],
                "service": "urn:svc",
                "payloads": [payload]
            })
        };
        let missing = envelope(json!({"mimeType": "text/xml"}));
        assert!(serde_json::from_value::<Envelope>(missing).is_err());
        let blank = envelope(json!({"id": " ", "mimeType": "text/xml"}));
        assert!(serde_json::from_value::<Envelope>(blank).is_err());

        let parsed: Envelope =
            serde_json::from_value(envelope(json!({"id": "P7", "mimeType": "text/xml"})))
                .unwrap();
        assert_eq!(parsed.payload_id(0), Some("P7"));
    }
}
