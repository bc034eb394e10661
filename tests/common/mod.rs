#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use medipi_transport::config::{AcknowledgementConfig, SettingsHandle};
use medipi_transport::domains::downloadable::DownloadableItem;
use medipi_transport::domains::envelope::{Address, Envelope, Payload};
use medipi_transport::error::{Result, TransportError};
use medipi_transport::interfaces::handlers::DownloadableHandler;
use medipi_transport::interfaces::reporting::ErrorReporter;

#[derive(Default)]
pub struct RecordingReporter {
    pub reports: Mutex<Vec<String>>,
}

impl RecordingReporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self) -> usize {
        self.reports.lock().unwrap().len()
    }

    pub fn messages(&self) -> Vec<String> {
        self.reports.lock().unwrap().clone()
    }
}

impl ErrorReporter for RecordingReporter {
    fn report_error(&self, source: &str, message: &str, error: Option<&TransportError>) {
        let detail = error.map(|e| e.to_string()).unwrap_or_default();
        self.reports
            .lock()
            .unwrap()
            .push(format!("{source}: {message} {detail}"));
    }
}

pub struct RecordingHandler {
    name: String,
    pub seen: Mutex<Vec<String>>,
}

impl RecordingHandler {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl DownloadableHandler for RecordingHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, item: &DownloadableItem) -> Result<()> {
        self.seen.lock().unwrap().push(item.downloadable_uuid.clone());
        Ok(())
    }
}

/// Fails for the uuids it is given, records the rest.
pub struct SelectiveHandler {
    pub fail_on: Vec<String>,
    pub seen: Mutex<Vec<String>>,
}

impl SelectiveHandler {
    pub fn failing_on(uuids: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            fail_on: uuids.iter().map(|u| u.to_string()).collect(),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl DownloadableHandler for SelectiveHandler {
    fn name(&self) -> &str {
        "selective"
    }

    async fn handle(&self, item: &DownloadableItem) -> Result<()> {
        self.seen.lock().unwrap().push(item.downloadable_uuid.clone());
        if self.fail_on.contains(&item.downloadable_uuid) {
            return Err(TransportError::Dispatch("boom".to_string()));
        }
        Ok(())
    }
}

pub struct PanickingHandler;

#[async_trait]
impl DownloadableHandler for PanickingHandler {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn handle(&self, _item: &DownloadableItem) -> Result<()> {
        panic!("handler bug");
    }
}

pub fn ack_settings() -> AcknowledgementConfig {
    AcknowledgementConfig {
        audit_identity: Some("urn:nhs-uk:identity:ods:MEDIPI".to_string()),
        sender_address: Some("urn:oid:9.9.9|urn:nhs-uk:addressing:ods:MEDIPI".to_string()),
        ..Default::default()
    }
}

pub fn settings_handle() -> SettingsHandle {
    SettingsHandle::new(ack_settings())
}

pub fn inbound_envelope() -> Envelope {
    Envelope::new(
        Address::parse("urn:oid:1.2.3|https://a.example/mailbox").unwrap(),
        vec![Address::parse("urn:nhs-uk:addressing:ods:MEDIPI").unwrap()],
        "urn:nhs-itk:services:201005:SendCDADocument-v2-0",
        vec![Payload::new("text/xml").with_id("P1").with_body("<ClinicalDocument/>")],
    )
    .unwrap()
    .with_interaction_id("I1")
}

/// Inbound envelope with a fixed tracking id, as it arrives over the wire.
pub fn inbound_with_tracking_id(tracking_id: &str) -> Envelope {
    let mut value = serde_json::to_value(inbound_envelope()).unwrap();
    value["trackingId"] = serde_json::Value::String(tracking_id.to_string());
    serde_json::from_value(value).unwrap()
}
