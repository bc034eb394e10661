use std::io::Write;

use serde_json::json;
use tempfile::NamedTempFile;

use medipi_transport::config::{Config, FailurePolicy};
use medipi_transport::TransportError;

#[test]
fn config_file_loads_both_sections() {
    let mut file = NamedTempFile::new().unwrap();
    let content = json!({
        "acknowledgement": {
            "positive_response": "y",
            "audit_identity": "urn:nhs-uk:identity:ods:MEDIPI",
            "sender_address": "urn:nhs-uk:addressing:ods:MEDIPI"
        },
        "poller": {
            "base_url": "https://concentrator.example/medipi",
            "device_id": "device-1",
            "poll_seconds": 30,
            "failure_policy": {"mode": "backoff", "max_skipped_cycles": 3}
        }
    });
    write!(file, "{}", content).unwrap();

    let config = Config::from_file(file.path()).unwrap();
    let ack = config.acknowledgement.unwrap();
    assert!(ack.is_positive());
    assert_eq!(ack.sender_address().unwrap().uri(), "urn:nhs-uk:addressing:ods:MEDIPI");

    let poller = config.poller.unwrap();
    assert_eq!(poller.device_id().unwrap(), "device-1");
    assert_eq!(poller.poll_seconds(), 30);
    assert_eq!(poller.timeout_seconds(), 10);
    assert_eq!(
        poller.failure_policy(),
        FailurePolicy::Backoff {
            max_skipped_cycles: 3
        }
    );
}

#[test]
fn unreadable_config_is_a_config_error() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{{ not json").unwrap();
    assert!(matches!(
        Config::from_file(file.path()),
        Err(TransportError::Config(_))
    ));
    assert!(matches!(
        Config::from_file("/nonexistent/medipi-transport.json"),
        Err(TransportError::Config(_))
    ));
}
