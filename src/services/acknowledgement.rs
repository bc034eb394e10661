use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use time::macros::format_description;
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::config::SettingsHandle;
use crate::domains::envelope::{new_id, Address, Envelope, Payload};
use crate::error::{Result, TransportError};
use crate::services::templates::{TemplateCache, TemplateSource};

pub const ACK_SERVICE: &str = "urn:nhs-itk:services:201005:SendBusinessAck-v1-0";
pub const ACK_INTERACTION: &str = "urn:nhs-itk:interaction:ITKBusinessAcknowledgement-v1-0";
pub const ACK_PROFILE_ID: &str = "urn:nhs-en:profile:ITKBusinessAcknowledgement-v1-0";
pub const ACK_MIME_TYPE: &str = "text/xml";

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"__[A-Z0-9_]+__").expect("placeholder pattern is valid"));

/// Builds business acknowledgements (ack or nack) in reply to inbound envelopes.
pub struct AcknowledgementGenerator {
    settings: SettingsHandle,
    templates: TemplateCache,
}

impl AcknowledgementGenerator {
    /// Templates come from the configured `template_dir`, or the built-in copies.
    pub fn new(settings: SettingsHandle) -> Self {
        let source = TemplateSource::from_dir(settings.snapshot().template_dir.as_deref());
        Self::with_source(settings, source)
    }

    pub fn with_source(settings: SettingsHandle, source: TemplateSource) -> Self {
        Self {
            settings,
            templates: TemplateCache::new(source),
        }
    }

    pub fn settings(&self) -> &SettingsHandle {
        &self.settings
    }

    pub fn templates(&self) -> &TemplateCache {
        &self.templates
    }

    pub fn acknowledge(&self, original: &Envelope) -> Result<Envelope> {
        let config = self.settings.snapshot();
        let audit = config.audit_identity()?;
        let sender = config.sender_address()?;
        let templates = self.templates.get()?;

        let positive = config.is_positive();
        let template = if positive {
            &templates.ack
        } else {
            &templates.nack
        };

        let mut substitutions = common_substitutions(original, &sender)?;
        if !positive {
            substitutions.extend([
                ("__ERROR_CODE__", escape_xml(config.nack_error_code())),
                ("__ERROR_TEXT__", escape_xml(config.nack_error_text())),
                ("__DIAGNOSTIC_TEXT__", escape_xml(config.nack_diagnostic_text())),
            ]);
        }
        ensure_known_tags(template, &substitutions)?;
        let body = fill_template(template, &substitutions);

        let payload = Payload::new(ACK_MIME_TYPE)
            .with_body(body)
            .with_profile_id(ACK_PROFILE_ID);
        let ack = Envelope::new(
            sender,
            vec![original.sender().clone()],
            ACK_SERVICE,
            vec![payload],
        )?
        .with_audit(vec![audit])
        .with_interaction_id(ACK_INTERACTION);

        info!(
            inbound = original.tracking_id(),
            reply = ack.tracking_id(),
            positive,
            "business acknowledgement generated"
        );
        Ok(ack)
    }
}

fn common_substitutions(
    original: &Envelope,
    sender: &Address,
) -> Result<Vec<(&'static str, String)>> {
    let interaction = original.interaction_id().ok_or_else(|| {
        TransportError::InvalidEnvelope(format!(
            "envelope {} has no interaction id",
            original.tracking_id()
        ))
    })?;
    let payload_id = original.payload_id(0).ok_or_else(|| {
        TransportError::InvalidEnvelope(format!(
            "envelope {} has no payload",
            original.tracking_id()
        ))
    })?;
    Ok(vec![
        ("__MESSAGE_ID__", new_id()),
        ("__HL7_CREATION_DATE__", creation_timestamp()?),
        ("__INTERACTION_ID__", escape_xml(interaction)),
        ("__INBOUND_TRANSMISSIONID__", escape_xml(original.tracking_id())),
        (
            "__RESPONDER_RECEIVER_ADDRESS_OID__",
            escape_xml(original.sender().oid()),
        ),
        (
            "__RESPONDER_RECEIVER_ADDRESS__",
            escape_xml(original.sender().uri()),
        ),
        ("__RESPONDER_SENDER_ADDRESS_OID__", escape_xml(sender.oid())),
        ("__RESPONDER_SENDER_ADDRESS__", escape_xml(sender.uri())),
        ("__INBOUND_PAYLOAD_ID__", escape_xml(payload_id)),
    ])
}

/// Compact `yyyyMMddHHmmss` creation time, in UTC.
pub fn creation_timestamp() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(format_description!(
            "[year][month][day][hour][minute][second]"
        ))
        .map_err(|e| TransportError::Runtime(e.to_string()))
}

/// Replaces every `__TAG__` in `template` that has a value in `values`.
///
/// The template is scanned once, so inserted values are never rescanned even
/// when they contain text shaped like a tag.
pub fn fill_template(template: &str, values: &[(&str, String)]) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            let tag = &caps[0];
            values
                .iter()
                .find(|(known, _)| *known == tag)
                .map(|(_, value)| value.clone())
                .unwrap_or_else(|| tag.to_string())
        })
        .into_owned()
}

fn ensure_known_tags(template: &str, values: &[(&'static str, String)]) -> Result<()> {
    let mut unknown: Vec<&str> = PLACEHOLDER
        .find_iter(template)
        .map(|m| m.as_str())
        .filter(|tag| !values.iter().any(|(known, _)| known == tag))
        .collect();
    if unknown.is_empty() {
        return Ok(());
    }
    unknown.sort_unstable();
    unknown.dedup();
    debug!(?unknown, "unknown acknowledgement placeholders");
    Err(TransportError::ResourceLoad(format!(
        "template has unfilled placeholders: {}",
        unknown.join(", ")
    )))
}

fn escape_xml(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}

/// True when `text` still holds a `__TAG__` style placeholder.
pub fn has_placeholders(text: &str) -> bool {
    PLACEHOLDER.is_match(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AcknowledgementConfig;
    use crate::services::templates::{ACK_TEMPLATE_FILE, NACK_TEMPLATE_FILE};

    fn settings() -> SettingsHandle {
        SettingsHandle::new(AcknowledgementConfig {
            audit_identity: Some("urn:nhs-uk:identity:ods:MEDIPI".to_string()),
            sender_address: Some("urn:oid:9.9.9|urn:nhs-uk:addressing:ods:MEDIPI".to_string()),
            ..Default::default()
        })
    }

    fn inbound() -> Envelope {
        Envelope::new(
            Address::parse("urn:oid:1.2.3|https://a.example/mailbox").unwrap(),
            vec![Address::parse("urn:nhs-uk:addressing:ods:MEDIPI").unwrap()],
            "urn:nhs-itk:services:201005:SendCDADocument-v2-0",
            vec![Payload::new("text/xml").with_id("P1").with_body("<doc/>")],
        )
        .unwrap()
        .with_interaction_id("I1")
    }

    #[test]
    fn fill_replaces_every_occurrence_in_one_pass() {
        let values = vec![
            ("__A__", "__B__".to_string()),
            ("__B__", "2".to_string()),
        ];
        assert_eq!(
            fill_template("__A__ __B__ __A__ __C__", &values),
            "__B__ 2 __B__ __C__"
        );
    }

    #[test]
    fn timestamp_is_compact_numeric() {
        let ts = creation_timestamp().unwrap();
        assert_eq!(ts.len(), 14);
        assert!(ts.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn escaping_keeps_xml_attributes_intact() {
        assert_eq!(escape_xml("a&b<\"c\">"), "a&amp;b&lt;&quot;c&quot;&gt;");
    }

    #[test]
    fn ack_fills_every_placeholder() {
        let generator = AcknowledgementGenerator::new(settings());
        let ack = generator.acknowledge(&inbound()).unwrap();
        let body = ack.payload(0).unwrap().body();
        assert!(!has_placeholders(body));
        assert!(body.contains("typeCode=\"AA\""));
        assert!(body.contains("root=\"urn:oid:9.9.9\""));
    }

    #[test]
    fn missing_interaction_is_rejected() {
        let generator = AcknowledgementGenerator::new(settings());
        let envelope = Envelope::new(
            Address::parse("https://a.example/mailbox").unwrap(),
            vec![Address::parse("https://b.example").unwrap()],
            "urn:svc",
            vec![Payload::new("text/xml")],
        )
        .unwrap();
        assert!(matches!(
            generator.acknowledge(&envelope),
            Err(TransportError::InvalidEnvelope(_))
        ));
    }

    #[test]
    fn config_error_leaves_template_cache_untouched() {
        let generator =
            AcknowledgementGenerator::new(SettingsHandle::new(AcknowledgementConfig::default()));
        assert!(matches!(
            generator.acknowledge(&inbound()),
            Err(TransportError::Config(_))
        ));
        assert_eq!(generator.templates().load_count(), 0);
    }

    #[test]
    fn unknown_template_tag_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(ACK_TEMPLATE_FILE), "<a>__UNKNOWN_TAG__</a>").unwrap();
        std::fs::write(dir.path().join(NACK_TEMPLATE_FILE), "<n/>").unwrap();
        let generator = AcknowledgementGenerator::with_source(
            settings(),
            TemplateSource::Directory(dir.path().to_path_buf()),
        );
        let err = generator.acknowledge(&inbound()).unwrap_err();
        assert!(err.to_string().contains("__UNKNOWN_TAG__"));
    }

    #[test]
    fn nack_tags_are_unknown_to_the_ack_template() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(ACK_TEMPLATE_FILE), "<a>__ERROR_CODE__</a>").unwrap();
        std::fs::write(dir.path().join(NACK_TEMPLATE_FILE), "<n>__ERROR_CODE__</n>").unwrap();
        let generator = AcknowledgementGenerator::with_source(
            settings(),
            TemplateSource::Directory(dir.path().to_path_buf()),
        );
        assert!(matches!(
            generator.acknowledge(&inbound()),
            Err(TransportError::ResourceLoad(_))
        ));

        generator.settings().replace(crate::config::AcknowledgementConfig {
            positive_response: Some("n".to_string()),
            ..generator.settings().snapshot()
        });
        let nack = generator.acknowledge(&inbound()).unwrap();
        assert_eq!(nack.payload(0).unwrap().body(), "<n>1000</n>\n");
    }
}
