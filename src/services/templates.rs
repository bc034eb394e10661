use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracing::info;

use crate::error::{Result, TransportError};

pub const ACK_TEMPLATE_FILE: &str = "business-ack-payload-template.txt";
pub const NACK_TEMPLATE_FILE: &str = "business-nack-payload-template.txt";

const EMBEDDED_ACK: &str = include_str!("../../resources/business-ack-payload-template.txt");
const EMBEDDED_NACK: &str = include_str!("../../resources/business-nack-payload-template.txt");

/// Where the ack/nack payload templates are read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSource {
    Embedded,
    Directory(PathBuf),
}

impl TemplateSource {
    pub fn from_dir(dir: Option<&str>) -> Self {
        match dir.map(str::trim).filter(|d| !d.is_empty()) {
            Some(dir) => Self::Directory(PathBuf::from(dir)),
            None => Self::Embedded,
        }
    }

    fn load(&self) -> Result<AckTemplates> {
        match self {
            Self::Embedded => Ok(AckTemplates {
                ack: normalize(EMBEDDED_ACK),
                nack: normalize(EMBEDDED_NACK),
            }),
            Self::Directory(dir) => Ok(AckTemplates {
                ack: read_template(&dir.join(ACK_TEMPLATE_FILE))?,
                nack: read_template(&dir.join(NACK_TEMPLATE_FILE))?,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckTemplates {
    pub ack: String,
    pub nack: String,
}

fn read_template(path: &Path) -> Result<String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| TransportError::ResourceLoad(format!("{}: {e}", path.display())))?;
    if content.trim().is_empty() {
        return Err(TransportError::ResourceLoad(format!(
            "{}: template is empty",
            path.display()
        )));
    }
    Ok(normalize(&content))
}

// Templates are held line by line with `\n` endings regardless of source.
fn normalize(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    for line in content.lines() {
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// Load-once cache for the acknowledgement templates.
///
/// The first caller to [`TemplateCache::get`] reads the source while holding
/// the lock; concurrent first callers wait and then share the same copy. A
/// failed load leaves the cache empty.
#[derive(Debug)]
pub struct TemplateCache {
    source: TemplateSource,
    loaded: Mutex<Option<Arc<AckTemplates>>>,
    loads: AtomicUsize,
}

impl TemplateCache {
    pub fn new(source: TemplateSource) -> Self {
        Self {
            source,
            loaded: Mutex::new(None),
            loads: AtomicUsize::new(0),
        }
    }

    pub fn source(&self) -> &TemplateSource {
        &self.source
    }

    pub fn get(&self) -> Result<Arc<AckTemplates>> {
        let mut guard = self
            .loaded
            .lock()
            .map_err(|e| TransportError::Runtime(format!("template cache lock poisoned: {e}")))?;
        if let Some(templates) = guard.as_ref() {
            return Ok(templates.clone());
        }
        let templates = Arc::new(self.source.load()?);
        self.loads.fetch_add(1, Ordering::SeqCst);
        info!(source = ?self.source, "acknowledgement templates loaded");
        *guard = Some(templates.clone());
        Ok(templates)
    }

    /// Number of times the source has actually been read.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}
