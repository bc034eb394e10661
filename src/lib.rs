pub mod config;
pub mod daemon;
pub mod domains;
pub mod error;
pub mod handlers;
pub mod interfaces;
pub mod scheduler;
pub mod services;

pub use crate::config::{Config, SettingsHandle};
pub use crate::domains::downloadable::{DownloadType, DownloadableItem};
pub use crate::domains::envelope::{Address, Envelope, Identity, Payload};
pub use crate::error::{Result, TransportError};
pub use crate::services::acknowledgement::AcknowledgementGenerator;
pub use crate::services::dispatch::{DispatchOutcome, DispatchRegistry};
pub use crate::services::poller::{DownloadPoller, PollCycleOutcome};
