use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use http::StatusCode;
use tracing::{debug, error, info, warn};

use crate::config::FailurePolicy;
use crate::domains::downloadable::DownloadableItem;
use crate::error::{Result, TransportError};
use crate::interfaces::reporting::ErrorReporter;
use crate::interfaces::scheduler::ScheduledJob;
use crate::interfaces::transport::DownloadSource;
use crate::services::dispatch::DispatchRegistry;

const SOURCE: &str = "poller";

/// Patient credential, only known once the patient has logged in.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    patient_id: Arc<RwLock<Option<String>>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_patient_id(&self, patient_id: impl Into<String>) {
        let value = Some(patient_id.into());
        match self.patient_id.write() {
            Ok(mut guard) => *guard = value,
            Err(poisoned) => *poisoned.into_inner() = value,
        }
    }

    pub fn clear(&self) {
        match self.patient_id.write() {
            Ok(mut guard) => *guard = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }

    /// Blank values count as absent.
    pub fn patient_id(&self) -> Option<String> {
        let value = match self.patient_id.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        value.filter(|v| !v.trim().is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Polling,
    Dispatching,
}

/// Classification of a non-200 answer to the download list request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollFailure {
    /// 404: the device and patient do not match.
    DeviceMismatch,
    /// 426: the client must be updated.
    UpdateRequired,
    /// 500
    ServerError,
    Unclassified(u16),
}

impl PollFailure {
    pub fn classify(status: StatusCode) -> Self {
        match status.as_u16() {
            404 => Self::DeviceMismatch,
            426 => Self::UpdateRequired,
            500 => Self::ServerError,
            other => Self::Unclassified(other),
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::DeviceMismatch => 404,
            Self::UpdateRequired => 426,
            Self::ServerError => 500,
            Self::Unclassified(code) => *code,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Self::DeviceMismatch => "no match for device/patient",
            Self::UpdateRequired => "client update required",
            Self::ServerError => "server error",
            Self::Unclassified(_) => "unclassified",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoCredential,
    CycleInProgress,
    BackingOff { remaining: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollCycleOutcome {
    Skipped(SkipReason),
    Completed { items: usize, failed: usize },
    Rejected { failure: PollFailure, body: String },
    Errored(String),
}

#[derive(Debug)]
struct PollerStatus {
    state: PollState,
    consecutive_failures: u32,
    skip_remaining: u32,
}

/// Periodically asks the concentrator for pending items and dispatches them.
pub struct DownloadPoller {
    device_id: String,
    credentials: CredentialStore,
    source: Arc<dyn DownloadSource>,
    registry: Arc<DispatchRegistry>,
    reporter: Arc<dyn ErrorReporter>,
    policy: FailurePolicy,
    status: Mutex<PollerStatus>,
    cycle: tokio::sync::Mutex<()>,
}

impl DownloadPoller {
    pub fn new(
        device_id: impl Into<String>,
        credentials: CredentialStore,
        source: Arc<dyn DownloadSource>,
        registry: Arc<DispatchRegistry>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            credentials,
            source,
            registry,
            reporter,
            policy: FailurePolicy::default(),
            status: Mutex::new(PollerStatus {
                state: PollState::Idle,
                consecutive_failures: 0,
                skip_remaining: 0,
            }),
            cycle: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn state(&self) -> PollState {
        self.with_status(|status| status.state)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.with_status(|status| status.consecutive_failures)
    }

    /// Runs one poll cycle to completion. Never returns an error: every
    /// failure is logged, classified or reported and folded into the outcome.
    pub async fn poll_once(&self) -> PollCycleOutcome {
        let Ok(_cycle) = self.cycle.try_lock() else {
            debug!("previous poll cycle still running");
            return PollCycleOutcome::Skipped(SkipReason::CycleInProgress);
        };

        let Some(patient_id) = self.credentials.patient_id() else {
            return PollCycleOutcome::Skipped(SkipReason::NoCredential);
        };

        if let Some(remaining) = self.take_backoff_tick() {
            debug!(remaining, "poll cycle skipped by failure policy");
            return PollCycleOutcome::Skipped(SkipReason::BackingOff { remaining });
        }

        self.set_state(PollState::Polling);
        let outcome = match self.run_cycle(&patient_id).await {
            Ok(outcome) => outcome,
            Err(err) => {
                let message =
                    format!("Error detected when attempting to poll the Concentrator: {err}");
                error!(device = %self.device_id, error = %err, "poll cycle failed");
                self.reporter.report_error(SOURCE, &message, Some(&err));
                PollCycleOutcome::Errored(err.to_string())
            }
        };
        match &outcome {
            PollCycleOutcome::Completed { .. } => self.record_success(),
            _ => self.record_failure(),
        }
        self.set_state(PollState::Idle);
        outcome
    }

    async fn run_cycle(&self, patient_id: &str) -> Result<PollCycleOutcome> {
        let response = self.source.fetch_pending(&self.device_id, patient_id).await?;
        debug!(status = response.status.as_u16(), "poll download returned");

        if response.status != StatusCode::OK {
            let failure = PollFailure::classify(response.status);
            error!(
                status = failure.status_code(),
                class = failure.describe(),
                body = %response.body,
                "error code detected when trying to return downloadable list"
            );
            return Ok(PollCycleOutcome::Rejected {
                failure,
                body: response.body,
            });
        }

        let items: Vec<DownloadableItem> = serde_json::from_str(&response.body)
            .map_err(|e| TransportError::Serialization(e.to_string()))?;

        self.set_state(PollState::Dispatching);
        let mut failed = 0;
        for item in &items {
            info!(
                downloadable = %item.downloadable_uuid,
                download_type = %item.download_type,
                "new downloadable detected"
            );
            if !self.registry.dispatch(item).await.is_handled() {
                failed += 1;
            }
        }
        Ok(PollCycleOutcome::Completed {
            items: items.len(),
            failed,
        })
    }

    fn take_backoff_tick(&self) -> Option<u32> {
        self.with_status(|status| {
            if status.skip_remaining == 0 {
                return None;
            }
            status.skip_remaining -= 1;
            Some(status.skip_remaining)
        })
    }

    fn record_success(&self) {
        self.with_status(|status| {
            status.consecutive_failures = 0;
            status.skip_remaining = 0;
        });
    }

    fn record_failure(&self) {
        let policy = self.policy;
        self.with_status(|status| {
            status.consecutive_failures = status.consecutive_failures.saturating_add(1);
            status.skip_remaining = skipped_cycles(policy, status.consecutive_failures);
            if status.skip_remaining > 0 {
                warn!(
                    failures = status.consecutive_failures,
                    skip = status.skip_remaining,
                    "backing off concentrator polling"
                );
            }
        });
    }

    fn set_state(&self, state: PollState) {
        self.with_status(|status| status.state = state);
    }

    fn with_status<T>(&self, f: impl FnOnce(&mut PollerStatus) -> T) -> T {
        match self.status.lock() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

/// Ticks to skip after the `failures`-th consecutive failed cycle.
pub fn skipped_cycles(policy: FailurePolicy, failures: u32) -> u32 {
    match policy {
        FailurePolicy::NextCycle => 0,
        FailurePolicy::Backoff { max_skipped_cycles } => {
            if failures == 0 {
                return 0;
            }
            let exp = (failures - 1).min(31);
            let skip = (1u64 << exp) - 1;
            skip.min(u64::from(max_skipped_cycles)) as u32
        }
    }
}

/// Scheduled wrapper running one poll cycle per tick.
pub struct PollerJob {
    poller: Arc<DownloadPoller>,
    interval: Duration,
}

impl PollerJob {
    pub fn new(poller: Arc<DownloadPoller>, interval: Duration) -> Self {
        Self { poller, interval }
    }
}

#[async_trait]
impl ScheduledJob for PollerJob {
    fn name(&self) -> &str {
        "download_poller"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self) -> Result<()> {
        let outcome = self.poller.poll_once().await;
        debug!(?outcome, "poll cycle finished");
        Ok(())
    }
}
