use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

use crate::interfaces::scheduler::ScheduledJob;

/// Fixed-interval driver for [`ScheduledJob`]s.
///
/// Each job runs on its own task. A run is awaited before the next tick is
/// taken, so runs of the same job never overlap. Errors and panics inside a
/// run are logged and the job keeps its schedule.
#[derive(Default)]
pub struct Scheduler {
    jobs: Vec<Arc<dyn ScheduledJob>>,
    handles: Vec<JoinHandle<()>>,
    shutdown: Option<watch::Sender<bool>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_job(&mut self, job: Arc<dyn ScheduledJob>) {
        self.jobs.push(job);
    }

    pub fn job_names(&self) -> Vec<String> {
        self.jobs.iter().map(|job| job.name().to_string()).collect()
    }

    pub fn start(&mut self) {
        if self.shutdown.is_some() {
            return;
        }
        let (tx, rx) = watch::channel(false);
        for job in &self.jobs {
            let job = job.clone();
            let mut rx = rx.clone();
            self.handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(job.interval());
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            run_job(job.clone()).await;
                        }
                        changed = rx.changed() => {
                            if changed.is_err() || *rx.borrow() {
                                break;
                            }
                        }
                    }
                }
                debug!(job = job.name(), "scheduled job stopped");
            }));
        }
        self.shutdown = Some(tx);
    }

    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(true);
        }
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
    }
}

async fn run_job(job: Arc<dyn ScheduledJob>) {
    let name = job.name().to_string();
    match tokio::spawn(async move { job.run().await }).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(job = %name, error = %err, "scheduled job failed"),
        Err(err) => error!(job = %name, error = %err, "scheduled job panicked"),
    }
}
