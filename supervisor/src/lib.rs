//! Polling supervisor: drives the reconciliation engine on a fixed
//! interval, batches per-cycle log lines, classifies outcomes, applies
//! the error-burst threshold before alerting, and reports liveness.

use core_types::config::PollConfig;
use core_types::cycle::CycleLog;
use core_types::status::{OverallStatus, ServiceStatusHandle, StatusGauge};
use log::{error, info, warn};
use notifier::{HealthReporter, Notifier};
use recon_engine::Reconciler;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// How one cycle ended. A failure is soft until the consecutive-error
/// streak reaches the configured threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// At least one receipt was attached; the log batch was flushed.
    Submitted,
    /// Nothing to do; the log batch was discarded.
    Idle,
    /// Reconcile failed below the burst threshold; batch discarded.
    SoftFailure,
    /// The burst threshold tripped; batch flushed as an error alert.
    HardFailure,
}

pub struct PollingSupervisor {
    engine: Arc<dyn Reconciler>,
    notifier: Arc<dyn Notifier>,
    health: Arc<dyn HealthReporter>,
    interval: Duration,
    error_burst_threshold: u32,
    status: ServiceStatusHandle,
    error_streak: u32,
    cycles: u64,
    receipt_cycles: u64,
}

impl PollingSupervisor {
    pub fn new(
        engine: Arc<dyn Reconciler>,
        notifier: Arc<dyn Notifier>,
        health: Arc<dyn HealthReporter>,
        cfg: &PollConfig,
    ) -> Self {
        let status = ServiceStatusHandle::new("recon_supervisor");
        status.set_overall(OverallStatus::Warn);
        status.push_warning("reconciler not started");
        Self {
            engine,
            notifier,
            health,
            interval: Duration::from_secs(cfg.interval_secs),
            error_burst_threshold: cfg.error_burst_threshold,
            status,
            error_streak: 0,
            cycles: 0,
            receipt_cycles: 0,
        }
    }

    pub fn status_handle(&self) -> ServiceStatusHandle {
        self.status.clone()
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Cycle loop. The next tick is awaited only after the current cycle
    /// fully completes, so at most one reconciliation is ever in flight.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut log = CycleLog::new();
        log.push("receipt reconciler started");
        self.flush_info(&mut log).await;
        self.status.clear_warnings();

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("supervisor stopping");
                        break;
                    }
                    continue;
                }
            }
            self.run_cycle(&mut log).await;
        }
    }

    pub async fn run_cycle(&mut self, log: &mut CycleLog) -> CycleOutcome {
        self.cycles += 1;
        let outcome = match self.engine.reconcile(log).await {
            Ok(true) => {
                info!("new receipt found");
                self.error_streak = 0;
                self.receipt_cycles += 1;
                self.flush_info(log).await;
                self.health.report(true, "new receipt").await;
                self.status.clear_errors();
                self.status.set_overall(OverallStatus::Ok);
                CycleOutcome::Submitted
            }
            Ok(false) => {
                info!("no new receipt, sleeping until next cycle");
                self.error_streak = 0;
                log.discard();
                self.health.report(true, "no new receipt").await;
                self.status.clear_errors();
                self.status.set_overall(OverallStatus::Ok);
                CycleOutcome::Idle
            }
            Err(err) => {
                error!("reconcile failed: {}", err);
                log.push(format!("error: {}", err));
                self.error_streak += 1;
                self.health.report(false, &err.to_string()).await;
                self.status.clear_errors();
                self.status.push_error(err.to_string());
                self.status.set_overall(OverallStatus::Crit);
                if self.error_streak >= self.error_burst_threshold {
                    self.flush_error(log).await;
                    self.error_streak = 0;
                    CycleOutcome::HardFailure
                } else {
                    log.discard();
                    CycleOutcome::SoftFailure
                }
            }
        };
        self.publish_gauges();
        outcome
    }

    async fn flush_info(&self, log: &mut CycleLog) {
        if log.is_empty() {
            return;
        }
        let batch = log.drain();
        info!("{}", batch);
        self.deliver(&batch).await;
    }

    async fn flush_error(&self, log: &mut CycleLog) {
        if log.is_empty() {
            return;
        }
        let batch = log.drain();
        error!("{}", batch);
        self.deliver(&batch).await;
    }

    async fn deliver(&self, batch: &str) {
        if let Err(err) = self.notifier.notify(batch).await {
            warn!("notification delivery failed: {}", err);
        }
    }

    fn publish_gauges(&self) {
        self.status.set_gauges(vec![
            StatusGauge {
                label: "cycles".to_string(),
                value: self.cycles as f64,
                unit: None,
            },
            StatusGauge {
                label: "receipt_cycles".to_string(),
                value: self.receipt_cycles as f64,
                unit: None,
            },
            StatusGauge {
                label: "error_streak".to_string(),
                value: self.error_streak as f64,
                unit: None,
            },
        ]);
    }
}
