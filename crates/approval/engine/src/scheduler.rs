//! Reminder scheduler
//!
//! A background loop that periodically fires due reminders. Each
//! reminder is claimed atomically in storage, so overlapping scans (a
//! tick racing a manual trigger, or two daemons on one store) fire it at
//! most once.

use crate::config::SchedulerConfig;
use crate::engine::{ApprovalEngine, ReminderOutcome};
use approval_types::ApprovalResult;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Counts from one scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Reminders that were due
    pub due: usize,
    pub fired: usize,
    /// Claimed without effect (step decided, instance finished)
    pub stale: usize,
    /// Lost the claim to a concurrent scan
    pub duplicate: usize,
    pub failed: usize,
}

/// Fires due-date and expiration reminders against running instances
pub struct ReminderScheduler {
    config: SchedulerConfig,
    engine: Arc<ApprovalEngine>,
    scan_tx: mpsc::Sender<()>,
    running: Arc<RwLock<bool>>,
}

impl ReminderScheduler {
    /// Create a scheduler and the trigger receiver [`Self::start`] consumes
    pub fn new(
        config: SchedulerConfig,
        engine: Arc<ApprovalEngine>,
    ) -> (Arc<Self>, mpsc::Receiver<()>) {
        let (scan_tx, scan_rx) = mpsc::channel(10);

        let scheduler = Arc::new(Self {
            config,
            engine,
            scan_tx,
            running: Arc::new(RwLock::new(false)),
        });

        (scheduler, scan_rx)
    }

    /// Request an immediate scan
    pub async fn trigger_scan(&self) {
        let _ = self.scan_tx.send(()).await;
    }

    /// Spawn the scan loop
    pub async fn start(self: Arc<Self>, mut scan_rx: mpsc::Receiver<()>) -> JoinHandle<()> {
        {
            let mut running = self.running.write().await;
            *running = true;
        }

        tracing::info!(
            interval_secs = self.config.scan_interval_secs,
            "Reminder scheduler started"
        );

        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(scheduler.config.scan_interval_secs.max(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        scheduler.run_scan("interval");
                    }
                    Some(_) = scan_rx.recv() => {
                        scheduler.run_scan("trigger");
                    }
                    else => break,
                }

                let running = scheduler.running.read().await;
                if !*running {
                    break;
                }
            }

            tracing::info!("Reminder scheduler stopped");
        })
    }

    /// Stop after the current iteration
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        // Wake the loop so it notices
        let _ = self.scan_tx.try_send(());
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// One pass over everything due at `now`
    pub fn scan_at(&self, now: DateTime<Utc>) -> ApprovalResult<ScanReport> {
        let due = self.engine.due_reminders(now)?;
        let mut report = ScanReport {
            due: due.len(),
            ..Default::default()
        };

        for reminder in &due {
            match self.engine.fire_reminder(reminder, now) {
                Ok(ReminderOutcome::Fired) => report.fired += 1,
                Ok(ReminderOutcome::Stale) => report.stale += 1,
                Ok(ReminderOutcome::AlreadyFired) => report.duplicate += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(
                        reminder_id = %reminder.id,
                        instance_id = %reminder.instance_id,
                        kind = %reminder.kind,
                        error = %e,
                        "Failed to fire reminder"
                    );
                }
            }
        }

        Ok(report)
    }

    fn run_scan(&self, cause: &str) {
        match self.scan_at(Utc::now()) {
            Ok(report) if report.due > 0 => tracing::debug!(
                cause,
                due = report.due,
                fired = report.fired,
                stale = report.stale,
                duplicate = report.duplicate,
                failed = report.failed,
                "Reminder scan complete"
            ),
            Ok(_) => tracing::trace!(cause, "Reminder scan found nothing due"),
            Err(e) => tracing::error!(cause, error = %e, "Reminder scan failed"),
        }
    }
}
