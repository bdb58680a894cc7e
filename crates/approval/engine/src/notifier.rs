//! Notification hand-off
//!
//! State transitions never wait on delivery. Committed events and fired
//! reminders are pushed onto an unbounded [`NotificationOutbox`]; a
//! separate [`DispatchLoop`] task drains it into a
//! [`NotificationDispatcher`], retrying failed sends with exponential
//! backoff. Delivery is at-least-once; receivers dedupe on
//! `Notification::dedup_key`.

use crate::config::NotificationConfig;
use approval_types::Notification;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Delivery failure reported by a dispatcher
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("rejected by receiver: {0}")]
    Rejected(String),
}

/// The delivery collaborator (email, in-app inbox, chat bridge, ...)
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), DispatchError>;
}

/// Dispatcher that only logs; the daemon's default
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDispatcher;

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    async fn send(&self, notification: &Notification) -> Result<(), DispatchError> {
        let recipients: Vec<&str> = notification.recipients.iter().map(|p| p.as_str()).collect();
        tracing::info!(
            instance_id = %notification.instance_id,
            kind = ?notification.kind,
            dedup_key = %notification.dedup_key,
            recipients = ?recipients,
            "Notification"
        );
        Ok(())
    }
}

// ── Outbox ───────────────────────────────────────────────────────────

/// Fire-and-forget sender side of the notification queue
#[derive(Clone, Debug)]
pub struct NotificationOutbox {
    tx: Option<mpsc::UnboundedSender<Notification>>,
}

impl NotificationOutbox {
    /// A connected outbox and the receiver a [`DispatchLoop`] drains
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// An outbox that drops everything
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Queue a notification. Never blocks and never fails the caller.
    pub fn enqueue(&self, notification: Notification) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(err) = tx.send(notification) {
            tracing::debug!(
                dedup_key = %err.0.dedup_key,
                "Notification dropped: dispatch loop is gone"
            );
        }
    }
}

// ── Dispatch loop ────────────────────────────────────────────────────

/// Drains the outbox into a dispatcher until every sender is dropped
pub struct DispatchLoop {
    rx: mpsc::UnboundedReceiver<Notification>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    config: NotificationConfig,
}

impl DispatchLoop {
    pub fn new(
        rx: mpsc::UnboundedReceiver<Notification>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        config: NotificationConfig,
    ) -> Self {
        Self {
            rx,
            dispatcher,
            config,
        }
    }

    /// Run on its own task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Deliver until the channel closes
    pub async fn run(mut self) {
        tracing::info!("Notification dispatch loop started");
        while let Some(notification) = self.rx.recv().await {
            self.deliver(&notification).await;
        }
        tracing::info!("Notification dispatch loop stopped");
    }

    /// Try a notification up to `max_attempts` times. Returns whether it
    /// was delivered.
    pub async fn deliver(&self, notification: &Notification) -> bool {
        let attempts = self.config.max_attempts.max(1);
        let mut backoff = Duration::from_millis(self.config.retry_backoff_ms);

        for attempt in 1..=attempts {
            match self.dispatcher.send(notification).await {
                Ok(()) => {
                    tracing::trace!(dedup_key = %notification.dedup_key, attempt, "Notification delivered");
                    return true;
                }
                Err(e) if attempt < attempts => {
                    tracing::warn!(
                        dedup_key = %notification.dedup_key,
                        attempt,
                        error = %e,
                        "Notification delivery failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(e) => {
                    tracing::error!(
                        dedup_key = %notification.dedup_key,
                        instance_id = %notification.instance_id,
                        attempts,
                        error = %e,
                        "Notification delivery abandoned"
                    );
                }
            }
        }
        false
    }
}
