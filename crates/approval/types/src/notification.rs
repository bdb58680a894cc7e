//! Notifications handed to the external delivery collaborator
//!
//! Delivery is at-least-once; `dedup_key` (the audit event id or the
//! reminder id) lets receivers drop repeats.

use crate::{AuditEvent, AuditEventType, InstanceId, PrincipalId, Reminder, ReminderKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// What triggered the notification
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", content = "type", rename_all = "snake_case")]
pub enum NotificationKind {
    Audit(AuditEventType),
    Reminder(ReminderKind),
}

/// A message for the notification dispatcher
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub dedup_key: String,
    pub kind: NotificationKind,
    pub instance_id: InstanceId,
    pub recipients: BTreeSet<PrincipalId>,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn for_event(event: &AuditEvent, recipients: BTreeSet<PrincipalId>) -> Self {
        Self {
            dedup_key: event.id.to_string(),
            kind: NotificationKind::Audit(event.event_type),
            instance_id: event.instance_id.clone(),
            recipients,
            payload: serde_json::json!({
                "step_id": event.step_id,
                "actor": event.actor,
                "status": event.status_after,
                "detail": event.payload,
            }),
            created_at: event.timestamp,
        }
    }

    pub fn for_reminder(
        reminder: &Reminder,
        recipients: BTreeSet<PrincipalId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            dedup_key: reminder.id.to_string(),
            kind: NotificationKind::Reminder(reminder.kind),
            instance_id: reminder.instance_id.clone(),
            recipients,
            payload: serde_json::json!({
                "step_id": reminder.step_id,
                "fire_at": reminder.fire_at,
            }),
            created_at: now,
        }
    }

    pub fn is_reminder(&self) -> bool {
        matches!(self.kind, NotificationKind::Reminder(_))
    }
}
