//! Audit events: the append-only record of everything that happened
//!
//! Every status change carries `status_after`, so the current status of
//! an instance is a pure projection over its event log (see
//! [`project_status`]).

use crate::{EventId, InstanceId, InstanceStatus, PrincipalId, StepId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kinds of audit events
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditEventType {
    Submitted,
    StepApproved,
    StepRejected,
    Escalated,
    Reminder,
    CommentAdded,
    Cancelled,
    Blocked,
    Reassigned,
    Expired,
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Submitted => "submitted",
            Self::StepApproved => "step_approved",
            Self::StepRejected => "step_rejected",
            Self::Escalated => "escalated",
            Self::Reminder => "reminder",
            Self::CommentAdded => "comment_added",
            Self::Cancelled => "cancelled",
            Self::Blocked => "blocked",
            Self::Reassigned => "reassigned",
            Self::Expired => "expired",
        };
        write!(f, "{}", s)
    }
}

/// One immutable entry in an instance's audit log
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: EventId,
    /// Global append order, assigned by the store
    pub sequence: u64,
    pub instance_id: InstanceId,
    pub event_type: AuditEventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<StepId>,
    pub actor: PrincipalId,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payload: serde_json::Value,
    /// The instance status this event produced, if it changed one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_after: Option<InstanceStatus>,
}

impl AuditEvent {
    pub fn new(
        instance_id: InstanceId,
        event_type: AuditEventType,
        actor: PrincipalId,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EventId::generate(),
            sequence: 0,
            instance_id,
            event_type,
            step_id: None,
            actor,
            timestamp,
            payload: serde_json::Value::Null,
            status_after: None,
        }
    }

    pub fn with_step(mut self, step_id: StepId) -> Self {
        self.step_id = Some(step_id);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_status(mut self, status: InstanceStatus) -> Self {
        self.status_after = Some(status);
        self
    }

    /// The `comment` field of the payload, if any
    pub fn comment(&self) -> Option<&str> {
        self.payload.get("comment").and_then(|c| c.as_str())
    }

    pub fn involves_step(&self, step_id: &StepId) -> bool {
        self.step_id.as_ref() == Some(step_id)
    }
}

/// Current status as implied by an ordered event log.
///
/// Returns `None` for an empty log.
pub fn project_status(events: &[AuditEvent]) -> Option<InstanceStatus> {
    events.iter().rev().find_map(|e| e.status_after)
}

/// A free-text comment on an instance, optionally tied to a step
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub instance_id: InstanceId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<StepId>,
    pub author: PrincipalId,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Comment {
    pub fn new(
        instance_id: InstanceId,
        author: PrincipalId,
        text: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            instance_id,
            step_id: None,
            author,
            text: text.into(),
            timestamp,
        }
    }

    pub fn on_step(mut self, step_id: StepId) -> Self {
        self.step_id = Some(step_id);
        self
    }
}
