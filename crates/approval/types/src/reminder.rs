//! Time-based reminders scheduled against running instances

use crate::{InstanceId, ReminderId, StepId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a reminder is about
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReminderKind {
    /// The current step is approaching its due date
    StepDueSoon,
    /// The current step's due date has passed; triggers escalation
    StepOverdue,
    /// The overall due date is approaching
    ExpirationWarning,
    /// The overall due date has passed
    Expiration,
}

impl ReminderKind {
    /// Step-scoped reminders go stale once their step is decided
    pub fn is_step_scoped(&self) -> bool {
        matches!(self, Self::StepDueSoon | Self::StepOverdue)
    }
}

impl fmt::Display for ReminderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::StepDueSoon => "step_due_soon",
            Self::StepOverdue => "step_overdue",
            Self::ExpirationWarning => "expiration_warning",
            Self::Expiration => "expiration",
        };
        write!(f, "{}", s)
    }
}

/// A scheduled reminder. `fired` flips exactly once.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: ReminderId,
    pub instance_id: InstanceId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<StepId>,
    /// Activation time of the step this reminder was scheduled for; a
    /// re-activated step leaves older reminders behind
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor: Option<DateTime<Utc>>,
    pub kind: ReminderKind,
    pub fire_at: DateTime<Utc>,
    pub fired: bool,
}

impl Reminder {
    pub fn new(instance_id: InstanceId, kind: ReminderKind, fire_at: DateTime<Utc>) -> Self {
        Self {
            id: ReminderId::generate(),
            instance_id,
            step_id: None,
            anchor: None,
            kind,
            fire_at,
            fired: false,
        }
    }

    pub fn for_step(mut self, step_id: StepId, activated_at: DateTime<Utc>) -> Self {
        self.step_id = Some(step_id);
        self.anchor = Some(activated_at);
        self
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.fired && self.fire_at <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_is_due() {
        let now = Utc::now();
        let mut r = Reminder::new(InstanceId::new("i"), ReminderKind::Expiration, now);
        assert!(r.is_due(now));
        assert!(!r.is_due(now - Duration::seconds(1)));
        r.fired = true;
        assert!(!r.is_due(now + Duration::days(1)));
    }

    #[test]
    fn test_step_scope() {
        assert!(ReminderKind::StepOverdue.is_step_scoped());
        assert!(!ReminderKind::ExpirationWarning.is_step_scoped());
    }
}
