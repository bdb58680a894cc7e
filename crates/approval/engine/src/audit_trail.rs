//! Audit trail: the append-only record of every instance transition
//!
//! Instance state and the events describing the change are written in
//! one atomic commit. After a commit succeeds the events are broadcast
//! to subscribers and handed to the notification outbox; neither step
//! can fail the caller.

use crate::notifier::NotificationOutbox;
use crate::storage::{
    ApprovalStore, AuditStorage, ChangeSet, InstanceStorage, ReminderClaim, ReminderStorage,
};
use approval_types::{
    project_status, ApprovalResult, AuditEvent, AuditEventType, Comment, InstanceId,
    InstanceStatus, Notification, PrincipalId, Reminder, StorageError, WorkflowInstance,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// An event waiting to be committed, with the principals to notify
#[derive(Clone, Debug)]
pub struct PendingEvent {
    pub event: AuditEvent,
    pub recipients: BTreeSet<PrincipalId>,
    /// Set when the event records this reminder firing
    pub reminder: Option<Reminder>,
}

impl PendingEvent {
    pub fn new(event: AuditEvent, recipients: BTreeSet<PrincipalId>) -> Self {
        Self {
            event,
            recipients,
            reminder: None,
        }
    }

    fn notification(&self, stored: &AuditEvent) -> Notification {
        match &self.reminder {
            Some(reminder) => {
                Notification::for_reminder(reminder, self.recipients.clone(), stored.timestamp)
            }
            None => Notification::for_event(stored, self.recipients.clone()),
        }
    }
}

/// The full effect of one state-machine step
#[derive(Clone, Debug)]
pub struct Transition {
    /// The instance as it should be stored
    pub instance: WorkflowInstance,
    pub events: Vec<PendingEvent>,
    pub comments: Vec<Comment>,
    pub reminders: Vec<Reminder>,
}

impl Transition {
    pub fn new(instance: WorkflowInstance) -> Self {
        Self {
            instance,
            events: Vec::new(),
            comments: Vec::new(),
            reminders: Vec::new(),
        }
    }

    pub fn record(&mut self, event: AuditEvent, recipients: BTreeSet<PrincipalId>) {
        self.events.push(PendingEvent::new(event, recipients));
    }

    /// Fire `reminder` in this transition. Its event goes ahead of the
    /// events it caused, and the commit fails if it already fired.
    pub fn fire(&mut self, reminder: Reminder, event: AuditEvent, recipients: BTreeSet<PrincipalId>) {
        self.events.insert(
            0,
            PendingEvent {
                event,
                recipients,
                reminder: Some(reminder),
            },
        );
    }

    pub fn event_types(&self) -> Vec<AuditEventType> {
        self.events.iter().map(|p| p.event.event_type).collect()
    }
}

/// The stored result of a commit
#[derive(Clone, Debug)]
pub struct Committed {
    pub instance: WorkflowInstance,
    /// Events with their sequence numbers
    pub events: Vec<AuditEvent>,
}

/// Writes, reads and publishes audit events
pub struct AuditTrail {
    store: Arc<dyn ApprovalStore>,
    outbox: NotificationOutbox,
    event_tx: broadcast::Sender<AuditEvent>,
}

impl AuditTrail {
    pub fn new(store: Arc<dyn ApprovalStore>, outbox: NotificationOutbox) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store,
            outbox,
            event_tx,
        }
    }

    /// Live stream of committed events
    pub fn subscribe(&self) -> broadcast::Receiver<AuditEvent> {
        self.event_tx.subscribe()
    }

    /// Commit a transition. `expected_version` is the version the
    /// instance was loaded at (`None` for a new instance); the stored
    /// instance gets the next one.
    pub fn commit(
        &self,
        mut transition: Transition,
        expected_version: Option<u64>,
    ) -> ApprovalResult<Committed> {
        transition.instance.version = expected_version.map(|v| v + 1).unwrap_or(1);
        let instance = transition.instance.clone();

        let pending = transition.events;
        let change = ChangeSet {
            instance: transition.instance,
            expected_version,
            events: pending.iter().map(|p| p.event.clone()).collect(),
            comments: transition.comments,
            reminders: transition.reminders,
            fired_reminders: pending
                .iter()
                .filter_map(|p| p.reminder.as_ref().map(|r| r.id.clone()))
                .collect(),
        };
        let stored = self.store.commit(change)?;

        for (event, pending) in stored.iter().zip(&pending) {
            self.publish(event, pending.notification(event));
        }
        Ok(Committed {
            instance,
            events: stored,
        })
    }

    /// Append an event that does not change instance state (comments on
    /// any instance, including terminal ones)
    pub fn append(
        &self,
        event: AuditEvent,
        comment: Option<Comment>,
        recipients: BTreeSet<PrincipalId>,
    ) -> ApprovalResult<AuditEvent> {
        let mut stored = self
            .store
            .append(vec![event], comment.into_iter().collect())?;
        let event = stored.pop().ok_or_else(|| {
            StorageError::Backend("append returned no event".into())
        })?;
        self.publish(&event, Notification::for_event(&event, recipients));
        Ok(event)
    }

    /// Claim a due reminder and record its audit event in one write.
    /// Notifies `recipients` only if this call won the claim and the
    /// reminder had an effect (`event` is `Some`).
    pub fn fire_reminder(
        &self,
        reminder: &Reminder,
        event: Option<AuditEvent>,
        recipients: BTreeSet<PrincipalId>,
        now: DateTime<Utc>,
    ) -> ApprovalResult<ReminderClaim> {
        let claim = self.store.claim_reminder(&reminder.id, event)?;
        if let ReminderClaim::Claimed(Some(event)) = &claim {
            tracing::trace!(
                instance_id = %event.instance_id,
                sequence = event.sequence,
                kind = %reminder.kind,
                "Reminder recorded"
            );
            let _ = self.event_tx.send(event.clone());
            self.outbox
                .enqueue(Notification::for_reminder(reminder, recipients, now));
        }
        Ok(claim)
    }

    /// Time-ordered events for an instance
    pub fn query(&self, instance_id: &InstanceId) -> ApprovalResult<Vec<AuditEvent>> {
        Ok(self.store.events_for(instance_id)?)
    }

    pub fn comments(&self, instance_id: &InstanceId) -> ApprovalResult<Vec<Comment>> {
        Ok(self.store.comments_for(instance_id)?)
    }

    /// Status derived purely from the event log
    pub fn replay_status(&self, instance_id: &InstanceId) -> ApprovalResult<Option<InstanceStatus>> {
        Ok(project_status(&self.query(instance_id)?))
    }

    fn publish(&self, event: &AuditEvent, notification: Notification) {
        tracing::trace!(
            instance_id = %event.instance_id,
            sequence = event.sequence,
            event = %event.event_type,
            "Audit event appended"
        );
        // No subscribers is fine
        let _ = self.event_tx.send(event.clone());
        self.outbox.enqueue(notification);
    }
}
