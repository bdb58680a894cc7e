//! In-memory storage implementation

use super::traits::*;
use approval_types::{
    AuditEvent, Comment, InstanceId, PrincipalId, Reminder, ReminderId, RequestType,
    StorageError, StorageResult, WorkflowInstance, WorkflowTemplate,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Rows that a single commit may touch, kept under one lock so a commit
/// is all-or-nothing.
#[derive(Debug, Default)]
struct Tables {
    instances: HashMap<InstanceId, WorkflowInstance>,
    events: HashMap<InstanceId, Vec<AuditEvent>>,
    comments: HashMap<InstanceId, Vec<Comment>>,
    reminders: HashMap<ReminderId, Reminder>,
    next_sequence: u64,
}

impl Tables {
    fn append_events(&mut self, events: Vec<AuditEvent>) -> Vec<AuditEvent> {
        let mut stored = Vec::with_capacity(events.len());
        for mut event in events {
            self.next_sequence += 1;
            event.sequence = self.next_sequence;
            self.events
                .entry(event.instance_id.clone())
                .or_default()
                .push(event.clone());
            stored.push(event);
        }
        stored
    }

    fn append_comments(&mut self, comments: Vec<Comment>) {
        for comment in comments {
            self.comments
                .entry(comment.instance_id.clone())
                .or_default()
                .push(comment);
        }
    }
}

/// In-memory storage for development and testing
#[derive(Debug, Default)]
pub struct InMemoryStore {
    templates: RwLock<Vec<WorkflowTemplate>>,
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of audit events across all instances
    pub fn event_count(&self) -> usize {
        self.tables.read().events.values().map(Vec::len).sum()
    }
}

impl TemplateStorage for InMemoryStore {
    fn save_template(&self, template: &WorkflowTemplate) -> StorageResult<()> {
        let mut templates = self.templates.write();
        if templates.iter().any(|t| {
            t.request_type == template.request_type && t.version == template.version
        }) {
            return Err(StorageError::Duplicate(format!(
                "template {} v{}",
                template.request_type, template.version
            )));
        }
        templates.push(template.clone());
        Ok(())
    }

    fn list_templates(&self) -> StorageResult<Vec<WorkflowTemplate>> {
        Ok(self.templates.read().clone())
    }

    fn templates_for(&self, request_type: &RequestType) -> StorageResult<Vec<WorkflowTemplate>> {
        let templates = self.templates.read();
        let mut found: Vec<_> = templates
            .iter()
            .filter(|t| &t.request_type == request_type)
            .cloned()
            .collect();
        found.sort_by_key(|t| t.version);
        Ok(found)
    }
}

impl InstanceStorage for InMemoryStore {
    fn get_instance(&self, id: &InstanceId) -> StorageResult<Option<WorkflowInstance>> {
        Ok(self.tables.read().instances.get(id).cloned())
    }

    fn list_instances(&self) -> StorageResult<Vec<WorkflowInstance>> {
        let tables = self.tables.read();
        let mut instances: Vec<_> = tables.instances.values().cloned().collect();
        instances.sort_by_key(|i| i.created_at);
        Ok(instances)
    }

    fn list_assigned_to(&self, principal: &PrincipalId) -> StorageResult<Vec<WorkflowInstance>> {
        let tables = self.tables.read();
        let mut instances: Vec<_> = tables
            .instances
            .values()
            .filter(|i| i.awaits(principal))
            .cloned()
            .collect();
        instances.sort_by_key(|i| i.created_at);
        Ok(instances)
    }

    fn commit(&self, change: ChangeSet) -> StorageResult<Vec<AuditEvent>> {
        let mut tables = self.tables.write();
        let id = change.instance.id.clone();

        match (change.expected_version, tables.instances.get(&id)) {
            (None, Some(_)) => {
                return Err(StorageError::Duplicate(format!("instance {}", id)));
            }
            (Some(expected), None) => {
                return Err(StorageError::NotFound(format!(
                    "instance {} (expected version {})",
                    id, expected
                )));
            }
            (Some(expected), Some(stored)) if stored.version != expected => {
                return Err(StorageError::VersionConflict {
                    key: id.to_string(),
                    expected,
                    found: stored.version,
                });
            }
            _ => {}
        }

        for reminder_id in &change.fired_reminders {
            match tables.reminders.get(reminder_id) {
                None => return Err(StorageError::NotFound(format!("reminder {}", reminder_id))),
                Some(r) if r.fired => return Err(StorageError::AlreadyFired(reminder_id.to_string())),
                Some(_) => {}
            }
        }

        tables.instances.insert(id, change.instance);
        let stored = tables.append_events(change.events);
        tables.append_comments(change.comments);
        for reminder in change.reminders {
            tables.reminders.insert(reminder.id.clone(), reminder);
        }
        for reminder_id in &change.fired_reminders {
            if let Some(r) = tables.reminders.get_mut(reminder_id) {
                r.fired = true;
            }
        }
        Ok(stored)
    }
}

impl AuditStorage for InMemoryStore {
    fn append(
        &self,
        events: Vec<AuditEvent>,
        comments: Vec<Comment>,
    ) -> StorageResult<Vec<AuditEvent>> {
        let mut tables = self.tables.write();
        if let Some(missing) = events
            .iter()
            .map(|e| &e.instance_id)
            .chain(comments.iter().map(|c| &c.instance_id))
            .find(|id| !tables.instances.contains_key(*id))
        {
            return Err(StorageError::NotFound(format!("instance {}", missing)));
        }
        let stored = tables.append_events(events);
        tables.append_comments(comments);
        Ok(stored)
    }

    fn events_for(&self, instance_id: &InstanceId) -> StorageResult<Vec<AuditEvent>> {
        Ok(self
            .tables
            .read()
            .events
            .get(instance_id)
            .cloned()
            .unwrap_or_default())
    }

    fn comments_for(&self, instance_id: &InstanceId) -> StorageResult<Vec<Comment>> {
        Ok(self
            .tables
            .read()
            .comments
            .get(instance_id)
            .cloned()
            .unwrap_or_default())
    }
}

impl ReminderStorage for InMemoryStore {
    fn due_reminders(&self, now: DateTime<Utc>) -> StorageResult<Vec<Reminder>> {
        let tables = self.tables.read();
        let mut due: Vec<_> = tables
            .reminders
            .values()
            .filter(|r| r.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|r| r.fire_at);
        Ok(due)
    }

    fn reminders_for(&self, instance_id: &InstanceId) -> StorageResult<Vec<Reminder>> {
        let tables = self.tables.read();
        let mut found: Vec<_> = tables
            .reminders
            .values()
            .filter(|r| &r.instance_id == instance_id)
            .cloned()
            .collect();
        found.sort_by_key(|r| r.fire_at);
        Ok(found)
    }

    fn claim_reminder(
        &self,
        id: &ReminderId,
        event: Option<AuditEvent>,
    ) -> StorageResult<ReminderClaim> {
        let mut tables = self.tables.write();
        match tables.reminders.get_mut(id) {
            None => return Ok(ReminderClaim::NotFound),
            Some(r) if r.fired => return Ok(ReminderClaim::AlreadyFired),
            Some(r) => r.fired = true,
        }
        let stored = event.and_then(|e| tables.append_events(vec![e]).pop());
        Ok(ReminderClaim::Claimed(stored))
    }
}

impl ApprovalStore for InMemoryStore {}
