//! Storage trait definitions

use approval_types::{
    AuditEvent, Comment, InstanceId, PrincipalId, Reminder, ReminderId, RequestType,
    StorageResult, WorkflowInstance, WorkflowTemplate,
};
use chrono::{DateTime, Utc};

/// Combined storage trait
pub trait ApprovalStore:
    TemplateStorage + InstanceStorage + AuditStorage + ReminderStorage + Send + Sync
{
}

/// Everything one state transition writes, committed all-or-nothing.
///
/// `instance.version` must already be bumped past `expected_version`.
#[derive(Debug, Clone)]
pub struct ChangeSet {
    pub instance: WorkflowInstance,
    /// Version the writer loaded; `None` inserts a new instance
    pub expected_version: Option<u64>,
    pub events: Vec<AuditEvent>,
    pub comments: Vec<Comment>,
    pub reminders: Vec<Reminder>,
    /// Due reminders this change fires; each must still be unfired
    pub fired_reminders: Vec<ReminderId>,
}

impl ChangeSet {
    /// Insert a brand-new instance
    pub fn create(instance: WorkflowInstance) -> Self {
        Self {
            instance,
            expected_version: None,
            events: Vec::new(),
            comments: Vec::new(),
            reminders: Vec::new(),
            fired_reminders: Vec::new(),
        }
    }

    /// Update an instance that was loaded at `expected_version`
    pub fn update(instance: WorkflowInstance, expected_version: u64) -> Self {
        Self {
            expected_version: Some(expected_version),
            ..Self::create(instance)
        }
    }
}

/// Outcome of trying to fire a reminder
#[derive(Debug, Clone, PartialEq)]
pub enum ReminderClaim {
    /// This caller flipped `fired`; carries the stored audit event, if any
    Claimed(Option<AuditEvent>),
    /// Someone else already fired it
    AlreadyFired,
    NotFound,
}

/// Storage for published templates
pub trait TemplateStorage: Send + Sync {
    /// Persist a published template version
    fn save_template(&self, template: &WorkflowTemplate) -> StorageResult<()>;

    /// All stored versions, in publication order
    fn list_templates(&self) -> StorageResult<Vec<WorkflowTemplate>>;

    /// Stored versions for one request type, oldest first
    fn templates_for(&self, request_type: &RequestType) -> StorageResult<Vec<WorkflowTemplate>>;
}

/// Storage for instances and their step executions
pub trait InstanceStorage: Send + Sync {
    /// Get an instance by ID
    fn get_instance(&self, id: &InstanceId) -> StorageResult<Option<WorkflowInstance>>;

    /// List all instances
    fn list_instances(&self) -> StorageResult<Vec<WorkflowInstance>>;

    /// Instances whose current step lists `principal` as an assignee
    fn list_assigned_to(&self, principal: &PrincipalId) -> StorageResult<Vec<WorkflowInstance>>;

    /// Atomically write a change set. Fails with `VersionConflict` when
    /// the stored version is not `expected_version`, with `Duplicate`
    /// when creating an id that exists, and with `AlreadyFired` when a
    /// reminder in `fired_reminders` is already fired. Returns the
    /// events with their sequence numbers assigned.
    fn commit(&self, change: ChangeSet) -> StorageResult<Vec<AuditEvent>>;
}

/// Append-only audit log and comments
pub trait AuditStorage: Send + Sync {
    /// Append events and comments that do not change instance state
    fn append(&self, events: Vec<AuditEvent>, comments: Vec<Comment>)
        -> StorageResult<Vec<AuditEvent>>;

    /// Events for an instance in append order
    fn events_for(&self, instance_id: &InstanceId) -> StorageResult<Vec<AuditEvent>>;

    /// Comments for an instance in append order
    fn comments_for(&self, instance_id: &InstanceId) -> StorageResult<Vec<Comment>>;
}

/// Storage for scheduled reminders
pub trait ReminderStorage: Send + Sync {
    /// Unfired reminders with `fire_at <= now`, earliest first
    fn due_reminders(&self, now: DateTime<Utc>) -> StorageResult<Vec<Reminder>>;

    /// All reminders of an instance
    fn reminders_for(&self, instance_id: &InstanceId) -> StorageResult<Vec<Reminder>>;

    /// Flip `fired` if it is still false and, in the same write, append
    /// `event`. Only one caller ever sees `Claimed`.
    fn claim_reminder(
        &self,
        id: &ReminderId,
        event: Option<AuditEvent>,
    ) -> StorageResult<ReminderClaim>;
}
