//! Approval engine: the caller-facing API
//!
//! Every mutation follows the same path: load the instance, let the
//! [`StateMachine`] compute a [`Transition`], commit it through the
//! [`AuditTrail`] against the loaded version. Losing an optimistic-lock
//! race reloads and re-validates, so the loser of two concurrent
//! decisions sees `StepAlreadyDecided` rather than a lost update.

use crate::audit_trail::{AuditTrail, Committed, Transition};
use crate::config::EngineConfig;
use crate::notifier::NotificationOutbox;
use crate::resolver::{AccessPolicy, ApproverResolver};
use crate::state_machine::StateMachine;
use crate::storage::{ApprovalStore, InstanceStorage, ReminderClaim, ReminderStorage};
use crate::template_store::TemplateStore;
use approval_types::{
    ApprovalError, ApprovalResult, AuditEvent, AuditEventType, Comment, Decision, InstanceId,
    InstanceStatus, PrincipalId, Reminder, ReminderKind, RequestType, StepId, StorageError,
    SubjectRef, TemplateDraft, WorkflowInstance, WorkflowTemplate,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::broadcast;

/// What happened to a due reminder
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReminderOutcome {
    /// Claimed and recorded; notification queued
    Fired,
    /// Claimed, but the instance or step moved on; nothing recorded
    Stale,
    /// Another scan got there first
    AlreadyFired,
}

/// The approval workflow engine
pub struct ApprovalEngine {
    config: EngineConfig,
    store: Arc<dyn ApprovalStore>,
    templates: TemplateStore,
    access: Arc<dyn AccessPolicy>,
    trail: AuditTrail,
    state_machine: StateMachine,
}

impl ApprovalEngine {
    /// Create an engine over `store`, loading any templates it already
    /// holds
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn ApprovalStore>,
        resolver: Arc<dyn ApproverResolver>,
        access: Arc<dyn AccessPolicy>,
        outbox: NotificationOutbox,
    ) -> ApprovalResult<Self> {
        let templates = TemplateStore::load(Arc::clone(&store), Arc::clone(&resolver))?;
        let trail = AuditTrail::new(Arc::clone(&store), outbox);

        Ok(Self {
            config,
            store,
            templates,
            access,
            trail,
            state_machine: StateMachine::new(resolver),
        })
    }

    // ── Templates ────────────────────────────────────────────────────

    pub fn templates(&self) -> &TemplateStore {
        &self.templates
    }

    /// Publish `template` as the next version of its request type
    pub fn register_template(
        &self,
        template: WorkflowTemplate,
    ) -> ApprovalResult<Arc<WorkflowTemplate>> {
        self.templates.register(template)
    }

    pub fn publish_template(&self, draft: &TemplateDraft) -> ApprovalResult<Arc<WorkflowTemplate>> {
        self.templates.publish(draft)
    }

    // ── Lifecycle operations ─────────────────────────────────────────

    /// Submit a request against the latest template for `request_type`
    pub fn submit(
        &self,
        requester: PrincipalId,
        request_type: &RequestType,
        subject: SubjectRef,
        due_date: Option<DateTime<Utc>>,
    ) -> ApprovalResult<WorkflowInstance> {
        self.submit_at(requester, request_type, subject, due_date, Utc::now())
    }

    pub fn submit_at(
        &self,
        requester: PrincipalId,
        request_type: &RequestType,
        subject: SubjectRef,
        due_date: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> ApprovalResult<WorkflowInstance> {
        if requester.as_str().trim().is_empty() {
            return Err(ApprovalError::ValidationError(
                "requester must not be empty".into(),
            ));
        }
        if let Some(due) = due_date {
            if due <= now {
                return Err(ApprovalError::ValidationError(format!(
                    "due date {} is not in the future",
                    due
                )));
            }
        }

        let template = self.templates.get_latest(request_type)?;
        let transition = self
            .state_machine
            .submit(&template, requester, subject, due_date, now);
        let committed = self.trail.commit(transition, None)?;
        self.log_committed(&committed);
        Ok(committed.instance)
    }

    /// Record an approver's decision on the current step
    pub fn decide(
        &self,
        instance_id: &InstanceId,
        step_id: &StepId,
        actor: &PrincipalId,
        decision: Decision,
        comment: Option<&str>,
    ) -> ApprovalResult<WorkflowInstance> {
        self.decide_at(instance_id, step_id, actor, decision, comment, Utc::now())
    }

    pub fn decide_at(
        &self,
        instance_id: &InstanceId,
        step_id: &StepId,
        actor: &PrincipalId,
        decision: Decision,
        comment: Option<&str>,
        now: DateTime<Utc>,
    ) -> ApprovalResult<WorkflowInstance> {
        self.mutate_required(instance_id, |instance| {
            self.state_machine
                .decide(instance, step_id, actor, decision, comment, now)
        })
    }

    /// Cancel an open request (requester or administrator)
    pub fn cancel(
        &self,
        instance_id: &InstanceId,
        actor: &PrincipalId,
        reason: &str,
    ) -> ApprovalResult<WorkflowInstance> {
        let is_admin = self.access.is_admin(actor);
        let now = Utc::now();
        self.mutate_required(instance_id, |instance| {
            self.state_machine
                .cancel(instance, actor, is_admin, reason, now)
        })
    }

    /// Assign a blocked step to `principal` (administrators only)
    pub fn reassign_approver(
        &self,
        instance_id: &InstanceId,
        step_id: &StepId,
        principal: PrincipalId,
        admin: &PrincipalId,
    ) -> ApprovalResult<WorkflowInstance> {
        let is_admin = self.access.is_admin(admin);
        let now = Utc::now();
        self.mutate_required(instance_id, |instance| {
            self.state_machine
                .reassign(instance, step_id, principal.clone(), admin, is_admin, now)
        })
    }

    /// Attach a comment. Valid in every state, terminal included.
    pub fn add_comment(
        &self,
        instance_id: &InstanceId,
        author: &PrincipalId,
        text: &str,
        step_id: Option<&StepId>,
    ) -> ApprovalResult<Comment> {
        let instance = self.get_instance(instance_id)?;
        let (event, comment, recipients) =
            self.state_machine
                .comment(&instance, author, text, step_id, Utc::now())?;
        let event = self.trail.append(event, Some(comment.clone()), recipients)?;

        tracing::debug!(
            instance_id = %instance_id,
            author = %author,
            sequence = event.sequence,
            "Comment added"
        );
        Ok(comment)
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn get_instance(&self, instance_id: &InstanceId) -> ApprovalResult<WorkflowInstance> {
        self.store
            .get_instance(instance_id)?
            .ok_or_else(|| ApprovalError::InstanceNotFound(instance_id.clone()))
    }

    /// Instances waiting on `principal`, oldest first
    pub fn list_pending_for_approver(
        &self,
        principal: &PrincipalId,
    ) -> ApprovalResult<Vec<WorkflowInstance>> {
        let mut pending = self.store.list_assigned_to(principal)?;
        pending.sort_by_key(|i| i.created_at);
        Ok(pending)
    }

    pub fn list_instances(&self) -> ApprovalResult<Vec<WorkflowInstance>> {
        Ok(self.store.list_instances()?)
    }

    /// The instance's audit log in append order
    pub fn history(&self, instance_id: &InstanceId) -> ApprovalResult<Vec<AuditEvent>> {
        self.get_instance(instance_id)?;
        self.trail.query(instance_id)
    }

    pub fn comments(&self, instance_id: &InstanceId) -> ApprovalResult<Vec<Comment>> {
        self.get_instance(instance_id)?;
        self.trail.comments(instance_id)
    }

    /// Status rebuilt from the audit log alone
    pub fn replay_status(&self, instance_id: &InstanceId) -> ApprovalResult<InstanceStatus> {
        self.trail
            .replay_status(instance_id)?
            .ok_or_else(|| ApprovalError::InstanceNotFound(instance_id.clone()))
    }

    pub fn reminders(&self, instance_id: &InstanceId) -> ApprovalResult<Vec<Reminder>> {
        Ok(self.store.reminders_for(instance_id)?)
    }

    /// Live stream of committed audit events
    pub fn subscribe(&self) -> broadcast::Receiver<AuditEvent> {
        self.trail.subscribe()
    }

    // ── Scheduler hooks ──────────────────────────────────────────────

    /// Unfired reminders due at `now`
    pub fn due_reminders(&self, now: DateTime<Utc>) -> ApprovalResult<Vec<Reminder>> {
        Ok(self.store.due_reminders(now)?)
    }

    /// Escalate `step_id` if it is still current and overdue. Returns
    /// whether anything changed.
    pub fn escalate(&self, instance_id: &InstanceId, step_id: &StepId) -> ApprovalResult<bool> {
        self.escalate_at(instance_id, step_id, Utc::now())
    }

    pub fn escalate_at(
        &self,
        instance_id: &InstanceId,
        step_id: &StepId,
        now: DateTime<Utc>,
    ) -> ApprovalResult<bool> {
        let committed = self.mutate(instance_id, |instance| {
            Ok(self.state_machine.escalate(instance, step_id, now))
        })?;
        Ok(committed.is_some())
    }

    /// Apply the overall due date: expire under a hard deadline,
    /// otherwise flag. Returns whether anything changed.
    pub fn expire(&self, instance_id: &InstanceId) -> ApprovalResult<bool> {
        self.expire_at(instance_id, Utc::now())
    }

    pub fn expire_at(&self, instance_id: &InstanceId, now: DateTime<Utc>) -> ApprovalResult<bool> {
        let committed = self.mutate(instance_id, |instance| {
            Ok(self.state_machine.deadline(instance, now))
        })?;
        Ok(committed.is_some())
    }

    /// Fire one due reminder: record its audit event and queue the
    /// notification. Overdue and expiration reminders carry a follow-up
    /// (escalation or expiry) that commits in the same write as the
    /// fired flag, so a failed follow-up leaves the reminder due.
    pub fn fire_reminder(
        &self,
        reminder: &Reminder,
        now: DateTime<Utc>,
    ) -> ApprovalResult<ReminderOutcome> {
        let follow_up = matches!(
            (reminder.kind, &reminder.step_id),
            (ReminderKind::StepOverdue, Some(_)) | (ReminderKind::Expiration, _)
        );
        if !follow_up {
            return self.claim_reminder(reminder, now);
        }

        let committed = self.mutate(&reminder.instance_id, |instance| {
            let Some((event, recipients)) =
                self.state_machine.reminder_effect(instance, reminder, now)
            else {
                return Ok(None);
            };
            let planned = match &reminder.step_id {
                Some(step_id) if reminder.kind == ReminderKind::StepOverdue => {
                    self.state_machine.escalate(instance, step_id, now)
                }
                _ => self.state_machine.deadline(instance, now),
            };
            let mut transition = planned.unwrap_or_else(|| Transition::new(instance.clone()));
            transition.fire(reminder.clone(), event, recipients);
            Ok(Some(transition))
        });

        match committed {
            Ok(Some(_)) => Ok(ReminderOutcome::Fired),
            Ok(None) | Err(ApprovalError::InstanceNotFound(_)) => {
                self.claim_reminder(reminder, now)
            }
            Err(ApprovalError::Storage(StorageError::AlreadyFired(_))) => {
                self.log_skipped(reminder, ReminderOutcome::AlreadyFired);
                Ok(ReminderOutcome::AlreadyFired)
            }
            Err(e) => Err(e),
        }
    }

    // ── Internal ─────────────────────────────────────────────────────

    /// Like [`Self::mutate`] for operations that always produce a
    /// transition
    fn mutate_required<F>(&self, instance_id: &InstanceId, mut plan: F) -> ApprovalResult<WorkflowInstance>
    where
        F: FnMut(&WorkflowInstance) -> ApprovalResult<Transition>,
    {
        let committed = self.mutate(instance_id, |instance| plan(instance).map(Some))?;
        match committed {
            Some(committed) => Ok(committed.instance),
            None => self.get_instance(instance_id),
        }
    }

    /// Load, plan, commit; reload and re-plan on a version conflict up
    /// to `max_commit_retries` times.
    fn mutate<F>(&self, instance_id: &InstanceId, mut plan: F) -> ApprovalResult<Option<Committed>>
    where
        F: FnMut(&WorkflowInstance) -> ApprovalResult<Option<Transition>>,
    {
        let mut retries = 0;
        loop {
            let instance = self.get_instance(instance_id)?;
            let Some(transition) = plan(&instance)? else {
                return Ok(None);
            };

            match self.trail.commit(transition, Some(instance.version)) {
                Ok(committed) => {
                    self.log_committed(&committed);
                    return Ok(Some(committed));
                }
                Err(ApprovalError::Storage(StorageError::VersionConflict { .. }))
                    if retries < self.config.max_commit_retries =>
                {
                    retries += 1;
                    tracing::debug!(
                        instance_id = %instance_id,
                        expected = instance.version,
                        retry = retries,
                        "Version conflict, reloading"
                    );
                }
                Err(ApprovalError::Storage(StorageError::VersionConflict { .. })) => {
                    tracing::warn!(
                        instance_id = %instance_id,
                        retries,
                        "Giving up after repeated version conflicts"
                    );
                    return Err(ApprovalError::ConcurrencyConflict {
                        instance_id: instance_id.clone(),
                        expected: instance.version,
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Mark a reminder fired on its own. The audit event is recorded only
    /// while the reminder still applies.
    fn claim_reminder(
        &self,
        reminder: &Reminder,
        now: DateTime<Utc>,
    ) -> ApprovalResult<ReminderOutcome> {
        let effect = self
            .store
            .get_instance(&reminder.instance_id)?
            .and_then(|instance| self.state_machine.reminder_effect(&instance, reminder, now));

        let (event, recipients) = match effect {
            Some((event, recipients)) => (Some(event), recipients),
            None => (None, Default::default()),
        };

        let outcome = match self.trail.fire_reminder(reminder, event, recipients, now)? {
            ReminderClaim::Claimed(Some(_)) => ReminderOutcome::Fired,
            ReminderClaim::Claimed(None) | ReminderClaim::NotFound => ReminderOutcome::Stale,
            ReminderClaim::AlreadyFired => ReminderOutcome::AlreadyFired,
        };
        if outcome != ReminderOutcome::Fired {
            self.log_skipped(reminder, outcome);
        }
        Ok(outcome)
    }

    fn log_skipped(&self, reminder: &Reminder, outcome: ReminderOutcome) {
        tracing::trace!(
            reminder_id = %reminder.id,
            instance_id = %reminder.instance_id,
            outcome = ?outcome,
            "Reminder skipped"
        );
    }

    fn log_committed(&self, committed: &Committed) {
        let instance = &committed.instance;
        for event in &committed.events {
            let step_id = event
                .step_id
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default();
            match event.event_type {
                AuditEventType::Submitted => tracing::info!(
                    instance_id = %instance.id,
                    request_type = %instance.template.request_type,
                    template_version = instance.template.version,
                    requester = %instance.requester,
                    "Request submitted"
                ),
                AuditEventType::StepApproved | AuditEventType::StepRejected => tracing::info!(
                    instance_id = %instance.id,
                    step_id = %step_id,
                    actor = %event.actor,
                    decision = %event.event_type,
                    status = %instance.status,
                    "Step decided"
                ),
                AuditEventType::Blocked => tracing::warn!(
                    instance_id = %instance.id,
                    step_id = %step_id,
                    "Instance blocked: no approver resolved"
                ),
                AuditEventType::Escalated => tracing::warn!(
                    instance_id = %instance.id,
                    step_id = %step_id,
                    escalated = instance.escalated,
                    "Instance escalated"
                ),
                AuditEventType::Reassigned => tracing::info!(
                    instance_id = %instance.id,
                    step_id = %step_id,
                    admin = %event.actor,
                    "Step reassigned"
                ),
                AuditEventType::Cancelled => tracing::info!(
                    instance_id = %instance.id,
                    actor = %event.actor,
                    "Request cancelled"
                ),
                AuditEventType::Expired => tracing::info!(
                    instance_id = %instance.id,
                    "Request expired"
                ),
                _ => tracing::debug!(
                    instance_id = %instance.id,
                    event = %event.event_type,
                    "Instance updated"
                ),
            }
        }
        if instance.is_terminal() {
            tracing::info!(
                instance_id = %instance.id,
                status = %instance.status,
                "Request finished"
            );
        }
    }
}
