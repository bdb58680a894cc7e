//! State machine: computes instance transitions
//!
//! Every operation takes the instance as loaded and returns a
//! [`Transition`] (new instance state, audit events with their
//! notification recipients, comments, reminders) or the reason the
//! operation is not allowed. Nothing here touches storage; the engine
//! commits the result atomically and retries on version conflicts.

use crate::audit_trail::Transition;
use crate::escalation::{
    EscalationDecision, EscalationHandler, EscalationTrigger, RecommendedAction,
};
use crate::resolver::{ApproverResolver, ResolutionContext};
use approval_types::{
    ApprovalError, ApprovalResult, AuditEvent, AuditEventType, Comment, Decision, InstanceStatus,
    PrincipalId, Reminder, ReminderKind, StepId, StepStatus, SubjectRef, WorkflowInstance,
    WorkflowTemplate,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Result of making a step current
#[derive(Default)]
struct Activation {
    assignees: BTreeSet<PrincipalId>,
    /// Set when nobody could be resolved
    blocked: Option<AuditEvent>,
    reminders: Vec<Reminder>,
}

/// Transition logic for approval instances
#[derive(Clone)]
pub struct StateMachine {
    resolver: Arc<dyn ApproverResolver>,
    escalation_handler: EscalationHandler,
}

impl StateMachine {
    pub fn new(resolver: Arc<dyn ApproverResolver>) -> Self {
        Self {
            resolver,
            escalation_handler: EscalationHandler::new(),
        }
    }

    // ── Submission ───────────────────────────────────────────────────

    /// Create an instance against `template` and activate its first step.
    ///
    /// Without an explicit due date the template's default due period
    /// applies, if it has one.
    pub fn submit(
        &self,
        template: &WorkflowTemplate,
        requester: PrincipalId,
        subject: SubjectRef,
        due_date: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Transition {
        let due_date = due_date.or_else(|| {
            template
                .expiry
                .default_due_after()
                .and_then(|after| now.checked_add_signed(after))
        });
        let mut instance =
            WorkflowInstance::new(template.clone(), requester.clone(), subject, due_date, now);

        let activation = self.activate(&mut instance, 0, now);
        let deadline_reminders = self.deadline_reminders(&instance, now);

        let submitted = AuditEvent::new(
            instance.id.clone(),
            AuditEventType::Submitted,
            requester,
            now,
        )
        .with_payload(json!({
            "request_type": template.request_type,
            "template_version": template.version,
            "subject": instance.subject,
            "due_date": due_date,
        }))
        .with_status(InstanceStatus::Pending);

        let mut transition = Transition::new(instance);
        transition.record(submitted, activation.assignees.clone());
        self.apply_activation(&mut transition, activation);
        transition.reminders.extend(deadline_reminders);
        transition
    }

    // ── Decisions ────────────────────────────────────────────────────

    /// Record `actor`'s decision on `step_id`.
    ///
    /// Checks run in this order: unknown step, step already decided,
    /// instance not Pending, step not current, actor not an assignee.
    pub fn decide(
        &self,
        instance: &WorkflowInstance,
        step_id: &StepId,
        actor: &PrincipalId,
        decision: Decision,
        comment: Option<&str>,
        now: DateTime<Utc>,
    ) -> ApprovalResult<Transition> {
        let (index, step) = instance
            .template
            .step(step_id)
            .ok_or_else(|| ApprovalError::StepNotFound {
                instance_id: instance.id.clone(),
                step_id: step_id.clone(),
            })?;
        let exec = instance
            .steps
            .get(index)
            .ok_or_else(|| ApprovalError::StepNotFound {
                instance_id: instance.id.clone(),
                step_id: step_id.clone(),
            })?;

        if exec.status.is_decided() {
            return Err(ApprovalError::StepAlreadyDecided(step_id.clone()));
        }
        if instance.status != InstanceStatus::Pending {
            return Err(ApprovalError::InvalidState(format!(
                "instance {} is {}, not pending",
                instance.id, instance.status
            )));
        }
        if index != instance.current_step_index {
            return Err(ApprovalError::InvalidState(format!(
                "step {} is not the current step",
                step_id
            )));
        }
        if !exec.assignees.contains(actor) {
            return Err(ApprovalError::InvalidState(format!(
                "{} is not an approver of step {}",
                actor, step_id
            )));
        }

        let comment = comment.map(str::trim).filter(|c| !c.is_empty());
        let (event_type, step_status) = match decision {
            Decision::Approve => (AuditEventType::StepApproved, StepStatus::Approved),
            Decision::Reject if step.required => (AuditEventType::StepRejected, StepStatus::Rejected),
            Decision::Reject => (AuditEventType::StepRejected, StepStatus::Skipped),
        };

        let mut next = instance.clone();
        next.record_decision(index, actor, step_status, comment, now);

        let mut payload = json!({
            "decision": decision,
            "step_name": step.name,
        });
        if let Some(text) = comment {
            payload["comment"] = json!(text);
        }
        if step_status == StepStatus::Skipped {
            payload["skipped"] = json!(true);
        }
        let mut event = AuditEvent::new(next.id.clone(), event_type, actor.clone(), now)
            .with_step(step_id.clone())
            .with_payload(payload);

        let mut recipients = BTreeSet::from([next.requester.clone()]);
        let mut activation = None;
        if step_status == StepStatus::Rejected {
            next.finish(InstanceStatus::Rejected, now);
            event = event.with_status(InstanceStatus::Rejected);
        } else if next.template.is_last_step(index) {
            next.finish(InstanceStatus::Approved, now);
            event = event.with_status(InstanceStatus::Approved);
        } else {
            let next_step = self.activate(&mut next, index + 1, now);
            recipients.extend(next_step.assignees.iter().cloned());
            activation = Some(next_step);
        }

        let mut transition = Transition::new(next);
        if let Some(text) = comment {
            transition.comments.push(
                Comment::new(instance.id.clone(), actor.clone(), text, now).on_step(step_id.clone()),
            );
        }
        transition.record(event, recipients);
        if let Some(activation) = activation {
            self.apply_activation(&mut transition, activation);
        }
        Ok(transition)
    }

    // ── Cancellation and reassignment ────────────────────────────────

    /// Cancel a Pending or Blocked instance. Only the requester or an
    /// administrator may.
    pub fn cancel(
        &self,
        instance: &WorkflowInstance,
        actor: &PrincipalId,
        actor_is_admin: bool,
        reason: &str,
        now: DateTime<Utc>,
    ) -> ApprovalResult<Transition> {
        if instance.is_terminal() {
            return Err(ApprovalError::InvalidState(format!(
                "instance {} is already {}",
                instance.id, instance.status
            )));
        }
        if actor != &instance.requester && !actor_is_admin {
            return Err(ApprovalError::InvalidState(format!(
                "{} may not cancel instance {}",
                actor, instance.id
            )));
        }

        let recipients = stakeholders(instance);
        let mut next = instance.clone();
        next.finish(InstanceStatus::Cancelled, now);

        let mut event = AuditEvent::new(next.id.clone(), AuditEventType::Cancelled, actor.clone(), now)
            .with_payload(json!({ "reason": reason }))
            .with_status(InstanceStatus::Cancelled);
        if let Some(step) = instance.current_execution() {
            event = event.with_step(step.step_id.clone());
        }

        let mut transition = Transition::new(next);
        transition.record(event, recipients);
        Ok(transition)
    }

    /// Hand a blocked step to `assignee`. Administrators only.
    pub fn reassign(
        &self,
        instance: &WorkflowInstance,
        step_id: &StepId,
        assignee: PrincipalId,
        admin: &PrincipalId,
        actor_is_admin: bool,
        now: DateTime<Utc>,
    ) -> ApprovalResult<Transition> {
        let (index, _) = instance
            .template
            .step(step_id)
            .ok_or_else(|| ApprovalError::StepNotFound {
                instance_id: instance.id.clone(),
                step_id: step_id.clone(),
            })?;

        if !actor_is_admin {
            return Err(ApprovalError::InvalidState(format!(
                "{} is not an administrator",
                admin
            )));
        }
        if instance
            .steps
            .get(index)
            .map(|e| e.status.is_decided())
            .unwrap_or(false)
        {
            return Err(ApprovalError::StepAlreadyDecided(step_id.clone()));
        }
        if instance.status != InstanceStatus::Blocked {
            return Err(ApprovalError::InvalidState(format!(
                "instance {} is {}, not blocked",
                instance.id, instance.status
            )));
        }
        if index != instance.current_step_index {
            return Err(ApprovalError::InvalidState(format!(
                "step {} is not the blocked step",
                step_id
            )));
        }

        let mut next = instance.clone();
        next.activate_step(index, BTreeSet::from([assignee.clone()]), now);
        let reminders = self.step_reminders(&next, index);

        let event = AuditEvent::new(next.id.clone(), AuditEventType::Reassigned, admin.clone(), now)
            .with_step(step_id.clone())
            .with_payload(json!({ "assignee": assignee }))
            .with_status(InstanceStatus::Pending);

        let mut transition = Transition::new(next);
        transition.record(event, BTreeSet::from([assignee, instance.requester.clone()]));
        transition.reminders = reminders;
        Ok(transition)
    }

    // ── Comments ─────────────────────────────────────────────────────

    /// Build a comment and its `CommentAdded` event. Allowed in every
    /// state, terminal included.
    pub fn comment(
        &self,
        instance: &WorkflowInstance,
        author: &PrincipalId,
        text: &str,
        step_id: Option<&StepId>,
        now: DateTime<Utc>,
    ) -> ApprovalResult<(AuditEvent, Comment, BTreeSet<PrincipalId>)> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ApprovalError::ValidationError(
                "comment text must not be empty".into(),
            ));
        }

        let mut comment = Comment::new(instance.id.clone(), author.clone(), text, now);
        let mut event = AuditEvent::new(
            instance.id.clone(),
            AuditEventType::CommentAdded,
            author.clone(),
            now,
        )
        .with_payload(json!({ "comment": text }));

        if let Some(step_id) = step_id {
            if instance.template.step(step_id).is_none() {
                return Err(ApprovalError::StepNotFound {
                    instance_id: instance.id.clone(),
                    step_id: step_id.clone(),
                });
            }
            comment = comment.on_step(step_id.clone());
            event = event.with_step(step_id.clone());
        }

        let mut recipients = stakeholders(instance);
        recipients.extend(instance.steps.iter().filter_map(|s| s.approver.clone()));
        recipients.remove(author);

        Ok((event, comment, recipients))
    }

    // ── Escalation ───────────────────────────────────────────────────

    /// Escalate `step_id` if it is still the current, overdue step
    pub fn escalate(
        &self,
        instance: &WorkflowInstance,
        step_id: &StepId,
        now: DateTime<Utc>,
    ) -> Option<Transition> {
        let decision =
            self.escalation_handler
                .check_step(instance, step_id, now, self.resolver.as_ref())?;
        Some(self.apply_escalation(instance, decision, now))
    }

    /// Handle a passed overall due date: expire under a hard deadline,
    /// otherwise flag
    pub fn deadline(&self, instance: &WorkflowInstance, now: DateTime<Utc>) -> Option<Transition> {
        let decision = self.escalation_handler.check_deadline(instance, now)?;
        Some(self.apply_escalation(instance, decision, now))
    }

    fn apply_escalation(
        &self,
        instance: &WorkflowInstance,
        decision: EscalationDecision,
        now: DateTime<Utc>,
    ) -> Transition {
        let deadline = matches!(decision.trigger, EscalationTrigger::DeadlinePassed { .. });
        let trigger = serde_json::to_value(&decision.trigger).unwrap_or_default();
        let owner = instance.template.owner.clone();
        let current_step = instance.current_execution().map(|e| e.step_id.clone());
        let mut next = instance.clone();

        let (event, recipients, reminders) = match decision.recommended_action {
            RecommendedAction::Reroute {
                target,
                assignees,
                level,
            } => {
                let index = next.current_step_index;
                next.activate_step(index, assignees.clone(), now);
                if let Some(exec) = next.steps.get_mut(index) {
                    exec.escalation_level = level;
                }
                let reminders = self.step_reminders(&next, index);

                let event = AuditEvent::new(
                    next.id.clone(),
                    AuditEventType::Escalated,
                    PrincipalId::system(),
                    now,
                )
                .with_payload(json!({
                    "trigger": trigger,
                    "action": "reroute",
                    "target": target,
                    "assignees": assignees,
                    "level": level,
                }));

                let mut recipients = assignees;
                recipients.insert(owner);
                (event, recipients, reminders)
            }
            RecommendedAction::Flag { reason } => {
                next.escalated = true;
                next.deadline_flagged |= deadline;
                next.updated_at = now;

                let event = AuditEvent::new(
                    next.id.clone(),
                    AuditEventType::Escalated,
                    PrincipalId::system(),
                    now,
                )
                .with_payload(json!({
                    "trigger": trigger,
                    "action": "flag",
                    "reason": reason,
                }));

                let mut recipients = stakeholders(instance);
                recipients.insert(owner);
                (event, recipients, Vec::new())
            }
            RecommendedAction::Expire => {
                next.finish(InstanceStatus::Expired, now);

                let event = AuditEvent::new(
                    next.id.clone(),
                    AuditEventType::Expired,
                    PrincipalId::system(),
                    now,
                )
                .with_payload(json!({ "trigger": trigger }))
                .with_status(InstanceStatus::Expired);

                (event, stakeholders(instance), Vec::new())
            }
        };

        let event = match current_step {
            Some(step_id) => event.with_step(step_id),
            None => event,
        };

        let mut transition = Transition::new(next);
        transition.record(event, recipients);
        transition.reminders = reminders;
        transition
    }

    // ── Reminders ────────────────────────────────────────────────────

    /// The `Reminder` audit event and recipients for a due reminder, or
    /// `None` when the reminder no longer applies (instance finished,
    /// step decided or re-activated since scheduling). The event is
    /// stamped `now`; the scheduled time goes in the payload.
    pub fn reminder_effect(
        &self,
        instance: &WorkflowInstance,
        reminder: &Reminder,
        now: DateTime<Utc>,
    ) -> Option<(AuditEvent, BTreeSet<PrincipalId>)> {
        let recipients = if reminder.kind.is_step_scoped() {
            if instance.status != InstanceStatus::Pending {
                return None;
            }
            let exec = instance.current_execution()?;
            if Some(&exec.step_id) != reminder.step_id.as_ref()
                || exec.status.is_decided()
                || exec.activated_at != reminder.anchor
            {
                return None;
            }
            exec.assignees.clone()
        } else {
            if instance.is_terminal() {
                return None;
            }
            stakeholders(instance)
        };

        let mut event = AuditEvent::new(
            instance.id.clone(),
            AuditEventType::Reminder,
            PrincipalId::system(),
            now,
        )
        .with_payload(json!({
            "kind": reminder.kind,
            "reminder_id": reminder.id,
            "fire_at": reminder.fire_at,
            "due_date": instance.due_date,
        }));
        if let Some(step_id) = &reminder.step_id {
            event = event.with_step(step_id.clone());
        }
        Some((event, recipients))
    }

    // ── Internal ─────────────────────────────────────────────────────

    /// Resolve and activate step `index`. An empty resolution blocks the
    /// instance instead of failing.
    fn activate(
        &self,
        instance: &mut WorkflowInstance,
        index: usize,
        now: DateTime<Utc>,
    ) -> Activation {
        let Some(step) = instance.template.step_at(index).cloned() else {
            return Activation::default();
        };

        let ctx = ResolutionContext::for_instance(instance);
        let assignees = self.resolver.resolve(&step.approver_type, &ctx);
        instance.activate_step(index, assignees.clone(), now);

        if assignees.is_empty() {
            let unresolved = ApprovalError::UnresolvedApprover {
                step_id: step.id.clone(),
                approver_type: step.approver_type.clone(),
            };
            let blocked = AuditEvent::new(
                instance.id.clone(),
                AuditEventType::Blocked,
                PrincipalId::system(),
                now,
            )
            .with_step(step.id.clone())
            .with_payload(json!({
                "approver_type": step.approver_type,
                "reason": unresolved.to_string(),
            }))
            .with_status(InstanceStatus::Blocked);

            return Activation {
                assignees,
                blocked: Some(blocked),
                reminders: Vec::new(),
            };
        }

        Activation {
            reminders: self.step_reminders(instance, index),
            assignees,
            blocked: None,
        }
    }

    fn apply_activation(&self, transition: &mut Transition, activation: Activation) {
        if let Some(blocked) = activation.blocked {
            let recipients = BTreeSet::from([
                transition.instance.requester.clone(),
                transition.instance.template.owner.clone(),
            ]);
            transition.record(blocked, recipients);
        }
        transition.reminders.extend(activation.reminders);
    }

    /// Due-soon and overdue reminders for the activation of step `index`
    fn step_reminders(&self, instance: &WorkflowInstance, index: usize) -> Vec<Reminder> {
        let Some(exec) = instance.steps.get(index) else {
            return Vec::new();
        };
        let (Some(activated_at), Some(due_at)) = (exec.activated_at, exec.due_at) else {
            return Vec::new();
        };

        let mut reminders = Vec::new();
        if let Some(lead) = instance.template.step_reminder_lead() {
            reminders.push(
                Reminder::new(
                    instance.id.clone(),
                    ReminderKind::StepDueSoon,
                    due_at
                        .checked_sub_signed(lead)
                        .map_or(activated_at, |at| at.max(activated_at)),
                )
                .for_step(exec.step_id.clone(), activated_at),
            );
        }
        reminders.push(
            Reminder::new(instance.id.clone(), ReminderKind::StepOverdue, due_at)
                .for_step(exec.step_id.clone(), activated_at),
        );
        reminders
    }

    /// Expiration warning and expiration reminders for the overall due date
    fn deadline_reminders(&self, instance: &WorkflowInstance, now: DateTime<Utc>) -> Vec<Reminder> {
        let Some(due) = instance.due_date else {
            return Vec::new();
        };

        let mut reminders = Vec::new();
        if let Some(lead) = instance.template.expiry.warning_lead() {
            reminders.push(Reminder::new(
                instance.id.clone(),
                ReminderKind::ExpirationWarning,
                due.checked_sub_signed(lead).map_or(now, |at| at.max(now)),
            ));
        }
        reminders.push(Reminder::new(
            instance.id.clone(),
            ReminderKind::Expiration,
            due,
        ));
        reminders
    }
}

/// Requester plus whoever currently holds the step
fn stakeholders(instance: &WorkflowInstance) -> BTreeSet<PrincipalId> {
    let mut people = BTreeSet::from([instance.requester.clone()]);
    if instance.is_open() {
        if let Some(exec) = instance.current_execution() {
            people.extend(exec.assignees.iter().cloned());
        }
    }
    people
}
