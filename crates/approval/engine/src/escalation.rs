//! Escalation handler: decides what to do about overdue steps and
//! passed deadlines
//!
//! Like the rest of the decision logic it does not act. It returns an
//! [`EscalationDecision`] and the state machine applies it through the
//! normal commit path.

use crate::resolver::{ApproverResolver, ResolutionContext};
use approval_types::{
    ApproverType, EscalationPolicy, InstanceStatus, PrincipalId, StepId, WorkflowInstance,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;

/// What caused the escalation
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "trigger", rename_all = "snake_case")]
pub enum EscalationTrigger {
    /// The current step passed its due date undecided
    StepOverdue {
        step_id: StepId,
        due_at: DateTime<Utc>,
    },
    /// The instance's overall due date passed
    DeadlinePassed { due_date: DateTime<Utc> },
}

/// Who an overdue step gets re-routed to
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "approver_type", rename_all = "snake_case")]
pub enum EscalationTarget {
    Approver(ApproverType),
    /// The template owner, the last stop of every fallback chain
    Owner,
}

/// Recommended action for the state machine
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecommendedAction {
    /// Re-assign the current step and restart its clock
    Reroute {
        target: EscalationTarget,
        assignees: BTreeSet<PrincipalId>,
        /// The step's escalation level after this reroute
        level: u32,
    },
    /// Leave the instance where it is, visibly flagged
    Flag { reason: String },
    /// Terminate the instance as Expired
    Expire,
}

/// An escalation decision for the state machine to act upon
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EscalationDecision {
    pub trigger: EscalationTrigger,
    pub recommended_action: RecommendedAction,
}

/// Handles escalation detection and decision-making
#[derive(Clone, Debug, Default)]
pub struct EscalationHandler;

impl EscalationHandler {
    pub fn new() -> Self {
        Self
    }

    /// Decide what to do about `step_id` being overdue at `now`.
    ///
    /// Returns `None` when the step is no longer the current, undecided,
    /// overdue step of a Pending instance.
    pub fn check_step(
        &self,
        instance: &WorkflowInstance,
        step_id: &StepId,
        now: DateTime<Utc>,
        resolver: &dyn ApproverResolver,
    ) -> Option<EscalationDecision> {
        if instance.status != InstanceStatus::Pending {
            return None;
        }
        let exec = instance.current_execution()?;
        if &exec.step_id != step_id || !exec.is_overdue(now) {
            return None;
        }
        let due_at = exec.due_at?;

        Some(EscalationDecision {
            trigger: EscalationTrigger::StepOverdue {
                step_id: step_id.clone(),
                due_at,
            },
            recommended_action: self.determine_action(instance, exec.escalation_level, resolver),
        })
    }

    /// Decide what to do about the overall due date having passed
    pub fn check_deadline(
        &self,
        instance: &WorkflowInstance,
        now: DateTime<Utc>,
    ) -> Option<EscalationDecision> {
        if instance.is_terminal() {
            return None;
        }
        let due_date = instance.due_date.filter(|due| *due <= now)?;

        let recommended_action = if instance.template.expiry.hard {
            RecommendedAction::Expire
        } else if instance.deadline_flagged {
            return None;
        } else {
            RecommendedAction::Flag {
                reason: "overall due date passed".into(),
            }
        };

        Some(EscalationDecision {
            trigger: EscalationTrigger::DeadlinePassed { due_date },
            recommended_action,
        })
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn determine_action(
        &self,
        instance: &WorkflowInstance,
        level: u32,
        resolver: &dyn ApproverResolver,
    ) -> RecommendedAction {
        let chain = match &instance.template.escalation {
            EscalationPolicy::Flag => {
                return RecommendedAction::Flag {
                    reason: "step overdue".into(),
                }
            }
            EscalationPolicy::FallbackChain { chain } => chain,
        };

        let ctx = ResolutionContext::for_instance(instance);
        let start = level as usize;

        // Chain entries first, then the owner; skip entries nobody fills
        for idx in start..=chain.len() {
            let (target, assignees) = match chain.get(idx) {
                Some(approver_type) => (
                    EscalationTarget::Approver(approver_type.clone()),
                    resolver.resolve(approver_type, &ctx),
                ),
                None => (
                    EscalationTarget::Owner,
                    BTreeSet::from([instance.template.owner.clone()]),
                ),
            };
            if !assignees.is_empty() {
                return RecommendedAction::Reroute {
                    target,
                    assignees,
                    level: idx as u32 + 1,
                };
            }
        }

        RecommendedAction::Flag {
            reason: "escalation chain exhausted".into(),
        }
    }
}
