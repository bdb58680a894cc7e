//! Workflow instances: one request's run through a template snapshot
//!
//! An instance owns a deep copy of the template it was submitted
//! against, one [`StepExecution`] per step, and the optimistic
//! concurrency `version` that every committed change bumps.

use crate::{InstanceId, PrincipalId, StepDefinition, StepId, SubjectRef, WorkflowTemplate};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// ── Instance Status ──────────────────────────────────────────────────

/// Lifecycle status of a workflow instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum InstanceStatus {
    /// Waiting on the current step's approver
    #[default]
    Pending,
    /// No approver could be resolved for the current step
    Blocked,
    Approved,
    Rejected,
    Cancelled,
    Expired,
}

impl InstanceStatus {
    /// Terminal states are sinks: nothing but comments after these
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Approved | Self::Rejected | Self::Cancelled | Self::Expired
        )
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Blocked => "blocked",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        };
        write!(f, "{}", s)
    }
}

/// An approver's verdict on a step
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Approve,
    Reject,
}

// ── Step Execution ───────────────────────────────────────────────────

/// Outcome status of a single step
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum StepStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
    /// An optional step that was rejected and passed over
    Skipped,
}

impl StepStatus {
    pub fn is_decided(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Recorded state of one step within an instance
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepExecution {
    pub step_id: StepId,
    pub status: StepStatus,
    /// Principals currently allowed to decide this step
    #[serde(default)]
    pub assignees: BTreeSet<PrincipalId>,
    /// Who decided (first responder)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approver: Option<PrincipalId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    /// Decision comments
    #[serde(default)]
    pub comments: Vec<String>,
    /// When the step became current (never set for untouched steps)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,
    /// How many times the step has been escalated
    #[serde(default)]
    pub escalation_level: u32,
}

impl StepExecution {
    pub fn new(step_id: StepId) -> Self {
        Self {
            step_id,
            status: StepStatus::Pending,
            assignees: BTreeSet::new(),
            approver: None,
            decided_at: None,
            comments: Vec::new(),
            activated_at: None,
            due_at: None,
            escalation_level: 0,
        }
    }

    pub fn is_activated(&self) -> bool {
        self.activated_at.is_some()
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_decided() && self.due_at.map(|due| now >= due).unwrap_or(false)
    }
}

// ── Workflow Instance ────────────────────────────────────────────────

/// A submitted request moving through its approval steps
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: InstanceId,
    /// Deep copy of the template at submission time
    pub template: WorkflowTemplate,
    pub requester: PrincipalId,
    pub subject: SubjectRef,
    pub current_step_index: usize,
    pub status: InstanceStatus,
    /// One execution per template step, in template order
    pub steps: Vec<StepExecution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    /// Set when an overdue step or passed due date was escalated
    /// without re-routing
    #[serde(default)]
    pub escalated: bool,
    /// Set once a passed soft due date has been escalated
    #[serde(default)]
    pub deadline_flagged: bool,
    /// Optimistic concurrency version; bumped by every commit
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowInstance {
    /// Create an instance at step 0. The step is not yet activated.
    pub fn new(
        template: WorkflowTemplate,
        requester: PrincipalId,
        subject: SubjectRef,
        due_date: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        let steps = template
            .steps
            .iter()
            .map(|s| StepExecution::new(s.id.clone()))
            .collect();

        Self {
            id: InstanceId::generate(),
            template,
            requester,
            subject,
            current_step_index: 0,
            status: InstanceStatus::Pending,
            steps,
            due_date,
            escalated: false,
            deadline_flagged: false,
            version: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Pending or Blocked
    pub fn is_open(&self) -> bool {
        !self.is_terminal()
    }

    pub fn current_step(&self) -> Option<&StepDefinition> {
        self.template.step_at(self.current_step_index)
    }

    pub fn current_execution(&self) -> Option<&StepExecution> {
        self.steps.get(self.current_step_index)
    }

    pub fn execution(&self, step_id: &StepId) -> Option<&StepExecution> {
        self.steps.iter().find(|s| &s.step_id == step_id)
    }

    /// Whether `principal` may decide the current step right now
    pub fn awaits(&self, principal: &PrincipalId) -> bool {
        self.status == InstanceStatus::Pending
            && self
                .current_execution()
                .map(|e| !e.status.is_decided() && e.assignees.contains(principal))
                .unwrap_or(false)
    }

    /// Activate step `index` with the given resolved assignees.
    /// An empty assignee set blocks the instance.
    pub fn activate_step(
        &mut self,
        index: usize,
        assignees: BTreeSet<PrincipalId>,
        now: DateTime<Utc>,
    ) {
        let duration = self
            .template
            .step_at(index)
            .map(|s| s.estimated_duration())
            .unwrap_or_else(Duration::zero);

        self.current_step_index = index;
        if let Some(exec) = self.steps.get_mut(index) {
            exec.activated_at = Some(now);
            exec.due_at = now.checked_add_signed(duration);
            exec.assignees = assignees;
            self.status = if exec.assignees.is_empty() {
                InstanceStatus::Blocked
            } else {
                InstanceStatus::Pending
            };
        }
        self.updated_at = now;
    }

    /// Record the first decision on step `index`
    pub fn record_decision(
        &mut self,
        index: usize,
        actor: &PrincipalId,
        status: StepStatus,
        comment: Option<&str>,
        now: DateTime<Utc>,
    ) {
        if let Some(exec) = self.steps.get_mut(index) {
            exec.status = status;
            exec.approver = Some(actor.clone());
            exec.decided_at = Some(now);
            if let Some(text) = comment {
                exec.comments.push(text.to_string());
            }
        }
        self.updated_at = now;
    }

    /// Move into a terminal state
    pub fn finish(&mut self, status: InstanceStatus, now: DateTime<Utc>) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    /// Steps that have been activated, in order
    pub fn activated_steps(&self) -> impl Iterator<Item = &StepExecution> {
        self.steps.iter().filter(|s| s.is_activated())
    }
}
