//! Workflow templates: versioned, ordered approval step definitions
//!
//! A published [`WorkflowTemplate`] is immutable. Editing goes through a
//! [`TemplateDraft`], which is a private copy; building the draft yields a
//! new template that the store publishes as the next version. Running
//! instances keep the snapshot they were submitted against.

use crate::{ApprovalError, ApprovalResult, ApproverType, PrincipalId, RequestType, StepId, TemplateId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Upper bound for every duration a template carries: ten years
pub const MAX_DURATION_SECS: u64 = 10 * 366 * 86_400;

/// Seconds to a duration, clamped to [`MAX_DURATION_SECS`]
fn bounded_secs(secs: u64) -> Duration {
    Duration::seconds(secs.min(MAX_DURATION_SECS) as i64)
}

/// Reject durations that do not fit the bound (or a `TimeDelta` at all)
fn check_duration(field: &str, secs: u64) -> ApprovalResult<()> {
    let fits = secs <= MAX_DURATION_SECS
        && i64::try_from(secs)
            .ok()
            .and_then(Duration::try_seconds)
            .is_some();
    if fits {
        Ok(())
    } else {
        Err(ApprovalError::ValidationError(format!(
            "{} of {}s exceeds the {}s limit",
            field, secs, MAX_DURATION_SECS
        )))
    }
}

// ── Step Definition ──────────────────────────────────────────────────

/// One approval step of a template
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Identifier, unique within the template
    pub id: StepId,
    /// Display name ("Manager Approval")
    pub name: String,
    /// 1-based position; strictly increasing along the step list
    #[serde(default)]
    pub position: u32,
    /// Who approves this step
    pub approver_type: ApproverType,
    /// How long the approver has before the step is overdue (seconds)
    pub estimated_duration_secs: u64,
    /// A rejection at a required step rejects the whole request
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl StepDefinition {
    /// Create a required step with a one-day duration
    pub fn new(id: impl Into<String>, name: impl Into<String>, approver_type: ApproverType) -> Self {
        Self {
            id: StepId::new(id),
            name: name.into(),
            position: 0,
            approver_type,
            estimated_duration_secs: 86_400,
            required: true,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.estimated_duration_secs = duration.num_seconds().max(0) as u64;
        self
    }

    pub fn with_duration_secs(mut self, secs: u64) -> Self {
        self.estimated_duration_secs = secs;
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn estimated_duration(&self) -> Duration {
        bounded_secs(self.estimated_duration_secs)
    }
}

// ── Policies ─────────────────────────────────────────────────────────

/// What happens when the current step passes its due date undecided
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum EscalationPolicy {
    /// Leave the instance Pending but mark it escalated
    Flag,
    /// Re-route the step to each approver type in turn, then to the
    /// template owner; flag once the chain is exhausted
    FallbackChain {
        #[serde(default)]
        chain: Vec<ApproverType>,
    },
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self::FallbackChain { chain: Vec::new() }
    }
}

/// Overall due-date handling for instances of a template
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiryPolicy {
    /// Due date applied when the submitter does not pass one (seconds
    /// after submission)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_due_after_secs: Option<u64>,
    /// A passed due date expires the instance instead of escalating it
    #[serde(default)]
    pub hard: bool,
    /// Send an expiration warning this long before the due date (seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning_lead_secs: Option<u64>,
}

impl ExpiryPolicy {
    /// A hard deadline `after` submission, warned `warning_lead` ahead
    pub fn hard(after: Duration, warning_lead: Duration) -> Self {
        Self {
            default_due_after_secs: Some(after.num_seconds().max(0) as u64),
            hard: true,
            warning_lead_secs: Some(warning_lead.num_seconds().max(0) as u64),
        }
    }

    pub fn warning_lead(&self) -> Option<Duration> {
        self.warning_lead_secs.map(bounded_secs)
    }

    pub fn default_due_after(&self) -> Option<Duration> {
        self.default_due_after_secs.map(bounded_secs)
    }
}

// ── Workflow Template ────────────────────────────────────────────────

/// A published, immutable approval template
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    /// Unique identifier of this version
    pub id: TemplateId,
    /// The request type this template governs
    pub request_type: RequestType,
    /// Version number, 1-based and increasing per request type
    pub version: u32,
    /// Human-readable name
    pub name: String,
    /// Template owner; the last-resort escalation target
    pub owner: PrincipalId,
    /// Ordered approval steps
    pub steps: Vec<StepDefinition>,
    #[serde(default)]
    pub escalation: EscalationPolicy,
    #[serde(default)]
    pub expiry: ExpiryPolicy,
    /// Send a "due soon" reminder this long before each step is due
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_reminder_lead_secs: Option<u64>,
    /// When this version was built
    pub created_at: DateTime<Utc>,
}

impl WorkflowTemplate {
    /// Structural validation: at least one step, strictly increasing
    /// positions, unique step ids, durations within
    /// [`MAX_DURATION_SECS`].
    pub fn validate(&self) -> ApprovalResult<()> {
        if self.steps.is_empty() {
            return Err(ApprovalError::ValidationError(format!(
                "Template '{}' must have at least one step",
                self.name
            )));
        }

        if self.request_type.as_str().trim().is_empty() {
            return Err(ApprovalError::ValidationError(
                "Template request type must not be empty".into(),
            ));
        }

        let mut seen_ids = HashSet::new();
        let mut last_position = None;
        for step in &self.steps {
            if step.id.0.trim().is_empty() {
                return Err(ApprovalError::ValidationError(
                    "Step id must not be empty".into(),
                ));
            }
            if !seen_ids.insert(&step.id) {
                return Err(ApprovalError::ValidationError(format!(
                    "Duplicate step id: {}",
                    step.id
                )));
            }
            if let Some(last) = last_position {
                if step.position <= last {
                    return Err(ApprovalError::ValidationError(format!(
                        "Step '{}' has position {} which does not follow {}",
                        step.id, step.position, last
                    )));
                }
            }
            last_position = Some(step.position);
            check_duration(
                &format!("Step '{}' duration", step.id),
                step.estimated_duration_secs,
            )?;
        }

        let policy_durations = [
            ("Default due period", self.expiry.default_due_after_secs),
            ("Expiration warning lead", self.expiry.warning_lead_secs),
            ("Step reminder lead", self.step_reminder_lead_secs),
        ];
        for (field, secs) in policy_durations {
            if let Some(secs) = secs {
                check_duration(field, secs)?;
            }
        }

        Ok(())
    }

    /// Full validation: structure plus resolvability of every required
    /// step's approver type.
    pub fn validate_with(&self, supports: impl Fn(&ApproverType) -> bool) -> ApprovalResult<()> {
        self.validate()?;
        for step in self.steps.iter().filter(|s| s.required) {
            if !supports(&step.approver_type) {
                return Err(ApprovalError::ValidationError(format!(
                    "Required step '{}' names approver type '{}' which no resolver supports",
                    step.id, step.approver_type
                )));
            }
        }
        Ok(())
    }

    /// Find a step and its index
    pub fn step(&self, id: &StepId) -> Option<(usize, &StepDefinition)> {
        self.steps.iter().enumerate().find(|(_, s)| &s.id == id)
    }

    pub fn step_at(&self, index: usize) -> Option<&StepDefinition> {
        self.steps.get(index)
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    pub fn is_last_step(&self, index: usize) -> bool {
        index + 1 >= self.steps.len()
    }

    pub fn step_reminder_lead(&self) -> Option<Duration> {
        self.step_reminder_lead_secs.map(bounded_secs)
    }

    /// Start an edit session on a copy of this template
    pub fn edit(&self) -> TemplateDraft {
        TemplateDraft::from_template(self)
    }
}

// ── Template Draft ───────────────────────────────────────────────────

/// A mutable working copy of a template.
///
/// Nothing here is visible to running instances; `build()` produces the
/// template that the store publishes as a new version.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TemplateDraft {
    pub request_type: RequestType,
    pub name: String,
    pub owner: PrincipalId,
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
    #[serde(default)]
    pub escalation: EscalationPolicy,
    #[serde(default)]
    pub expiry: ExpiryPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_reminder_lead_secs: Option<u64>,
    /// Version this draft was derived from (0 for a brand-new template)
    #[serde(default)]
    pub base_version: u32,
}

impl TemplateDraft {
    pub fn new(
        request_type: impl Into<String>,
        name: impl Into<String>,
        owner: PrincipalId,
    ) -> Self {
        Self {
            request_type: RequestType::new(request_type),
            name: name.into(),
            owner,
            steps: Vec::new(),
            escalation: EscalationPolicy::default(),
            expiry: ExpiryPolicy::default(),
            step_reminder_lead_secs: None,
            base_version: 0,
        }
    }

    pub fn from_template(template: &WorkflowTemplate) -> Self {
        Self {
            request_type: template.request_type.clone(),
            name: template.name.clone(),
            owner: template.owner.clone(),
            steps: template.steps.clone(),
            escalation: template.escalation.clone(),
            expiry: template.expiry.clone(),
            step_reminder_lead_secs: template.step_reminder_lead_secs,
            base_version: template.version,
        }
    }

    pub fn with_step(mut self, step: StepDefinition) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_escalation(mut self, escalation: EscalationPolicy) -> Self {
        self.escalation = escalation;
        self
    }

    pub fn with_expiry(mut self, expiry: ExpiryPolicy) -> Self {
        self.expiry = expiry;
        self
    }

    pub fn with_owner(mut self, owner: PrincipalId) -> Self {
        self.owner = owner;
        self
    }

    pub fn with_step_reminder_lead(mut self, lead: Duration) -> Self {
        self.step_reminder_lead_secs = Some(lead.num_seconds().max(0) as u64);
        self
    }

    /// Append a step
    pub fn add_step(&mut self, step: StepDefinition) -> ApprovalResult<()> {
        self.ensure_unique(&step.id)?;
        self.steps.push(step);
        Ok(())
    }

    /// Insert a step at `index` (0-based)
    pub fn insert_step(&mut self, index: usize, step: StepDefinition) -> ApprovalResult<()> {
        if index > self.steps.len() {
            return Err(ApprovalError::ValidationError(format!(
                "Insert position {} is beyond the {} existing steps",
                index,
                self.steps.len()
            )));
        }
        self.ensure_unique(&step.id)?;
        self.steps.insert(index, step);
        Ok(())
    }

    /// Remove a step by id
    pub fn remove_step(&mut self, id: &StepId) -> ApprovalResult<StepDefinition> {
        let index = self.index_of(id)?;
        Ok(self.steps.remove(index))
    }

    /// Move a step to a new 0-based index
    pub fn move_step(&mut self, id: &StepId, to: usize) -> ApprovalResult<()> {
        let from = self.index_of(id)?;
        if to >= self.steps.len() {
            return Err(ApprovalError::ValidationError(format!(
                "Move target {} is out of range for {} steps",
                to,
                self.steps.len()
            )));
        }
        let step = self.steps.remove(from);
        self.steps.insert(to, step);
        Ok(())
    }

    /// Edit a step in place (within the draft only)
    pub fn update_step(
        &mut self,
        id: &StepId,
        edit: impl FnOnce(&mut StepDefinition),
    ) -> ApprovalResult<()> {
        let index = self.index_of(id)?;
        let original_id = self.steps[index].id.clone();
        edit(&mut self.steps[index]);
        if self.steps[index].id != original_id {
            let new_id = self.steps[index].id.clone();
            if self
                .steps
                .iter()
                .enumerate()
                .any(|(i, s)| i != index && s.id == new_id)
            {
                self.steps[index].id = original_id;
                return Err(ApprovalError::ValidationError(format!(
                    "Duplicate step id: {}",
                    new_id
                )));
            }
        }
        Ok(())
    }

    /// Produce an immutable template: positions are renumbered 1..=n in
    /// list order, a fresh id is assigned, and the result is validated.
    pub fn build(&self) -> ApprovalResult<WorkflowTemplate> {
        let steps = self
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| StepDefinition {
                position: i as u32 + 1,
                ..s.clone()
            })
            .collect();

        let template = WorkflowTemplate {
            id: TemplateId::generate(),
            request_type: self.request_type.clone(),
            version: self.base_version + 1,
            name: self.name.clone(),
            owner: self.owner.clone(),
            steps,
            escalation: self.escalation.clone(),
            expiry: self.expiry.clone(),
            step_reminder_lead_secs: self.step_reminder_lead_secs,
            created_at: Utc::now(),
        };
        template.validate()?;
        Ok(template)
    }

    fn index_of(&self, id: &StepId) -> ApprovalResult<usize> {
        self.steps
            .iter()
            .position(|s| &s.id == id)
            .ok_or_else(|| ApprovalError::ValidationError(format!("Unknown step in draft: {}", id)))
    }

    fn ensure_unique(&self, id: &StepId) -> ApprovalResult<()> {
        if self.steps.iter().any(|s| &s.id == id) {
            return Err(ApprovalError::ValidationError(format!(
                "Duplicate step id: {}",
                id
            )));
        }
        Ok(())
    }
}
