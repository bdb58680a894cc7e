//! Approval Workflow Domain Types
//!
//! Requests (leave, equipment, expense, travel, loan, offer) pass through
//! a strictly sequential list of approval steps. Each step names an
//! abstract approver role; the engine resolves it to concrete
//! principals when the step becomes current.
//!
//! # Key Concepts
//!
//! - **WorkflowTemplate**: a versioned, immutable, ordered list of
//!   [`StepDefinition`]s for one [`RequestType`]. Edits happen on a
//!   [`TemplateDraft`] and publish as a new version.
//! - **WorkflowInstance**: one request's run against a deep-copied
//!   template snapshot, with one [`StepExecution`] per step.
//! - **AuditEvent**: append-only record of every transition. The
//!   instance status is a projection over the log ([`project_status`]).
//! - **Reminder**: a due-date or expiration timer that fires once.
//! - **Notification**: what the engine hands to the delivery
//!   collaborator for every audit append and fired reminder.
//!
//! # Design Principles
//!
//! 1. Terminal states are sinks; only comments may follow.
//! 2. An unresolvable approver blocks the instance explicitly, it never
//!    stalls silently.
//! 3. Running instances never see later template edits.

#![deny(unsafe_code)]

mod approver;
mod audit;
mod errors;
mod ids;
mod instance;
mod notification;
mod reminder;
mod template;

pub use approver::*;
pub use audit::*;
pub use errors::*;
pub use ids::*;
pub use instance::*;
pub use notification::*;
pub use reminder::*;
pub use template::*;
