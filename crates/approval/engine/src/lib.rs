//! Approval Workflow Engine
//!
//! Drives leave, equipment, expense, travel, loan and offer requests
//! through a template's ordered approval steps. Each step is resolved to
//! concrete approvers when it becomes current; every transition is
//! committed atomically with its audit events, and a background
//! scheduler fires due-date reminders, escalations and expiries.
//!
//! # Key Principle
//!
//! **Status is a projection over the audit log.** The stored instance
//! and the events that explain it are always written together.
//!
//! # Architecture
//!
//! The [`ApprovalEngine`] composes specialized components:
//!
//! - [`TemplateStore`]: versioned, immutable templates per request type
//! - [`ApproverResolver`]: strategies mapping approver roles to people
//! - [`StateMachine`]: computes transitions; never writes
//! - [`AuditTrail`]: atomic commits, event stream, notification hand-off
//! - [`EscalationHandler`]: decides what to do about overdue work
//! - [`ReminderScheduler`]: the background scan
//!
//! # Example
//!
//! ```rust
//! use approval_engine::*;
//! use approval_types::*;
//! use std::sync::Arc;
//!
//! let resolver = ReportingLineResolver::new()
//!     .with_manager(PrincipalId::new("alice"), PrincipalId::new("bob"));
//! let engine = ApprovalEngine::new(
//!     EngineConfig::default(),
//!     Arc::new(InMemoryStore::new()),
//!     Arc::new(resolver),
//!     Arc::new(StaticAccessPolicy::default()),
//!     NotificationOutbox::disabled(),
//! )
//! .unwrap();
//!
//! engine
//!     .publish_template(
//!         &TemplateDraft::new("leave", "Leave Approval", PrincipalId::new("hr-lead"))
//!             .with_step(StepDefinition::new("manager", "Manager", ApproverType::Manager)),
//!     )
//!     .unwrap();
//!
//! let instance = engine
//!     .submit(
//!         PrincipalId::new("alice"),
//!         &RequestType::new("leave"),
//!         SubjectRef::new("leave-42"),
//!         None,
//!     )
//!     .unwrap();
//! let done = engine
//!     .decide(
//!         &instance.id,
//!         &StepId::new("manager"),
//!         &PrincipalId::new("bob"),
//!         Decision::Approve,
//!         None,
//!     )
//!     .unwrap();
//!
//! assert_eq!(done.status, InstanceStatus::Approved);
//! ```

#![deny(unsafe_code)]

pub mod audit_trail;
pub mod config;
pub mod engine;
pub mod escalation;
pub mod notifier;
pub mod resolver;
pub mod scheduler;
pub mod state_machine;
pub mod storage;
pub mod template_store;

// Re-export main types
pub use audit_trail::{AuditTrail, Committed, PendingEvent, Transition};
pub use config::{
    ApprovalConfig, DirectoryConfig, EngineConfig, LoggingConfig, NotificationConfig,
    SchedulerConfig,
};
pub use engine::{ApprovalEngine, ReminderOutcome};
pub use escalation::{
    EscalationDecision, EscalationHandler, EscalationTarget, EscalationTrigger, RecommendedAction,
};
pub use notifier::{
    DispatchError, DispatchLoop, LogDispatcher, NotificationDispatcher, NotificationOutbox,
};
pub use resolver::{
    AccessPolicy, ApproverResolver, DirectoryResolver, ReportingLineResolver, ResolutionContext,
    ResolverChain, StaticAccessPolicy,
};
pub use scheduler::{ReminderScheduler, ScanReport};
pub use state_machine::StateMachine;
pub use storage::{
    ApprovalStore, AuditStorage, ChangeSet, InMemoryStore, InstanceStorage, ReminderClaim,
    ReminderStorage, TemplateStorage,
};
pub use template_store::TemplateStore;
