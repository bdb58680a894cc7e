//! Storage contract for the approval engine
//!
//! The engine only ever talks to these traits. Persistence technology is
//! the host's choice; [`InMemoryStore`] backs tests and the daemon's
//! default configuration.

mod memory;
mod traits;

pub use memory::InMemoryStore;
pub use traits::{
    ApprovalStore, AuditStorage, ChangeSet, InstanceStorage, ReminderClaim, ReminderStorage,
    TemplateStorage,
};
