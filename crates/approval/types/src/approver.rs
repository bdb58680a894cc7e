//! Approver types: abstract roles resolved to principals at runtime
//!
//! Templates never name people. A step names an [`ApproverType`] and
//! the engine asks its resolver strategies who currently fills that
//! role for the request at hand.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed set of approver roles a step can name.
///
/// `Named` covers deployment-specific roles (for example a safety
/// officer) that a directory registers by name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum ApproverType {
    /// The requester's line manager
    Manager,
    /// Head of the requester's department
    DepartmentHead,
    /// HR team
    HumanResources,
    /// Finance team
    Finance,
    /// IT department (equipment requests)
    ItDepartment,
    /// Portal administrators
    Administrator,
    /// A role registered by name in the deployment's directory
    Named(String),
}

impl ApproverType {
    pub fn named(role: impl Into<String>) -> Self {
        Self::Named(role.into())
    }

    /// Whether this role is derived from the requester's reporting line
    /// rather than from a fixed directory entry.
    pub fn is_relational(&self) -> bool {
        matches!(self, Self::Manager | Self::DepartmentHead)
    }
}

impl fmt::Display for ApproverType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manager => write!(f, "Manager"),
            Self::DepartmentHead => write!(f, "Department Head"),
            Self::HumanResources => write!(f, "HR"),
            Self::Finance => write!(f, "Finance"),
            Self::ItDepartment => write!(f, "IT Department"),
            Self::Administrator => write!(f, "Administrator"),
            Self::Named(name) => write!(f, "{}", name),
        }
    }
}

impl FromStr for ApproverType {
    type Err = std::convert::Infallible;

    /// Parses the labels used by the portal's workflow screens.
    /// Anything unrecognised becomes a `Named` role.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect::<String>()
            .to_lowercase();

        Ok(match normalized.as_str() {
            "manager" | "linemanager" | "reportingmanager" => Self::Manager,
            "departmenthead" | "head" | "hod" => Self::DepartmentHead,
            "hr" | "humanresources" | "hrdepartment" => Self::HumanResources,
            "finance" | "financedepartment" | "accounts" => Self::Finance,
            "it" | "itdepartment" | "itsupport" => Self::ItDepartment,
            "admin" | "administrator" => Self::Administrator,
            _ => Self::Named(s.trim().to_string()),
        })
    }
}
