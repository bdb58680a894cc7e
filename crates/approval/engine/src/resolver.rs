//! Approver resolution strategies
//!
//! A step names an [`ApproverType`]; a strategy turns it into the set of
//! principals who may decide the step for one particular request. An
//! empty set is a legitimate answer and blocks the instance.

use crate::config::DirectoryConfig;
use approval_types::{ApproverType, PrincipalId, RequestType, SubjectRef, WorkflowInstance};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// What a strategy may look at when resolving
#[derive(Clone, Debug)]
pub struct ResolutionContext {
    pub requester: PrincipalId,
    pub request_type: RequestType,
    pub subject: SubjectRef,
}

impl ResolutionContext {
    pub fn new(requester: PrincipalId, request_type: RequestType, subject: SubjectRef) -> Self {
        Self {
            requester,
            request_type,
            subject,
        }
    }

    pub fn for_instance(instance: &WorkflowInstance) -> Self {
        Self {
            requester: instance.requester.clone(),
            request_type: instance.template.request_type.clone(),
            subject: instance.subject.clone(),
        }
    }
}

/// Maps approver roles to principals
pub trait ApproverResolver: Send + Sync {
    /// Whether this strategy knows how to resolve `approver_type` at all
    fn supports(&self, approver_type: &ApproverType) -> bool;

    /// Principals filling `approver_type` for this request; may be empty
    fn resolve(&self, approver_type: &ApproverType, ctx: &ResolutionContext)
        -> BTreeSet<PrincipalId>;
}

// ── Reporting line ───────────────────────────────────────────────────

/// Resolves `Manager` and `DepartmentHead` from the requester's place in
/// the organisation chart.
#[derive(Debug, Default, Clone)]
pub struct ReportingLineResolver {
    managers: HashMap<PrincipalId, PrincipalId>,
    departments: HashMap<PrincipalId, String>,
    department_heads: HashMap<String, PrincipalId>,
}

impl ReportingLineResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_manager(mut self, employee: PrincipalId, manager: PrincipalId) -> Self {
        self.managers.insert(employee, manager);
        self
    }

    pub fn with_department(mut self, employee: PrincipalId, department: impl Into<String>) -> Self {
        self.departments.insert(employee, department.into());
        self
    }

    pub fn with_department_head(mut self, department: impl Into<String>, head: PrincipalId) -> Self {
        self.department_heads.insert(department.into(), head);
        self
    }
}

impl ApproverResolver for ReportingLineResolver {
    fn supports(&self, approver_type: &ApproverType) -> bool {
        approver_type.is_relational()
    }

    fn resolve(
        &self,
        approver_type: &ApproverType,
        ctx: &ResolutionContext,
    ) -> BTreeSet<PrincipalId> {
        let found = match approver_type {
            ApproverType::Manager => self.managers.get(&ctx.requester).cloned(),
            ApproverType::DepartmentHead => self
                .departments
                .get(&ctx.requester)
                .and_then(|dept| self.department_heads.get(dept))
                .cloned(),
            _ => None,
        };
        found.into_iter().collect()
    }
}

// ── Directory ────────────────────────────────────────────────────────

/// Fixed role membership (HR team, finance team, named roles)
#[derive(Debug, Default, Clone)]
pub struct DirectoryResolver {
    roles: HashMap<ApproverType, BTreeSet<PrincipalId>>,
}

impl DirectoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a role. A role registered with no members is still
    /// supported; it resolves to nobody and blocks.
    pub fn with_role(
        mut self,
        approver_type: ApproverType,
        members: impl IntoIterator<Item = PrincipalId>,
    ) -> Self {
        self.roles
            .entry(approver_type)
            .or_default()
            .extend(members);
        self
    }

    pub fn roles(&self) -> impl Iterator<Item = &ApproverType> {
        self.roles.keys()
    }
}

impl ApproverResolver for DirectoryResolver {
    fn supports(&self, approver_type: &ApproverType) -> bool {
        self.roles.contains_key(approver_type)
    }

    fn resolve(
        &self,
        approver_type: &ApproverType,
        _ctx: &ResolutionContext,
    ) -> BTreeSet<PrincipalId> {
        self.roles.get(approver_type).cloned().unwrap_or_default()
    }
}

// ── Chain ────────────────────────────────────────────────────────────

/// Ordered set of strategies; resolution is the union of every strategy
/// that supports the role.
#[derive(Clone, Default)]
pub struct ResolverChain {
    strategies: Vec<Arc<dyn ApproverResolver>>,
}

impl ResolverChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, strategy: Arc<dyn ApproverResolver>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Build the reporting-line and directory strategies from config
    pub fn from_directory(directory: &DirectoryConfig) -> Self {
        let mut reporting = ReportingLineResolver::new();
        for (employee, manager) in &directory.managers {
            reporting = reporting.with_manager(PrincipalId::new(employee), PrincipalId::new(manager));
        }
        for (employee, department) in &directory.departments {
            reporting = reporting.with_department(PrincipalId::new(employee), department.clone());
        }
        for (department, head) in &directory.department_heads {
            reporting = reporting.with_department_head(department.clone(), PrincipalId::new(head));
        }

        let mut roles = DirectoryResolver::new();
        for (role, members) in &directory.roles {
            let approver_type = role
                .parse::<ApproverType>()
                .unwrap_or_else(|_| ApproverType::named(role.clone()));
            roles = roles.with_role(approver_type, members.iter().map(PrincipalId::new));
        }

        Self::new().with(Arc::new(reporting)).with(Arc::new(roles))
    }
}

impl ApproverResolver for ResolverChain {
    fn supports(&self, approver_type: &ApproverType) -> bool {
        self.strategies.iter().any(|s| s.supports(approver_type))
    }

    fn resolve(
        &self,
        approver_type: &ApproverType,
        ctx: &ResolutionContext,
    ) -> BTreeSet<PrincipalId> {
        self.strategies
            .iter()
            .filter(|s| s.supports(approver_type))
            .flat_map(|s| s.resolve(approver_type, ctx))
            .collect()
    }
}

// ── Access policy ────────────────────────────────────────────────────

/// Authorization questions the engine needs answered. Authentication
/// stays with the host system.
pub trait AccessPolicy: Send + Sync {
    fn is_admin(&self, principal: &PrincipalId) -> bool;
}

/// A fixed administrator list
#[derive(Debug, Default, Clone)]
pub struct StaticAccessPolicy {
    admins: BTreeSet<PrincipalId>,
}

impl StaticAccessPolicy {
    pub fn new(admins: impl IntoIterator<Item = PrincipalId>) -> Self {
        Self {
            admins: admins.into_iter().collect(),
        }
    }
}

impl AccessPolicy for StaticAccessPolicy {
    fn is_admin(&self, principal: &PrincipalId) -> bool {
        self.admins.contains(principal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(requester: &str) -> ResolutionContext {
        ResolutionContext::new(
            PrincipalId::new(requester),
            RequestType::new("leave"),
            SubjectRef::new("leave-1"),
        )
    }

    fn p(id: &str) -> PrincipalId {
        PrincipalId::new(id)
    }

    #[test]
    fn test_reporting_line() {
        let resolver = ReportingLineResolver::new()
            .with_manager(p("alice"), p("bob"))
            .with_department(p("alice"), "eng")
            .with_department_head("eng", p("carol"));

        assert_eq!(
            resolver.resolve(&ApproverType::Manager, &ctx("alice")),
            BTreeSet::from([p("bob")])
        );
        assert_eq!(
            resolver.resolve(&ApproverType::DepartmentHead, &ctx("alice")),
            BTreeSet::from([p("carol")])
        );
        assert!(resolver.resolve(&ApproverType::Manager, &ctx("zed")).is_empty());
        assert!(!resolver.supports(&ApproverType::Finance));
    }

    #[test]
    fn test_directory_role_without_members_is_supported() {
        let resolver = DirectoryResolver::new()
            .with_role(ApproverType::HumanResources, [p("hr1"), p("hr2")])
            .with_role(ApproverType::named("Safety Officer"), []);

        assert!(resolver.supports(&ApproverType::named("Safety Officer")));
        assert!(resolver
            .resolve(&ApproverType::named("Safety Officer"), &ctx("alice"))
            .is_empty());
        assert_eq!(
            resolver.resolve(&ApproverType::HumanResources, &ctx("alice")).len(),
            2
        );
        assert!(!resolver.supports(&ApproverType::Finance));
    }

    #[test]
    fn test_chain_unions_supporting_strategies() {
        let chain = ResolverChain::new()
            .with(Arc::new(
                DirectoryResolver::new().with_role(ApproverType::Finance, [p("f1")]),
            ))
            .with(Arc::new(
                DirectoryResolver::new().with_role(ApproverType::Finance, [p("f2"), p("f1")]),
            ));

        assert!(chain.supports(&ApproverType::Finance));
        assert!(!chain.supports(&ApproverType::Manager));
        assert_eq!(
            chain.resolve(&ApproverType::Finance, &ctx("alice")),
            BTreeSet::from([p("f1"), p("f2")])
        );
    }

    #[test]
    fn test_chain_from_directory_config() {
        let mut directory = DirectoryConfig::default();
        directory.managers.insert("alice".into(), "bob".into());
        directory
            .roles
            .insert("HR".into(), vec!["hr1".into()]);
        directory
            .roles
            .insert("Safety Officer".into(), vec!["so1".into()]);

        let chain = ResolverChain::from_directory(&directory);
        assert_eq!(chain.len(), 2);
        assert_eq!(
            chain.resolve(&ApproverType::HumanResources, &ctx("alice")),
            BTreeSet::from([p("hr1")])
        );
        assert_eq!(
            chain.resolve(&ApproverType::named("Safety Officer"), &ctx("alice")),
            BTreeSet::from([p("so1")])
        );
        assert_eq!(
            chain.resolve(&ApproverType::Manager, &ctx("alice")),
            BTreeSet::from([p("bob")])
        );
    }

    #[test]
    fn test_static_access_policy() {
        let policy = StaticAccessPolicy::new([p("root")]);
        assert!(policy.is_admin(&p("root")));
        assert!(!policy.is_admin(&p("alice")));
    }
}
