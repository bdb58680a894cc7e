//! Shared fixtures for the engine integration tests
#![allow(dead_code)]

use approval_engine::{
    ApprovalEngine, DirectoryResolver, EngineConfig, InMemoryStore, NotificationOutbox,
    ReportingLineResolver, ResolverChain, StaticAccessPolicy,
};
use approval_types::*;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;

pub fn p(id: &str) -> PrincipalId {
    PrincipalId::new(id)
}

pub fn step(id: &str) -> StepId {
    StepId::new(id)
}

/// Engine wired to an in-memory store, a fixed org chart and a captured
/// notification queue
pub struct Harness {
    pub engine: Arc<ApprovalEngine>,
    pub store: Arc<InMemoryStore>,
    pub notifications: mpsc::UnboundedReceiver<Notification>,
}

/// emp reports to boss in "eng" (headed by head); newhire has no manager
pub fn resolver() -> ResolverChain {
    ResolverChain::new()
        .with(Arc::new(
            ReportingLineResolver::new()
                .with_manager(p("emp"), p("boss"))
                .with_department(p("emp"), "eng")
                .with_department_head("eng", p("head")),
        ))
        .with(Arc::new(
            DirectoryResolver::new()
                .with_role(ApproverType::HumanResources, [p("hr1"), p("hr2")])
                .with_role(ApproverType::Finance, [p("fin1")])
                .with_role(ApproverType::ItDepartment, [p("it1")])
                .with_role(ApproverType::Administrator, []),
        ))
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(Arc::new(InMemoryStore::new()))
    }

    pub fn with_store(store: Arc<InMemoryStore>) -> Self {
        let (outbox, notifications) = NotificationOutbox::channel();
        let engine = ApprovalEngine::new(
            EngineConfig::default(),
            store.clone(),
            Arc::new(resolver()),
            Arc::new(StaticAccessPolicy::new([p("root")])),
            outbox,
        )
        .unwrap();

        let harness = Self {
            engine: Arc::new(engine),
            store,
            notifications,
        };
        harness.publish_defaults();
        harness
    }

    fn publish_defaults(&self) {
        let drafts = [
            TemplateDraft::new("leave", "Leave Approval", p("hr-lead"))
                .with_step(
                    StepDefinition::new("manager", "Manager Approval", ApproverType::Manager)
                        .with_duration(Duration::days(2)),
                )
                .with_step(
                    StepDefinition::new("hr", "HR Approval", ApproverType::HumanResources)
                        .with_duration(Duration::days(1)),
                ),
            TemplateDraft::new("expense", "Expense Approval", p("fin-lead"))
                .with_step(StepDefinition::new("manager", "Manager", ApproverType::Manager))
                .with_step(StepDefinition::new("head", "Department Head", ApproverType::DepartmentHead))
                .with_step(StepDefinition::new("finance", "Finance", ApproverType::Finance)),
            TemplateDraft::new("training", "Training Approval", p("hr-lead"))
                .with_step(StepDefinition::new("manager", "Manager", ApproverType::Manager).optional())
                .with_step(StepDefinition::new("hr", "HR", ApproverType::HumanResources)),
            TemplateDraft::new("travel", "Travel Approval", p("ops-lead"))
                .with_step(StepDefinition::new("manager", "Manager", ApproverType::Manager))
                .with_step(StepDefinition::new("admin", "Administration", ApproverType::Administrator)),
            TemplateDraft::new("offer", "Offer Approval", p("hr-lead"))
                .with_step(
                    StepDefinition::new("hr", "HR Review", ApproverType::HumanResources)
                        .with_duration(Duration::days(20)),
                )
                .with_expiry(ExpiryPolicy::hard(Duration::days(14), Duration::hours(48))),
        ];
        for draft in &drafts {
            self.engine.publish_template(draft).unwrap();
        }
    }

    pub fn submit(&self, requester: &str, request_type: &str) -> WorkflowInstance {
        self.engine
            .submit(
                p(requester),
                &RequestType::new(request_type),
                SubjectRef::new(format!("{}-1", request_type)),
                None,
            )
            .unwrap()
    }

    pub fn submit_at(
        &self,
        requester: &str,
        request_type: &str,
        due_date: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> WorkflowInstance {
        self.engine
            .submit_at(
                p(requester),
                &RequestType::new(request_type),
                SubjectRef::new(format!("{}-1", request_type)),
                due_date,
                now,
            )
            .unwrap()
    }

    pub fn approve(&self, instance: &WorkflowInstance, step_id: &str, actor: &str) -> WorkflowInstance {
        self.engine
            .decide(&instance.id, &step(step_id), &p(actor), Decision::Approve, None)
            .unwrap()
    }

    pub fn event_types(&self, instance: &WorkflowInstance) -> Vec<AuditEventType> {
        self.engine
            .history(&instance.id)
            .unwrap()
            .iter()
            .map(|e| e.event_type)
            .collect()
    }

    /// Everything queued for delivery so far
    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        let mut drained = Vec::new();
        while let Ok(n) = self.notifications.try_recv() {
            drained.push(n);
        }
        drained
    }
}
