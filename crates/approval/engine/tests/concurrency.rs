//! Concurrent decisions, overlapping scans and storage failures

mod common;

use approval_engine::*;
use approval_types::*;
use chrono::{DateTime, Duration, Utc};
use common::{p, step, Harness};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};

#[test]
fn simultaneous_decisions_exactly_one_wins() {
    let h = Harness::new();

    for round in 0..20 {
        let inst = h.submit("emp", "leave");
        h.approve(&inst, "manager", "boss");
        let barrier = Barrier::new(2);

        let results: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = [("hr1", Decision::Approve), ("hr2", Decision::Reject)]
                .into_iter()
                .map(|(actor, decision)| {
                    let engine = &h.engine;
                    let barrier = &barrier;
                    let inst_id = inst.id.clone();
                    s.spawn(move || {
                        barrier.wait();
                        engine.decide(&inst_id, &step("hr"), &p(actor), decision, None)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let wins = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(wins, 1, "round {round}");
        for loser in results.iter().filter_map(|r| r.as_ref().err()) {
            assert!(
                matches!(
                    loser,
                    ApprovalError::StepAlreadyDecided(_) | ApprovalError::ConcurrencyConflict { .. }
                ),
                "round {round}: {loser}"
            );
        }

        let decisions = h
            .engine
            .history(&inst.id)
            .unwrap()
            .iter()
            .filter(|e| e.involves_step(&step("hr")))
            .count();
        assert_eq!(decisions, 1, "round {round}");
        assert!(h.engine.get_instance(&inst.id).unwrap().is_terminal());
    }
}

#[test]
fn overlapping_scans_fire_each_reminder_once() {
    let h = Harness::new();
    let start = Utc::now();
    let inst = h.submit_at("emp", "offer", Some(start + Duration::days(14)), start);
    let (scheduler, _rx) = ReminderScheduler::new(SchedulerConfig::default(), h.engine.clone());
    let at = start + Duration::days(12) + Duration::minutes(1);
    let barrier = Barrier::new(4);

    let fired: usize = std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let scheduler = &scheduler;
                let barrier = &barrier;
                s.spawn(move || {
                    barrier.wait();
                    scheduler.scan_at(at).unwrap().fired
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).sum()
    });

    assert_eq!(fired, 1);
    let reminders = h
        .engine
        .history(&inst.id)
        .unwrap()
        .iter()
        .filter(|e| e.event_type == AuditEventType::Reminder)
        .count();
    assert_eq!(reminders, 1);
}

// ---------------------------------------------------------------------------
// Storage failures
// ---------------------------------------------------------------------------

/// Delegates to an in-memory store; commits fail while `failing` is set
#[derive(Default)]
struct FlakyStore {
    inner: InMemoryStore,
    failing: AtomicBool,
}

impl TemplateStorage for FlakyStore {
    fn save_template(&self, template: &WorkflowTemplate) -> StorageResult<()> {
        self.inner.save_template(template)
    }

    fn list_templates(&self) -> StorageResult<Vec<WorkflowTemplate>> {
        self.inner.list_templates()
    }

    fn templates_for(&self, request_type: &RequestType) -> StorageResult<Vec<WorkflowTemplate>> {
        self.inner.templates_for(request_type)
    }
}

impl InstanceStorage for FlakyStore {
    fn get_instance(&self, id: &InstanceId) -> StorageResult<Option<WorkflowInstance>> {
        self.inner.get_instance(id)
    }

    fn list_instances(&self) -> StorageResult<Vec<WorkflowInstance>> {
        self.inner.list_instances()
    }

    fn list_assigned_to(&self, principal: &PrincipalId) -> StorageResult<Vec<WorkflowInstance>> {
        self.inner.list_assigned_to(principal)
    }

    fn commit(&self, change: ChangeSet) -> StorageResult<Vec<AuditEvent>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("connection reset".into()));
        }
        self.inner.commit(change)
    }
}

impl AuditStorage for FlakyStore {
    fn append(
        &self,
        events: Vec<AuditEvent>,
        comments: Vec<Comment>,
    ) -> StorageResult<Vec<AuditEvent>> {
        self.inner.append(events, comments)
    }

    fn events_for(&self, instance_id: &InstanceId) -> StorageResult<Vec<AuditEvent>> {
        self.inner.events_for(instance_id)
    }

    fn comments_for(&self, instance_id: &InstanceId) -> StorageResult<Vec<Comment>> {
        self.inner.comments_for(instance_id)
    }
}

impl ReminderStorage for FlakyStore {
    fn due_reminders(&self, now: DateTime<Utc>) -> StorageResult<Vec<Reminder>> {
        self.inner.due_reminders(now)
    }

    fn reminders_for(&self, instance_id: &InstanceId) -> StorageResult<Vec<Reminder>> {
        self.inner.reminders_for(instance_id)
    }

    fn claim_reminder(
        &self,
        id: &ReminderId,
        event: Option<AuditEvent>,
    ) -> StorageResult<ReminderClaim> {
        self.inner.claim_reminder(id, event)
    }
}

impl ApprovalStore for FlakyStore {}

#[test]
fn failed_commit_leaves_no_partial_state() {
    let store = Arc::new(FlakyStore::default());
    let (outbox, mut notifications) = NotificationOutbox::channel();
    let engine = ApprovalEngine::new(
        EngineConfig::default(),
        store.clone(),
        Arc::new(common::resolver()),
        Arc::new(StaticAccessPolicy::default()),
        outbox,
    )
    .unwrap();
    engine
        .publish_template(
            &TemplateDraft::new("leave", "Leave", p("hr-lead"))
                .with_step(StepDefinition::new("manager", "Manager", ApproverType::Manager))
                .with_step(StepDefinition::new("hr", "HR", ApproverType::HumanResources)),
        )
        .unwrap();

    let inst = engine
        .submit(p("emp"), &RequestType::new("leave"), SubjectRef::new("leave-1"), None)
        .unwrap();
    while notifications.try_recv().is_ok() {}
    let reminders_before = engine.reminders(&inst.id).unwrap().len();

    store.failing.store(true, Ordering::SeqCst);
    let err = engine
        .decide(&inst.id, &step("manager"), &p("boss"), Decision::Approve, Some("fine"))
        .unwrap_err();
    assert!(matches!(err, ApprovalError::Storage(StorageError::Backend(_))));

    let stored = engine.get_instance(&inst.id).unwrap();
    assert_eq!(stored.version, inst.version);
    assert_eq!(stored.current_step_index, 0);
    assert!(!stored.steps[0].status.is_decided());
    assert_eq!(engine.history(&inst.id).unwrap().len(), 1);
    assert!(engine.comments(&inst.id).unwrap().is_empty());
    assert_eq!(engine.reminders(&inst.id).unwrap().len(), reminders_before);
    assert!(notifications.try_recv().is_err());

    // Recovers once the backend does
    store.failing.store(false, Ordering::SeqCst);
    let after = engine
        .decide(&inst.id, &step("manager"), &p("boss"), Decision::Approve, Some("fine"))
        .unwrap();
    assert_eq!(after.current_step_index, 1);
}

#[test]
fn failed_submit_creates_nothing() {
    let store = Arc::new(FlakyStore::default());
    let engine = ApprovalEngine::new(
        EngineConfig::default(),
        store.clone(),
        Arc::new(common::resolver()),
        Arc::new(StaticAccessPolicy::default()),
        NotificationOutbox::disabled(),
    )
    .unwrap();
    engine
        .publish_template(
            &TemplateDraft::new("leave", "Leave", p("hr-lead"))
                .with_step(StepDefinition::new("manager", "Manager", ApproverType::Manager)),
        )
        .unwrap();

    store.failing.store(true, Ordering::SeqCst);
    assert!(engine
        .submit(p("emp"), &RequestType::new("leave"), SubjectRef::new("leave-1"), None)
        .is_err());
    assert!(engine.list_instances().unwrap().is_empty());
    assert!(engine.list_pending_for_approver(&p("boss")).unwrap().is_empty());
}

fn flaky_engine(store: &Arc<FlakyStore>) -> Arc<ApprovalEngine> {
    let engine = ApprovalEngine::new(
        EngineConfig::default(),
        store.clone(),
        Arc::new(common::resolver()),
        Arc::new(StaticAccessPolicy::default()),
        NotificationOutbox::disabled(),
    )
    .unwrap();
    engine
        .publish_template(
            &TemplateDraft::new("offer", "Offer", p("hr-lead"))
                .with_step(
                    StepDefinition::new("hr", "HR", ApproverType::HumanResources)
                        .with_duration(Duration::days(20)),
                )
                .with_expiry(ExpiryPolicy::hard(Duration::days(14), Duration::hours(48))),
        )
        .unwrap();
    engine
        .publish_template(
            &TemplateDraft::new("leave", "Leave", p("hr-lead")).with_step(
                StepDefinition::new("manager", "Manager", ApproverType::Manager)
                    .with_duration(Duration::days(2)),
            ),
        )
        .unwrap();
    Arc::new(engine)
}

#[test]
fn failed_expiry_stays_due_until_it_commits() {
    let store = Arc::new(FlakyStore::default());
    let engine = flaky_engine(&store);
    let (scheduler, _rx) = ReminderScheduler::new(SchedulerConfig::default(), engine.clone());
    let start = Utc::now();
    let inst = engine
        .submit_at(p("emp"), &RequestType::new("offer"), SubjectRef::new("offer-1"), None, start)
        .unwrap();
    let due = start + Duration::days(14);

    store.failing.store(true, Ordering::SeqCst);
    let failed = scheduler.scan_at(due + Duration::minutes(1)).unwrap();
    assert_eq!((failed.due, failed.fired, failed.failed), (2, 1, 1));
    let stored = engine.get_instance(&inst.id).unwrap();
    assert_eq!(stored.status, InstanceStatus::Pending);
    assert_eq!(stored.version, inst.version);

    store.failing.store(false, Ordering::SeqCst);
    let recovered = scheduler.scan_at(due + Duration::minutes(2)).unwrap();
    assert_eq!((recovered.due, recovered.fired, recovered.failed), (1, 1, 0));
    assert_eq!(
        engine.get_instance(&inst.id).unwrap().status,
        InstanceStatus::Expired
    );

    let expirations = engine
        .history(&inst.id)
        .unwrap()
        .iter()
        .filter(|e| e.event_type == AuditEventType::Expired)
        .count();
    assert_eq!(expirations, 1);
    assert_eq!(scheduler.scan_at(due + Duration::days(1)).unwrap().due, 0);
}

#[test]
fn failed_escalation_stays_due_until_it_commits() {
    let store = Arc::new(FlakyStore::default());
    let engine = flaky_engine(&store);
    let (scheduler, _rx) = ReminderScheduler::new(SchedulerConfig::default(), engine.clone());
    let start = Utc::now();
    let inst = engine
        .submit_at(p("emp"), &RequestType::new("leave"), SubjectRef::new("leave-1"), None, start)
        .unwrap();
    let overdue = start + Duration::days(2) + Duration::minutes(1);

    store.failing.store(true, Ordering::SeqCst);
    assert_eq!(scheduler.scan_at(overdue).unwrap().failed, 1);
    assert!(engine.get_instance(&inst.id).unwrap().awaits(&p("boss")));
    assert!(engine
        .history(&inst.id)
        .unwrap()
        .iter()
        .all(|e| e.event_type != AuditEventType::Reminder));

    store.failing.store(false, Ordering::SeqCst);
    assert_eq!(scheduler.scan_at(overdue).unwrap().fired, 1);
    let rerouted = engine.get_instance(&inst.id).unwrap();
    assert!(rerouted.awaits(&p("hr-lead")));
    assert_eq!(rerouted.steps[0].escalation_level, 1);
}
