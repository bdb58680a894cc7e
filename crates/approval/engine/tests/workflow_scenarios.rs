//! End-to-end request lifecycles through the engine API

mod common;

use approval_types::*;
use common::{p, step, Harness};

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

#[test]
fn fresh_instance_is_pending_at_first_step() {
    let h = Harness::new();
    let inst = h.submit("emp", "leave");

    assert_eq!(inst.status, InstanceStatus::Pending);
    assert_eq!(inst.current_step_index, 0);
    assert!(inst.awaits(&p("boss")));
    assert_eq!(h.event_types(&inst), vec![AuditEventType::Submitted]);
}

#[test]
fn leave_rejected_by_hr() {
    let h = Harness::new();
    let inst = h.submit("emp", "leave");

    h.approve(&inst, "manager", "boss");
    let rejected = h
        .engine
        .decide(
            &inst.id,
            &step("hr"),
            &p("hr2"),
            Decision::Reject,
            Some("insufficient balance"),
        )
        .unwrap();
    assert_eq!(rejected.status, InstanceStatus::Rejected);
    assert!(rejected.completed_at.is_some());

    let history = h.engine.history(&inst.id).unwrap();
    let shape: Vec<_> = history
        .iter()
        .map(|e| (e.event_type, e.step_id.clone(), e.comment().map(str::to_string)))
        .collect();
    assert_eq!(
        shape,
        vec![
            (AuditEventType::Submitted, None, None),
            (AuditEventType::StepApproved, Some(step("manager")), None),
            (
                AuditEventType::StepRejected,
                Some(step("hr")),
                Some("insufficient balance".to_string())
            ),
        ]
    );

    let comments = h.engine.comments(&inst.id).unwrap();
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].step_id, Some(step("hr")));
    assert_eq!(h.engine.replay_status(&inst.id).unwrap(), InstanceStatus::Rejected);
}

#[test]
fn three_required_approvals_approve() {
    let h = Harness::new();
    let inst = h.submit("emp", "expense");

    h.approve(&inst, "manager", "boss");
    h.approve(&inst, "head", "head");
    let done = h.approve(&inst, "finance", "fin1");

    assert_eq!(done.status, InstanceStatus::Approved);
    assert_eq!(
        h.event_types(&inst),
        vec![
            AuditEventType::Submitted,
            AuditEventType::StepApproved,
            AuditEventType::StepApproved,
            AuditEventType::StepApproved,
        ]
    );
    assert!(done.steps.iter().all(|s| s.status == StepStatus::Approved));
}

#[test]
fn required_rejection_never_reaches_later_approvers() {
    let mut h = Harness::new();
    let inst = h.submit("emp", "expense");
    h.approve(&inst, "manager", "boss");

    let rejected = h
        .engine
        .decide(&inst.id, &step("head"), &p("head"), Decision::Reject, None)
        .unwrap();

    assert_eq!(rejected.status, InstanceStatus::Rejected);
    assert_eq!(rejected.current_step_index, 1);
    assert!(!rejected.steps[2].is_activated());
    assert!(rejected.steps[2].assignees.is_empty());

    let notified_finance = h
        .drain_notifications()
        .iter()
        .any(|n| n.recipients.contains(&p("fin1")));
    assert!(!notified_finance);
    assert!(h.engine.list_pending_for_approver(&p("fin1")).unwrap().is_empty());
}

#[test]
fn duplicate_decision_reports_already_decided() {
    let h = Harness::new();
    let inst = h.submit("emp", "leave");
    h.approve(&inst, "manager", "boss");
    let before = h.engine.history(&inst.id).unwrap().len();

    let err = h
        .engine
        .decide(&inst.id, &step("manager"), &p("boss"), Decision::Approve, None)
        .unwrap_err();

    assert!(matches!(err, ApprovalError::StepAlreadyDecided(_)));
    assert_eq!(h.engine.history(&inst.id).unwrap().len(), before);
}

#[test]
fn first_responder_wins() {
    let h = Harness::new();
    let inst = h.submit("emp", "leave");
    h.approve(&inst, "manager", "boss");

    h.approve(&inst, "hr", "hr1");
    let err = h
        .engine
        .decide(&inst.id, &step("hr"), &p("hr2"), Decision::Reject, None)
        .unwrap_err();

    assert!(matches!(err, ApprovalError::StepAlreadyDecided(_)));
    let stored = h.engine.get_instance(&inst.id).unwrap();
    assert_eq!(stored.status, InstanceStatus::Approved);
    assert_eq!(stored.steps[1].approver, Some(p("hr1")));
}

#[test]
fn outsider_and_out_of_turn_decisions_are_refused() {
    let h = Harness::new();
    let inst = h.submit("emp", "leave");

    for (step_id, actor) in [("manager", "hr1"), ("hr", "hr1"), ("manager", "emp")] {
        let err = h
            .engine
            .decide(&inst.id, &step(step_id), &p(actor), Decision::Approve, None)
            .unwrap_err();
        assert!(matches!(err, ApprovalError::InvalidState(_)), "{step_id}/{actor}");
    }
    assert!(matches!(
        h.engine
            .decide(&inst.id, &step("ceo"), &p("boss"), Decision::Approve, None)
            .unwrap_err(),
        ApprovalError::StepNotFound { .. }
    ));
    assert_eq!(h.event_types(&inst), vec![AuditEventType::Submitted]);
}

#[test]
fn optional_step_rejection_skips_and_advances() {
    let h = Harness::new();
    let inst = h.submit("emp", "training");

    let after = h
        .engine
        .decide(&inst.id, &step("manager"), &p("boss"), Decision::Reject, Some("not needed"))
        .unwrap();
    assert_eq!(after.status, InstanceStatus::Pending);
    assert_eq!(after.steps[0].status, StepStatus::Skipped);
    assert_eq!(after.current_step_index, 1);

    let done = h.approve(&inst, "hr", "hr1");
    assert_eq!(done.status, InstanceStatus::Approved);
}

// ---------------------------------------------------------------------------
// Blocked instances
// ---------------------------------------------------------------------------

#[test]
fn unresolved_first_approver_blocks() {
    let mut h = Harness::new();
    let inst = h.submit("newhire", "leave");

    assert_eq!(inst.status, InstanceStatus::Blocked);
    assert_eq!(
        h.event_types(&inst),
        vec![AuditEventType::Submitted, AuditEventType::Blocked]
    );
    assert_eq!(h.engine.replay_status(&inst.id).unwrap(), InstanceStatus::Blocked);

    let blocked_notice = h
        .drain_notifications()
        .into_iter()
        .find(|n| n.kind == NotificationKind::Audit(AuditEventType::Blocked))
        .unwrap();
    assert!(blocked_notice.recipients.contains(&p("hr-lead")));
}

#[test]
fn unresolved_later_approver_blocks_after_advance() {
    let h = Harness::new();
    let inst = h.submit("emp", "travel");
    let after = h.approve(&inst, "manager", "boss");

    assert_eq!(after.status, InstanceStatus::Blocked);
    assert_eq!(after.current_step_index, 1);
    assert!(matches!(
        h.engine
            .decide(&inst.id, &step("admin"), &p("root"), Decision::Approve, None)
            .unwrap_err(),
        ApprovalError::InvalidState(_)
    ));
}

#[test]
fn admin_reassigns_blocked_step() {
    let h = Harness::new();
    let inst = h.submit("newhire", "leave");

    assert!(matches!(
        h.engine
            .reassign_approver(&inst.id, &step("manager"), p("boss"), &p("emp"))
            .unwrap_err(),
        ApprovalError::InvalidState(_)
    ));

    let reassigned = h
        .engine
        .reassign_approver(&inst.id, &step("manager"), p("boss"), &p("root"))
        .unwrap();
    assert_eq!(reassigned.status, InstanceStatus::Pending);
    assert!(reassigned.awaits(&p("boss")));
    assert_eq!(h.engine.replay_status(&inst.id).unwrap(), InstanceStatus::Pending);

    // No longer blocked, so a second reassignment is refused
    assert!(h
        .engine
        .reassign_approver(&inst.id, &step("manager"), p("hr1"), &p("root"))
        .is_err());

    h.approve(&inst, "manager", "boss");
    let done = h.approve(&inst, "hr", "hr2");
    assert_eq!(done.status, InstanceStatus::Approved);
    assert_eq!(
        h.event_types(&inst),
        vec![
            AuditEventType::Submitted,
            AuditEventType::Blocked,
            AuditEventType::Reassigned,
            AuditEventType::StepApproved,
            AuditEventType::StepApproved,
        ]
    );
}

// ---------------------------------------------------------------------------
// Cancellation and comments
// ---------------------------------------------------------------------------

#[test]
fn only_requester_or_admin_cancels() {
    let h = Harness::new();
    let inst = h.submit("emp", "leave");

    assert!(matches!(
        h.engine.cancel(&inst.id, &p("boss"), "not yours").unwrap_err(),
        ApprovalError::InvalidState(_)
    ));

    let cancelled = h.engine.cancel(&inst.id, &p("emp"), "plans changed").unwrap();
    assert_eq!(cancelled.status, InstanceStatus::Cancelled);

    let other = h.submit("emp", "leave");
    assert_eq!(
        h.engine.cancel(&other.id, &p("root"), "duplicate").unwrap().status,
        InstanceStatus::Cancelled
    );
}

#[test]
fn terminal_instances_accept_only_comments() {
    let h = Harness::new();
    let inst = h.submit("emp", "leave");
    h.engine.cancel(&inst.id, &p("emp"), "plans changed").unwrap();

    assert!(matches!(
        h.engine.cancel(&inst.id, &p("emp"), "again").unwrap_err(),
        ApprovalError::InvalidState(_)
    ));
    assert!(matches!(
        h.engine
            .decide(&inst.id, &step("manager"), &p("boss"), Decision::Approve, None)
            .unwrap_err(),
        ApprovalError::InvalidState(_)
    ));

    let comment = h
        .engine
        .add_comment(&inst.id, &p("boss"), "noted", Some(&step("manager")))
        .unwrap();
    assert_eq!(comment.text, "noted");
    assert_eq!(
        h.event_types(&inst),
        vec![
            AuditEventType::Submitted,
            AuditEventType::Cancelled,
            AuditEventType::CommentAdded,
        ]
    );
    // A comment never changes status
    assert_eq!(h.engine.replay_status(&inst.id).unwrap(), InstanceStatus::Cancelled);
}

#[test]
fn comment_validation() {
    let h = Harness::new();
    let inst = h.submit("emp", "leave");

    assert!(matches!(
        h.engine.add_comment(&inst.id, &p("emp"), "  ", None).unwrap_err(),
        ApprovalError::ValidationError(_)
    ));
    assert!(matches!(
        h.engine
            .add_comment(&inst.id, &p("emp"), "hi", Some(&step("nope")))
            .unwrap_err(),
        ApprovalError::StepNotFound { .. }
    ));
    assert!(h
        .engine
        .add_comment(&InstanceId::new("missing"), &p("emp"), "hi", None)
        .unwrap_err()
        .is_not_found());
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

#[test]
fn running_instances_keep_their_template_snapshot() {
    let h = Harness::new();
    let inst = h.submit("emp", "leave");

    let mut draft = h
        .engine
        .templates()
        .get_latest(&RequestType::new("leave"))
        .unwrap()
        .edit();
    draft.remove_step(&step("hr")).unwrap();
    let v2 = h.engine.publish_template(&draft).unwrap();
    assert_eq!(v2.version, 2);

    let after = h.approve(&inst, "manager", "boss");
    assert_eq!(after.template.version, 1);
    assert_eq!(after.status, InstanceStatus::Pending);
    assert!(after.awaits(&p("hr1")));

    let fresh = h.submit("emp", "leave");
    assert_eq!(h.approve(&fresh, "manager", "boss").status, InstanceStatus::Approved);
}

#[test]
fn oversized_durations_are_refused_at_publish() {
    let h = Harness::new();
    for secs in [u64::MAX, 10_000_000_000_000] {
        let draft = TemplateDraft::new("sabbatical", "Sabbatical", p("hr-lead")).with_step(
            StepDefinition::new("manager", "Manager", ApproverType::Manager)
                .with_duration_secs(secs),
        );
        assert!(matches!(
            h.engine.publish_template(&draft).unwrap_err(),
            ApprovalError::ValidationError(_)
        ));

        let mut template = TemplateDraft::new("sabbatical", "Sabbatical", p("hr-lead"))
            .with_step(StepDefinition::new("manager", "Manager", ApproverType::Manager))
            .build()
            .unwrap();
        template.expiry.default_due_after_secs = Some(secs);
        assert!(matches!(
            h.engine.register_template(template).unwrap_err(),
            ApprovalError::ValidationError(_)
        ));
    }
    assert!(h
        .engine
        .templates()
        .get_latest(&RequestType::new("sabbatical"))
        .is_err());

    // The longest accepted duration still yields a due date after activation
    h.engine
        .publish_template(
            &TemplateDraft::new("sabbatical", "Sabbatical", p("hr-lead")).with_step(
                StepDefinition::new("manager", "Manager", ApproverType::Manager)
                    .with_duration_secs(MAX_DURATION_SECS),
            ),
        )
        .unwrap();
    let inst = h.submit("emp", "sabbatical");
    let exec = &inst.steps[0];
    assert!(exec.due_at.unwrap() > exec.activated_at.unwrap());
}

#[test]
fn audit_stream_sees_committed_events() {
    let h = Harness::new();
    let mut stream = h.engine.subscribe();
    let inst = h.submit("emp", "leave");
    h.approve(&inst, "manager", "boss");

    let first = stream.try_recv().unwrap();
    let second = stream.try_recv().unwrap();
    assert_eq!(first.event_type, AuditEventType::Submitted);
    assert_eq!(second.event_type, AuditEventType::StepApproved);
    assert!(second.sequence > first.sequence);
}
