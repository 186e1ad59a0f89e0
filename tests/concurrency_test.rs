mod fixtures;

use fixtures::*;
use petition_flow::petitions::{ActionType, PetitionStatus, Role, StepStatus};
use petition_flow::store;
use petition_flow::WorkflowError;

fn lost_race(err: &WorkflowError) -> bool {
    matches!(err, WorkflowError::InvalidState(_) | WorkflowError::Conflict { .. })
}

fn assert_single_winner<T: std::fmt::Debug>(outcomes: &[Result<T, WorkflowError>]) {
    let winners = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1, "exactly one transition must win: {outcomes:?}");
    for outcome in outcomes {
        if let Err(err) = outcome {
            assert!(lost_race(err), "unexpected error: {err}");
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_approvals_on_single_step_chain_complete_once() {
    let db = TestDb::new().await;
    let engine = db.engine();
    let type_id = db.define_chain(30, &[Role::Advisor]).await;

    for _ in 0..5 {
        let id = db.submitted(&engine, type_id).await;

        let (first, second) = futures::join!(
            engine.approve(id, ADVISOR, Some("first")),
            engine.approve(id, ADVISOR_TWO, Some("second")),
        );
        assert_single_winner(&[first, second]);

        let detail = engine.get_detail(id, STUDENT).await.unwrap();
        assert_eq!(detail.petition.status, PetitionStatus::Approved);
        assert_eq!(detail.petition.current_approval_step, 1);
        assert_eq!(detail.steps.len(), 1);
        let approvals = detail
            .actions
            .iter()
            .filter(|a| a.action_type == ActionType::Approved)
            .count();
        assert_eq!(approvals, 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_advisors_advance_multi_step_chain_once() {
    let db = TestDb::new().await;
    let engine = db.engine();

    for _ in 0..5 {
        let id = db.submitted(&engine, CHANGE_OF_MAJOR).await;

        let (first, second) = futures::join!(
            engine.approve(id, ADVISOR, Some("first")),
            engine.approve(id, ADVISOR_TWO, Some("second")),
        );
        assert_single_winner(&[first, second]);

        let detail = engine.get_detail(id, STUDENT).await.unwrap();
        assert_eq!(detail.petition.status, PetitionStatus::Pending);
        assert_eq!(detail.petition.current_approval_step, 2);
        assert_eq!(detail.steps[0].status, StepStatus::Approved);
        assert_eq!(detail.steps[1].status, StepStatus::InReview);
        assert_eq!(detail.steps[2].status, StepStatus::Pending);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_admin_racing_itself_advances_once() {
    let db = TestDb::new().await;
    let engine = db.engine();

    for _ in 0..5 {
        let id = db.submitted(&engine, CHANGE_OF_MAJOR).await;

        let (first, second) = futures::join!(
            engine.approve(id, ADMIN, Some("first")),
            engine.approve(id, ADMIN, Some("second")),
        );
        assert_single_winner(&[first, second]);

        let detail = engine.get_detail(id, STUDENT).await.unwrap();
        assert_eq!(detail.petition.status, PetitionStatus::Pending);
        assert_eq!(detail.petition.current_approval_step, 2);
        assert_eq!(detail.steps[1].status, StepStatus::InReview);
        assert!(detail.steps[1].approver_user_id.is_none());
        assert_eq!(db.in_review_count(id).await, 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_approve_and_return_leave_one_outcome() {
    let db = TestDb::new().await;
    let engine = db.engine();
    let id = db.submitted(&engine, CHANGE_OF_MAJOR).await;

    let (approved, returned) = futures::join!(
        engine.approve(id, ADVISOR, None),
        engine.return_to_owner(id, ADVISOR_TWO, "incomplete"),
    );

    let detail = engine.get_detail(id, STUDENT).await.unwrap();
    match (&approved, &returned) {
        (Ok(_), Err(err)) => {
            assert!(lost_race(err), "{err}");
            assert_eq!(detail.petition.status, PetitionStatus::Pending);
            assert_eq!(detail.petition.current_approval_step, 2);
            assert_eq!(detail.steps[1].status, StepStatus::InReview);
        }
        (Err(err), Ok(_)) => {
            assert!(lost_race(err), "{err}");
            assert_eq!(detail.petition.status, PetitionStatus::Returned);
            assert_eq!(detail.petition.current_approval_step, 1);
        }
        other => panic!("exactly one transition must win: {other:?}"),
    }
    assert!(db.in_review_count(id).await <= 1);
}

#[tokio::test]
async fn test_claim_refuses_a_stale_read() {
    let db = TestDb::new().await;
    let engine = db.engine();
    let id = db.submitted(&engine, CHANGE_OF_MAJOR).await;

    let mut conn = db.pool().acquire().await.unwrap();
    let before = store::petitions::fetch(&mut conn, id).await.unwrap().unwrap();
    drop(conn);

    engine.approve(id, ADVISOR, None).await.unwrap();

    let mut conn = db.pool().acquire().await.unwrap();
    let claimed = store::petitions::claim(
        &mut conn,
        id,
        before.lock_version,
        before.current_approval_step,
    )
    .await
    .unwrap();
    assert!(!claimed);

    let after = store::petitions::fetch(&mut conn, id).await.unwrap().unwrap();
    assert!(after.lock_version > before.lock_version);
    assert!(store::petitions::claim(&mut conn, id, after.lock_version, 2)
        .await
        .unwrap());
    assert!(!store::petitions::claim(&mut conn, id, after.lock_version + 1, 1)
        .await
        .unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_drafts_get_distinct_request_numbers() {
    let db = TestDb::new().await;
    let engine = db.engine();

    let (a, b, c) = futures::join!(
        engine.create_draft(STUDENT, change_of_major_draft()),
        engine.create_draft(STUDENT, change_of_major_draft()),
        engine.create_draft(OUTSIDER, change_of_major_draft()),
    );
    let mut numbers = vec![
        a.unwrap().request_number,
        b.unwrap().request_number,
        c.unwrap().request_number,
    ];
    numbers.sort();
    numbers.dedup();
    assert_eq!(numbers.len(), 3);
}
