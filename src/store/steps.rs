use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::{optional_tag, tag, unsigned, StoreError};
use crate::petitions::{
    ApprovalStep, Decision, PetitionId, Role, SignatureId, StepId, StepStatus, UserId,
};

const STEP_COLUMNS: &str = r#"
    id, petition_id, step_order, approver_role, status, decision, approver_user_id,
    comments, signature_id, assigned_at, reviewed_at, completed_at
"#;

/// Reviewer outcome written onto the step under review.
#[derive(Debug, Clone)]
pub struct StepDecision<'a> {
    pub step_id: StepId,
    pub status: StepStatus,
    pub decision: Option<Decision>,
    pub approver: UserId,
    pub comments: Option<&'a str>,
    pub signature_id: Option<SignatureId>,
    pub at: DateTime<Utc>,
    /// Stamp `completed_at`; false for returns, which reopen later.
    pub completes: bool,
}

fn step_from_row(row: &SqliteRow) -> Result<ApprovalStep, StoreError> {
    Ok(ApprovalStep {
        id: StepId(row.try_get("id")?),
        petition_id: PetitionId(row.try_get("petition_id")?),
        step_order: unsigned(row, "step_order")?,
        approver_role: tag(row, "approver_role")?,
        status: tag(row, "status")?,
        decision: optional_tag(row, "decision")?,
        approver_user_id: row.try_get::<Option<i64>, _>("approver_user_id")?.map(UserId),
        comments: row.try_get("comments")?,
        signature_id: row.try_get::<Option<i64>, _>("signature_id")?.map(SignatureId),
        assigned_at: row.try_get("assigned_at")?,
        reviewed_at: row.try_get("reviewed_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

/// Materializes the chain snapshot: step 1 under review, the rest pending.
pub async fn create_chain(
    conn: &mut SqliteConnection,
    petition_id: PetitionId,
    chain: &[Role],
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    for (index, role) in chain.iter().enumerate() {
        let first = index == 0;
        let status = if first {
            StepStatus::InReview
        } else {
            StepStatus::Pending
        };
        sqlx::query(
            r#"
            INSERT INTO approval_steps (petition_id, step_order, approver_role, status, assigned_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(petition_id.0)
        .bind(index as i64 + 1)
        .bind(role.as_str())
        .bind(status.as_str())
        .bind(first.then_some(now))
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

pub async fn at_position(
    conn: &mut SqliteConnection,
    petition_id: PetitionId,
    step_order: u32,
) -> Result<Option<ApprovalStep>, StoreError> {
    let query = format!(
        "SELECT {STEP_COLUMNS} FROM approval_steps WHERE petition_id = ?1 AND step_order = ?2"
    );
    let row = sqlx::query(&query)
        .bind(petition_id.0)
        .bind(i64::from(step_order))
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(step_from_row).transpose()
}

pub async fn for_petition(
    conn: &mut SqliteConnection,
    petition_id: PetitionId,
) -> Result<Vec<ApprovalStep>, StoreError> {
    let query = format!(
        "SELECT {STEP_COLUMNS} FROM approval_steps WHERE petition_id = ?1 ORDER BY step_order ASC"
    );
    let rows = sqlx::query(&query)
        .bind(petition_id.0)
        .fetch_all(&mut *conn)
        .await?;

    rows.iter().map(step_from_row).collect()
}

/// Chain length as snapshotted at submission.
pub async fn chain_length(
    conn: &mut SqliteConnection,
    petition_id: PetitionId,
) -> Result<u32, StoreError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM approval_steps WHERE petition_id = ?1")
        .bind(petition_id.0)
        .fetch_one(&mut *conn)
        .await?;

    u32::try_from(count).map_err(|_| StoreError::Corrupt {
        column: "step_order",
        reason: format!("{count} steps"),
    })
}

/// Records a decision on a step that is currently under review.
/// Returns false if the step was no longer `in_review`.
pub async fn record_decision(
    conn: &mut SqliteConnection,
    decision: &StepDecision<'_>,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE approval_steps
        SET status = ?1,
            decision = ?2,
            approver_user_id = ?3,
            comments = ?4,
            signature_id = ?5,
            reviewed_at = ?6,
            completed_at = CASE WHEN ?7 THEN ?6 ELSE completed_at END
        WHERE id = ?8 AND status = 'in_review'
        "#,
    )
    .bind(decision.status.as_str())
    .bind(decision.decision.map(|d| d.as_str()))
    .bind(decision.approver.0)
    .bind(decision.comments)
    .bind(decision.signature_id.map(|s| s.0))
    .bind(decision.at)
    .bind(decision.completes)
    .bind(decision.step_id.0)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Moves a queued step to `in_review`. Returns false if it was not pending.
pub async fn open(
    conn: &mut SqliteConnection,
    petition_id: PetitionId,
    step_order: u32,
    now: DateTime<Utc>,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE approval_steps
        SET status = 'in_review', assigned_at = ?1
        WHERE petition_id = ?2 AND step_order = ?3 AND status = 'pending'
        "#,
    )
    .bind(now)
    .bind(petition_id.0)
    .bind(i64::from(step_order))
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Reopens a returned step for a new review attempt. The row keeps only
/// the current attempt; earlier review data lives in the action log.
pub async fn reopen(
    conn: &mut SqliteConnection,
    step_id: StepId,
    now: DateTime<Utc>,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE approval_steps
        SET status = 'in_review',
            assigned_at = ?1,
            decision = NULL,
            approver_user_id = NULL,
            comments = NULL,
            signature_id = NULL,
            reviewed_at = NULL,
            completed_at = NULL
        WHERE id = ?2 AND status = 'returned'
        "#,
    )
    .bind(now)
    .bind(step_id.0)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Whether `user` has recorded a decision on the petition, including
/// decisions on steps that were since reopened.
pub async fn has_reviewed(
    conn: &mut SqliteConnection,
    petition_id: PetitionId,
    user: UserId,
) -> Result<bool, StoreError> {
    let found: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT 1 FROM approval_steps WHERE petition_id = ?1 AND approver_user_id = ?2
        UNION
        SELECT 1 FROM approval_actions
        WHERE petition_id = ?1 AND actor_id = ?2
          AND action_type IN ('approved', 'rejected', 'returned')
        LIMIT 1
        "#,
    )
    .bind(petition_id.0)
    .bind(user.0)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(found.is_some())
}
