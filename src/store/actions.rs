use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::{encode, tag, StoreError};
use crate::petitions::{ActionType, ApprovalAction, PetitionId, StepId, UserId};

#[derive(Debug, Clone)]
pub struct NewAction<'a> {
    pub petition_id: PetitionId,
    pub step_id: Option<StepId>,
    pub actor_id: UserId,
    pub action_type: ActionType,
    pub data: Option<serde_json::Value>,
    pub comments: Option<&'a str>,
    pub at: DateTime<Utc>,
}

fn action_from_row(row: &SqliteRow) -> Result<ApprovalAction, StoreError> {
    let data = row
        .try_get::<Option<String>, _>("action_data")?
        .map(|raw| {
            serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
                column: "action_data",
                reason: e.to_string(),
            })
        })
        .transpose()?;

    Ok(ApprovalAction {
        id: row.try_get("id")?,
        petition_id: PetitionId(row.try_get("petition_id")?),
        step_id: row.try_get::<Option<i64>, _>("step_id")?.map(StepId),
        actor_id: UserId(row.try_get("actor_id")?),
        action_type: tag(row, "action_type")?,
        data,
        comments: row.try_get("comments")?,
        created_at: row.try_get("created_at")?,
    })
}

pub async fn append(conn: &mut SqliteConnection, action: &NewAction<'_>) -> Result<i64, StoreError> {
    let data = action
        .data
        .as_ref()
        .map(|value| encode("action data", value))
        .transpose()?;

    let result = sqlx::query(
        r#"
        INSERT INTO approval_actions (petition_id, step_id, actor_id, action_type, action_data, comments, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )
    .bind(action.petition_id.0)
    .bind(action.step_id.map(|s| s.0))
    .bind(action.actor_id.0)
    .bind(action.action_type.as_str())
    .bind(data)
    .bind(action.comments)
    .bind(action.at)
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Full history, oldest first.
pub async fn for_petition(
    conn: &mut SqliteConnection,
    petition_id: PetitionId,
) -> Result<Vec<ApprovalAction>, StoreError> {
    let rows = sqlx::query(
        r#"
        SELECT id, petition_id, step_id, actor_id, action_type, action_data, comments, created_at
        FROM approval_actions
        WHERE petition_id = ?1
        ORDER BY id ASC
        "#,
    )
    .bind(petition_id.0)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(action_from_row).collect()
}
