use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};

use super::{encode, json, optional_tag, tag, unsigned, StoreError};
use crate::petitions::{
    ContactDetails, NewPetition, Petition, PetitionId, PetitionPayload, PetitionStatus,
    PetitionTypeId, Role, StepStatus, UserId,
};

const PETITION_COLUMNS: &str = r#"
    id, request_number, owner_id, petition_type_id, student_number, phone,
    mailing_address, city, state, zip, payload, explanation, status,
    current_approval_step, lock_version, created_at, updated_at, submitted_at,
    completed_at
"#;

/// Status/position write applied at the end of a transition.
///
/// `expected_lock_version` and `expected_step` must match what the
/// transition read; otherwise nothing is written.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub petition_id: PetitionId,
    pub expected_lock_version: i64,
    pub expected_step: u32,
    pub status: PetitionStatus,
    pub current_step: u32,
    pub submitted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub at: DateTime<Utc>,
}

/// Row shape used by queue and list views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PetitionSummary {
    pub petition_id: PetitionId,
    pub request_number: String,
    pub owner_id: UserId,
    pub type_number: u32,
    pub type_name: String,
    pub status: PetitionStatus,
    pub current_approval_step: u32,
    pub step_role: Option<Role>,
    pub step_status: Option<StepStatus>,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PetitionFilter {
    pub status: Option<PetitionStatus>,
    /// 1-based
    pub page: u32,
    pub limit: u32,
}

impl Default for PetitionFilter {
    fn default() -> Self {
        Self {
            status: None,
            page: 1,
            limit: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PetitionPage {
    pub items: Vec<PetitionSummary>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

impl PetitionPage {
    pub fn total_pages(&self) -> u64 {
        if self.limit == 0 {
            return 0;
        }
        self.total.div_ceil(u64::from(self.limit))
    }
}

fn petition_from_row(row: &SqliteRow) -> Result<Petition, StoreError> {
    let payload: PetitionPayload = json(row, "payload")?;
    Ok(Petition {
        id: PetitionId(row.try_get("id")?),
        request_number: row.try_get("request_number")?,
        owner_id: UserId(row.try_get("owner_id")?),
        petition_type_id: PetitionTypeId(row.try_get("petition_type_id")?),
        contact: ContactDetails {
            student_number: row.try_get("student_number")?,
            phone: row.try_get("phone")?,
            mailing_address: row.try_get("mailing_address")?,
            city: row.try_get("city")?,
            state: row.try_get("state")?,
            zip: row.try_get("zip")?,
        },
        payload,
        explanation: row.try_get("explanation")?,
        status: tag(row, "status")?,
        current_approval_step: unsigned(row, "current_approval_step")?,
        lock_version: row.try_get("lock_version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        submitted_at: row.try_get("submitted_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn summary_from_row(row: &SqliteRow) -> Result<PetitionSummary, StoreError> {
    Ok(PetitionSummary {
        petition_id: PetitionId(row.try_get("id")?),
        request_number: row.try_get("request_number")?,
        owner_id: UserId(row.try_get("owner_id")?),
        type_number: unsigned(row, "type_number")?,
        type_name: row.try_get("type_name")?,
        status: tag(row, "status")?,
        current_approval_step: unsigned(row, "current_approval_step")?,
        step_role: optional_tag(row, "step_role")?,
        step_status: optional_tag(row, "step_status")?,
        created_at: row.try_get("created_at")?,
        submitted_at: row.try_get("submitted_at")?,
    })
}

/// Allocates the next `PET-YYYY-NNNNN` number. Writes first, so it also
/// takes the write lock for the surrounding transaction.
pub async fn next_request_number(
    conn: &mut SqliteConnection,
    now: DateTime<Utc>,
) -> Result<String, StoreError> {
    let year = now.year();
    let seq: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO request_counters (year, last_seq) VALUES (?1, 1)
        ON CONFLICT(year) DO UPDATE SET last_seq = last_seq + 1
        RETURNING last_seq
        "#,
    )
    .bind(year)
    .fetch_one(&mut *conn)
    .await?;

    Ok(format!("PET-{year}-{seq:05}"))
}

pub async fn insert(
    conn: &mut SqliteConnection,
    owner_id: UserId,
    request_number: &str,
    petition: &NewPetition,
    now: DateTime<Utc>,
) -> Result<Petition, StoreError> {
    let payload = encode("petition payload", &petition.payload)?;
    let result = sqlx::query(
        r#"
        INSERT INTO petitions (
            request_number, owner_id, petition_type_id, student_number, phone,
            mailing_address, city, state, zip, payload, explanation, status,
            current_approval_step, lock_version, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 'draft', 0, 0, ?12, ?12)
        "#,
    )
    .bind(request_number)
    .bind(owner_id.0)
    .bind(petition.petition_type_id.0)
    .bind(&petition.contact.student_number)
    .bind(&petition.contact.phone)
    .bind(&petition.contact.mailing_address)
    .bind(&petition.contact.city)
    .bind(&petition.contact.state)
    .bind(&petition.contact.zip)
    .bind(payload)
    .bind(&petition.explanation)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    let id = PetitionId(result.last_insert_rowid());
    fetch(conn, id).await?.ok_or_else(|| StoreError::Corrupt {
        column: "id",
        reason: format!("petition {id} vanished after insert"),
    })
}

/// Bumps `lock_version`, provided the petition still has the version and
/// chain position the caller read. As the first statement of a transaction
/// this takes the write lock. Returns false when the guard did not match.
pub async fn claim(
    conn: &mut SqliteConnection,
    id: PetitionId,
    expected_lock_version: i64,
    expected_step: u32,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE petitions
        SET lock_version = lock_version + 1
        WHERE id = ?1 AND lock_version = ?2 AND current_approval_step = ?3
        "#,
    )
    .bind(id.0)
    .bind(expected_lock_version)
    .bind(i64::from(expected_step))
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn fetch(
    conn: &mut SqliteConnection,
    id: PetitionId,
) -> Result<Option<Petition>, StoreError> {
    let query = format!("SELECT {PETITION_COLUMNS} FROM petitions WHERE id = ?1");
    let row = sqlx::query(&query)
        .bind(id.0)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(petition_from_row).transpose()
}

/// Applies a guarded status change. Returns false if the guard did not
/// match, meaning another transition got there first.
pub async fn apply_status_change(
    conn: &mut SqliteConnection,
    change: &StatusChange,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE petitions
        SET status = ?1,
            current_approval_step = ?2,
            submitted_at = COALESCE(?3, submitted_at),
            completed_at = COALESCE(?4, completed_at),
            updated_at = ?5
        WHERE id = ?6 AND lock_version = ?7 AND current_approval_step = ?8
        "#,
    )
    .bind(change.status.as_str())
    .bind(i64::from(change.current_step))
    .bind(change.submitted_at)
    .bind(change.completed_at)
    .bind(change.at)
    .bind(change.petition_id.0)
    .bind(change.expected_lock_version)
    .bind(i64::from(change.expected_step))
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn update_fields(
    conn: &mut SqliteConnection,
    petition: &Petition,
    now: DateTime<Utc>,
) -> Result<bool, StoreError> {
    let payload = encode("petition payload", &petition.payload)?;
    let result = sqlx::query(
        r#"
        UPDATE petitions
        SET student_number = ?1, phone = ?2, mailing_address = ?3, city = ?4,
            state = ?5, zip = ?6, payload = ?7, explanation = ?8, updated_at = ?9
        WHERE id = ?10 AND lock_version = ?11
        "#,
    )
    .bind(&petition.contact.student_number)
    .bind(&petition.contact.phone)
    .bind(&petition.contact.mailing_address)
    .bind(&petition.contact.city)
    .bind(&petition.contact.state)
    .bind(&petition.contact.zip)
    .bind(payload)
    .bind(&petition.explanation)
    .bind(now)
    .bind(petition.id.0)
    .bind(petition.lock_version)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Deletes the petition; steps, actions and artifacts go with it.
pub async fn delete(conn: &mut SqliteConnection, id: PetitionId) -> Result<bool, StoreError> {
    let result = sqlx::query("DELETE FROM petitions WHERE id = ?1")
        .bind(id.0)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() == 1)
}

/// Petitions whose current step requires one of `roles` and is still open.
pub async fn queue_for_roles(
    conn: &mut SqliteConnection,
    roles: &[Role],
) -> Result<Vec<PetitionSummary>, StoreError> {
    if roles.is_empty() {
        return Ok(Vec::new());
    }

    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
        r#"
        SELECT p.id, p.request_number, p.owner_id, t.type_number, t.type_name, p.status,
               p.current_approval_step, s.approver_role AS step_role,
               s.status AS step_status, p.created_at, p.submitted_at
        FROM petitions p
        JOIN petition_types t ON t.id = p.petition_type_id
        JOIN approval_steps s
          ON s.petition_id = p.id AND s.step_order = p.current_approval_step
        WHERE s.status IN ('pending', 'in_review')
          AND p.status IN ('submitted', 'pending', 'in_review')
          AND s.approver_role IN (
        "#,
    );
    let mut separated = builder.separated(", ");
    for role in roles {
        separated.push_bind(role.as_str());
    }
    separated.push_unseparated(") ORDER BY p.created_at ASC, p.id ASC");

    let rows = builder.build().fetch_all(&mut *conn).await?;
    rows.iter().map(summary_from_row).collect()
}

/// Visibility-filtered, paginated listing. `None` for `viewer` lists
/// everything.
pub async fn list(
    conn: &mut SqliteConnection,
    viewer: Option<(UserId, &[Role])>,
    filter: &PetitionFilter,
) -> Result<PetitionPage, StoreError> {
    let page = filter.page.max(1);
    let limit = filter.limit.clamp(1, 100);
    let offset = i64::try_from(u64::from(page - 1) * u64::from(limit)).unwrap_or(i64::MAX);

    let mut count: QueryBuilder<Sqlite> =
        QueryBuilder::new("SELECT COUNT(*) FROM petitions p WHERE 1 = 1");
    push_list_filters(&mut count, viewer, filter.status);
    let total: i64 = count.build_query_scalar().fetch_one(&mut *conn).await?;

    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
        r#"
        SELECT p.id, p.request_number, p.owner_id, t.type_number, t.type_name, p.status,
               p.current_approval_step, s.approver_role AS step_role,
               s.status AS step_status, p.created_at, p.submitted_at
        FROM petitions p
        JOIN petition_types t ON t.id = p.petition_type_id
        LEFT JOIN approval_steps s
          ON s.petition_id = p.id AND s.step_order = p.current_approval_step
        WHERE 1 = 1
        "#,
    );
    push_list_filters(&mut builder, viewer, filter.status);
    builder
        .push(" ORDER BY p.created_at DESC, p.id DESC LIMIT ")
        .push_bind(i64::from(limit))
        .push(" OFFSET ")
        .push_bind(offset);

    let rows = builder.build().fetch_all(&mut *conn).await?;
    let items = rows
        .iter()
        .map(summary_from_row)
        .collect::<Result<Vec<_>, _>>()?;
    let total = u64::try_from(total).unwrap_or(0);

    Ok(PetitionPage {
        items,
        total,
        page,
        limit,
    })
}

/// Visibility rule shared with the detail view: own petitions, petitions
/// whose step under review needs a held role, and petitions the viewer has
/// decided on before.
fn push_list_filters(
    builder: &mut QueryBuilder<'_, Sqlite>,
    viewer: Option<(UserId, &[Role])>,
    status: Option<PetitionStatus>,
) {
    if let Some((user_id, roles)) = viewer {
        builder.push(" AND (p.owner_id = ").push_bind(user_id.0);
        if !roles.is_empty() {
            builder.push(
                " OR EXISTS (SELECT 1 FROM approval_steps o WHERE o.petition_id = p.id \
                 AND o.status = 'in_review' AND o.approver_role IN (",
            );
            let mut separated = builder.separated(", ");
            for role in roles {
                separated.push_bind(role.as_str());
            }
            separated.push_unseparated("))");
        }
        builder
            .push(" OR EXISTS (SELECT 1 FROM approval_steps r WHERE r.petition_id = p.id AND r.approver_user_id = ")
            .push_bind(user_id.0)
            .push(
                ") OR EXISTS (SELECT 1 FROM approval_actions a WHERE a.petition_id = p.id \
                 AND a.action_type IN ('approved', 'rejected', 'returned') AND a.actor_id = ",
            )
            .push_bind(user_id.0)
            .push("))");
    }

    if let Some(status) = status {
        builder.push(" AND p.status = ").push_bind(status.as_str());
    }
}
