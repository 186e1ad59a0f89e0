use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::{unsigned, StoreError};
use crate::petitions::{ArtifactId, PetitionId, StoredArtifact, UserId};

const ARTIFACT_COLUMNS: &str = r#"
    id, petition_id, version, file_name, artifact_ref, size_bytes, is_final,
    generation_method, generated_by, created_at
"#;

#[derive(Debug, Clone)]
pub struct NewArtifact<'a> {
    pub petition_id: PetitionId,
    pub version: u32,
    pub file_name: &'a str,
    pub artifact_ref: &'a str,
    pub size_bytes: u64,
    pub is_final: bool,
    pub generation_method: &'a str,
    pub generated_by: Option<UserId>,
    pub at: DateTime<Utc>,
}

fn artifact_from_row(row: &SqliteRow) -> Result<StoredArtifact, StoreError> {
    let size: i64 = row.try_get("size_bytes")?;
    Ok(StoredArtifact {
        id: ArtifactId(row.try_get("id")?),
        petition_id: PetitionId(row.try_get("petition_id")?),
        version: unsigned(row, "version")?,
        file_name: row.try_get("file_name")?,
        artifact_ref: row.try_get("artifact_ref")?,
        size_bytes: u64::try_from(size).map_err(|_| StoreError::Corrupt {
            column: "size_bytes",
            reason: format!("{size} is negative"),
        })?,
        is_final: row.try_get("is_final")?,
        generation_method: row.try_get("generation_method")?,
        generated_by: row.try_get::<Option<i64>, _>("generated_by")?.map(UserId),
        created_at: row.try_get("created_at")?,
    })
}

/// Hands out the next version number for a petition. Run this on its own
/// (auto-committed) so a failed render still burns the number.
pub async fn reserve_version(
    conn: &mut SqliteConnection,
    petition_id: PetitionId,
) -> Result<u32, StoreError> {
    let version: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO artifact_counters (petition_id, last_version) VALUES (?1, 1)
        ON CONFLICT(petition_id) DO UPDATE SET last_version = last_version + 1
        RETURNING last_version
        "#,
    )
    .bind(petition_id.0)
    .fetch_one(&mut *conn)
    .await?;

    u32::try_from(version).map_err(|_| StoreError::Corrupt {
        column: "last_version",
        reason: format!("{version} is out of range"),
    })
}

pub async fn record(
    conn: &mut SqliteConnection,
    artifact: &NewArtifact<'_>,
) -> Result<StoredArtifact, StoreError> {
    let size = i64::try_from(artifact.size_bytes).map_err(|_| StoreError::Corrupt {
        column: "size_bytes",
        reason: format!("{} does not fit", artifact.size_bytes),
    })?;

    let result = sqlx::query(
        r#"
        INSERT INTO stored_artifacts (
            petition_id, version, file_name, artifact_ref, size_bytes, is_final,
            generation_method, generated_by, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
    )
    .bind(artifact.petition_id.0)
    .bind(i64::from(artifact.version))
    .bind(artifact.file_name)
    .bind(artifact.artifact_ref)
    .bind(size)
    .bind(artifact.is_final)
    .bind(artifact.generation_method)
    .bind(artifact.generated_by.map(|u| u.0))
    .bind(artifact.at)
    .execute(&mut *conn)
    .await?;

    let query = format!("SELECT {ARTIFACT_COLUMNS} FROM stored_artifacts WHERE id = ?1");
    let row = sqlx::query(&query)
        .bind(result.last_insert_rowid())
        .fetch_one(&mut *conn)
        .await?;
    artifact_from_row(&row)
}

/// All versions, newest first.
pub async fn for_petition(
    conn: &mut SqliteConnection,
    petition_id: PetitionId,
) -> Result<Vec<StoredArtifact>, StoreError> {
    let query = format!(
        "SELECT {ARTIFACT_COLUMNS} FROM stored_artifacts WHERE petition_id = ?1 ORDER BY version DESC"
    );
    let rows = sqlx::query(&query)
        .bind(petition_id.0)
        .fetch_all(&mut *conn)
        .await?;

    rows.iter().map(artifact_from_row).collect()
}

/// A specific version, or the newest when `version` is `None`.
pub async fn find(
    conn: &mut SqliteConnection,
    petition_id: PetitionId,
    version: Option<u32>,
) -> Result<Option<StoredArtifact>, StoreError> {
    let row = match version {
        Some(version) => {
            let query = format!(
                "SELECT {ARTIFACT_COLUMNS} FROM stored_artifacts WHERE petition_id = ?1 AND version = ?2"
            );
            sqlx::query(&query)
                .bind(petition_id.0)
                .bind(i64::from(version))
                .fetch_optional(&mut *conn)
                .await?
        }
        None => {
            let query = format!(
                "SELECT {ARTIFACT_COLUMNS} FROM stored_artifacts WHERE petition_id = ?1 \
                 ORDER BY version DESC LIMIT 1"
            );
            sqlx::query(&query)
                .bind(petition_id.0)
                .fetch_optional(&mut *conn)
                .await?
        }
    };

    row.as_ref().map(artifact_from_row).transpose()
}
