use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::{encode, json, tag, unsigned, StoreError};
use crate::petitions::{NewPetitionType, PetitionType, PetitionTypeId};

const TYPE_COLUMNS: &str =
    "id, type_number, type_name, description, kind, requires_explanation, approval_chain";

fn type_from_row(row: &SqliteRow) -> Result<PetitionType, StoreError> {
    Ok(PetitionType {
        id: PetitionTypeId(row.try_get("id")?),
        type_number: unsigned(row, "type_number")?,
        name: row.try_get("type_name")?,
        description: row.try_get("description")?,
        kind: tag(row, "kind")?,
        requires_explanation: row.try_get("requires_explanation")?,
        approval_chain: json(row, "approval_chain")?,
    })
}

pub async fn fetch(
    conn: &mut SqliteConnection,
    id: PetitionTypeId,
) -> Result<Option<PetitionType>, StoreError> {
    let query = format!("SELECT {TYPE_COLUMNS} FROM petition_types WHERE id = ?1");
    let row = sqlx::query(&query)
        .bind(id.0)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(type_from_row).transpose()
}

pub async fn list(conn: &mut SqliteConnection) -> Result<Vec<PetitionType>, StoreError> {
    let query = format!("SELECT {TYPE_COLUMNS} FROM petition_types ORDER BY type_number ASC");
    let rows = sqlx::query(&query).fetch_all(&mut *conn).await?;
    rows.iter().map(type_from_row).collect()
}

pub async fn insert(
    conn: &mut SqliteConnection,
    new_type: &NewPetitionType,
) -> Result<PetitionType, StoreError> {
    let chain = encode("approval chain", &new_type.approval_chain)?;
    let result = sqlx::query(
        r#"
        INSERT INTO petition_types (type_number, type_name, description, kind, requires_explanation, approval_chain)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )
    .bind(i64::from(new_type.type_number))
    .bind(&new_type.name)
    .bind(&new_type.description)
    .bind(new_type.kind.as_str())
    .bind(new_type.requires_explanation)
    .bind(chain)
    .execute(&mut *conn)
    .await?;

    let id = PetitionTypeId(result.last_insert_rowid());
    fetch(conn, id).await?.ok_or_else(|| StoreError::Corrupt {
        column: "id",
        reason: format!("petition type {id} vanished after insert"),
    })
}
