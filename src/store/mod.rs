//! Data-access layer for petitions, the approval step ledger, the action log
//! and artifact metadata.
//!
//! Every function takes a `&mut SqliteConnection` so callers can run it either
//! on a pooled connection or inside an open transaction (`&mut *tx`). None of
//! these functions commit; transaction boundaries belong to the engine.

pub mod actions;
pub mod artifacts;
pub mod petition_types;
pub mod petitions;
pub mod steps;

use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::str::FromStr;
use thiserror::Error;

use crate::petitions::UnknownVariant;

pub use actions::NewAction;
pub use artifacts::NewArtifact;
pub use petitions::{PetitionFilter, PetitionPage, PetitionSummary, StatusChange};
pub use steps::StepDecision;

/// SQLite result codes that mean another writer holds the database.
const CONTENTION_CODES: &[&str] = &["5", "6", "261", "262", "517"];

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt value in column '{column}': {reason}")]
    Corrupt { column: &'static str, reason: String },

    #[error("failed to encode {what}: {source}")]
    Encode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    /// True when the failure came from lock contention (busy/locked) rather
    /// than a broken query. The surrounding transaction has been rolled back.
    pub fn is_contention(&self) -> bool {
        match self {
            StoreError::Database(sqlx::Error::Database(db_err)) => db_err
                .code()
                .as_deref()
                .is_some_and(|code| CONTENTION_CODES.contains(&code)),
            _ => false,
        }
    }
}

pub(crate) fn tag<T>(row: &SqliteRow, column: &'static str) -> Result<T, StoreError>
where
    T: FromStr<Err = UnknownVariant>,
{
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(|e: UnknownVariant| StoreError::Corrupt {
        column,
        reason: e.to_string(),
    })
}

pub(crate) fn optional_tag<T>(row: &SqliteRow, column: &'static str) -> Result<Option<T>, StoreError>
where
    T: FromStr<Err = UnknownVariant>,
{
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|value| {
        value.parse().map_err(|e: UnknownVariant| StoreError::Corrupt {
            column,
            reason: e.to_string(),
        })
    })
    .transpose()
}

pub(crate) fn unsigned(row: &SqliteRow, column: &'static str) -> Result<u32, StoreError> {
    let raw: i64 = row.try_get(column)?;
    u32::try_from(raw).map_err(|_| StoreError::Corrupt {
        column,
        reason: format!("{raw} is out of range"),
    })
}

pub(crate) fn json<T>(row: &SqliteRow, column: &'static str) -> Result<T, StoreError>
where
    T: serde::de::DeserializeOwned,
{
    let raw: String = row.try_get(column)?;
    serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
        column,
        reason: e.to_string(),
    })
}

pub(crate) fn encode<T: serde::Serialize>(what: &'static str, value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|source| StoreError::Encode { what, source })
}
