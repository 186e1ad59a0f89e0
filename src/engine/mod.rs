//! The approval engine: the only writer of petitions, the step ledger and the
//! action log for lifecycle transitions.
//!
//! A transition reads the petition first, then opens a single SQLite
//! transaction whose first statement claims the row at the `lock_version` and
//! chain position it read. Two transitions that read the same state are
//! serialized on the database write lock; the second finds the version moved
//! and fails with [`WorkflowError::Conflict`] instead of acting on whatever
//! step the first one left behind. The final petition write is guarded the
//! same way, and any failure rolls the whole transaction back.
//!
//! Document generation is never part of a transition. Successful submits and
//! approvals emit a [`DocumentJob`](crate::documents::DocumentJob) after commit.

mod drafts;
mod error;
mod queries;
mod transitions;

use serde::{Deserialize, Serialize};
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;

use crate::access::{self, ApproverDirectory, SignatureStore, SqlApproverDirectory, SqlSignatureStore};
use crate::documents::{DocumentGenerator, DocumentQueue};
use crate::petitions::{
    ApprovalAction, ApprovalStep, Petition, PetitionId, PetitionStatus, PetitionType,
    Role, StoredArtifact, SystemRole, UserId,
};
use crate::store::{self, StoreError};

pub use error::WorkflowError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitOutcome {
    pub petition_id: PetitionId,
    pub step_count: u32,
    /// False when the document job could not be queued; the artifact is stale.
    pub artifact_queued: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalOutcome {
    pub petition_id: PetitionId,
    /// The step that was approved.
    pub step_order: u32,
    pub is_complete: bool,
    pub artifact_queued: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub petition_id: PetitionId,
    pub status: PetitionStatus,
    pub current_step: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PetitionDetail {
    pub petition: Petition,
    pub petition_type: PetitionType,
    pub steps: Vec<ApprovalStep>,
    /// Oldest first.
    pub actions: Vec<ApprovalAction>,
    /// Newest version first.
    pub artifacts: Vec<StoredArtifact>,
}

/// Directory answers for the acting user, looked up fresh for each call.
#[derive(Debug, Clone)]
pub(crate) struct Actor {
    pub id: UserId,
    pub system_role: Option<SystemRole>,
    pub roles: HashSet<Role>,
}

impl Actor {
    pub fn may_decide(&self, required: Role) -> bool {
        access::may_decide(self.system_role, &self.roles, required)
    }

    pub fn is_admin(&self) -> bool {
        self.system_role.is_some_and(|role| role.is_superuser())
    }

    pub fn sees_all_petitions(&self) -> bool {
        self.system_role.is_some_and(|role| role.sees_all_petitions())
    }

    /// Held roles in a stable order, for query binding.
    pub fn sorted_roles(&self) -> Vec<Role> {
        let mut roles: Vec<Role> = self.roles.iter().copied().collect();
        roles.sort_by_key(|role| role.as_str());
        roles
    }
}

pub struct ApprovalEngine {
    pool: SqlitePool,
    directory: Arc<dyn ApproverDirectory>,
    signatures: Arc<dyn SignatureStore>,
    documents: DocumentQueue,
    generator: Option<Arc<dyn DocumentGenerator>>,
}

impl ApprovalEngine {
    pub fn new(
        pool: SqlitePool,
        directory: Arc<dyn ApproverDirectory>,
        signatures: Arc<dyn SignatureStore>,
        documents: DocumentQueue,
    ) -> Self {
        Self {
            pool,
            directory,
            signatures,
            documents,
            generator: None,
        }
    }

    /// Engine backed by the directory and signature tables in the same database.
    pub fn with_sql_collaborators(pool: SqlitePool, documents: DocumentQueue) -> Self {
        let directory = Arc::new(SqlApproverDirectory::new(pool.clone()));
        let signatures = Arc::new(SqlSignatureStore::new(pool.clone()));
        Self::new(pool, directory, signatures, documents)
    }

    /// Enables the synchronous `regenerate` operation.
    pub fn with_generator(mut self, generator: Arc<dyn DocumentGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn actor(&self, user: UserId) -> Result<Actor, WorkflowError> {
        let system_role = self.directory.system_role(user).await?;
        let roles = self.directory.roles_for(user).await?;
        Ok(Actor {
            id: user,
            system_role,
            roles,
        })
    }

    async fn begin(&self) -> Result<Transaction<'static, Sqlite>, WorkflowError> {
        Ok(self.pool.begin().await.map_err(StoreError::from)?)
    }

    /// Reads the petition outside any transaction, then opens one that claims
    /// it at exactly that state. Returns the petition as claimed.
    async fn begin_claimed(
        &self,
        petition_id: PetitionId,
    ) -> Result<(Transaction<'static, Sqlite>, Petition), WorkflowError> {
        let seen = {
            let mut conn = self.pool.acquire().await.map_err(StoreError::from)?;
            store::petitions::fetch(&mut conn, petition_id)
                .await?
                .ok_or_else(|| WorkflowError::not_found("petition", petition_id))?
        };

        let mut tx = self.begin().await?;
        let claimed = store::petitions::claim(
            &mut tx,
            petition_id,
            seen.lock_version,
            seen.current_approval_step,
        )
        .await?;
        let current = store::petitions::fetch(&mut tx, petition_id).await?;
        match current {
            Some(petition) if claimed => Ok((tx, petition)),
            Some(petition) => {
                warn!(
                    petition_id = %petition_id,
                    read_step = seen.current_approval_step,
                    step = petition.current_approval_step,
                    "Petition moved on before it could be claimed"
                );
                Err(WorkflowError::conflict(format!(
                    "petition {petition_id} changed while the request was in flight"
                )))
            }
            None => Err(WorkflowError::not_found("petition", petition_id)),
        }
    }
}

pub(crate) async fn load_type(
    conn: &mut SqliteConnection,
    petition: &Petition,
) -> Result<PetitionType, WorkflowError> {
    store::petition_types::fetch(conn, petition.petition_type_id)
        .await?
        .ok_or_else(|| WorkflowError::not_found("petition type", petition.petition_type_id))
}

/// Trimmed comments, `None` when blank.
pub(crate) fn normalized(comments: Option<&str>) -> Option<String> {
    comments
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

pub(crate) fn required_comments(comments: &str, operation: &str) -> Result<String, WorkflowError> {
    normalized(Some(comments)).ok_or_else(|| {
        WorkflowError::ValidationFailed(format!("comments are required to {operation} a petition"))
    })
}
