use sqlx::SqliteConnection;
use tracing::{debug, info, warn, Instrument};

use super::{load_type, Actor, ApprovalEngine, PetitionDetail, WorkflowError};
use crate::petitions::{
    ApprovalStep, NewPetitionType, Petition, PetitionId, PetitionType, StepStatus,
    StoredArtifact, UserId,
};
use crate::store::{self, PetitionFilter, PetitionPage, PetitionSummary, StoreError};
use crate::telemetry::{create_transition_span, generate_correlation_id};

impl ApprovalEngine {
    /// Petitions whose current step requires a role the actor holds and is
    /// still open, oldest first.
    pub async fn get_queue(&self, actor_id: UserId) -> Result<Vec<PetitionSummary>, WorkflowError> {
        let actor = self.actor(actor_id).await?;
        let roles = actor.sorted_roles();
        let mut conn = self.pool.acquire().await.map_err(StoreError::from)?;
        let queue = store::petitions::queue_for_roles(&mut conn, &roles).await?;
        debug!(actor = %actor_id, roles = ?roles, size = queue.len(), "Approval queue loaded");
        Ok(queue)
    }

    /// Full view of one petition. Visible to the owner, administrators and
    /// managers, anyone who has decided on it, and holders of the role the
    /// step under review requires.
    pub async fn get_detail(
        &self,
        petition_id: PetitionId,
        actor_id: UserId,
    ) -> Result<PetitionDetail, WorkflowError> {
        let actor = self.actor(actor_id).await?;

        // One read transaction so the ledger, log and artifacts agree.
        let mut tx = self.begin().await?;
        let (petition, steps) = load_visible(&mut tx, &actor, petition_id).await?;
        let petition_type = load_type(&mut tx, &petition).await?;
        let actions = store::actions::for_petition(&mut tx, petition_id).await?;
        let artifacts = store::artifacts::for_petition(&mut tx, petition_id).await?;
        tx.commit().await.map_err(StoreError::from)?;

        Ok(PetitionDetail {
            petition,
            petition_type,
            steps,
            actions,
            artifacts,
        })
    }

    /// Paginated listing, newest first. Administrators and managers see
    /// every petition; everyone else sees exactly what `get_detail` would
    /// let them open.
    pub async fn list_petitions(
        &self,
        actor_id: UserId,
        filter: &PetitionFilter,
    ) -> Result<PetitionPage, WorkflowError> {
        let actor = self.actor(actor_id).await?;
        let roles = actor.sorted_roles();
        let viewer = if actor.sees_all_petitions() {
            None
        } else {
            Some((actor_id, roles.as_slice()))
        };

        let mut conn = self.pool.acquire().await.map_err(StoreError::from)?;
        Ok(store::petitions::list(&mut conn, viewer, filter).await?)
    }

    pub async fn list_types(&self) -> Result<Vec<PetitionType>, WorkflowError> {
        let mut conn = self.pool.acquire().await.map_err(StoreError::from)?;
        Ok(store::petition_types::list(&mut conn).await?)
    }

    /// Adds a petition type. Administrators only.
    pub async fn define_type(
        &self,
        actor_id: UserId,
        new_type: NewPetitionType,
    ) -> Result<PetitionType, WorkflowError> {
        let actor = self.actor(actor_id).await?;
        if !actor.is_admin() {
            return Err(WorkflowError::forbidden("only administrators may define petition types"));
        }
        if new_type.name.trim().is_empty() {
            return Err(WorkflowError::ValidationFailed("petition type name is required".to_string()));
        }
        if new_type.approval_chain.is_empty() {
            return Err(WorkflowError::ValidationFailed(
                "approval chain must contain at least one role".to_string(),
            ));
        }

        let mut conn = self.pool.acquire().await.map_err(StoreError::from)?;
        match store::petition_types::insert(&mut conn, &new_type).await {
            Ok(created) => {
                info!(
                    type_number = created.type_number,
                    chain = ?created.approval_chain,
                    "Petition type defined"
                );
                Ok(created)
            }
            Err(StoreError::Database(sqlx::Error::Database(db_err)))
                if db_err.is_unique_violation() =>
            {
                Err(WorkflowError::ValidationFailed(format!(
                    "petition type number {} already exists",
                    new_type.type_number
                )))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Every generated version, newest first.
    pub async fn list_artifacts(
        &self,
        petition_id: PetitionId,
        actor_id: UserId,
    ) -> Result<Vec<StoredArtifact>, WorkflowError> {
        let actor = self.actor(actor_id).await?;
        let mut conn = self.pool.acquire().await.map_err(StoreError::from)?;
        load_visible(&mut conn, &actor, petition_id).await?;
        Ok(store::artifacts::for_petition(&mut conn, petition_id).await?)
    }

    /// A specific artifact version, or the newest one.
    pub async fn latest_artifact(
        &self,
        petition_id: PetitionId,
        actor_id: UserId,
        version: Option<u32>,
    ) -> Result<StoredArtifact, WorkflowError> {
        let actor = self.actor(actor_id).await?;
        let mut conn = self.pool.acquire().await.map_err(StoreError::from)?;
        load_visible(&mut conn, &actor, petition_id).await?;
        store::artifacts::find(&mut conn, petition_id, version)
            .await?
            .ok_or_else(|| WorkflowError::not_found("artifact for petition", petition_id))
    }

    /// Generates a fresh artifact now. Unlike the post-transition jobs, a
    /// renderer failure is returned to the caller.
    pub async fn regenerate(
        &self,
        petition_id: PetitionId,
        actor_id: UserId,
    ) -> Result<StoredArtifact, WorkflowError> {
        let correlation_id = generate_correlation_id();
        let span = create_transition_span("regenerate", Some(petition_id.0), actor_id.0, &correlation_id);

        async move {
            let actor = self.actor(actor_id).await?;
            {
                let mut conn = self.pool.acquire().await.map_err(StoreError::from)?;
                load_visible(&mut conn, &actor, petition_id).await?;
            }

            let generator = self.generator.as_ref().ok_or_else(|| {
                WorkflowError::PreconditionFailed("document generation is not configured".to_string())
            })?;
            match generator.generate(petition_id, actor_id).await {
                Ok(artifact) => {
                    info!(petition_id = %petition_id, version = artifact.version, "Document regenerated");
                    Ok::<_, WorkflowError>(artifact)
                }
                Err(err) => {
                    warn!(petition_id = %petition_id, error = %err, "Explicit regeneration failed");
                    Err(WorkflowError::DownstreamFailure(err))
                }
            }
        }
        .instrument(span)
        .await
    }
}

/// Loads a petition and its steps, or `Forbidden` when the actor may not see it.
async fn load_visible(
    conn: &mut SqliteConnection,
    actor: &Actor,
    petition_id: PetitionId,
) -> Result<(Petition, Vec<ApprovalStep>), WorkflowError> {
    let petition = store::petitions::fetch(conn, petition_id)
        .await?
        .ok_or_else(|| WorkflowError::not_found("petition", petition_id))?;
    let steps = store::steps::for_petition(conn, petition_id).await?;

    // Only the step under review counts; queued steps grant nothing yet.
    let reviewing_held_role = steps.iter().any(|step| {
        step.status == StepStatus::InReview && actor.roles.contains(&step.approver_role)
    });
    let visible = petition.owner_id == actor.id
        || actor.sees_all_petitions()
        || reviewing_held_role
        || store::steps::has_reviewed(conn, petition_id, actor.id).await?;

    if visible {
        Ok((petition, steps))
    } else {
        Err(WorkflowError::forbidden(format!(
            "user {} may not view petition {}",
            actor.id, petition.request_number
        )))
    }
}
