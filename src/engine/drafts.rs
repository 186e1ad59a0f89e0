use chrono::Utc;
use serde_json::json;
use tracing::{info, Instrument};

use super::{load_type, ApprovalEngine, WorkflowError};
use crate::petitions::payload::validate_against_type;
use crate::petitions::{
    ensure_permitted, ActionType, NewPetition, Petition, PetitionId, PetitionStatus,
    PetitionUpdate, Transition, UserId,
};
use crate::store::{self, NewAction, StoreError};
use crate::telemetry::{create_transition_span, generate_correlation_id};

impl ApprovalEngine {
    /// Creates a draft owned by `owner_id` and assigns its request number.
    pub async fn create_draft(
        &self,
        owner_id: UserId,
        draft: NewPetition,
    ) -> Result<Petition, WorkflowError> {
        let correlation_id = generate_correlation_id();
        let span = create_transition_span("create_draft", None, owner_id.0, &correlation_id);

        async move {
            if self.directory.system_role(owner_id).await?.is_none() {
                return Err(WorkflowError::not_found("user", owner_id));
            }

            // Validate on a plain connection; the write transaction below
            // starts with a write so it never upgrades a stale read snapshot.
            let petition_type = {
                let mut conn = self.pool.acquire().await.map_err(StoreError::from)?;
                store::petition_types::fetch(&mut conn, draft.petition_type_id)
                    .await?
                    .ok_or_else(|| WorkflowError::not_found("petition type", draft.petition_type_id))?
            };
            validate_against_type(
                &petition_type,
                &draft.contact,
                &draft.payload,
                draft.explanation.as_deref(),
            )
            .map_err(WorkflowError::ValidationFailed)?;

            let now = Utc::now();
            let mut tx = self.begin().await?;
            let request_number = store::petitions::next_request_number(&mut tx, now).await?;
            let petition =
                store::petitions::insert(&mut tx, owner_id, &request_number, &draft, now).await?;
            store::actions::append(
                &mut tx,
                &NewAction {
                    petition_id: petition.id,
                    step_id: None,
                    actor_id: owner_id,
                    action_type: ActionType::Created,
                    data: Some(json!({
                        "request_number": request_number,
                        "type_number": petition_type.type_number,
                    })),
                    comments: None,
                    at: now,
                },
            )
            .await?;
            tx.commit().await.map_err(StoreError::from)?;

            info!(
                petition_id = %petition.id,
                request_number = %petition.request_number,
                type_number = petition_type.type_number,
                "Draft created"
            );
            Ok::<_, WorkflowError>(petition)
        }
        .instrument(span)
        .await
    }

    /// Edits a draft or returned petition. Unset fields keep their value and
    /// the merged result is validated as on creation.
    pub async fn update_draft(
        &self,
        petition_id: PetitionId,
        owner_id: UserId,
        update: PetitionUpdate,
    ) -> Result<Petition, WorkflowError> {
        let correlation_id = generate_correlation_id();
        let span = create_transition_span("update_draft", Some(petition_id.0), owner_id.0, &correlation_id);

        async move {
            let (mut tx, current) = self.begin_claimed(petition_id).await?;
            if current.owner_id != owner_id {
                return Err(WorkflowError::forbidden(format!(
                    "only the owner may edit petition {}",
                    current.request_number
                )));
            }
            ensure_permitted(current.status, Transition::Edit)?;

            let mut changed = Vec::new();
            let mut merged = current.clone();
            if let Some(contact) = update.contact {
                if contact != merged.contact {
                    changed.push("contact");
                }
                merged.contact = contact;
            }
            if let Some(payload) = update.payload {
                if payload != merged.payload {
                    changed.push("payload");
                }
                merged.payload = payload;
            }
            if let Some(explanation) = update.explanation {
                let explanation = Some(explanation).filter(|e| !e.trim().is_empty());
                if explanation != merged.explanation {
                    changed.push("explanation");
                }
                merged.explanation = explanation;
            }

            let petition_type = load_type(&mut tx, &merged).await?;
            validate_against_type(
                &petition_type,
                &merged.contact,
                &merged.payload,
                merged.explanation.as_deref(),
            )
            .map_err(WorkflowError::ValidationFailed)?;

            let now = Utc::now();
            if !store::petitions::update_fields(&mut tx, &merged, now).await? {
                return Err(WorkflowError::conflict(format!(
                    "petition {petition_id} changed while it was being edited"
                )));
            }
            store::actions::append(
                &mut tx,
                &NewAction {
                    petition_id,
                    step_id: None,
                    actor_id: owner_id,
                    action_type: ActionType::Updated,
                    data: Some(json!({ "fields": changed })),
                    comments: None,
                    at: now,
                },
            )
            .await?;
            let updated = store::petitions::fetch(&mut tx, petition_id)
                .await?
                .ok_or_else(|| WorkflowError::not_found("petition", petition_id))?;
            tx.commit().await.map_err(StoreError::from)?;

            info!(petition_id = %petition_id, fields = ?changed, "Petition updated");
            Ok::<_, WorkflowError>(updated)
        }
        .instrument(span)
        .await
    }

    /// Owners may delete their drafts; administrators may delete any
    /// petition. Steps, actions and artifact rows go with it.
    pub async fn delete_draft(
        &self,
        petition_id: PetitionId,
        actor_id: UserId,
    ) -> Result<(), WorkflowError> {
        let correlation_id = generate_correlation_id();
        let span = create_transition_span("delete_draft", Some(petition_id.0), actor_id.0, &correlation_id);

        async move {
            let actor = self.actor(actor_id).await?;

            let (mut tx, petition) = self.begin_claimed(petition_id).await?;
            if !actor.is_admin() {
                if petition.owner_id != actor_id {
                    return Err(WorkflowError::forbidden(format!(
                        "only the owner may delete petition {}",
                        petition.request_number
                    )));
                }
                if petition.status != PetitionStatus::Draft {
                    return Err(WorkflowError::InvalidState(format!(
                        "cannot delete a petition that is {}",
                        petition.status
                    )));
                }
            }

            if !store::petitions::delete(&mut tx, petition_id).await? {
                return Err(WorkflowError::not_found("petition", petition_id));
            }
            tx.commit().await.map_err(StoreError::from)?;

            info!(
                petition_id = %petition_id,
                request_number = %petition.request_number,
                status = %petition.status,
                "Petition deleted"
            );
            Ok::<_, WorkflowError>(())
        }
        .instrument(span)
        .await
    }
}
