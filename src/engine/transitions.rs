// Submit, approve, reject, return and resubmit.
//
// Shape of every transition: directory lookups and a read of the petition
// first, then one transaction that claims the petition at the state it was
// read in (a moved petition is a Conflict), checks in the order
// NotFound -> Forbidden/InvalidState -> PreconditionFailed, writes the step
// ledger, applies the guarded petition update, appends the action and
// commits. Document jobs are only emitted after the commit succeeded.

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn, Instrument};

use super::{
    load_type, normalized, required_comments, Actor, ApprovalEngine,
    ApprovalOutcome, SubmitOutcome, TransitionOutcome, WorkflowError,
};
use crate::documents::DocumentJob;
use crate::petitions::{
    ensure_permitted, next_step, ActionType, ApprovalStep, Decision, Petition, PetitionId,
    PetitionStatus, SignatureId, StepAdvance, StepStatus, Transition, UserId,
};
use crate::store::{self, NewAction, StatusChange, StepDecision};
use crate::telemetry::{create_transition_span, generate_correlation_id};

impl ApprovalEngine {
    /// draft -> submitted. Materializes the approval chain with step 1 under
    /// review and queues the first document version.
    pub async fn submit(
        &self,
        petition_id: PetitionId,
        owner_id: UserId,
    ) -> Result<SubmitOutcome, WorkflowError> {
        let correlation_id = generate_correlation_id();
        let span = create_transition_span("submit", Some(petition_id.0), owner_id.0, &correlation_id);

        async move {
            let signature = self.signatures.active_signature(owner_id).await?;

            let (mut tx, petition) = self.begin_claimed(petition_id).await?;
            ensure_owner(&petition, owner_id, "submit")?;
            ensure_permitted(petition.status, Transition::Submit)?;
            if signature.is_none() {
                return Err(WorkflowError::PreconditionFailed(
                    "a signature must be on file before submitting".to_string(),
                ));
            }

            let petition_type = load_type(&mut tx, &petition).await?;
            if petition_type.approval_chain.is_empty() {
                return Err(WorkflowError::ValidationFailed(format!(
                    "petition type '{}' has no approval chain",
                    petition_type.name
                )));
            }

            let now = Utc::now();
            store::steps::create_chain(&mut tx, petition_id, &petition_type.approval_chain, now)
                .await?;
            let applied = store::petitions::apply_status_change(
                &mut tx,
                &StatusChange {
                    petition_id,
                    expected_lock_version: petition.lock_version,
                    expected_step: petition.current_approval_step,
                    status: PetitionStatus::Submitted,
                    current_step: 1,
                    submitted_at: Some(now),
                    completed_at: None,
                    at: now,
                },
            )
            .await?;
            if !applied {
                return Err(WorkflowError::conflict("petition changed while submitting"));
            }

            let first_step = store::steps::at_position(&mut tx, petition_id, 1).await?;
            let step_count = u32::try_from(petition_type.approval_chain.len()).unwrap_or(u32::MAX);
            store::actions::append(
                &mut tx,
                &NewAction {
                    petition_id,
                    step_id: first_step.map(|step| step.id),
                    actor_id: owner_id,
                    action_type: ActionType::Submitted,
                    data: Some(json!({
                        "request_number": petition.request_number,
                        "step_count": step_count,
                        "chain": petition_type.approval_chain,
                    })),
                    comments: None,
                    at: now,
                },
            )
            .await?;
            tx.commit().await.map_err(store::StoreError::from)?;

            info!(petition_id = %petition_id, step_count, "Petition submitted");
            let artifact_queued = self.documents.enqueue(DocumentJob {
                petition_id,
                requested_by: owner_id,
                trigger: ActionType::Submitted,
            });

            Ok::<_, WorkflowError>(SubmitOutcome {
                petition_id,
                step_count,
                artifact_queued,
            })
        }
        .instrument(span)
        .await
    }

    /// Approves the current step, then either opens the next step or
    /// completes the petition.
    pub async fn approve(
        &self,
        petition_id: PetitionId,
        actor_id: UserId,
        comments: Option<&str>,
    ) -> Result<ApprovalOutcome, WorkflowError> {
        let comments = normalized(comments);
        let correlation_id = generate_correlation_id();
        let span = create_transition_span("approve", Some(petition_id.0), actor_id.0, &correlation_id);

        async move {
            let actor = self.actor(actor_id).await?;
            let signature = self.signatures.active_signature(actor_id).await?;

            let (mut tx, petition) = self.begin_claimed(petition_id).await?;
            ensure_permitted(petition.status, Transition::Approve)?;
            let step = current_step(&mut tx, &petition).await?;
            authorize(&actor, &step)?;
            let signature_id = signature.ok_or_else(|| {
                WorkflowError::PreconditionFailed(
                    "a signature must be on file to approve".to_string(),
                )
            })?;

            let now = Utc::now();
            let chain_len = store::steps::chain_length(&mut tx, petition_id).await?;
            let decided = store::steps::record_decision(
                &mut tx,
                &StepDecision {
                    step_id: step.id,
                    status: StepStatus::Approved,
                    decision: Some(Decision::Approved),
                    approver: actor_id,
                    comments: comments.as_deref(),
                    signature_id: Some(signature_id),
                    at: now,
                    completes: true,
                },
            )
            .await?;
            if !decided {
                return Err(step_not_under_review(&step));
            }

            let advance = next_step(step.step_order, chain_len);
            let (status, current_step, completed_at) = match advance {
                StepAdvance::Next(order) => {
                    if !store::steps::open(&mut tx, petition_id, order, now).await? {
                        return Err(WorkflowError::conflict(format!(
                            "step {order} of petition {petition_id} was not pending"
                        )));
                    }
                    (PetitionStatus::Pending, order, None)
                }
                StepAdvance::Complete => (PetitionStatus::Approved, step.step_order, Some(now)),
            };
            apply(&mut tx, &petition, status, current_step, completed_at, now).await?;

            let is_complete = advance == StepAdvance::Complete;
            store::actions::append(
                &mut tx,
                &NewAction {
                    petition_id,
                    step_id: Some(step.id),
                    actor_id,
                    action_type: ActionType::Approved,
                    data: Some(json!({
                        "step_order": step.step_order,
                        "role": step.approver_role,
                        "is_complete": is_complete,
                    })),
                    comments: comments.as_deref(),
                    at: now,
                },
            )
            .await?;
            tx.commit().await.map_err(store::StoreError::from)?;

            info!(
                petition_id = %petition_id,
                step = step.step_order,
                role = %step.approver_role,
                is_complete,
                "Step approved"
            );
            let artifact_queued = self.documents.enqueue(DocumentJob {
                petition_id,
                requested_by: actor_id,
                trigger: ActionType::Approved,
            });

            Ok::<_, WorkflowError>(ApprovalOutcome {
                petition_id,
                step_order: step.step_order,
                is_complete,
                artifact_queued,
            })
        }
        .instrument(span)
        .await
    }

    /// Disapproves the current step; the petition becomes terminally
    /// rejected and later steps are never touched.
    pub async fn reject(
        &self,
        petition_id: PetitionId,
        actor_id: UserId,
        comments: &str,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let comments = required_comments(comments, "reject")?;
        let correlation_id = generate_correlation_id();
        let span = create_transition_span("reject", Some(petition_id.0), actor_id.0, &correlation_id);

        async move {
            let actor = self.actor(actor_id).await?;
            // Recorded when present; not required to reject.
            let signature = self.signatures.active_signature(actor_id).await?;

            let (mut tx, petition) = self.begin_claimed(petition_id).await?;
            ensure_permitted(petition.status, Transition::Reject)?;
            let step = current_step(&mut tx, &petition).await?;
            authorize(&actor, &step)?;

            let now = Utc::now();
            decide(&mut tx, &step, actor_id, StepStatus::Rejected, Some(Decision::Disapproved), &comments, signature, true, now).await?;
            apply(&mut tx, &petition, PetitionStatus::Rejected, step.step_order, Some(now), now).await?;
            store::actions::append(
                &mut tx,
                &NewAction {
                    petition_id,
                    step_id: Some(step.id),
                    actor_id,
                    action_type: ActionType::Rejected,
                    data: Some(json!({
                        "step_order": step.step_order,
                        "role": step.approver_role,
                        "signed": signature.is_some(),
                    })),
                    comments: Some(&comments),
                    at: now,
                },
            )
            .await?;
            tx.commit().await.map_err(store::StoreError::from)?;

            info!(petition_id = %petition_id, step = step.step_order, "Petition rejected");
            Ok::<_, WorkflowError>(TransitionOutcome {
                petition_id,
                status: PetitionStatus::Rejected,
                current_step: step.step_order,
            })
        }
        .instrument(span)
        .await
    }

    /// Sends the petition back to its owner. The chain position stays on the
    /// returning step so resubmission reopens it.
    pub async fn return_to_owner(
        &self,
        petition_id: PetitionId,
        actor_id: UserId,
        comments: &str,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let comments = required_comments(comments, "return")?;
        let correlation_id = generate_correlation_id();
        let span = create_transition_span("return", Some(petition_id.0), actor_id.0, &correlation_id);

        async move {
            let actor = self.actor(actor_id).await?;

            let (mut tx, petition) = self.begin_claimed(petition_id).await?;
            ensure_permitted(petition.status, Transition::Return)?;
            let step = current_step(&mut tx, &petition).await?;
            authorize(&actor, &step)?;

            let now = Utc::now();
            decide(&mut tx, &step, actor_id, StepStatus::Returned, None, &comments, None, false, now).await?;
            apply(&mut tx, &petition, PetitionStatus::Returned, step.step_order, None, now).await?;
            store::actions::append(
                &mut tx,
                &NewAction {
                    petition_id,
                    step_id: Some(step.id),
                    actor_id,
                    action_type: ActionType::Returned,
                    data: Some(json!({
                        "step_order": step.step_order,
                        "role": step.approver_role,
                    })),
                    comments: Some(&comments),
                    at: now,
                },
            )
            .await?;
            tx.commit().await.map_err(store::StoreError::from)?;

            info!(petition_id = %petition_id, step = step.step_order, "Petition returned to owner");
            Ok::<_, WorkflowError>(TransitionOutcome {
                petition_id,
                status: PetitionStatus::Returned,
                current_step: step.step_order,
            })
        }
        .instrument(span)
        .await
    }

    /// returned -> pending. Reopens the step that issued the return; the
    /// previous review lives on in the action log.
    pub async fn resubmit(
        &self,
        petition_id: PetitionId,
        owner_id: UserId,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let correlation_id = generate_correlation_id();
        let span = create_transition_span("resubmit", Some(petition_id.0), owner_id.0, &correlation_id);

        async move {
            let (mut tx, petition) = self.begin_claimed(petition_id).await?;
            ensure_owner(&petition, owner_id, "resubmit")?;
            ensure_permitted(petition.status, Transition::Resubmit)?;
            let step = current_step(&mut tx, &petition).await?;

            let now = Utc::now();
            if !store::steps::reopen(&mut tx, step.id, now).await? {
                return Err(WorkflowError::conflict(format!(
                    "step {} of petition {petition_id} is {} rather than returned",
                    step.step_order, step.status
                )));
            }
            apply(&mut tx, &petition, PetitionStatus::Pending, step.step_order, None, now).await?;
            store::actions::append(
                &mut tx,
                &NewAction {
                    petition_id,
                    step_id: Some(step.id),
                    actor_id: owner_id,
                    action_type: ActionType::Resubmitted,
                    data: Some(json!({
                        "step_order": step.step_order,
                        "previous_reviewer": step.approver_user_id,
                        "previous_comments": step.comments,
                    })),
                    comments: None,
                    at: now,
                },
            )
            .await?;
            tx.commit().await.map_err(store::StoreError::from)?;

            // No regeneration: nothing a document shows has changed.
            info!(petition_id = %petition_id, step = step.step_order, "Petition resubmitted");
            Ok::<_, WorkflowError>(TransitionOutcome {
                petition_id,
                status: PetitionStatus::Pending,
                current_step: step.step_order,
            })
        }
        .instrument(span)
        .await
    }
}

fn ensure_owner(petition: &Petition, user: UserId, operation: &str) -> Result<(), WorkflowError> {
    if petition.owner_id == user {
        Ok(())
    } else {
        warn!(petition_id = %petition.id, actor = %user, operation, "Non-owner attempted owner-only operation");
        Err(WorkflowError::forbidden(format!(
            "only the owner may {operation} petition {}",
            petition.request_number
        )))
    }
}

fn authorize(actor: &Actor, step: &ApprovalStep) -> Result<(), WorkflowError> {
    if actor.may_decide(step.approver_role) {
        return Ok(());
    }
    warn!(
        petition_id = %step.petition_id,
        actor = %actor.id,
        required = %step.approver_role,
        "Decision refused: role not held"
    );
    Err(WorkflowError::forbidden(format!(
        "user {} does not hold the {} role required at step {}",
        actor.id, step.approver_role, step.step_order
    )))
}

async fn current_step(
    conn: &mut sqlx::SqliteConnection,
    petition: &Petition,
) -> Result<ApprovalStep, WorkflowError> {
    store::steps::at_position(conn, petition.id, petition.current_approval_step)
        .await?
        .ok_or_else(|| WorkflowError::not_found("current approval step of petition", petition.id))
}

fn step_not_under_review(step: &ApprovalStep) -> WorkflowError {
    WorkflowError::conflict(format!(
        "step {} of petition {} is no longer under review",
        step.step_order, step.petition_id
    ))
}

#[allow(clippy::too_many_arguments)]
async fn decide(
    conn: &mut sqlx::SqliteConnection,
    step: &ApprovalStep,
    approver: UserId,
    status: StepStatus,
    decision: Option<Decision>,
    comments: &str,
    signature_id: Option<SignatureId>,
    completes: bool,
    at: chrono::DateTime<Utc>,
) -> Result<(), WorkflowError> {
    let recorded = store::steps::record_decision(
        conn,
        &StepDecision {
            step_id: step.id,
            status,
            decision,
            approver,
            comments: Some(comments),
            signature_id,
            at,
            completes,
        },
    )
    .await?;

    if recorded {
        Ok(())
    } else {
        Err(step_not_under_review(step))
    }
}

async fn apply(
    conn: &mut sqlx::SqliteConnection,
    petition: &Petition,
    status: PetitionStatus,
    current_step: u32,
    completed_at: Option<chrono::DateTime<Utc>>,
    at: chrono::DateTime<Utc>,
) -> Result<(), WorkflowError> {
    let applied = store::petitions::apply_status_change(
        conn,
        &StatusChange {
            petition_id: petition.id,
            expected_lock_version: petition.lock_version,
            expected_step: petition.current_approval_step,
            status,
            current_step,
            submitted_at: None,
            completed_at,
            at,
        },
    )
    .await?;

    if applied {
        Ok(())
    } else {
        Err(WorkflowError::conflict(format!(
            "petition {} changed during the transition",
            petition.id
        )))
    }
}
