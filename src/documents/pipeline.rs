use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, info};

use super::{DocumentGenerator, PetitionSnapshot, RenderError, TemplateRenderer};
use crate::petitions::{ActionType, PetitionId, PetitionStatus, StoredArtifact, UserId};
use crate::store::{self, NewAction, NewArtifact, StoreError};

/// Snapshot, reserve a version, render, then record the artifact and a
/// `pdf_generated` action together.
pub struct ArtifactPipeline {
    pool: SqlitePool,
    renderer: Arc<dyn TemplateRenderer>,
}

impl ArtifactPipeline {
    pub fn new(pool: SqlitePool, renderer: Arc<dyn TemplateRenderer>) -> Self {
        Self { pool, renderer }
    }

    async fn snapshot(&self, petition_id: PetitionId) -> Result<PetitionSnapshot, RenderError> {
        // One read transaction so petition and steps agree.
        let mut tx = self.pool.begin().await.map_err(StoreError::from)?;
        let petition = store::petitions::fetch(&mut tx, petition_id)
            .await?
            .ok_or(RenderError::PetitionNotFound(petition_id))?;
        let petition_type = store::petition_types::fetch(&mut tx, petition.petition_type_id)
            .await?
            .ok_or_else(|| StoreError::Corrupt {
                column: "petition_type_id",
                reason: format!("type {} is missing", petition.petition_type_id),
            })?;
        let steps = store::steps::for_petition(&mut tx, petition_id).await?;
        tx.commit().await.map_err(StoreError::from)?;

        Ok(PetitionSnapshot {
            petition,
            petition_type,
            steps,
        })
    }
}

#[async_trait]
impl DocumentGenerator for ArtifactPipeline {
    async fn generate(
        &self,
        petition_id: PetitionId,
        requested_by: UserId,
    ) -> Result<StoredArtifact, RenderError> {
        let snapshot = self.snapshot(petition_id).await?;

        let version = {
            let mut conn = self.pool.acquire().await.map_err(StoreError::from)?;
            store::artifacts::reserve_version(&mut conn, petition_id).await?
        };
        debug!(petition_id = %petition_id, version, "Reserved artifact version");

        let rendered = self.renderer.render(&snapshot, version).await?;
        let is_final = snapshot.petition.status == PetitionStatus::Approved;
        let now = Utc::now();

        let mut tx = self.pool.begin().await.map_err(StoreError::from)?;
        let artifact = store::artifacts::record(
            &mut tx,
            &NewArtifact {
                petition_id,
                version,
                file_name: &rendered.file_name,
                artifact_ref: &rendered.artifact_ref,
                size_bytes: rendered.size_bytes,
                is_final,
                generation_method: &rendered.method,
                generated_by: Some(requested_by),
                at: now,
            },
        )
        .await?;
        store::actions::append(
            &mut tx,
            &NewAction {
                petition_id,
                step_id: None,
                actor_id: requested_by,
                action_type: ActionType::PdfGenerated,
                data: Some(json!({
                    "version": version,
                    "size_bytes": rendered.size_bytes,
                    "is_final": is_final,
                })),
                comments: None,
                at: now,
            },
        )
        .await?;
        tx.commit().await.map_err(StoreError::from)?;

        info!(
            petition_id = %petition_id,
            version,
            size_bytes = rendered.size_bytes,
            is_final,
            "Petition document generated"
        );
        Ok(artifact)
    }
}
