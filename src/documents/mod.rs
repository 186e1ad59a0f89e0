//! Document generation, decoupled from workflow transitions.
//!
//! Transitions emit a [`DocumentJob`] after they commit. A [`DocumentWorker`]
//! consumes those jobs and drives a [`DocumentGenerator`] with its own retry
//! policy. A generation failure leaves the committed workflow state alone; the
//! artifact is simply stale until the next successful generation.

pub mod pipeline;
pub mod renderer;
pub mod worker;

use async_trait::async_trait;
use thiserror::Error;

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

use crate::petitions::{PetitionId, StoredArtifact, UserId};
use crate::store::StoreError;

pub use pipeline::ArtifactPipeline;
pub use renderer::{FileTemplateRenderer, PetitionSnapshot, RenderedDocument, TemplateRenderer};
pub use worker::{DocumentJob, DocumentQueue, DocumentWorker, RetryPolicy, WorkerStats};

#[cfg(any(test, feature = "testing"))]
pub use renderer::MockTemplateRenderer;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("petition {0} not found")]
    PetitionNotFound(PetitionId),

    #[error("renderer failed: {0}")]
    Renderer(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("artifact storage error: {0}")]
    Storage(#[from] StoreError),
}

impl RenderError {
    /// Whether a retry could succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, RenderError::PetitionNotFound(_))
    }
}

/// Produces a new artifact version reflecting the petition's current state.
/// Version numbers are strictly increasing per petition and never reused,
/// including across failed attempts.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait DocumentGenerator: Send + Sync {
    async fn generate(
        &self,
        petition_id: PetitionId,
        requested_by: UserId,
    ) -> Result<StoredArtifact, RenderError>;
}
