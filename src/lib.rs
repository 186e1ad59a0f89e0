// petition-flow - approval workflow engine for student petitions
// This exposes the engine, its collaborators and bootstrap helpers

pub mod access;
pub mod config;
pub mod database;
pub mod documents;
pub mod engine;
pub mod petitions;
pub mod shutdown;
pub mod store;
pub mod telemetry;

// Re-export key types for easy access
pub use access::{may_decide, ApproverDirectory, SignatureStore, SqlApproverDirectory, SqlSignatureStore};
pub use config::{config, init_config, PetitionFlowConfig};
pub use database::DatabaseManager;
pub use documents::{
    ArtifactPipeline, DocumentGenerator, DocumentJob, DocumentQueue, DocumentWorker,
    FileTemplateRenderer, RenderError, RetryPolicy, TemplateRenderer,
};
pub use engine::{
    ApprovalEngine, ApprovalOutcome, PetitionDetail, SubmitOutcome, TransitionOutcome,
    WorkflowError,
};
pub use petitions::{
    NewPetition, Petition, PetitionId, PetitionPayload, PetitionStatus, Role, UserId,
};
pub use shutdown::ShutdownCoordinator;
pub use store::{PetitionFilter, PetitionPage, PetitionSummary};
pub use telemetry::{create_transition_span, generate_correlation_id, init_telemetry, shutdown_telemetry};
