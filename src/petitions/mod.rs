// Petition domain model: identifiers, status enums, the typed payload and
// the pure lifecycle rules the engine applies inside its transactions.

pub mod lifecycle;
pub mod payload;
pub mod types;

pub use lifecycle::{ensure_permitted, next_step, LifecycleViolation, StepAdvance, Transition};
pub use payload::{ContactDetails, PetitionKind, PetitionPayload, PetitionUpdate, NewPetition};
pub use types::{
    ActionType, ApprovalAction, ApprovalStep, ArtifactId, Decision, NewPetitionType, Petition,
    PetitionId, PetitionStatus, PetitionType, PetitionTypeId, Role, SignatureId, StepId,
    StepStatus, StoredArtifact, SystemRole, UnknownVariant, UserId,
};
