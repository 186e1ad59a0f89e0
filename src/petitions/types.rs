use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::payload::{ContactDetails, PetitionKind, PetitionPayload};

/// Raised when a stored tag does not name any known variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

id_type!(
    /// Primary key of a petition record.
    PetitionId
);
id_type!(UserId);
id_type!(StepId);
id_type!(PetitionTypeId);
id_type!(SignatureId);
id_type!(ArtifactId);

/// Text-backed enums persisted as their snake_case tag.
macro_rules! tagged_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal {
            $($variant:ident => $tag:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $tag),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.pad(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($tag => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

tagged_enum!(
    /// Petition-level lifecycle status.
    PetitionStatus, "petition status" {
        Draft => "draft",
        Submitted => "submitted",
        Pending => "pending",
        InReview => "in_review",
        Approved => "approved",
        Rejected => "rejected",
        Returned => "returned",
    }
);

impl PetitionStatus {
    /// Awaiting a decision at the current step.
    pub fn is_awaiting_decision(&self) -> bool {
        matches!(
            self,
            PetitionStatus::Submitted | PetitionStatus::Pending | PetitionStatus::InReview
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PetitionStatus::Approved | PetitionStatus::Rejected)
    }

    /// The owner may edit payload fields only in these states.
    pub fn is_editable(&self) -> bool {
        matches!(self, PetitionStatus::Draft | PetitionStatus::Returned)
    }
}

tagged_enum!(
    StepStatus, "step status" {
        Pending => "pending",
        InReview => "in_review",
        Approved => "approved",
        Rejected => "rejected",
        Returned => "returned",
    }
);

tagged_enum!(
    Decision, "decision" {
        Approved => "approved",
        Disapproved => "disapproved",
    }
);

tagged_enum!(
    /// Approver role tag a chain position is bound to.
    Role, "approver role" {
        Advisor => "advisor",
        Chairperson => "chairperson",
        Dean => "dean",
        Provost => "provost",
    }
);

tagged_enum!(
    /// Account-level role; `Admin` may act on any step.
    SystemRole, "system role" {
        Student => "student",
        Manager => "manager",
        Admin => "admin",
    }
);

impl SystemRole {
    pub fn is_superuser(&self) -> bool {
        matches!(self, SystemRole::Admin)
    }

    /// May list every petition regardless of ownership.
    pub fn sees_all_petitions(&self) -> bool {
        matches!(self, SystemRole::Admin | SystemRole::Manager)
    }
}

tagged_enum!(
    ActionType, "action type" {
        Created => "created",
        Updated => "updated",
        Submitted => "submitted",
        Approved => "approved",
        Rejected => "rejected",
        Returned => "returned",
        Resubmitted => "resubmitted",
        PdfGenerated => "pdf_generated",
    }
);

/// A petition type and its fixed approval chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PetitionType {
    pub id: PetitionTypeId,
    pub type_number: u32,
    pub name: String,
    pub description: Option<String>,
    pub kind: PetitionKind,
    pub requires_explanation: bool,
    pub approval_chain: Vec<Role>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPetitionType {
    pub type_number: u32,
    pub name: String,
    pub description: Option<String>,
    pub kind: PetitionKind,
    pub requires_explanation: bool,
    pub approval_chain: Vec<Role>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Petition {
    pub id: PetitionId,
    pub request_number: String,
    pub owner_id: UserId,
    pub petition_type_id: PetitionTypeId,
    pub contact: ContactDetails,
    pub payload: PetitionPayload,
    pub explanation: Option<String>,
    pub status: PetitionStatus,
    /// 1-based chain position; 0 until submitted.
    pub current_approval_step: u32,
    pub lock_version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalStep {
    pub id: StepId,
    pub petition_id: PetitionId,
    pub step_order: u32,
    pub approver_role: Role,
    pub status: StepStatus,
    pub decision: Option<Decision>,
    pub approver_user_id: Option<UserId>,
    pub comments: Option<String>,
    pub signature_id: Option<SignatureId>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Immutable audit log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalAction {
    pub id: i64,
    pub petition_id: PetitionId,
    pub step_id: Option<StepId>,
    pub actor_id: UserId,
    pub action_type: ActionType,
    pub data: Option<serde_json::Value>,
    pub comments: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Metadata of one generated document version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredArtifact {
    pub id: ArtifactId,
    pub petition_id: PetitionId,
    pub version: u32,
    pub file_name: String,
    pub artifact_ref: String,
    pub size_bytes: u64,
    pub is_final: bool,
    pub generation_method: String,
    pub generated_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_tags_round_trip_through_from_str() {
        for status in PetitionStatus::ALL {
            assert_eq!(status.as_str().parse::<PetitionStatus>().unwrap(), *status);
        }
        assert_eq!(PetitionStatus::InReview.as_str(), "in_review");
    }

    #[test]
    fn test_unknown_tag_is_reported_with_kind() {
        let err = "supervisor".parse::<Role>().unwrap_err();
        assert_eq!(err.kind, "approver role");
        assert_eq!(err.value, "supervisor");
        assert_eq!(err.to_string(), "unknown approver role 'supervisor'");
    }

    #[test]
    fn test_status_groups() {
        assert!(PetitionStatus::Submitted.is_awaiting_decision());
        assert!(PetitionStatus::InReview.is_awaiting_decision());
        assert!(!PetitionStatus::Returned.is_awaiting_decision());
        assert!(PetitionStatus::Returned.is_editable());
        assert!(!PetitionStatus::Pending.is_editable());
        assert!(PetitionStatus::Rejected.is_terminal());
    }

    #[test]
    fn test_only_admin_is_superuser() {
        assert!(SystemRole::Admin.is_superuser());
        assert!(!SystemRole::Manager.is_superuser());
        assert!(SystemRole::Manager.sees_all_petitions());
        assert!(!SystemRole::Student.sees_all_petitions());
    }

    #[test]
    fn test_role_serializes_as_tag() {
        let json = serde_json::to_string(&vec![Role::Advisor, Role::Dean]).unwrap();
        assert_eq!(json, r#"["advisor","dean"]"#);
    }
}
