// Typed, per-kind petition payloads and the validation applied on create/edit.

use serde::{Deserialize, Serialize};

use super::types::{PetitionType, PetitionTypeId, UnknownVariant};

/// Closed set of payload shapes; each petition type selects one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PetitionKind {
    General,
    ChangeOfMajor,
}

impl PetitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PetitionKind::General => "general",
            PetitionKind::ChangeOfMajor => "change_of_major",
        }
    }
}

impl std::str::FromStr for PetitionKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "general" => Ok(PetitionKind::General),
            "change_of_major" => Ok(PetitionKind::ChangeOfMajor),
            other => Err(UnknownVariant {
                kind: "petition kind",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PetitionPayload {
    General {},
    ChangeOfMajor { from_major: String, to_major: String },
}

impl PetitionPayload {
    pub fn kind(&self) -> PetitionKind {
        match self {
            PetitionPayload::General {} => PetitionKind::General,
            PetitionPayload::ChangeOfMajor { .. } => PetitionKind::ChangeOfMajor,
        }
    }

    /// Type-specific required fields.
    fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if let PetitionPayload::ChangeOfMajor {
            from_major,
            to_major,
        } = self
        {
            if from_major.trim().is_empty() {
                missing.push("from_major");
            }
            if to_major.trim().is_empty() {
                missing.push("to_major");
            }
        }
        missing
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactDetails {
    pub student_number: String,
    pub phone: Option<String>,
    pub mailing_address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
}

/// Input of `create_draft`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPetition {
    pub petition_type_id: PetitionTypeId,
    pub contact: ContactDetails,
    pub payload: PetitionPayload,
    pub explanation: Option<String>,
}

/// Partial edit; `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PetitionUpdate {
    pub contact: Option<ContactDetails>,
    pub payload: Option<PetitionPayload>,
    pub explanation: Option<String>,
}

/// Checks a payload against its petition type. Returns a human-readable
/// reason on failure.
pub fn validate_against_type(
    petition_type: &PetitionType,
    contact: &ContactDetails,
    payload: &PetitionPayload,
    explanation: Option<&str>,
) -> Result<(), String> {
    if payload.kind() != petition_type.kind {
        return Err(format!(
            "payload kind '{}' does not match petition type '{}' ({})",
            payload.kind().as_str(),
            petition_type.name,
            petition_type.kind.as_str()
        ));
    }

    if contact.student_number.trim().is_empty() {
        return Err("student number is required".to_string());
    }

    let missing = payload.missing_fields();
    if !missing.is_empty() {
        return Err(format!("missing required fields: {}", missing.join(", ")));
    }

    let has_explanation = explanation.is_some_and(|e| !e.trim().is_empty());
    if petition_type.requires_explanation && !has_explanation {
        return Err(format!(
            "an explanation is required for '{}'",
            petition_type.name
        ));
    }

    Ok(())
}
