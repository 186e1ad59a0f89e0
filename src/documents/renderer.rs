use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::PathBuf;

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

use super::RenderError;
use crate::petitions::{ApprovalStep, Petition, PetitionPayload, PetitionType, StepStatus};

/// Consistent read of everything a document shows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PetitionSnapshot {
    pub petition: Petition,
    pub petition_type: PetitionType,
    pub steps: Vec<ApprovalStep>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedDocument {
    pub file_name: String,
    pub artifact_ref: String,
    pub size_bytes: u64,
    pub method: String,
}

/// The template engine. Treated as a black box: given a snapshot and the
/// version it must carry, produce the document.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait TemplateRenderer: Send + Sync {
    async fn render(
        &self,
        snapshot: &PetitionSnapshot,
        version: u32,
    ) -> Result<RenderedDocument, RenderError>;
}

/// Writes a plain-text summary per version into `output_dir`.
#[derive(Debug, Clone)]
pub struct FileTemplateRenderer {
    output_dir: PathBuf,
}

impl FileTemplateRenderer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    fn compose(snapshot: &PetitionSnapshot, version: u32) -> String {
        let petition = &snapshot.petition;
        let mut out = String::new();

        // Writing into a String cannot fail.
        let _ = writeln!(out, "{} {}", petition.request_number, snapshot.petition_type.name);
        let _ = writeln!(out, "version: {version}");
        let _ = writeln!(out, "status: {}", petition.status);
        let _ = writeln!(out, "student number: {}", petition.contact.student_number);
        if let PetitionPayload::ChangeOfMajor {
            from_major,
            to_major,
        } = &petition.payload
        {
            let _ = writeln!(out, "from major: {from_major}");
            let _ = writeln!(out, "to major: {to_major}");
        }
        if let Some(explanation) = &petition.explanation {
            let _ = writeln!(out, "explanation: {explanation}");
        }

        let _ = writeln!(out);
        for step in &snapshot.steps {
            let outcome = match step.status {
                StepStatus::Approved => "APPROVED",
                StepStatus::Rejected => "DISAPPROVED",
                StepStatus::Returned => "RETURNED",
                StepStatus::InReview => "IN REVIEW",
                StepStatus::Pending => "",
            };
            let signer = match (step.approver_user_id, step.signature_id) {
                (Some(user), Some(signature)) => format!(" signed by {user} (signature {signature})"),
                (Some(user), None) => format!(" by {user}"),
                _ => String::new(),
            };
            let _ = writeln!(
                out,
                "{}. {:<12} {}{}",
                step.step_order, step.approver_role, outcome, signer
            );
        }

        let comments: Vec<String> = snapshot
            .steps
            .iter()
            .filter_map(|s| s.comments.as_ref().map(|c| format!("{}: {c}", s.approver_role)))
            .collect();
        if !comments.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "comments: {}", comments.join(". "));
        }
        out
    }
}

#[async_trait]
impl TemplateRenderer for FileTemplateRenderer {
    async fn render(
        &self,
        snapshot: &PetitionSnapshot,
        version: u32,
    ) -> Result<RenderedDocument, RenderError> {
        tokio::fs::create_dir_all(&self.output_dir).await?;

        let file_name = format!("petition_{}_v{version}.txt", snapshot.petition.id);
        let path = self.output_dir.join(&file_name);
        let body = Self::compose(snapshot, version);
        tokio::fs::write(&path, body.as_bytes()).await?;

        Ok(RenderedDocument {
            file_name,
            artifact_ref: path.display().to_string(),
            size_bytes: body.len() as u64,
            method: "text".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::petitions::{
        ContactDetails, PetitionId, PetitionKind, PetitionStatus, PetitionTypeId, Role, StepId,
        UserId,
    };
    use chrono::Utc;

    fn snapshot() -> PetitionSnapshot {
        let now = Utc::now();
        PetitionSnapshot {
            petition: Petition {
                id: PetitionId(7),
                request_number: "PET-2026-00007".to_string(),
                owner_id: UserId(1),
                petition_type_id: PetitionTypeId(5),
                contact: ContactDetails {
                    student_number: "1234567".to_string(),
                    ..Default::default()
                },
                payload: PetitionPayload::ChangeOfMajor {
                    from_major: "Biology".to_string(),
                    to_major: "Chemistry".to_string(),
                },
                explanation: None,
                status: PetitionStatus::Pending,
                current_approval_step: 2,
                lock_version: 3,
                created_at: now,
                updated_at: now,
                submitted_at: Some(now),
                completed_at: None,
            },
            petition_type: PetitionType {
                id: PetitionTypeId(5),
                type_number: 5,
                name: "Change of Major".to_string(),
                description: None,
                kind: PetitionKind::ChangeOfMajor,
                requires_explanation: false,
                approval_chain: vec![Role::Advisor, Role::Dean],
            },
            steps: vec![
                ApprovalStep {
                    id: StepId(1),
                    petition_id: PetitionId(7),
                    step_order: 1,
                    approver_role: Role::Advisor,
                    status: StepStatus::Approved,
                    decision: None,
                    approver_user_id: Some(UserId(2)),
                    comments: Some("ok".to_string()),
                    signature_id: None,
                    assigned_at: Some(now),
                    reviewed_at: Some(now),
                    completed_at: Some(now),
                },
                ApprovalStep {
                    id: StepId(2),
                    petition_id: PetitionId(7),
                    step_order: 2,
                    approver_role: Role::Dean,
                    status: StepStatus::InReview,
                    decision: None,
                    approver_user_id: None,
                    comments: None,
                    signature_id: None,
                    assigned_at: Some(now),
                    reviewed_at: None,
                    completed_at: None,
                },
            ],
        }
    }

    #[tokio::test]
    async fn test_file_renderer_writes_versioned_file() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = FileTemplateRenderer::new(dir.path());

        let rendered = renderer.render(&snapshot(), 3).await.unwrap();

        assert_eq!(rendered.file_name, "petition_7_v3.txt");
        assert_eq!(rendered.method, "text");
        let body = tokio::fs::read_to_string(dir.path().join("petition_7_v3.txt"))
            .await
            .unwrap();
        assert_eq!(body.len() as u64, rendered.size_bytes);
        assert!(body.contains("to major: Chemistry"));
        assert!(body.contains("APPROVED by 2"));
        assert!(body.contains("comments: advisor: ok"));
    }
}
