//! Shared setup for the integration tests: a migrated temp-file SQLite
//! database seeded with users, approver assignments, signatures and
//! petition types.
#![allow(dead_code)]

use petition_flow::config::DatabaseConfig;
use petition_flow::documents::DocumentJob;
use petition_flow::petitions::{ContactDetails, NewPetition, PetitionPayload, PetitionTypeId, Role};
use petition_flow::{ApprovalEngine, DatabaseManager, DocumentQueue, PetitionId, UserId};
use sqlx::SqlitePool;
use tempfile::TempDir;
use tokio::sync::mpsc;

pub const STUDENT: UserId = UserId(1);
pub const ADVISOR: UserId = UserId(2);
pub const CHAIR: UserId = UserId(3);
pub const DEAN: UserId = UserId(4);
pub const ADMIN: UserId = UserId(5);
pub const MANAGER: UserId = UserId(6);
pub const OUTSIDER: UserId = UserId(7);
/// A student with no signature on file.
pub const UNSIGNED: UserId = UserId(8);
/// Holds the advisor role but has no signature on file.
pub const UNSIGNED_ADVISOR: UserId = UserId(9);
/// A second advisor, used for races.
pub const ADVISOR_TWO: UserId = UserId(10);

/// Seeded by the migration: General Petition, explanation required.
pub const GENERAL: PetitionTypeId = PetitionTypeId(1);
/// Seeded by the migration: type_number 5, chain [advisor, chairperson, dean].
pub const CHANGE_OF_MAJOR: PetitionTypeId = PetitionTypeId(2);

pub struct TestDb {
    // Keeps the database file alive.
    pub dir: TempDir,
    pub manager: DatabaseManager,
}

impl TestDb {
    pub async fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let config = DatabaseConfig {
            url: dir.path().join("petitions.db").display().to_string(),
            max_connections: 8,
            auto_migrate: true,
            busy_timeout_ms: 5_000,
        };
        let manager = DatabaseManager::new(&config).await.expect("open database");
        seed(manager.pool()).await;
        Self { dir, manager }
    }

    pub fn pool(&self) -> SqlitePool {
        self.manager.pool().clone()
    }

    /// Engine whose document jobs are dropped.
    pub fn engine(&self) -> ApprovalEngine {
        ApprovalEngine::with_sql_collaborators(self.pool(), DocumentQueue::disabled())
    }

    /// Engine whose document jobs can be inspected.
    pub fn engine_with_jobs(&self) -> (ApprovalEngine, mpsc::Receiver<DocumentJob>) {
        let (queue, receiver) = DocumentQueue::channel(16);
        (
            ApprovalEngine::with_sql_collaborators(self.pool(), queue),
            receiver,
        )
    }

    /// Adds a general petition type (no explanation required) with the given chain.
    pub async fn define_chain(&self, type_number: u32, chain: &[Role]) -> PetitionTypeId {
        let chain = serde_json::to_string(chain).expect("chain json");
        let result = sqlx::query(
            "INSERT INTO petition_types (type_number, type_name, kind, requires_explanation, approval_chain) \
             VALUES (?1, ?2, 'general', 0, ?3)",
        )
        .bind(i64::from(type_number))
        .bind(format!("Test type {type_number}"))
        .bind(chain)
        .execute(self.manager.pool())
        .await
        .expect("insert petition type");
        PetitionTypeId(result.last_insert_rowid())
    }

    pub async fn deactivate_assignment(&self, user: UserId, role: Role) {
        sqlx::query(
            "UPDATE approver_assignments SET is_active = 0 WHERE user_id = ?1 AND approver_role = ?2",
        )
        .bind(user.0)
        .bind(role.as_str())
        .execute(self.manager.pool())
        .await
        .expect("deactivate assignment");
    }

    /// Creates and submits a petition of `type_id` owned by `STUDENT`.
    pub async fn submitted(&self, engine: &ApprovalEngine, type_id: PetitionTypeId) -> PetitionId {
        let draft = if type_id == CHANGE_OF_MAJOR {
            change_of_major_draft()
        } else {
            general_draft(type_id)
        };
        let petition = engine
            .create_draft(STUDENT, draft)
            .await
            .expect("create draft");
        engine.submit(petition.id, STUDENT).await.expect("submit");
        petition.id
    }

    pub async fn in_review_count(&self, petition_id: PetitionId) -> i64 {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM approval_steps WHERE petition_id = ?1 AND status = 'in_review'",
        )
        .bind(petition_id.0)
        .fetch_one(self.manager.pool())
        .await
        .expect("count in_review steps")
    }
}

pub fn contact() -> ContactDetails {
    ContactDetails {
        student_number: "2024-00042".to_string(),
        phone: Some("555-0100".to_string()),
        city: Some("Springfield".to_string()),
        ..ContactDetails::default()
    }
}

pub fn general_draft(type_id: PetitionTypeId) -> NewPetition {
    NewPetition {
        petition_type_id: type_id,
        contact: contact(),
        payload: PetitionPayload::General {},
        explanation: Some("Requesting a late withdrawal".to_string()),
    }
}

pub fn change_of_major_draft() -> NewPetition {
    NewPetition {
        petition_type_id: CHANGE_OF_MAJOR,
        contact: contact(),
        payload: PetitionPayload::ChangeOfMajor {
            from_major: "Biology".to_string(),
            to_major: "Chemistry".to_string(),
        },
        explanation: None,
    }
}

async fn seed(pool: &SqlitePool) {
    let users: &[(i64, &str, &str)] = &[
        (1, "Sam Student", "student"),
        (2, "Avery Advisor", "student"),
        (3, "Casey Chair", "student"),
        (4, "Dana Dean", "student"),
        (5, "Alex Admin", "admin"),
        (6, "Morgan Manager", "manager"),
        (7, "Owen Outsider", "student"),
        (8, "Uma Unsigned", "student"),
        (9, "Noel Newadvisor", "student"),
        (10, "Riley Advisor", "student"),
    ];
    for (id, name, role) in users {
        sqlx::query("INSERT INTO users (id, name, email, system_role) VALUES (?1, ?2, ?3, ?4)")
            .bind(id)
            .bind(name)
            .bind(format!("user{id}@example.edu"))
            .bind(role)
            .execute(pool)
            .await
            .expect("seed user");
    }

    let assignments: &[(i64, &str)] = &[
        (2, "advisor"),
        (3, "chairperson"),
        (4, "dean"),
        (9, "advisor"),
        (10, "advisor"),
    ];
    for (user, role) in assignments {
        sqlx::query(
            "INSERT INTO approver_assignments (user_id, approver_role, department) VALUES (?1, ?2, 'Sciences')",
        )
        .bind(user)
        .bind(role)
        .execute(pool)
        .await
        .expect("seed assignment");
    }

    for user in [1_i64, 2, 3, 4, 5, 6, 7, 10] {
        sqlx::query("INSERT INTO signature_images (user_id, file_size) VALUES (?1, 2048)")
            .bind(user)
            .execute(pool)
            .await
            .expect("seed signature");
    }
}
