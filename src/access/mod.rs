// Authorization against the approver directory and signature lookups.
//
// The engine consumes two read-only collaborators: who holds which approver
// role, and whether a user has a signature on file. Both are traits so the
// engine can be driven by the SQL-backed implementations here or by any
// other directory.

pub mod directory;
pub mod signatures;

use std::collections::HashSet;

use crate::petitions::{Role, SystemRole};

pub use directory::{ApproverDirectory, DirectoryError, SqlApproverDirectory};
pub use signatures::{SignatureError, SignatureStore, SqlSignatureStore};

#[cfg(any(test, feature = "testing"))]
pub use directory::MockApproverDirectory;
#[cfg(any(test, feature = "testing"))]
pub use signatures::MockSignatureStore;

/// The single authorization predicate for step decisions: the user holds an
/// active assignment for `required`, or is an administrator.
pub fn may_decide(system_role: Option<SystemRole>, held: &HashSet<Role>, required: Role) -> bool {
    system_role.is_some_and(|role| role.is_superuser()) || held.contains(&required)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_holder_of_required_role_may_decide() {
        let held = HashSet::from([Role::Advisor]);
        assert!(may_decide(Some(SystemRole::Student), &held, Role::Advisor));
        assert!(!may_decide(Some(SystemRole::Student), &held, Role::Dean));
    }

    #[test]
    fn test_admin_may_decide_without_assignment() {
        assert!(may_decide(Some(SystemRole::Admin), &HashSet::new(), Role::Provost));
    }

    #[test]
    fn test_manager_is_not_a_superuser() {
        assert!(!may_decide(Some(SystemRole::Manager), &HashSet::new(), Role::Dean));
    }

    #[test]
    fn test_unknown_user_needs_an_assignment() {
        assert!(!may_decide(None, &HashSet::new(), Role::Advisor));
        assert!(may_decide(None, &HashSet::from([Role::Advisor]), Role::Advisor));
    }
}
