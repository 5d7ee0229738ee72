// Write permissions for a mapping row, by task role and current status.
// A missing role or status is permissive; the backend re-checks every write.

use super::status::{in_reviewed_state, MappingStatus, Role};

pub fn is_status_selection_disabled(role: Option<Role>, status: Option<MappingStatus>) -> bool {
    match (role, status) {
        (Some(Role::Author), Some(status)) => in_reviewed_state(status),
        (Some(Role::Review), Some(status)) => {
            matches!(status, MappingStatus::Unmapped | MappingStatus::Draft)
        }
        _ => false,
    }
}

/// Target, relationship and no-map edits. Rows become read-only once they
/// enter active review, and reviewers never edit content.
pub fn is_edit_disabled(role: Option<Role>, status: Option<MappingStatus>) -> bool {
    role == Some(Role::Review) || status.is_some_and(in_reviewed_state)
}

/// Only the role that owns the row's current stage may flag it.
pub fn is_flagging_disabled(role: Option<Role>, status: Option<MappingStatus>) -> bool {
    match (role, status) {
        (Some(Role::Author), Some(status)) => status.is_review_status(),
        (Some(Role::Review), Some(status)) => status.is_author_status(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use MappingStatus::*;

    #[test]
    fn test_status_selection() {
        assert!(!is_status_selection_disabled(Some(Role::Author), Some(Mapped)));
        assert!(!is_status_selection_disabled(Some(Role::Author), Some(Rejected)));
        assert!(is_status_selection_disabled(Some(Role::Author), Some(InReview)));
        assert!(is_status_selection_disabled(Some(Role::Author), Some(Accepted)));

        assert!(is_status_selection_disabled(Some(Role::Review), Some(Unmapped)));
        assert!(is_status_selection_disabled(Some(Role::Review), Some(Draft)));
        assert!(!is_status_selection_disabled(Some(Role::Review), Some(Mapped)));
    }

    #[test]
    fn test_missing_context_is_permissive() {
        assert!(!is_status_selection_disabled(None, Some(Accepted)));
        assert!(!is_status_selection_disabled(Some(Role::Review), None));
        assert!(!is_flagging_disabled(None, None));
        assert!(!is_edit_disabled(None, None));
    }

    #[test]
    fn test_edit() {
        assert!(is_edit_disabled(Some(Role::Review), Some(Mapped)));
        assert!(is_edit_disabled(Some(Role::Review), None));
        assert!(!is_edit_disabled(Some(Role::Author), Some(Draft)));
        assert!(!is_edit_disabled(Some(Role::Author), Some(Rejected)));
        assert!(is_edit_disabled(Some(Role::Author), Some(InReview)));
        assert!(is_edit_disabled(Some(Role::Author), Some(Accepted)));
    }

    #[test]
    fn test_flagging() {
        assert!(is_flagging_disabled(Some(Role::Author), Some(InReview)));
        assert!(is_flagging_disabled(Some(Role::Author), Some(Rejected)));
        assert!(!is_flagging_disabled(Some(Role::Author), Some(Draft)));
        assert!(!is_flagging_disabled(Some(Role::Review), Some(Accepted)));
        assert!(is_flagging_disabled(Some(Role::Review), Some(Mapped)));
    }
}
