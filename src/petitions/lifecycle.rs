// Petition lifecycle rules
//
//   draft --submit--> submitted
//   submitted/pending/in_review --approve--> pending(step+1) | approved
//   submitted/pending/in_review --reject--> rejected
//   submitted/pending/in_review --return--> returned
//   returned --resubmit--> pending (same step)

use thiserror::Error;

use super::types::PetitionStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Submit,
    Approve,
    Reject,
    Return,
    Resubmit,
    Edit,
}

impl Transition {
    pub fn name(&self) -> &'static str {
        match self {
            Transition::Submit => "submit",
            Transition::Approve => "approve",
            Transition::Reject => "reject",
            Transition::Return => "return",
            Transition::Resubmit => "resubmit",
            Transition::Edit => "edit",
        }
    }

    pub fn permitted_from(&self, status: PetitionStatus) -> bool {
        match self {
            Transition::Submit => status == PetitionStatus::Draft,
            Transition::Approve | Transition::Reject | Transition::Return => {
                status.is_awaiting_decision()
            }
            Transition::Resubmit => status == PetitionStatus::Returned,
            Transition::Edit => status.is_editable(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot {} a petition that is {status}", .transition.name())]
pub struct LifecycleViolation {
    pub transition: Transition,
    pub status: PetitionStatus,
}

pub fn ensure_permitted(
    status: PetitionStatus,
    transition: Transition,
) -> Result<(), LifecycleViolation> {
    if transition.permitted_from(status) {
        Ok(())
    } else {
        Err(LifecycleViolation { transition, status })
    }
}

/// Where an approval at `current` leads in a chain of `chain_len` steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAdvance {
    Next(u32),
    Complete,
}

pub fn next_step(current: u32, chain_len: u32) -> StepAdvance {
    if current >= chain_len {
        StepAdvance::Complete
    } else {
        StepAdvance::Next(current + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_only_from_draft() {
        for status in PetitionStatus::ALL {
            let permitted = ensure_permitted(*status, Transition::Submit).is_ok();
            assert_eq!(permitted, *status == PetitionStatus::Draft, "{status}");
        }
    }

    #[test]
    fn test_decisions_only_while_awaiting() {
        for transition in [Transition::Approve, Transition::Reject, Transition::Return] {
            assert!(ensure_permitted(PetitionStatus::Submitted, transition).is_ok());
            assert!(ensure_permitted(PetitionStatus::Pending, transition).is_ok());
            assert!(ensure_permitted(PetitionStatus::InReview, transition).is_ok());
            assert!(ensure_permitted(PetitionStatus::Draft, transition).is_err());
            assert!(ensure_permitted(PetitionStatus::Returned, transition).is_err());
            assert!(ensure_permitted(PetitionStatus::Approved, transition).is_err());
            assert!(ensure_permitted(PetitionStatus::Rejected, transition).is_err());
        }
    }

    #[test]
    fn test_resubmit_only_when_returned() {
        assert!(ensure_permitted(PetitionStatus::Returned, Transition::Resubmit).is_ok());
        assert!(ensure_permitted(PetitionStatus::Pending, Transition::Resubmit).is_err());
    }

    #[test]
    fn test_violation_message() {
        let err = ensure_permitted(PetitionStatus::Draft, Transition::Approve).unwrap_err();
        assert_eq!(err.to_string(), "cannot approve a petition that is draft");
    }

    #[test]
    fn test_next_step() {
        assert_eq!(next_step(1, 3), StepAdvance::Next(2));
        assert_eq!(next_step(2, 3), StepAdvance::Next(3));
        assert_eq!(next_step(3, 3), StepAdvance::Complete);
        assert_eq!(next_step(1, 1), StepAdvance::Complete);
    }
}
