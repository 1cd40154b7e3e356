use super::super::error::ReviewError;
use super::super::findings::domain::FindingStatus;
use super::domain::ResolutionType;

/// Every way a finding's status can be changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionAction {
    Verify,
    UpdateFields,
    Dismiss,
    Escalate,
    RequestEvidence,
    SystemResolve,
    SystemReopen,
}

impl ResolutionAction {
    pub const fn label(self) -> &'static str {
        match self {
            ResolutionAction::Verify => "verify",
            ResolutionAction::UpdateFields => "update fields on",
            ResolutionAction::Dismiss => "dismiss",
            ResolutionAction::Escalate => "escalate",
            ResolutionAction::RequestEvidence => "request evidence for",
            ResolutionAction::SystemResolve => "auto-resolve",
            ResolutionAction::SystemReopen => "reopen",
        }
    }

    /// Reopening records the revised trigger data as a field diff.
    pub const fn resolution_type(self) -> ResolutionType {
        match self {
            ResolutionAction::Verify | ResolutionAction::SystemResolve => {
                ResolutionType::VerifiedNoChange
            }
            ResolutionAction::UpdateFields | ResolutionAction::SystemReopen => {
                ResolutionType::FieldUpdated
            }
            ResolutionAction::Dismiss => ResolutionType::Dismissed,
            ResolutionAction::Escalate => ResolutionType::Escalated,
            ResolutionAction::RequestEvidence => ResolutionType::ClientEvidenceRequested,
        }
    }

    pub const fn target_status(self) -> FindingStatus {
        match self {
            ResolutionAction::Verify | ResolutionAction::SystemResolve => {
                FindingStatus::ResolvedVerified
            }
            ResolutionAction::UpdateFields => FindingStatus::ResolvedFixed,
            ResolutionAction::Dismiss => FindingStatus::Dismissed,
            ResolutionAction::Escalate => FindingStatus::ResolvedEscalated,
            ResolutionAction::RequestEvidence => FindingStatus::InReview,
            ResolutionAction::SystemReopen => FindingStatus::Open,
        }
    }

    /// Reviewer actions that close a finding without sending it to a senior reviewer.
    pub const fn closes_without_escalation(self) -> bool {
        matches!(
            self,
            ResolutionAction::Verify | ResolutionAction::UpdateFields | ResolutionAction::Dismiss
        )
    }

    /// Escalated and dismissed findings are never reopened by reprocessing.
    pub const fn permits(self, from: FindingStatus) -> bool {
        match self {
            ResolutionAction::SystemReopen => matches!(
                from,
                FindingStatus::ResolvedVerified | FindingStatus::ResolvedFixed
            ),
            _ => !from.is_terminal(),
        }
    }
}

/// Resolve the status an action moves a finding to, or reject the transition.
pub fn plan_transition(
    action: ResolutionAction,
    from: FindingStatus,
) -> Result<FindingStatus, ReviewError> {
    if action.permits(from) {
        Ok(action.target_status())
    } else {
        Err(ReviewError::InvalidTransition {
            action: action.label(),
            from: from.label(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATUSES: [FindingStatus; 6] = [
        FindingStatus::Open,
        FindingStatus::InReview,
        FindingStatus::ResolvedVerified,
        FindingStatus::ResolvedFixed,
        FindingStatus::ResolvedEscalated,
        FindingStatus::Dismissed,
    ];

    #[test]
    fn reviewer_actions_only_leave_open_states() {
        for action in [
            ResolutionAction::Verify,
            ResolutionAction::UpdateFields,
            ResolutionAction::Dismiss,
            ResolutionAction::Escalate,
            ResolutionAction::RequestEvidence,
            ResolutionAction::SystemResolve,
        ] {
            for status in ALL_STATUSES {
                assert_eq!(
                    plan_transition(action, status).is_ok(),
                    !status.is_terminal(),
                    "{action:?} from {status:?}"
                );
            }
        }
    }

    #[test]
    fn reopen_is_limited_to_verified_and_fixed() {
        let allowed: Vec<_> = ALL_STATUSES
            .into_iter()
            .filter(|status| ResolutionAction::SystemReopen.permits(*status))
            .collect();
        assert_eq!(
            allowed,
            vec![FindingStatus::ResolvedVerified, FindingStatus::ResolvedFixed]
        );
    }

    #[test]
    fn request_evidence_keeps_the_finding_open() {
        assert_eq!(
            plan_transition(ResolutionAction::RequestEvidence, FindingStatus::Open)
                .expect("allowed"),
            FindingStatus::InReview
        );
        assert!(!FindingStatus::InReview.is_terminal());
    }

    #[test]
    fn rejection_names_action_and_status() {
        let err = plan_transition(ResolutionAction::Dismiss, FindingStatus::ResolvedFixed)
            .expect_err("terminal");
        assert_eq!(err.to_string(), "cannot dismiss a finding that is resolved_fixed");
    }
}
