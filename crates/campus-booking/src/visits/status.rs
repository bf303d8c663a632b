use serde::{Deserialize, Serialize};

/// Planning state of a visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    BeingPlanned,
    Rejected,
    Planned,
    Confirmed,
    Reminded,
    Executed,
    Evaluated,
    Cancelled,
    NeedsAttention,
    AutoassignFailed,
    PlannedNoBooking,
}

impl WorkflowStatus {
    pub const fn code(self) -> u8 {
        match self {
            WorkflowStatus::BeingPlanned => 0,
            WorkflowStatus::Rejected => 1,
            WorkflowStatus::Planned => 2,
            WorkflowStatus::Confirmed => 3,
            WorkflowStatus::Reminded => 4,
            WorkflowStatus::Executed => 5,
            WorkflowStatus::Evaluated => 6,
            WorkflowStatus::Cancelled => 7,
            WorkflowStatus::NeedsAttention => 8,
            WorkflowStatus::AutoassignFailed => 9,
            WorkflowStatus::PlannedNoBooking => 10,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            WorkflowStatus::BeingPlanned => "Being planned",
            WorkflowStatus::Rejected => "Rejected",
            WorkflowStatus::Planned => "Planned (all roles assigned)",
            WorkflowStatus::Confirmed => "Confirmed",
            WorkflowStatus::Reminded => "Reminded",
            WorkflowStatus::Executed => "Executed",
            WorkflowStatus::Evaluated => "Evaluated",
            WorkflowStatus::Cancelled => "Cancelled",
            WorkflowStatus::NeedsAttention => "Needs attention",
            WorkflowStatus::AutoassignFailed => "Automatic assignment failed",
            WorkflowStatus::PlannedNoBooking => "Planned (no bookings)",
        }
    }

    pub const fn ordered() -> [WorkflowStatus; 11] {
        [
            WorkflowStatus::BeingPlanned,
            WorkflowStatus::Rejected,
            WorkflowStatus::Planned,
            WorkflowStatus::Confirmed,
            WorkflowStatus::Reminded,
            WorkflowStatus::Executed,
            WorkflowStatus::Evaluated,
            WorkflowStatus::Cancelled,
            WorkflowStatus::NeedsAttention,
            WorkflowStatus::AutoassignFailed,
            WorkflowStatus::PlannedNoBooking,
        ]
    }

    /// Statuses reachable in one step. Cancelled is terminal.
    pub const fn allowed_transitions(self) -> &'static [WorkflowStatus] {
        use WorkflowStatus::*;
        match self {
            BeingPlanned => &[Planned, PlannedNoBooking, Cancelled, Rejected],
            Rejected => &[BeingPlanned, Cancelled],
            Planned => &[Confirmed, Reminded, Cancelled],
            PlannedNoBooking => &[BeingPlanned, Planned, Cancelled],
            Confirmed => &[Reminded, Executed, Cancelled],
            Reminded => &[Executed, Cancelled],
            Executed => &[Evaluated, Cancelled],
            Evaluated => &[Cancelled],
            Cancelled => &[],
            NeedsAttention => &[BeingPlanned, Planned, Cancelled],
            AutoassignFailed => &[BeingPlanned, Planned, Cancelled],
        }
    }

    pub fn can_transition_to(self, next: WorkflowStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    pub const fn is_active(self) -> bool {
        !matches!(self, WorkflowStatus::Cancelled | WorkflowStatus::Rejected)
    }

    pub const fn is_being_planned(self) -> bool {
        matches!(
            self,
            WorkflowStatus::BeingPlanned
                | WorkflowStatus::AutoassignFailed
                | WorkflowStatus::Rejected
        )
    }

    pub const fn is_planned(self) -> bool {
        matches!(
            self,
            WorkflowStatus::Planned
                | WorkflowStatus::PlannedNoBooking
                | WorkflowStatus::Confirmed
                | WorkflowStatus::Reminded
        )
    }

    pub const fn is_held(self) -> bool {
        matches!(self, WorkflowStatus::Executed | WorkflowStatus::Evaluated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_is_terminal() {
        assert!(WorkflowStatus::Cancelled.allowed_transitions().is_empty());
        for status in WorkflowStatus::ordered() {
            if status != WorkflowStatus::Cancelled {
                assert!(
                    status.can_transition_to(WorkflowStatus::Cancelled),
                    "{status:?} cannot be cancelled"
                );
            }
        }
    }

    #[test]
    fn planned_flows_forward_only() {
        assert!(WorkflowStatus::Planned.can_transition_to(WorkflowStatus::Confirmed));
        assert!(!WorkflowStatus::Planned.can_transition_to(WorkflowStatus::BeingPlanned));
        assert!(!WorkflowStatus::Evaluated.can_transition_to(WorkflowStatus::Executed));
    }

    #[test]
    fn codes_are_unique() {
        let mut codes: Vec<u8> = WorkflowStatus::ordered().iter().map(|s| s.code()).collect();
        codes.dedup();
        assert_eq!(codes, (0..=10).collect::<Vec<u8>>());
    }

    #[test]
    fn groupings() {
        assert!(WorkflowStatus::AutoassignFailed.is_being_planned());
        assert!(WorkflowStatus::PlannedNoBooking.is_planned());
        assert!(!WorkflowStatus::Rejected.is_active());
        assert!(WorkflowStatus::Evaluated.is_held());
    }
}
