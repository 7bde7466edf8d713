use serde::{Deserialize, Serialize};

/// Valve state machine states (§3, §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValveState {
    Closed,
    Opening,
    Open,
    Closing,
    Fault,
    ManualOverride,
}

impl ValveState {
    /// Legal transitions per §4.8, used both by the dispatcher and by the
    /// property test asserting every observed state is reachable from
    /// CLOSED (§8).
    pub fn can_transition_to(self, next: ValveState) -> bool {
        use ValveState::*;
        match (self, next) {
            (Closed, Opening) => true,
            (Opening, Open) | (Opening, Fault) => true,
            (Open, Closing) => true,
            (Closing, Closed) | (Closing, Fault) => true,
            (_, ManualOverride) if self != Fault => true,
            (ManualOverride, Closed) => true,
            (Fault, Closed) => true, // operator acknowledgement
            _ => false,
        }
    }
}

/// A stable valve identity owned exclusively by the dispatcher (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Valve {
    pub valve_id: String,
    pub zone_id: String,
    pub state: ValveState,
}

impl Valve {
    pub fn new(valve_id: impl Into<String>, zone_id: impl Into<String>) -> Self {
        Self { valve_id: valve_id.into(), zone_id: zone_id.into(), state: ValveState::Closed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ValveState::*;

    #[test]
    fn happy_path_transitions_are_legal() {
        assert!(Closed.can_transition_to(Opening));
        assert!(Opening.can_transition_to(Open));
        assert!(Open.can_transition_to(Closing));
        assert!(Closing.can_transition_to(Closed));
    }

    #[test]
    fn fault_requires_operator_acknowledgement() {
        assert!(Fault.can_transition_to(Closed));
        assert!(!Fault.can_transition_to(Opening));
        assert!(!Fault.can_transition_to(ManualOverride));
    }

    #[test]
    fn manual_override_reachable_from_any_non_fault_state() {
        assert!(Closed.can_transition_to(ManualOverride));
        assert!(Open.can_transition_to(ManualOverride));
        assert!(ManualOverride.can_transition_to(Closed));
    }

    #[test]
    fn no_automatic_open_from_fault() {
        assert!(!Fault.can_transition_to(Open));
        assert!(!Fault.can_transition_to(Opening));
    }
}
