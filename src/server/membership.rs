//! Room membership state machine
//!
//! Pure transition table, no I/O. The chat service looks up the current
//! state in the room directory, asks [`transition`] what to do and then
//! applies the side effects itself.

use serde::{Deserialize, Serialize};

/// Membership of one user in one room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MembershipState {
    /// Never joined
    #[default]
    None,
    /// Participating
    Active,
    /// Left permanently, may rejoin
    Inactive,
}

/// Input to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipEvent {
    Join,
    Leave,
}

/// Result of applying an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: MembershipState,
    /// A join announcement must be recorded and broadcast
    pub emits_join: bool,
    /// A leave announcement must be recorded and broadcast
    pub emits_leave: bool,
}

impl Transition {
    /// Change to the room's participant count
    pub fn participant_delta(&self, from: MembershipState) -> i8 {
        match (from, self.next) {
            (MembershipState::Active, MembershipState::Active) => 0,
            (_, MembershipState::Active) => 1,
            (MembershipState::Active, _) => -1,
            _ => 0,
        }
    }
}

/// Transition table. `None` means the event is not valid in this state.
pub fn transition(state: MembershipState, event: MembershipEvent) -> Option<Transition> {
    use MembershipEvent::*;
    use MembershipState::{Active, Inactive};

    match (state, event) {
        (MembershipState::None, Join) | (Inactive, Join) => Some(Transition {
            next: Active,
            emits_join: true,
            emits_leave: false,
        }),
        (Active, Join) => Some(Transition {
            next: Active,
            emits_join: false,
            emits_leave: false,
        }),
        (Active, Leave) => Some(Transition {
            next: Inactive,
            emits_join: false,
            emits_leave: true,
        }),
        (MembershipState::None, Leave) | (Inactive, Leave) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_join_emits_once() {
        let t = transition(MembershipState::None, MembershipEvent::Join).unwrap();
        assert_eq!(t.next, MembershipState::Active);
        assert!(t.emits_join);
        assert_eq!(t.participant_delta(MembershipState::None), 1);
    }

    #[test]
    fn test_rejoin_while_active_is_noop() {
        let t = transition(MembershipState::Active, MembershipEvent::Join).unwrap();
        assert_eq!(t.next, MembershipState::Active);
        assert!(!t.emits_join);
        assert!(!t.emits_leave);
        assert_eq!(t.participant_delta(MembershipState::Active), 0);
    }

    #[test]
    fn test_rejoin_while_inactive_emits_once() {
        let t = transition(MembershipState::Inactive, MembershipEvent::Join).unwrap();
        assert_eq!(t.next, MembershipState::Active);
        assert!(t.emits_join);
        assert_eq!(t.participant_delta(MembershipState::Inactive), 1);
    }

    #[test]
    fn test_leave() {
        let t = transition(MembershipState::Active, MembershipEvent::Leave).unwrap();
        assert_eq!(t.next, MembershipState::Inactive);
        assert!(t.emits_leave);
        assert_eq!(t.participant_delta(MembershipState::Active), -1);

        assert!(transition(MembershipState::None, MembershipEvent::Leave).is_none());
        assert!(transition(MembershipState::Inactive, MembershipEvent::Leave).is_none());
    }
}
