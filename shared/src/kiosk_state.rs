//! Kiosk State Machine
//!
//! Level-triggered transitions driven by polling the device's kiosk flag.
//! A failed read never causes a transition; the last known state is kept.

/// Kiosk enforcement state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KioskState {
    #[default]
    Inactive,
    Active,
}

/// What one poll of the device flags produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagObservation {
    /// Backend reports kiosk mode on
    Enabled,
    /// Backend reports kiosk mode off (or has no record of the device)
    Disabled,
    /// Backend could not be read
    Unavailable,
}

impl From<bool> for FlagObservation {
    fn from(kiosk_mode: bool) -> Self {
        if kiosk_mode {
            FlagObservation::Enabled
        } else {
            FlagObservation::Disabled
        }
    }
}

/// Result of feeding one observation to the machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KioskTransition {
    /// Inactive -> Active: launch target, enable interception
    Activated,
    /// Active -> Inactive: disable interception, leave the app running
    Deactivated,
    /// No state change
    Unchanged,
}

/// The kiosk state machine
#[derive(Debug, Default)]
pub struct KioskStateMachine {
    state: KioskState,
    consecutive_read_failures: u32,
}

impl KioskStateMachine {
    /// Create a new state machine in the Inactive state
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current state
    pub fn state(&self) -> KioskState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == KioskState::Active
    }

    /// Number of flag reads in a row that failed
    pub fn consecutive_read_failures(&self) -> u32 {
        self.consecutive_read_failures
    }

    /// Process an observation and return the transition it caused
    pub fn observe(&mut self, observation: FlagObservation) -> KioskTransition {
        use KioskState::*;

        let next = match observation {
            FlagObservation::Unavailable => {
                self.consecutive_read_failures = self.consecutive_read_failures.saturating_add(1);
                return KioskTransition::Unchanged;
            }
            FlagObservation::Enabled => Active,
            FlagObservation::Disabled => Inactive,
        };
        self.consecutive_read_failures = 0;

        let transition = match (self.state, next) {
            (Inactive, Active) => KioskTransition::Activated,
            (Active, Inactive) => KioskTransition::Deactivated,
            _ => KioskTransition::Unchanged,
        };
        self.state = next;
        transition
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let fsm = KioskStateMachine::new();
        assert_eq!(fsm.state(), KioskState::Inactive);
        assert!(!fsm.is_active());
    }

    #[test]
    fn test_level_triggered_flow() {
        let mut fsm = KioskStateMachine::new();

        assert_eq!(fsm.observe(FlagObservation::Disabled), KioskTransition::Unchanged);
        assert_eq!(fsm.observe(FlagObservation::Enabled), KioskTransition::Activated);
        assert_eq!(fsm.observe(FlagObservation::Enabled), KioskTransition::Unchanged);
        assert_eq!(fsm.observe(FlagObservation::Disabled), KioskTransition::Deactivated);
        assert_eq!(fsm.observe(FlagObservation::Enabled), KioskTransition::Activated);
        assert!(fsm.is_active());
    }

    #[test]
    fn test_read_failure_retains_state() {
        let mut fsm = KioskStateMachine::new();
        fsm.observe(FlagObservation::Enabled);

        for expected in 1..=5 {
            assert_eq!(fsm.observe(FlagObservation::Unavailable), KioskTransition::Unchanged);
            assert_eq!(fsm.consecutive_read_failures(), expected);
            assert!(fsm.is_active());
        }

        fsm.observe(FlagObservation::Enabled);
        assert_eq!(fsm.consecutive_read_failures(), 0);
    }

    #[test]
    fn test_observation_from_flag() {
        assert_eq!(FlagObservation::from(true), FlagObservation::Enabled);
        assert_eq!(FlagObservation::from(false), FlagObservation::Disabled);
    }
}
