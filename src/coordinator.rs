//! Starts and stops event sources when the host toggles event reporting.
//!
//! Evaluated from the main loop only, so subsystem start/stop never races
//! the register handlers running there.

/// Whether the event sources are running.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CoordinatorState {
    /// Sampling and input interrupts off
    #[default]
    Inactive,
    /// Sampling and input interrupts on
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Transition {
    /// Enable input interrupts, start sampling.
    Activate,
    /// Disable input interrupts, stop sampling, cancel every pulse train.
    Deactivate,
}

/// Last acted-upon value of the events-enabled flag.
#[derive(Debug, Default)]
pub struct Coordinator {
    state: CoordinatorState,
}

impl Coordinator {
    /// Creates an inactive coordinator.
    pub const fn new() -> Self {
        Self {
            state: CoordinatorState::Inactive,
        }
    }

    /// State after the last transition carried out.
    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    /// Compares the cached state with the flag; returns the transition to
    /// carry out, if any.
    pub fn evaluate(&mut self, events_enabled: bool) -> Option<Transition> {
        match (self.state, events_enabled) {
            (CoordinatorState::Inactive, true) => {
                self.state = CoordinatorState::Active;
                Some(Transition::Activate)
            }
            (CoordinatorState::Active, false) => {
                self.state = CoordinatorState::Inactive;
                Some(Transition::Deactivate)
            }
            _ => None,
        }
    }

    /// Back to inactive, without a transition.
    pub fn reset(&mut self) {
        self.state = CoordinatorState::Inactive;
    }
}
