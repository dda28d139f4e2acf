//! Named blocks of the flat decision vector.
//!
//! The vector holds six state blocks of length `N` followed by two actuator
//! blocks of length `N - 1`:
//!
//! ```text
//! [ x | y | psi | v | cte | epsi | delta | a ]
//! ```
//!
//! Constraint rows use the same partition as the state blocks: row
//! `state(channel, t)` holds the dynamics residual of `channel` at step `t`,
//! or the initial-condition pin when `t == 0`.

use crate::error::MpcError;

/// Number of state channels.
pub const NUM_STATES: usize = 6;
/// Number of actuators.
pub const NUM_ACTUATORS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateChannel {
    X,
    Y,
    Psi,
    V,
    Cte,
    Epsi,
}

impl StateChannel {
    pub const ALL: [StateChannel; NUM_STATES] = [
        StateChannel::X,
        StateChannel::Y,
        StateChannel::Psi,
        StateChannel::V,
        StateChannel::Cte,
        StateChannel::Epsi,
    ];

    fn block(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Actuator {
    Steering,
    Acceleration,
}

impl Actuator {
    pub const ALL: [Actuator; NUM_ACTUATORS] = [Actuator::Steering, Actuator::Acceleration];

    fn block(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariableLayout {
    horizon: usize,
}

impl VariableLayout {
    pub fn new(horizon: usize) -> Result<Self, MpcError> {
        if horizon < 2 {
            return Err(MpcError::Config(format!(
                "horizon must be at least 2, got {horizon}"
            )));
        }
        Ok(Self { horizon })
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    /// Actuation steps in one horizon, `N - 1`.
    pub fn actuation_steps(&self) -> usize {
        self.horizon - 1
    }

    /// `6N + 2(N - 1)`
    pub fn num_variables(&self) -> usize {
        NUM_STATES * self.horizon + NUM_ACTUATORS * self.actuation_steps()
    }

    /// `6N`: one pin per channel plus `N - 1` dynamics residuals per channel.
    pub fn num_constraints(&self) -> usize {
        NUM_STATES * self.horizon
    }

    /// First index of the actuator blocks.
    pub fn actuator_offset(&self) -> usize {
        NUM_STATES * self.horizon
    }

    pub fn state(&self, channel: StateChannel, t: usize) -> usize {
        debug_assert!(t < self.horizon, "state step {t} outside horizon");
        channel.block() * self.horizon + t
    }

    pub fn actuator(&self, kind: Actuator, t: usize) -> usize {
        debug_assert!(t < self.actuation_steps(), "actuation step {t} outside horizon");
        self.actuator_offset() + kind.block() * self.actuation_steps() + t
    }

    /// Constraint row of `channel` at step `t`.
    pub fn constraint(&self, channel: StateChannel, t: usize) -> usize {
        self.state(channel, t)
    }

    pub fn is_actuator(&self, index: usize) -> bool {
        (self.actuator_offset()..self.num_variables()).contains(&index)
    }
}
