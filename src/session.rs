//! Per-vehicle control session.
//!
//! A session processes ticks strictly one after another (`&mut self`), so at
//! most one solve is in flight per vehicle. Separate vehicles get separate
//! sessions and share nothing but the tuning.

use log::{debug, info, warn};

use crate::config::FallbackPolicy;
use crate::controller::{ControlOutput, MpcController};
use crate::error::MpcError;
use crate::model::ActuatorCommand;
use crate::nlp::NlpSolver;
use crate::protocol::{Frame, MANUAL_FRAME, SteerMessage, Telemetry, decode_frame};
use crate::solver::AugLagSolver;

/// What a tick produced.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Planned(ControlOutput),
    /// The solver failed; `command` was chosen by the fallback policy.
    Fallback {
        command: ActuatorCommand,
        error: MpcError,
    },
    /// Unusable input; nothing is sent for this tick.
    Skipped(MpcError),
}

impl TickOutcome {
    pub fn command(&self) -> Option<ActuatorCommand> {
        match self {
            TickOutcome::Planned(output) => Some(output.command),
            TickOutcome::Fallback { command, .. } => Some(*command),
            TickOutcome::Skipped(_) => None,
        }
    }

    pub fn to_message(&self) -> Option<SteerMessage> {
        match self {
            TickOutcome::Planned(output) => Some(SteerMessage::new(
                &output.command,
                &output.predicted,
                &output.reference,
            )),
            TickOutcome::Fallback { command, .. } => Some(SteerMessage::new(command, &[], &[])),
            TickOutcome::Skipped(_) => None,
        }
    }
}

#[derive(Debug)]
pub struct Session<S = AugLagSolver> {
    controller: MpcController<S>,
    last_command: Option<ActuatorCommand>,
    ticks: u64,
    manual: bool,
}

impl<S: NlpSolver> Session<S> {
    pub fn new(controller: MpcController<S>) -> Self {
        Self {
            controller,
            last_command: None,
            ticks: 0,
            manual: false,
        }
    }

    pub fn last_command(&self) -> Option<ActuatorCommand> {
        self.last_command
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Whether the last frame put the vehicle under manual control.
    pub fn is_manual(&self) -> bool {
        self.manual
    }

    fn set_manual(&mut self, manual: bool) {
        if manual != self.manual {
            if manual {
                info!("vehicle switched to manual control");
            } else {
                info!("vehicle back under autonomous control");
            }
            self.manual = manual;
        }
    }

    /// Forgets the previous command, as after a simulator reconnect.
    pub fn reset(&mut self) {
        self.last_command = None;
    }

    pub fn tick(&mut self, telemetry: &Telemetry) -> TickOutcome {
        self.ticks += 1;
        let outcome = match self.controller.step(telemetry) {
            Ok(output) => TickOutcome::Planned(output),
            Err(error) if error.is_solver_failure() => {
                let command = self.fallback_command();
                warn!(
                    "tick {}: {error}; sending {:?} fallback {command:?}",
                    self.ticks,
                    self.controller.config().fallback
                );
                TickOutcome::Fallback { command, error }
            }
            Err(error) => {
                warn!("tick {}: skipped, {error}", self.ticks);
                TickOutcome::Skipped(error)
            }
        };
        if let Some(command) = outcome.command() {
            self.last_command = Some(command);
        }
        outcome
    }

    pub fn fallback_command(&self) -> ActuatorCommand {
        let previous = self.last_command.unwrap_or_default();
        match self.controller.config().fallback {
            FallbackPolicy::Hold => previous,
            FallbackPolicy::Brake => ActuatorCommand {
                steering: previous.steering,
                throttle: -1.0,
            },
            FallbackPolicy::Neutral => ActuatorCommand::neutral(),
        }
    }

    /// Handles one incoming frame and returns the reply, if any.
    pub fn handle_frame(&mut self, line: &str) -> Option<String> {
        let frame = match decode_frame(line) {
            Ok(Some(frame)) => frame,
            Ok(None) => return None,
            Err(e) => {
                warn!("dropping frame: {e}");
                return None;
            }
        };

        match frame {
            Frame::Manual => {
                self.set_manual(true);
                Some(MANUAL_FRAME.to_string())
            }
            Frame::Event { name, data } if name == "telemetry" => {
                self.set_manual(false);
                let telemetry = match Telemetry::from_value(data) {
                    Ok(telemetry) => telemetry,
                    Err(e) => {
                        self.ticks += 1;
                        warn!("tick {}: skipped, {e}", self.ticks);
                        return None;
                    }
                };
                self.tick(&telemetry).to_message().map(|m| m.to_frame())
            }
            Frame::Event { name, .. } if name == "reset" => {
                info!("session reset");
                self.reset();
                None
            }
            Frame::Event { name, .. } => {
                debug!("ignoring event {name:?}");
                None
            }
        }
    }
}
