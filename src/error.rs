use std::time::Duration;

use thiserror::Error;

use crate::nlp::SolveStatus;

/// Failures of a single control tick.
///
/// None of these are fatal to the control loop: each tick is independent and
/// the next telemetry message starts a fresh solve.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MpcError {
    #[error("invalid telemetry: {0}")]
    InputValidation(String),
    #[error("need at least {required} distinct waypoints to fit the reference, got {got}")]
    InsufficientData { required: usize, got: usize },
    #[error("solver did not converge ({status:?} after {iterations} iterations)")]
    SolverNonConvergence { status: SolveStatus, iterations: usize },
    #[error("solver exceeded its {budget:?} time budget without a usable iterate")]
    SolverTimeout { budget: Duration },
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl MpcError {
    /// Whether the error came from the solver rather than from the inputs.
    pub fn is_solver_failure(&self) -> bool {
        matches!(
            self,
            MpcError::SolverNonConvergence { .. } | MpcError::SolverTimeout { .. }
        )
    }
}
