//! Receding-horizon path following for a kinematic bicycle.
//!
//! Each tick fits a polynomial to the upcoming waypoints in the vehicle frame,
//! optimises steering and acceleration over a short horizon and applies the
//! first step of the plan.

pub mod adapter;
pub mod config;
pub mod controller;
pub mod error;
pub mod layout;
pub mod model;
pub mod nlp;
pub mod penalty;
pub mod polynomial;
pub mod problem;
pub mod protocol;
pub mod session;
pub mod solver;
pub mod transform;

mod auglag;

pub use config::{CostWeights, FallbackPolicy, MpcConfig, SteeringConvention};
pub use controller::{ControlOutput, MpcController};
pub use error::MpcError;
pub use model::{Actuation, ActuatorCommand, KinematicBicycle, VehicleState};
pub use nlp::{NlpProblem, NlpSolver, SolveStatus};
pub use polynomial::ReferencePolynomial;
pub use problem::MpcProblem;
pub use protocol::Telemetry;
pub use session::{Session, TickOutcome};
pub use solver::{AugLagSolver, SolverSettings};
