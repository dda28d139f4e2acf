use std::time::Instant;

use log::debug;
use nalgebra::Point2;

use crate::adapter::solve_mpc;
use crate::config::MpcConfig;
use crate::error::MpcError;
use crate::model::{Actuation, ActuatorCommand, KinematicBicycle, VehicleState};
use crate::nlp::NlpSolver;
use crate::polynomial::ReferencePolynomial;
use crate::problem::MpcProblem;
use crate::protocol::Telemetry;
use crate::solver::AugLagSolver;
use crate::transform::to_vehicle_frame;

/// Result of one successful tick. Everything is in the vehicle frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlOutput {
    pub command: ActuatorCommand,
    /// Planned positions for `t >= 1`.
    pub predicted: Vec<Point2<f64>>,
    /// Samples of the fitted reference, for display.
    pub reference: Vec<Point2<f64>>,
    pub cost: f64,
}

/// Receding-horizon controller.
///
/// Holds only immutable tuning and the solver engine; every call to
/// [`MpcController::step`] builds and solves an independent problem.
#[derive(Debug, Clone)]
pub struct MpcController<S = AugLagSolver> {
    config: MpcConfig,
    model: KinematicBicycle,
    solver: S,
}

impl MpcController<AugLagSolver> {
    pub fn new(config: MpcConfig) -> Result<Self, MpcError> {
        Self::with_solver(config, AugLagSolver::default())
    }
}

impl<S: NlpSolver> MpcController<S> {
    pub fn with_solver(config: MpcConfig, solver: S) -> Result<Self, MpcError> {
        config.validate()?;
        Ok(Self {
            model: KinematicBicycle::new(config.lf),
            config,
            solver,
        })
    }

    pub fn config(&self) -> &MpcConfig {
        &self.config
    }

    /// Runs one control tick: fit the reference, compensate for latency,
    /// build and solve the problem, and scale the first actuation.
    pub fn step(&self, telemetry: &Telemetry) -> Result<ControlOutput, MpcError> {
        let start = Instant::now();
        telemetry.validate()?;

        let local = to_vehicle_frame(&telemetry.pose(), &telemetry.waypoints());
        let reference = ReferencePolynomial::fit(&local, self.config.polynomial_degree)?;

        let observed = VehicleState::at_origin(telemetry.speed, &reference);
        let applied = telemetry
            .applied_command()
            .to_actuation(self.config.steering_scale(), self.config.max_acceleration);
        let state = self.compensate_latency(&observed, &applied, &reference);
        debug!("initial state {state:?}");

        let problem = MpcProblem::build(&self.config, &state, &reference)?;
        let solution = solve_mpc(&self.solver, &problem, self.config.time_budget()?)?;

        let command = ActuatorCommand::from_actuation(
            &solution.actuation,
            self.config.steering_scale(),
            self.config.max_acceleration,
        );
        debug!(
            "tick done in {:?} ({} solver iterations): steering {:.4}, throttle {:.4}",
            start.elapsed(),
            solution.iterations,
            command.steering,
            command.throttle
        );

        Ok(ControlOutput {
            command,
            predicted: solution.predicted_path(),
            reference: self.reference_trajectory(&reference),
            cost: solution.cost,
        })
    }

    /// Projects `state` forward by the configured actuation latency while
    /// `applied` stays in effect. Zero latency leaves the state unchanged.
    pub fn compensate_latency(
        &self,
        state: &VehicleState,
        applied: &Actuation,
        reference: &ReferencePolynomial,
    ) -> VehicleState {
        let delay = self.config.latency().as_secs_f64();
        if delay == 0.0 {
            return *state;
        }
        self.model.step(state, applied, reference, delay)
    }

    pub fn reference_trajectory(&self, reference: &ReferencePolynomial) -> Vec<Point2<f64>> {
        reference.sample(self.config.reference_points, self.config.reference_spacing)
    }
}
