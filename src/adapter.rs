//! Budgeted solver invocation and plan extraction.

use std::time::Duration;

use log::{debug, warn};
use nalgebra::Point2;

use crate::error::MpcError;
use crate::layout::StateChannel;
use crate::model::{Actuation, VehicleState};
use crate::nlp::{NlpProblem, NlpSolver, SolveStatus, SolverOutput};
use crate::problem::MpcProblem;

/// The usable part of a converged plan.
#[derive(Debug, Clone, PartialEq)]
pub struct MpcSolution {
    /// Actuation of the first step; the only part that is applied.
    pub actuation: Actuation,
    /// Planned states for `t = 0..N`.
    pub states: Vec<VehicleState>,
    pub cost: f64,
    pub iterations: usize,
    pub elapsed: Duration,
}

impl MpcSolution {
    /// Planned positions for `t >= 1`, in the vehicle frame.
    pub fn predicted_path(&self) -> Vec<Point2<f64>> {
        self.states
            .iter()
            .skip(1)
            .map(|s| Point2::new(s.x, s.y))
            .collect()
    }
}

/// Solves `problem` within `budget`.
///
/// Anything other than a converged, finite solution vector is reported as an
/// error; a stale or zero command is never returned in its place.
pub fn solve_mpc<S: NlpSolver>(
    solver: &S,
    problem: &MpcProblem,
    budget: Duration,
) -> Result<MpcSolution, MpcError> {
    let output = solver.solve(problem, budget);
    check_status(&output, problem, budget)?;

    let x = &output.x;
    let layout = problem.layout();
    let states = (0..layout.horizon())
        .map(|t| problem.state_at(x, t))
        .collect::<Vec<_>>();
    let actuation = problem.actuation_at(x, 0);

    debug!(
        "plan: steering {:.5} rad, acceleration {:.4}, cost {:.4}, final cte {:.4}",
        actuation.steering,
        actuation.acceleration,
        output.objective,
        x[layout.state(StateChannel::Cte, layout.horizon() - 1)]
    );

    Ok(MpcSolution {
        actuation,
        states,
        cost: output.objective,
        iterations: output.iterations,
        elapsed: output.elapsed,
    })
}

fn check_status(
    output: &SolverOutput,
    problem: &MpcProblem,
    budget: Duration,
) -> Result<(), MpcError> {
    match output.status {
        SolveStatus::Converged => {}
        SolveStatus::TimeLimitExceeded => {
            warn!("solve timed out after {:?}", output.elapsed);
            return Err(MpcError::SolverTimeout { budget });
        }
        status @ (SolveStatus::NotConverged | SolveStatus::Error) => {
            warn!("solve failed with {status:?} after {} iterations", output.iterations);
            return Err(MpcError::SolverNonConvergence {
                status,
                iterations: output.iterations,
            });
        }
    }

    let well_formed = output.x.len() == problem.num_variables()
        && output.x.iter().all(|v| v.is_finite())
        && output.objective.is_finite();
    if !well_formed {
        warn!("solver reported convergence with an unusable solution vector");
        return Err(MpcError::SolverNonConvergence {
            status: SolveStatus::Error,
            iterations: output.iterations,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MpcConfig;
    use crate::polynomial::ReferencePolynomial;

    /// Returns a canned output regardless of the problem.
    struct Scripted {
        status: SolveStatus,
        poison: bool,
    }

    impl NlpSolver for Scripted {
        fn solve<P: NlpProblem>(&self, problem: &P, _budget: Duration) -> SolverOutput {
            let mut x = problem.initial_point().clone();
            if self.poison {
                x[0] = f64::NAN;
            }
            SolverOutput {
                status: self.status,
                x,
                objective: problem.objective(problem.initial_point()),
                iterations: 7,
                elapsed: Duration::from_millis(1),
            }
        }
    }

    fn problem() -> MpcProblem {
        let reference = ReferencePolynomial::from_slice(&[0.5, 0.0, 0.0, 0.0]);
        let state = VehicleState::at_origin(10.0, &reference);
        MpcProblem::build(&MpcConfig::default(), &state, &reference).unwrap()
    }

    fn run(status: SolveStatus, poison: bool) -> Result<MpcSolution, MpcError> {
        solve_mpc(&Scripted { status, poison }, &problem(), Duration::from_millis(500))
    }

    #[test]
    fn converged_output_is_extracted() {
        let solution = run(SolveStatus::Converged, false).unwrap();
        assert_eq!(solution.states.len(), 10);
        assert_eq!(solution.states[0].v, 10.0);
        assert_eq!(solution.states[0].cte, 0.5);
        assert_eq!(solution.actuation, Actuation::default());
        assert_eq!(solution.predicted_path().len(), 9);
        assert_eq!(solution.iterations, 7);
    }

    #[test]
    fn failures_are_surfaced() {
        assert_eq!(
            run(SolveStatus::NotConverged, false),
            Err(MpcError::SolverNonConvergence {
                status: SolveStatus::NotConverged,
                iterations: 7
            })
        );
        assert_eq!(
            run(SolveStatus::TimeLimitExceeded, false),
            Err(MpcError::SolverTimeout {
                budget: Duration::from_millis(500)
            })
        );
        assert!(matches!(
            run(SolveStatus::Error, false),
            Err(MpcError::SolverNonConvergence { status: SolveStatus::Error, .. })
        ));
    }

    #[test]
    fn non_finite_solution_is_rejected() {
        let err = run(SolveStatus::Converged, true).unwrap_err();
        assert!(err.is_solver_failure());
    }

    #[test]
    fn default_engine_solves_minimal_horizon() {
        let config = MpcConfig {
            horizon: 2,
            ..Default::default()
        };
        let reference = ReferencePolynomial::from_slice(&[0.0, 0.0, 0.0, 0.0]);
        let state = VehicleState::at_origin(10.0, &reference);
        let problem = MpcProblem::build(&config, &state, &reference).unwrap();
        let solution = solve_mpc(
            &crate::solver::AugLagSolver::default(),
            &problem,
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(solution.states.len(), 2);
        assert!(solution.actuation.steering.abs() < 1e-9);
        // Below the reference speed: the only step accelerates.
        assert!(solution.actuation.acceleration > 0.0);
        assert!(solution.actuation.acceleration <= 1.0);
    }
}
