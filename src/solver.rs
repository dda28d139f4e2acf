// Augmented-Lagrangian engine with a projected Newton inner loop.
//
// Equality and range constraints are moved into the objective through a
// shifted quadratic penalty; variable bounds are kept explicit and handled by
// projection. Each outer iteration minimises the penalised subproblem, then
// updates the multiplier estimates and, if the constraint violation did not
// shrink enough, the penalty.

use std::time::{Duration, Instant};

use log::debug;
use nalgebra::{DMatrix, DVector};

use crate::nlp::{NlpProblem, NlpSolver, SolverOutput};

// Default settings
const DEFAULT_CONSTRAINT_TOL: f64 = 1e-6;
const DEFAULT_DUAL_TOL: f64 = 1e-6;
const DEFAULT_MAX_ITER: usize = 50;
const DEFAULT_MAX_INNER_ITER: usize = 100;
const DEFAULT_INITIAL_PENALTY: f64 = 100.0;
const DEFAULT_PENALTY_GROWTH: f64 = 10.0;
const DEFAULT_MAX_PENALTY: f64 = 1e10;
const DEFAULT_SUFFICIENT_REDUCTION: f64 = 0.25;

#[derive(Debug, Clone, Default)]
pub struct AugLagSolver {
    pub settings: SolverSettings,
}

impl AugLagSolver {
    pub fn new(settings: SolverSettings) -> Self {
        Self { settings }
    }
}

/// User settings
#[derive(Debug, Clone, PartialEq)]
pub struct SolverSettings {
    /// Largest tolerated constraint violation.
    pub constraint_tol: f64,
    /// Stationarity tolerance, relative to `1 + |∇f|∞`.
    pub dual_tol: f64,
    /// Outer (multiplier update) iterations.
    pub max_iter: usize,
    /// Newton iterations per subproblem.
    pub max_inner_iter: usize,
    pub initial_penalty: f64,
    pub penalty_growth: f64,
    pub max_penalty: f64,
    /// Violation must fall below this fraction of the previous one to keep
    /// the penalty unchanged.
    pub sufficient_reduction: f64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            constraint_tol: DEFAULT_CONSTRAINT_TOL,
            dual_tol: DEFAULT_DUAL_TOL,
            max_iter: DEFAULT_MAX_ITER,
            max_inner_iter: DEFAULT_MAX_INNER_ITER,
            initial_penalty: DEFAULT_INITIAL_PENALTY,
            penalty_growth: DEFAULT_PENALTY_GROWTH,
            max_penalty: DEFAULT_MAX_PENALTY,
            sufficient_reduction: DEFAULT_SUFFICIENT_REDUCTION,
        }
    }
}

/// Iteration state of one solve.
pub(crate) struct Workspace<'a, P> {
    pub(crate) problem: &'a P,

    pub(crate) x: DVector<f64>,
    pub(crate) x_lower: &'a DVector<f64>,
    pub(crate) x_upper: &'a DVector<f64>,
    pub(crate) g_lower: &'a DVector<f64>,
    pub(crate) g_upper: &'a DVector<f64>,

    // Multiplier estimates and penalty of the current subproblem
    pub(crate) lambda: DVector<f64>,
    pub(crate) mu: f64,

    // Everything below is evaluated at `x`
    pub(crate) objective: f64,
    pub(crate) merit: f64,
    pub(crate) grad_f: DVector<f64>,
    pub(crate) g: DVector<f64>,
    pub(crate) jac: DMatrix<f64>,
    /// `mu·(s - proj(s))` with `s = g + lambda/mu`; the next multiplier estimate.
    pub(crate) weights: DVector<f64>,
    /// Rows whose penalty term has curvature.
    pub(crate) penalised: Vec<bool>,
    /// Gradient of the subproblem merit.
    pub(crate) grad: DVector<f64>,

    pub(crate) primal_residual: f64,
    pub(crate) dual_residual: f64,
    pub(crate) iter: usize,
    /// `None` when the budget reaches past the representable future.
    pub(crate) deadline: Option<Instant>,
}

impl<'a, P: NlpProblem> Workspace<'a, P> {
    pub(crate) fn new(problem: &'a P, initial_penalty: f64, deadline: Option<Instant>) -> Self {
        let n = problem.num_variables();
        let m = problem.num_constraints();
        let (x_lower, x_upper) = problem.variable_bounds();
        let (g_lower, g_upper) = problem.constraint_bounds();

        let mut work = Self {
            problem,
            x: problem.initial_point().clone(),
            x_lower,
            x_upper,
            g_lower,
            g_upper,
            lambda: DVector::zeros(m),
            mu: initial_penalty,
            objective: 0.0,
            merit: 0.0,
            grad_f: DVector::zeros(n),
            g: DVector::zeros(m),
            jac: DMatrix::zeros(m, n),
            weights: DVector::zeros(m),
            penalised: vec![false; m],
            grad: DVector::zeros(n),
            primal_residual: f64::INFINITY,
            dual_residual: f64::INFINITY,
            iter: 0,
            deadline,
        };
        let mut x = work.x.clone();
        work.project(&mut x);
        work.x = x;
        work
    }
}

impl NlpSolver for AugLagSolver {
    fn solve<P: NlpProblem>(&self, problem: &P, budget: Duration) -> SolverOutput {
        let start = Instant::now();
        let mut work = Workspace::new(
            problem,
            self.settings.initial_penalty,
            start.checked_add(budget),
        );

        let status = work.run(&self.settings);
        let elapsed = start.elapsed();
        let objective = problem.objective(&work.x);
        debug!(
            "solve finished: {status:?} after {} iterations in {elapsed:?}, objective {objective:.6}",
            work.iter
        );

        SolverOutput {
            status,
            x: work.x,
            objective,
            iterations: work.iter,
            elapsed,
        }
    }
}
