//! Interface between a problem description and a nonlinear solver engine.
//!
//! A problem is
//!
//! ```text
//! minimise    f(x)
//! subject to  g_l <= g(x) <= g_u
//!             x_l <= x    <= x_u
//! ```
//!
//! Equality constraints have `g_l == g_u`.

use std::time::Duration;

use nalgebra::{DMatrix, DVector};

pub trait NlpProblem {
    fn num_variables(&self) -> usize;
    fn num_constraints(&self) -> usize;

    fn initial_point(&self) -> &DVector<f64>;
    /// Lower and upper variable bounds.
    fn variable_bounds(&self) -> (&DVector<f64>, &DVector<f64>);
    /// Lower and upper constraint bounds.
    fn constraint_bounds(&self) -> (&DVector<f64>, &DVector<f64>);

    fn objective(&self, x: &DVector<f64>) -> f64;
    fn objective_gradient(&self, x: &DVector<f64>) -> DVector<f64>;
    fn constraints(&self, x: &DVector<f64>) -> DVector<f64>;
    /// Dense `num_constraints x num_variables` Jacobian of `g`.
    fn constraint_jacobian(&self, x: &DVector<f64>) -> DMatrix<f64>;
    /// `obj_factor·∇²f(x) + Σ multipliers_i·∇²g_i(x)`.
    fn lagrangian_hessian(
        &self,
        x: &DVector<f64>,
        obj_factor: f64,
        multipliers: &DVector<f64>,
    ) -> DMatrix<f64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    Converged,
    NotConverged,
    TimeLimitExceeded,
    /// The problem evaluated to a non-finite value.
    Error,
}

#[derive(Debug, Clone)]
pub struct SolverOutput {
    pub status: SolveStatus,
    /// Last iterate. Only meaningful when `status` is `Converged`.
    pub x: DVector<f64>,
    pub objective: f64,
    pub iterations: usize,
    pub elapsed: Duration,
}

pub trait NlpSolver {
    /// Solves `problem`, returning control once `budget` of wall-clock time
    /// has elapsed regardless of convergence.
    fn solve<P: NlpProblem>(&self, problem: &P, budget: Duration) -> SolverOutput;
}
