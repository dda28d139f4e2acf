use std::time::Instant;

use log::{debug, warn};
use nalgebra::{DMatrix, DVector};

use crate::nlp::{NlpProblem, SolveStatus};
use crate::penalty::PenaltyAdapter;
use crate::solver::{SolverSettings, Workspace};

const ARMIJO: f64 = 1e-4;
const MIN_STEP: f64 = 1e-12;
/// Upper bound on the distance at which a bound counts as active.
const ACTIVE_EPS: f64 = 1e-6;
const MAX_REGULARISATION_ATTEMPTS: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InnerExit {
    Converged,
    Stalled,
    IterationLimit,
    Deadline,
    NonFinite,
}

impl<P: NlpProblem> Workspace<'_, P> {
    /// Outer loop: minimise the subproblem, then update multipliers and penalty.
    pub(crate) fn run(&mut self, settings: &SolverSettings) -> SolveStatus {
        let adapter = PenaltyAdapter::from(settings);
        let mut prev_violation = f64::INFINITY;

        for k in 0..settings.max_iter {
            let exit = self.minimize_subproblem(settings);
            match exit {
                InnerExit::Deadline => {
                    warn!(
                        "solver deadline reached after {} iterations, violation {:.3e}",
                        self.iter, self.primal_residual
                    );
                    return SolveStatus::TimeLimitExceeded;
                }
                InnerExit::NonFinite => {
                    warn!("problem evaluated to a non-finite value at iteration {}", self.iter);
                    return SolveStatus::Error;
                }
                _ => {}
            }

            self.evaluate();
            if !self.is_finite() {
                return SolveStatus::Error;
            }
            debug!(
                "outer {k}: f = {:.6}, primal {:.3e}, dual {:.3e}, mu {:.1e}, inner {exit:?}",
                self.objective, self.primal_residual, self.dual_residual, self.mu
            );

            if self.termination_condition(settings) {
                return SolveStatus::Converged;
            }

            self.update_multipliers();
            self.mu = adapter.next_penalty(prev_violation, self.primal_residual, self.mu);
            prev_violation = self.primal_residual;
        }

        SolveStatus::NotConverged
    }

    /// Projected Newton iterations on the penalised subproblem with the
    /// current multipliers and penalty held fixed.
    fn minimize_subproblem(&mut self, settings: &SolverSettings) -> InnerExit {
        for _ in 0..settings.max_inner_iter {
            if self.deadline.is_some_and(|d| Instant::now() >= d) {
                return InnerExit::Deadline;
            }

            self.evaluate();
            if !self.is_finite() {
                return InnerExit::NonFinite;
            }
            if self.dual_residual <= self.dual_tolerance(settings) {
                return InnerExit::Converged;
            }

            self.iter += 1;
            let Some(direction) = self.newton_direction() else {
                return InnerExit::Stalled;
            };
            if !self.line_search(&direction) {
                return InnerExit::Stalled;
            }
        }
        InnerExit::IterationLimit
    }

    /// Evaluates objective, constraints and derivatives at `x`.
    pub(crate) fn evaluate(&mut self) {
        self.objective = self.problem.objective(&self.x);
        self.grad_f = self.problem.objective_gradient(&self.x);
        self.g = self.problem.constraints(&self.x);
        self.jac = self.problem.constraint_jacobian(&self.x);

        let (weights, penalised, excess) = self.penalty_terms(&self.g);
        self.merit = self.objective + 0.5 * self.mu * excess;
        self.grad = &self.grad_f + self.jac.transpose() * &weights;
        self.weights = weights;
        self.penalised = penalised;

        self.primal_residual = self
            .g
            .iter()
            .enumerate()
            .map(|(i, g)| (g - g.max(self.g_lower[i]).min(self.g_upper[i])).abs())
            .fold(0.0, f64::max);
        self.dual_residual = self.projected_gradient_norm();
    }

    /// Penalty weights, curvature mask and squared excess for constraint
    /// values `g`.
    fn penalty_terms(&self, g: &DVector<f64>) -> (DVector<f64>, Vec<bool>, f64) {
        let m = g.len();
        let mut weights = DVector::zeros(m);
        let mut penalised = vec![false; m];
        let mut squared = 0.0;
        for i in 0..m {
            let (lo, hi) = (self.g_lower[i], self.g_upper[i]);
            let s = g[i] + self.lambda[i] / self.mu;
            let excess = s - s.max(lo).min(hi);
            weights[i] = self.mu * excess;
            penalised[i] = lo == hi || s < lo || s > hi;
            squared += excess * excess;
        }
        (weights, penalised, squared)
    }

    fn merit_at(&self, x: &DVector<f64>) -> f64 {
        let g = self.problem.constraints(x);
        let (_, _, squared) = self.penalty_terms(&g);
        self.problem.objective(x) + 0.5 * self.mu * squared
    }

    pub(crate) fn project(&self, x: &mut DVector<f64>) {
        for (j, v) in x.iter_mut().enumerate() {
            *v = v.max(self.x_lower[j]).min(self.x_upper[j]);
        }
    }

    /// `|x - proj(x - grad)|∞`
    fn projected_gradient_norm(&self) -> f64 {
        let mut stepped = &self.x - &self.grad;
        self.project(&mut stepped);
        (&self.x - stepped).amax()
    }

    fn dual_tolerance(&self, settings: &SolverSettings) -> f64 {
        settings.dual_tol * (1.0 + self.grad_f.amax())
    }

    fn is_finite(&self) -> bool {
        self.merit.is_finite() && self.grad.iter().all(|v| v.is_finite())
    }

    /// Exact Hessian of the subproblem merit.
    fn subproblem_hessian(&self) -> DMatrix<f64> {
        let (m, n) = self.jac.shape();
        let mut h = self.problem.lagrangian_hessian(&self.x, 1.0, &self.weights);
        let jp = DMatrix::from_fn(m, n, |i, j| {
            if self.penalised[i] { self.jac[(i, j)] } else { 0.0 }
        });
        h += jp.transpose() * &jp * self.mu;
        h
    }

    /// Newton step on the variables away from their bounds, scaled gradient
    /// step on the rest.
    fn newton_direction(&self) -> Option<DVector<f64>> {
        let n = self.x.len();
        let eps = self.dual_residual.min(ACTIVE_EPS);
        let (free, active): (Vec<usize>, Vec<usize>) = (0..n).partition(|&j| {
            let at_lower = self.x[j] <= self.x_lower[j] + eps && self.grad[j] > 0.0;
            let at_upper = self.x[j] >= self.x_upper[j] - eps && self.grad[j] < 0.0;
            !(at_lower || at_upper)
        });

        let hessian = self.subproblem_hessian();
        let mut direction = DVector::zeros(n);
        for &j in &active {
            direction[j] = -self.grad[j] / hessian[(j, j)].max(f64::EPSILON);
        }
        if free.is_empty() {
            return Some(direction);
        }

        let nf = free.len();
        let h_ff = DMatrix::from_fn(nf, nf, |a, b| hessian[(free[a], free[b])]);
        let rhs = DVector::from_fn(nf, |a, _| -self.grad[free[a]]);
        let step = solve_regularised(h_ff, &rhs)?;
        for (a, &j) in free.iter().enumerate() {
            direction[j] = step[a];
        }
        Some(direction)
    }

    /// Backtracking along the projected arc until the Armijo condition holds.
    fn line_search(&mut self, direction: &DVector<f64>) -> bool {
        let noise = 10.0 * f64::EPSILON * self.merit.abs().max(1.0);
        let mut alpha = 1.0;
        while alpha >= MIN_STEP {
            let mut trial = &self.x + direction * alpha;
            self.project(&mut trial);
            let step = &trial - &self.x;
            if step.amax() == 0.0 {
                return false;
            }

            let merit = self.merit_at(&trial);
            let decrease = ARMIJO * self.grad.dot(&step);
            if merit.is_finite()
                && (merit <= self.merit + decrease || (merit - self.merit).abs() <= noise)
            {
                self.x = trial;
                return true;
            }
            alpha *= 0.5;
        }
        false
    }

    fn update_multipliers(&mut self) {
        self.lambda.copy_from(&self.weights);
    }

    /// Feasible within tolerance and stationary for the updated multipliers.
    pub(crate) fn termination_condition(&self, settings: &SolverSettings) -> bool {
        self.primal_residual <= settings.constraint_tol
            && self.dual_residual <= self.dual_tolerance(settings)
    }
}

/// Cholesky solve of `h·d = rhs`, adding a growing multiple of the identity
/// until `h` is positive definite.
fn solve_regularised(h: DMatrix<f64>, rhs: &DVector<f64>) -> Option<DVector<f64>> {
    let n = h.nrows();
    let scale = h.diagonal().amax().max(1.0);
    let mut tau = 0.0;
    for _ in 0..MAX_REGULARISATION_ATTEMPTS {
        let mut shifted = h.clone();
        for i in 0..n {
            shifted[(i, i)] += tau;
        }
        if let Some(chol) = shifted.cholesky() {
            return Some(chol.solve(rhs));
        }
        tau = if tau == 0.0 { 1e-10 * scale } else { tau * 10.0 };
    }
    None
}
