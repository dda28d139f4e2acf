//! Nonlinear program for one prediction horizon.
//!
//! The decision vector stacks every state and actuation over the horizon (see
//! [`crate::layout`]). Constraint rows pin the first state to the observation
//! and drive the dynamics residual `state_t - step(state_{t-1}, u_{t-1})` to
//! zero for every later step. The cost is
//!
//! ```text
//! Σ_t   w_cte·cte_t² + w_epsi·epsi_t² + w_speed·(v_t - v_ref)²
//! Σ_t   w_steering·delta_t² + w_acceleration·a_t²
//! Σ_t   w_steering_rate·(delta_{t+1} - delta_t)² + w_acceleration_rate·(a_{t+1} - a_t)²
//! ```

use nalgebra::{DMatrix, DVector};

use crate::config::{CostWeights, MpcConfig};
use crate::error::MpcError;
use crate::layout::{Actuator, StateChannel, VariableLayout};
use crate::model::{Actuation, KinematicBicycle, VehicleState};
use crate::nlp::NlpProblem;
use crate::polynomial::ReferencePolynomial;

/// Stand-in for an infinite bound.
pub const UNBOUNDED: f64 = 1.0e19;

#[derive(Debug, Clone, PartialEq)]
pub struct MpcProblem {
    layout: VariableLayout,
    weights: CostWeights,
    reference_speed: f64,
    dt: f64,
    model: KinematicBicycle,
    initial_state: VehicleState,

    // Reference curve and its first three derivatives
    reference: ReferencePolynomial,
    slope: ReferencePolynomial,
    curvature: ReferencePolynomial,
    curvature_rate: ReferencePolynomial,

    x_init: DVector<f64>,
    x_lower: DVector<f64>,
    x_upper: DVector<f64>,
    g_lower: DVector<f64>,
    g_upper: DVector<f64>,
}

impl MpcProblem {
    /// Builds the complete problem description. Never touches a solver.
    pub fn build(
        config: &MpcConfig,
        state: &VehicleState,
        reference: &ReferencePolynomial,
    ) -> Result<Self, MpcError> {
        let layout = VariableLayout::new(config.horizon)?;
        let n_vars = layout.num_variables();
        let n_constraints = layout.num_constraints();

        let mut x_init = DVector::zeros(n_vars);
        let mut g_lower = DVector::zeros(n_constraints);
        let mut g_upper = DVector::zeros(n_constraints);
        for ch in StateChannel::ALL {
            let value = state.get(ch);
            x_init[layout.state(ch, 0)] = value;
            g_lower[layout.constraint(ch, 0)] = value;
            g_upper[layout.constraint(ch, 0)] = value;
        }

        let mut x_lower = DVector::from_element(n_vars, -UNBOUNDED);
        let mut x_upper = DVector::from_element(n_vars, UNBOUNDED);
        for (kind, limit) in [
            (Actuator::Steering, config.max_steering),
            (Actuator::Acceleration, config.max_acceleration),
        ] {
            for t in 0..layout.actuation_steps() {
                x_lower[layout.actuator(kind, t)] = -limit;
                x_upper[layout.actuator(kind, t)] = limit;
            }
        }

        let slope = reference.derivative();
        let curvature = slope.derivative();
        let curvature_rate = curvature.derivative();

        Ok(Self {
            layout,
            weights: config.weights,
            reference_speed: config.reference_speed,
            dt: config.dt,
            model: KinematicBicycle::new(config.lf),
            initial_state: *state,
            reference: reference.clone(),
            slope,
            curvature,
            curvature_rate,
            x_init,
            x_lower,
            x_upper,
            g_lower,
            g_upper,
        })
    }

    pub fn layout(&self) -> &VariableLayout {
        &self.layout
    }

    pub fn initial_state(&self) -> &VehicleState {
        &self.initial_state
    }

    pub fn reference(&self) -> &ReferencePolynomial {
        &self.reference
    }

    pub fn state_at(&self, x: &DVector<f64>, t: usize) -> VehicleState {
        let mut s = VehicleState::default();
        for ch in StateChannel::ALL {
            s.set(ch, x[self.layout.state(ch, t)]);
        }
        s
    }

    pub fn actuation_at(&self, x: &DVector<f64>, t: usize) -> Actuation {
        Actuation {
            steering: x[self.layout.actuator(Actuator::Steering, t)],
            acceleration: x[self.layout.actuator(Actuator::Acceleration, t)],
        }
    }

    /// Constant Hessian of the cost, scaled by `factor`, added into `h`.
    fn add_objective_hessian(&self, h: &mut DMatrix<f64>, factor: f64) {
        let l = &self.layout;
        let w = &self.weights;
        for t in 0..l.horizon() {
            h[(l.state(StateChannel::Cte, t), l.state(StateChannel::Cte, t))] += 2.0 * w.cte * factor;
            h[(l.state(StateChannel::Epsi, t), l.state(StateChannel::Epsi, t))] +=
                2.0 * w.epsi * factor;
            h[(l.state(StateChannel::V, t), l.state(StateChannel::V, t))] += 2.0 * w.speed * factor;
        }
        for (kind, weight, rate_weight) in self.actuator_weights() {
            for t in 0..l.actuation_steps() {
                let i = l.actuator(kind, t);
                h[(i, i)] += 2.0 * weight * factor;
            }
            for t in 0..l.actuation_steps().saturating_sub(1) {
                let (i, j) = (l.actuator(kind, t), l.actuator(kind, t + 1));
                let c = 2.0 * rate_weight * factor;
                h[(i, i)] += c;
                h[(j, j)] += c;
                h[(i, j)] -= c;
                h[(j, i)] -= c;
            }
        }
    }

    fn actuator_weights(&self) -> [(Actuator, f64, f64); 2] {
        let w = &self.weights;
        [
            (Actuator::Steering, w.steering, w.steering_rate),
            (Actuator::Acceleration, w.acceleration, w.acceleration_rate),
        ]
    }
}

fn add_symmetric(h: &mut DMatrix<f64>, i: usize, j: usize, value: f64) {
    if i == j {
        h[(i, i)] += value;
    } else {
        h[(i, j)] += value;
        h[(j, i)] += value;
    }
}

impl NlpProblem for MpcProblem {
    fn num_variables(&self) -> usize {
        self.layout.num_variables()
    }

    fn num_constraints(&self) -> usize {
        self.layout.num_constraints()
    }

    fn initial_point(&self) -> &DVector<f64> {
        &self.x_init
    }

    fn variable_bounds(&self) -> (&DVector<f64>, &DVector<f64>) {
        (&self.x_lower, &self.x_upper)
    }

    fn constraint_bounds(&self) -> (&DVector<f64>, &DVector<f64>) {
        (&self.g_lower, &self.g_upper)
    }

    fn objective(&self, x: &DVector<f64>) -> f64 {
        let l = &self.layout;
        let w = &self.weights;
        let mut cost = 0.0;

        // Reference state tracking
        for t in 0..l.horizon() {
            cost += w.cte * x[l.state(StateChannel::Cte, t)].powi(2);
            cost += w.epsi * x[l.state(StateChannel::Epsi, t)].powi(2);
            cost += w.speed * (x[l.state(StateChannel::V, t)] - self.reference_speed).powi(2);
        }

        // Actuator use and smoothness
        for (kind, weight, rate_weight) in self.actuator_weights() {
            for t in 0..l.actuation_steps() {
                cost += weight * x[l.actuator(kind, t)].powi(2);
            }
            for t in 0..l.actuation_steps().saturating_sub(1) {
                cost += rate_weight * (x[l.actuator(kind, t + 1)] - x[l.actuator(kind, t)]).powi(2);
            }
        }
        cost
    }

    fn objective_gradient(&self, x: &DVector<f64>) -> DVector<f64> {
        let l = &self.layout;
        let w = &self.weights;
        let mut grad = DVector::zeros(l.num_variables());

        for t in 0..l.horizon() {
            let (cte, epsi, v) = (
                l.state(StateChannel::Cte, t),
                l.state(StateChannel::Epsi, t),
                l.state(StateChannel::V, t),
            );
            grad[cte] += 2.0 * w.cte * x[cte];
            grad[epsi] += 2.0 * w.epsi * x[epsi];
            grad[v] += 2.0 * w.speed * (x[v] - self.reference_speed);
        }
        for (kind, weight, rate_weight) in self.actuator_weights() {
            for t in 0..l.actuation_steps() {
                let i = l.actuator(kind, t);
                grad[i] += 2.0 * weight * x[i];
            }
            for t in 0..l.actuation_steps().saturating_sub(1) {
                let (i, j) = (l.actuator(kind, t), l.actuator(kind, t + 1));
                let d = 2.0 * rate_weight * (x[j] - x[i]);
                grad[j] += d;
                grad[i] -= d;
            }
        }
        grad
    }

    fn constraints(&self, x: &DVector<f64>) -> DVector<f64> {
        let l = &self.layout;
        let mut g = DVector::zeros(l.num_constraints());

        let first = self.state_at(x, 0);
        for ch in StateChannel::ALL {
            g[l.constraint(ch, 0)] = first.get(ch);
        }

        let mut prev = first;
        for t in 1..l.horizon() {
            let u = self.actuation_at(x, t - 1);
            let predicted = self.model.step(&prev, &u, &self.reference, self.dt);
            let declared = self.state_at(x, t);
            for ch in StateChannel::ALL {
                g[l.constraint(ch, t)] = declared.get(ch) - predicted.get(ch);
            }
            prev = declared;
        }
        g
    }

    fn constraint_jacobian(&self, x: &DVector<f64>) -> DMatrix<f64> {
        use StateChannel::*;

        let l = &self.layout;
        let dt = self.dt;
        let k = dt / self.model.lf;
        let mut jac = DMatrix::zeros(l.num_constraints(), l.num_variables());

        for ch in StateChannel::ALL {
            jac[(l.constraint(ch, 0), l.state(ch, 0))] = 1.0;
        }

        for t in 1..l.horizon() {
            let row = |ch| l.constraint(ch, t);
            let prev = |ch| l.state(ch, t - 1);
            let steer = l.actuator(Actuator::Steering, t - 1);
            let accel = l.actuator(Actuator::Acceleration, t - 1);

            let s = self.state_at(x, t - 1);
            let delta = x[steer];
            let (sin_psi, cos_psi) = s.psi.sin_cos();
            let (sin_e, cos_e) = s.epsi.sin_cos();
            let slope = self.slope.eval(s.x);
            let curvature = self.curvature.eval(s.x);

            for ch in StateChannel::ALL {
                jac[(row(ch), l.state(ch, t))] = 1.0;
            }

            jac[(row(X), prev(X))] = -1.0;
            jac[(row(X), prev(V))] = -cos_psi * dt;
            jac[(row(X), prev(Psi))] = s.v * sin_psi * dt;

            jac[(row(Y), prev(Y))] = -1.0;
            jac[(row(Y), prev(V))] = -sin_psi * dt;
            jac[(row(Y), prev(Psi))] = -s.v * cos_psi * dt;

            jac[(row(Psi), prev(Psi))] = -1.0;
            jac[(row(Psi), prev(V))] = -delta * k;
            jac[(row(Psi), steer)] = -s.v * k;

            jac[(row(V), prev(V))] = -1.0;
            jac[(row(V), accel)] = -dt;

            jac[(row(Cte), prev(X))] = -slope;
            jac[(row(Cte), prev(Y))] = 1.0;
            jac[(row(Cte), prev(V))] = -sin_e * dt;
            jac[(row(Cte), prev(Epsi))] = -s.v * cos_e * dt;

            jac[(row(Epsi), prev(Psi))] = -1.0;
            jac[(row(Epsi), prev(X))] = curvature / (1.0 + slope * slope);
            jac[(row(Epsi), prev(V))] = -delta * k;
            jac[(row(Epsi), steer)] = -s.v * k;
        }
        jac
    }

    fn lagrangian_hessian(
        &self,
        x: &DVector<f64>,
        obj_factor: f64,
        multipliers: &DVector<f64>,
    ) -> DMatrix<f64> {
        use StateChannel::*;

        let l = &self.layout;
        let dt = self.dt;
        let k = dt / self.model.lf;
        let n = l.num_variables();
        let mut h = DMatrix::zeros(n, n);
        self.add_objective_hessian(&mut h, obj_factor);

        // The pins are linear, so only the dynamics rows contribute.
        for t in 1..l.horizon() {
            let weight = |ch| multipliers[l.constraint(ch, t)];
            let prev = |ch| l.state(ch, t - 1);
            let steer = l.actuator(Actuator::Steering, t - 1);

            let s = self.state_at(x, t - 1);
            let (sin_psi, cos_psi) = s.psi.sin_cos();
            let (sin_e, cos_e) = s.epsi.sin_cos();
            let slope = self.slope.eval(s.x);
            let curvature = self.curvature.eval(s.x);
            let curvature_rate = self.curvature_rate.eval(s.x);

            let w = weight(X);
            add_symmetric(&mut h, prev(V), prev(Psi), w * sin_psi * dt);
            add_symmetric(&mut h, prev(Psi), prev(Psi), w * s.v * cos_psi * dt);

            let w = weight(Y);
            add_symmetric(&mut h, prev(V), prev(Psi), -w * cos_psi * dt);
            add_symmetric(&mut h, prev(Psi), prev(Psi), w * s.v * sin_psi * dt);

            add_symmetric(&mut h, prev(V), steer, -weight(Psi) * k);

            let w = weight(Cte);
            add_symmetric(&mut h, prev(X), prev(X), -w * curvature);
            add_symmetric(&mut h, prev(V), prev(Epsi), -w * cos_e * dt);
            add_symmetric(&mut h, prev(Epsi), prev(Epsi), w * s.v * sin_e * dt);

            let w = weight(Epsi);
            let q = 1.0 + slope * slope;
            let d2_psides = (curvature_rate * q - 2.0 * slope * curvature * curvature) / (q * q);
            add_symmetric(&mut h, prev(X), prev(X), w * d2_psides);
            add_symmetric(&mut h, prev(V), steer, -w * k);
        }
        h
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observed() -> VehicleState {
        VehicleState {
            x: 0.7,
            y: -0.2,
            psi: 0.05,
            v: 12.0,
            cte: 0.8,
            epsi: -0.03,
        }
    }

    fn curved() -> ReferencePolynomial {
        ReferencePolynomial::from_slice(&[0.8, 0.05, -0.004, 0.0002])
    }

    fn problem(horizon: usize) -> MpcProblem {
        let config = MpcConfig {
            horizon,
            ..Default::default()
        };
        MpcProblem::build(&config, &observed(), &curved()).unwrap()
    }

    /// A point away from the initial guess with every channel nonzero.
    fn wiggle(p: &MpcProblem) -> DVector<f64> {
        let n = p.num_variables();
        let mut x = DVector::from_fn(n, |i, _| 0.3 * (1.7 * i as f64).sin());
        for t in 0..p.layout().horizon() {
            x[p.layout().state(StateChannel::X, t)] = 1.1 * t as f64 + 0.2;
            x[p.layout().state(StateChannel::V, t)] = 10.0 + 0.5 * t as f64;
        }
        x
    }

    fn assert_close(a: f64, b: f64, what: &str) {
        let tol = 1e-5 * (1.0 + a.abs().max(b.abs()));
        assert!((a - b).abs() <= tol, "{what}: analytic {a} vs numeric {b}");
    }

    #[test]
    fn sizes_and_bounds() {
        let p = problem(10);
        assert_eq!(p.num_variables(), 76);
        assert_eq!(p.num_constraints(), 60);

        let (xl, xu) = p.variable_bounds();
        let l = p.layout();
        assert_eq!(xl[l.state(StateChannel::Cte, 4)], -UNBOUNDED);
        assert_eq!(xu[l.state(StateChannel::X, 9)], UNBOUNDED);
        assert_eq!(xl[l.actuator(Actuator::Steering, 3)], -0.436332);
        assert_eq!(xu[l.actuator(Actuator::Steering, 3)], 0.436332);
        assert_eq!(xl[l.actuator(Actuator::Acceleration, 8)], -1.0);
        assert_eq!(xu[l.actuator(Actuator::Acceleration, 0)], 1.0);
    }

    #[test]
    fn initial_condition_is_pinned() {
        let p = problem(10);
        let l = *p.layout();
        let (gl, gu) = p.constraint_bounds();
        let s = observed();
        for ch in StateChannel::ALL {
            assert_eq!(gl[l.constraint(ch, 0)], s.get(ch));
            assert_eq!(gu[l.constraint(ch, 0)], s.get(ch));
            assert_eq!(p.initial_point()[l.state(ch, 0)], s.get(ch));
        }
        let pinned: Vec<usize> = StateChannel::ALL.iter().map(|&ch| l.constraint(ch, 0)).collect();
        for i in (0..p.num_constraints()).filter(|i| !pinned.contains(i)) {
            assert_eq!((gl[i], gu[i]), (0.0, 0.0));
        }
        let nonzero = p.initial_point().iter().filter(|v| **v != 0.0).count();
        assert_eq!(nonzero, 6);
    }

    #[test]
    fn build_is_deterministic() {
        let a = problem(12);
        let b = problem(12);
        assert_eq!(a, b);
        let bits = |v: &DVector<f64>| v.iter().map(|x| x.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(a.initial_point()), bits(b.initial_point()));
        assert_eq!(bits(a.variable_bounds().0), bits(b.variable_bounds().0));
        assert_eq!(bits(a.constraint_bounds().1), bits(b.constraint_bounds().1));
    }

    #[test]
    fn minimal_horizon_is_well_formed() {
        let p = problem(2);
        assert_eq!(p.layout().actuation_steps(), 1);
        assert_eq!(p.num_variables(), 14);
        assert_eq!(p.num_constraints(), 12);
        let x = wiggle(&p);
        assert_eq!(p.constraints(&x).len(), 12);
        assert_eq!(p.constraint_jacobian(&x).shape(), (12, 14));
        assert!(p.objective(&x).is_finite());
    }

    #[test]
    fn model_step_gives_zero_residual() {
        let p = problem(5);
        let l = *p.layout();
        let mut x = DVector::zeros(p.num_variables());
        let s0 = observed();
        let u = Actuation {
            steering: -0.12,
            acceleration: 0.6,
        };
        let s1 = KinematicBicycle::new(2.67).step(&s0, &u, &curved(), 0.1);
        for ch in StateChannel::ALL {
            x[l.state(ch, 0)] = s0.get(ch);
            x[l.state(ch, 1)] = s1.get(ch);
        }
        x[l.actuator(Actuator::Steering, 0)] = u.steering;
        x[l.actuator(Actuator::Acceleration, 0)] = u.acceleration;

        let g = p.constraints(&x);
        for ch in StateChannel::ALL {
            assert_eq!(g[l.constraint(ch, 0)], s0.get(ch));
            assert!(g[l.constraint(ch, 1)].abs() < 1e-12, "{ch:?} residual");
        }
    }

    #[test]
    fn objective_of_initial_guess() {
        let p = problem(3);
        let s = observed();
        // Later steps sit at zero: only their speed term contributes.
        let expected = 2000.0 * s.cte.powi(2)
            + 2000.0 * s.epsi.powi(2)
            + (s.v - 16.0).powi(2)
            + 2.0 * 16.0f64.powi(2);
        assert!((p.objective(p.initial_point()) - expected).abs() < 1e-9);
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let p = problem(6);
        let x = wiggle(&p);
        let grad = p.objective_gradient(&x);
        let h = 1e-6;
        for j in 0..p.num_variables() {
            let mut xp = x.clone();
            let mut xm = x.clone();
            xp[j] += h;
            xm[j] -= h;
            let fd = (p.objective(&xp) - p.objective(&xm)) / (2.0 * h);
            assert_close(grad[j], fd, &format!("df/dx{j}"));
        }
    }

    #[test]
    fn jacobian_matches_finite_differences() {
        let p = problem(6);
        let x = wiggle(&p);
        let jac = p.constraint_jacobian(&x);
        let h = 1e-6;
        for j in 0..p.num_variables() {
            let mut xp = x.clone();
            let mut xm = x.clone();
            xp[j] += h;
            xm[j] -= h;
            let fd = (p.constraints(&xp) - p.constraints(&xm)) / (2.0 * h);
            for i in 0..p.num_constraints() {
                assert_close(jac[(i, j)], fd[i], &format!("dg{i}/dx{j}"));
            }
        }
    }

    #[test]
    fn hessian_matches_finite_differences() {
        let p = problem(5);
        let x = wiggle(&p);
        let m = p.num_constraints();
        let multipliers = DVector::from_fn(m, |i, _| 1.0 + 0.25 * (i as f64).cos());
        let lagrangian_gradient = |x: &DVector<f64>| {
            p.objective_gradient(x) * 0.5 + p.constraint_jacobian(x).transpose() * &multipliers
        };

        let hess = p.lagrangian_hessian(&x, 0.5, &multipliers);
        let h = 1e-6;
        for j in 0..p.num_variables() {
            let mut xp = x.clone();
            let mut xm = x.clone();
            xp[j] += h;
            xm[j] -= h;
            let fd = (lagrangian_gradient(&xp) - lagrangian_gradient(&xm)) / (2.0 * h);
            for i in 0..p.num_variables() {
                assert_close(hess[(i, j)], fd[i], &format!("H[{i},{j}]"));
            }
        }
        assert_eq!(hess, hess.transpose());
    }
}
