//! Discrete kinematic bicycle model.

use crate::layout::StateChannel;
use crate::polynomial::ReferencePolynomial;

/// Snapshot of the vehicle for one tick, in the vehicle frame once the
/// reference has been fitted.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VehicleState {
    pub x: f64,
    pub y: f64,
    pub psi: f64,
    pub v: f64,
    /// Cross-track error, `f(x) - y`.
    pub cte: f64,
    /// Heading error, `psi - atan(f'(x))`.
    pub epsi: f64,
}

impl VehicleState {
    /// State of a vehicle sitting at the origin of its own frame.
    pub fn at_origin(speed: f64, reference: &ReferencePolynomial) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            psi: 0.0,
            v: speed,
            cte: reference.eval(0.0),
            epsi: -reference.heading_at(0.0),
        }
    }

    pub fn get(&self, channel: StateChannel) -> f64 {
        match channel {
            StateChannel::X => self.x,
            StateChannel::Y => self.y,
            StateChannel::Psi => self.psi,
            StateChannel::V => self.v,
            StateChannel::Cte => self.cte,
            StateChannel::Epsi => self.epsi,
        }
    }

    pub fn set(&mut self, channel: StateChannel, value: f64) {
        match channel {
            StateChannel::X => self.x = value,
            StateChannel::Y => self.y = value,
            StateChannel::Psi => self.psi = value,
            StateChannel::V => self.v = value,
            StateChannel::Cte => self.cte = value,
            StateChannel::Epsi => self.epsi = value,
        }
    }
}

/// Steering angle (radians) and acceleration as seen by the model.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Actuation {
    pub steering: f64,
    pub acceleration: f64,
}

/// Normalised command sent to the vehicle, both components in `[-1, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ActuatorCommand {
    pub steering: f64,
    pub throttle: f64,
}

impl ActuatorCommand {
    pub fn neutral() -> Self {
        Self::default()
    }

    /// Scales by the same bounds the optimisation was built with.
    /// `steering_scale` is the steering bound, negated when the wire uses the
    /// opposite sign to the model.
    pub fn from_actuation(u: &Actuation, steering_scale: f64, max_acceleration: f64) -> Self {
        Self {
            steering: (u.steering / steering_scale).clamp(-1.0, 1.0),
            throttle: (u.acceleration / max_acceleration).clamp(-1.0, 1.0),
        }
    }

    pub fn to_actuation(&self, steering_scale: f64, max_acceleration: f64) -> Actuation {
        Actuation {
            steering: self.steering * steering_scale,
            acceleration: self.throttle * max_acceleration,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KinematicBicycle {
    /// Distance from the centre of gravity to the front axle.
    pub lf: f64,
}

impl KinematicBicycle {
    pub fn new(lf: f64) -> Self {
        Self { lf }
    }

    /// Advances `s` by `dt` under actuation `u`.
    pub fn step(
        &self,
        s: &VehicleState,
        u: &Actuation,
        reference: &ReferencePolynomial,
        dt: f64,
    ) -> VehicleState {
        let (sin_psi, cos_psi) = s.psi.sin_cos();
        let turn = s.v / self.lf * u.steering * dt;
        let psides = reference.heading_at(s.x);
        VehicleState {
            x: s.x + s.v * cos_psi * dt,
            y: s.y + s.v * sin_psi * dt,
            psi: s.psi + turn,
            v: s.v + u.acceleration * dt,
            cte: reference.eval(s.x) - s.y + s.v * s.epsi.sin() * dt,
            epsi: s.psi - psides + turn,
        }
    }

    /// Predicted states for `actuations`, starting with `initial`.
    pub fn rollout(
        &self,
        initial: &VehicleState,
        actuations: &[Actuation],
        reference: &ReferencePolynomial,
        dt: f64,
    ) -> Vec<VehicleState> {
        let mut states = Vec::with_capacity(actuations.len() + 1);
        states.push(*initial);
        for u in actuations {
            let next = self.step(&states[states.len() - 1], u, reference, dt);
            states.push(next);
        }
        states
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn straight() -> ReferencePolynomial {
        ReferencePolynomial::from_slice(&[0.0, 0.0, 0.0, 0.0])
    }

    #[test]
    fn straight_line_at_constant_speed() {
        let model = KinematicBicycle::new(2.67);
        let s = VehicleState {
            v: 10.0,
            ..Default::default()
        };
        let next = model.step(&s, &Actuation::default(), &straight(), 0.1);
        assert!((next.x - 1.0).abs() < 1e-12);
        assert_eq!(next.y, 0.0);
        assert_eq!(next.psi, 0.0);
        assert_eq!(next.v, 10.0);
        assert_eq!(next.cte, 0.0);
        assert_eq!(next.epsi, 0.0);
    }

    #[test]
    fn positive_steering_turns_left() {
        let model = KinematicBicycle::new(2.0);
        let s = VehicleState {
            v: 4.0,
            ..Default::default()
        };
        let u = Actuation {
            steering: 0.25,
            acceleration: 1.0,
        };
        let next = model.step(&s, &u, &straight(), 0.5);
        assert!((next.psi - 4.0 / 2.0 * 0.25 * 0.5).abs() < 1e-12);
        assert!((next.v - 4.5).abs() < 1e-12);
        assert!(next.psi > 0.0 && next.epsi > 0.0);
    }

    #[test]
    fn cte_follows_reference_offset() {
        let model = KinematicBicycle::new(2.67);
        let reference = ReferencePolynomial::from_slice(&[1.0, 0.0, 0.0, 0.0]);
        let s = VehicleState::at_origin(10.0, &reference);
        assert_eq!(s.cte, 1.0);
        let next = model.step(&s, &Actuation::default(), &reference, 0.1);
        assert!((next.cte - 1.0).abs() < 1e-12);
    }

    #[test]
    fn heading_error_uses_reference_slope() {
        let reference = ReferencePolynomial::from_slice(&[0.0, 1.0, 0.0, 0.0]);
        let s = VehicleState::at_origin(5.0, &reference);
        assert!((s.epsi + std::f64::consts::FRAC_PI_4).abs() < 1e-12);
    }

    #[test]
    fn rollout_chains_steps() {
        let model = KinematicBicycle::new(2.67);
        let initial = VehicleState {
            v: 5.0,
            ..Default::default()
        };
        let u = Actuation {
            steering: 0.0,
            acceleration: 1.0,
        };
        let states = model.rollout(&initial, &[u; 3], &straight(), 0.1);
        assert_eq!(states.len(), 4);
        assert!((states[3].v - 5.3).abs() < 1e-12);
        assert!((states[3].x - (0.5 + 0.51 + 0.52)).abs() < 1e-12);
    }

    #[test]
    fn command_scaling_round_trips_within_bounds() {
        let u = Actuation {
            steering: -0.2,
            acceleration: 0.5,
        };
        let cmd = ActuatorCommand::from_actuation(&u, 0.4, 1.0);
        assert!((cmd.steering + 0.5).abs() < 1e-12);
        assert_eq!(cmd.throttle, 0.5);
        let back = cmd.to_actuation(0.4, 1.0);
        assert!((back.steering - u.steering).abs() < 1e-12);

        let saturated = ActuatorCommand::from_actuation(
            &Actuation {
                steering: 3.0,
                acceleration: -7.0,
            },
            0.4,
            1.0,
        );
        assert_eq!(saturated, ActuatorCommand { steering: 1.0, throttle: -1.0 });
    }

    #[test]
    fn negative_scale_flips_wire_sign() {
        let left = Actuation {
            steering: 0.1,
            acceleration: 0.0,
        };
        let cmd = ActuatorCommand::from_actuation(&left, -0.4, 1.0);
        assert!((cmd.steering + 0.25).abs() < 1e-12);
        assert!((cmd.to_actuation(-0.4, 1.0).steering - 0.1).abs() < 1e-12);
        assert_eq!(ActuatorCommand::from_actuation(&Actuation { steering: -1.0, acceleration: 0.0 }, -0.4, 1.0).steering, 1.0);
    }
}
