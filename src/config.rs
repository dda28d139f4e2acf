use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::MpcError;

// Reference tuning
const DEFAULT_HORIZON: usize = 10;
const DEFAULT_DT: f64 = 0.1;
const DEFAULT_LF: f64 = 2.67;
const DEFAULT_MAX_STEERING: f64 = 0.436332; // 25 degrees
const DEFAULT_MAX_ACCELERATION: f64 = 1.0;
const DEFAULT_REFERENCE_SPEED: f64 = 16.0;
const DEFAULT_LATENCY_MS: u64 = 100;
const DEFAULT_SOLVER_TIME_BUDGET: f64 = 0.5;
const MAX_SOLVER_TIME_BUDGET: f64 = 3600.0;
const DEFAULT_POLYNOMIAL_DEGREE: usize = 3;
const DEFAULT_REFERENCE_POINTS: usize = 25;
const DEFAULT_REFERENCE_SPACING: f64 = 2.5;

/// Weights of the quadratic cost terms.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct CostWeights {
    pub cte: f64,
    pub epsi: f64,
    pub speed: f64,
    pub steering: f64,
    pub acceleration: f64,
    pub steering_rate: f64,
    pub acceleration_rate: f64,
}

impl Default for CostWeights {
    fn default() -> Self {
        Self {
            cte: 2000.0,
            epsi: 2000.0,
            speed: 1.0,
            steering: 5.0,
            acceleration: 5.0,
            steering_rate: 200.0,
            acceleration_rate: 10.0,
        }
    }
}

impl CostWeights {
    fn named(&self) -> [(&'static str, f64); 7] {
        [
            ("cte", self.cte),
            ("epsi", self.epsi),
            ("speed", self.speed),
            ("steering", self.steering),
            ("acceleration", self.acceleration),
            ("steering_rate", self.steering_rate),
            ("acceleration_rate", self.acceleration_rate),
        ]
    }
}

/// What a session emits when the solver fails to produce a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Repeat the previous command, or neutral if there is none.
    #[default]
    Hold,
    /// Keep the previous steering and apply full brake.
    Brake,
    /// Zero steering and zero throttle.
    Neutral,
}

/// Sign of the steering value on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SteeringConvention {
    /// Positive steers counter-clockwise, as in the vehicle model.
    #[default]
    LeftPositive,
    /// Positive steers clockwise, as the Udacity simulator expects.
    RightPositive,
}

impl SteeringConvention {
    pub fn sign(self) -> f64 {
        match self {
            SteeringConvention::LeftPositive => 1.0,
            SteeringConvention::RightPositive => -1.0,
        }
    }
}

/// Process-wide controller tuning, fixed after startup.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MpcConfig {
    /// Number of prediction steps `N`.
    pub horizon: usize,
    /// Seconds per prediction step.
    pub dt: f64,
    /// Distance from the centre of gravity to the front axle (m).
    pub lf: f64,
    /// Steering bound in radians, symmetric around zero.
    pub max_steering: f64,
    pub steering_convention: SteeringConvention,
    /// Acceleration bound, symmetric around zero.
    pub max_acceleration: f64,
    /// Target cruise speed.
    pub reference_speed: f64,
    pub weights: CostWeights,
    /// Delay between deciding on a command and its effect.
    pub latency_ms: u64,
    /// Wall-clock budget of one solve, in seconds.
    pub solver_time_budget: f64,
    pub polynomial_degree: usize,
    /// Number of samples in the displayed reference line.
    pub reference_points: usize,
    /// Spacing (m) between reference line samples.
    pub reference_spacing: f64,
    pub fallback: FallbackPolicy,
}

impl Default for MpcConfig {
    fn default() -> Self {
        Self {
            horizon: DEFAULT_HORIZON,
            dt: DEFAULT_DT,
            lf: DEFAULT_LF,
            max_steering: DEFAULT_MAX_STEERING,
            steering_convention: SteeringConvention::default(),
            max_acceleration: DEFAULT_MAX_ACCELERATION,
            reference_speed: DEFAULT_REFERENCE_SPEED,
            weights: CostWeights::default(),
            latency_ms: DEFAULT_LATENCY_MS,
            solver_time_budget: DEFAULT_SOLVER_TIME_BUDGET,
            polynomial_degree: DEFAULT_POLYNOMIAL_DEGREE,
            reference_points: DEFAULT_REFERENCE_POINTS,
            reference_spacing: DEFAULT_REFERENCE_SPACING,
            fallback: FallbackPolicy::default(),
        }
    }
}

impl MpcConfig {
    /// Parses and validates a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, MpcError> {
        let config: MpcConfig =
            toml::from_str(s).map_err(|e| MpcError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, MpcError> {
        let path = path.as_ref();
        let s = fs::read_to_string(path)
            .map_err(|e| MpcError::Config(format!("unable to read {}: {e}", path.display())))?;
        Self::from_toml_str(&s)
    }

    pub fn validate(&self) -> Result<(), MpcError> {
        if self.horizon < 2 {
            return Err(MpcError::Config(format!(
                "horizon must be at least 2, got {}",
                self.horizon
            )));
        }
        if self.polynomial_degree == 0 {
            return Err(MpcError::Config("polynomial_degree must be at least 1".into()));
        }

        let positive = [
            ("dt", self.dt),
            ("lf", self.lf),
            ("max_steering", self.max_steering),
            ("max_acceleration", self.max_acceleration),
            ("solver_time_budget", self.solver_time_budget),
            ("reference_spacing", self.reference_spacing),
        ];
        for (name, value) in positive.into_iter().chain(self.weights.named()) {
            if !(value.is_finite() && value > 0.0) {
                return Err(MpcError::Config(format!(
                    "{name} must be finite and strictly positive, got {value}"
                )));
            }
        }
        if self.solver_time_budget > MAX_SOLVER_TIME_BUDGET {
            return Err(MpcError::Config(format!(
                "solver_time_budget must not exceed {MAX_SOLVER_TIME_BUDGET} s, got {}",
                self.solver_time_budget
            )));
        }
        self.time_budget()?;
        if !self.reference_speed.is_finite() {
            return Err(MpcError::Config("reference_speed must be finite".into()));
        }
        Ok(())
    }

    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }

    pub fn time_budget(&self) -> Result<Duration, MpcError> {
        Duration::try_from_secs_f64(self.solver_time_budget).map_err(|e| {
            MpcError::Config(format!(
                "solver_time_budget {} is not a valid duration: {e}",
                self.solver_time_budget
            ))
        })
    }

    /// Radians per unit of wire steering, signed by the steering convention.
    pub fn steering_scale(&self) -> f64 {
        self.steering_convention.sign() * self.max_steering
    }
}
