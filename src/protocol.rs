//! Wire messages exchanged with the simulator.
//!
//! Frames are socket.io event packets: the prefix `42` followed by a JSON
//! array `[event, data]`. A `42` frame without usable data means the vehicle
//! is under manual control.

use log::debug;
use nalgebra::Point2;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::MpcError;
use crate::model::ActuatorCommand;
use crate::transform::Pose;

const EVENT_PREFIX: &str = "42";

/// Reply to a frame that carries no telemetry.
pub const MANUAL_FRAME: &str = r#"42["manual",{}]"#;
/// Sent once when a simulator connects.
pub const RESET_FRAME: &str = r#"42["reset",{}]"#;

/// Pose, speed and upcoming waypoints of one vehicle, in the map frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Telemetry {
    #[serde(alias = "waypoints_x")]
    pub ptsx: Vec<f64>,
    #[serde(alias = "waypoints_y")]
    pub ptsy: Vec<f64>,
    pub x: f64,
    pub y: f64,
    /// Heading in radians.
    #[serde(alias = "heading")]
    pub psi: f64,
    pub speed: f64,
    /// Currently applied steering, normalised to `[-1, 1]`.
    #[serde(default)]
    pub steering_angle: f64,
    /// Currently applied throttle, normalised to `[-1, 1]`.
    #[serde(default)]
    pub throttle: f64,
}

impl Telemetry {
    pub fn from_value(data: Value) -> Result<Self, MpcError> {
        let telemetry: Telemetry =
            serde_json::from_value(data).map_err(|e| MpcError::InputValidation(e.to_string()))?;
        telemetry.validate()?;
        Ok(telemetry)
    }

    pub fn validate(&self) -> Result<(), MpcError> {
        if self.ptsx.len() != self.ptsy.len() {
            return Err(MpcError::InputValidation(format!(
                "waypoint lengths differ: {} x values, {} y values",
                self.ptsx.len(),
                self.ptsy.len()
            )));
        }
        let scalars = [
            ("x", self.x),
            ("y", self.y),
            ("psi", self.psi),
            ("speed", self.speed),
            ("steering_angle", self.steering_angle),
            ("throttle", self.throttle),
        ];
        if let Some((name, value)) = scalars.iter().find(|(_, v)| !v.is_finite()) {
            return Err(MpcError::InputValidation(format!("{name} is not finite: {value}")));
        }
        if self.ptsx.iter().chain(&self.ptsy).any(|v| !v.is_finite()) {
            return Err(MpcError::InputValidation("non-finite waypoint".into()));
        }
        Ok(())
    }

    pub fn pose(&self) -> Pose {
        Pose::new(self.x, self.y, self.psi)
    }

    pub fn waypoints(&self) -> Vec<Point2<f64>> {
        self.ptsx
            .iter()
            .zip(&self.ptsy)
            .map(|(&x, &y)| Point2::new(x, y))
            .collect()
    }

    /// The command the vehicle is executing while this telemetry was taken.
    pub fn applied_command(&self) -> ActuatorCommand {
        ActuatorCommand {
            steering: self.steering_angle,
            throttle: self.throttle,
        }
    }
}

/// A decoded `42` frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Manual,
    Event { name: String, data: Value },
}

/// Decodes one frame. Frames of other packet types are ignored.
pub fn decode_frame(line: &str) -> Result<Option<Frame>, MpcError> {
    let line = line.trim();
    let Some(body) = line.strip_prefix(EVENT_PREFIX) else {
        debug!("ignoring non-event frame of {} bytes", line.len());
        return Ok(None);
    };
    let Some(payload) = event_payload(body) else {
        return Ok(Some(Frame::Manual));
    };

    let (name, data): (String, Value) =
        serde_json::from_str(payload).map_err(|e| MpcError::InputValidation(e.to_string()))?;
    Ok(Some(Frame::Event { name, data }))
}

/// The `[event, {...}]` part of a frame body, or `None` in manual mode.
fn event_payload(body: &str) -> Option<&str> {
    if body.contains("null") {
        return None;
    }
    let start = body.find('[')?;
    let end = body.rfind("}]")?;
    (start < end).then(|| &body[start..end + 2])
}

/// Actuation and display paths sent back for one tick.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct SteerMessage {
    pub steering_angle: f64,
    pub throttle: f64,
    /// Predicted path (vehicle frame).
    pub mpc_x: Vec<f64>,
    pub mpc_y: Vec<f64>,
    /// Reference line (vehicle frame).
    pub next_x: Vec<f64>,
    pub next_y: Vec<f64>,
}

impl SteerMessage {
    pub fn new(command: &ActuatorCommand, predicted: &[Point2<f64>], reference: &[Point2<f64>]) -> Self {
        let (mpc_x, mpc_y) = predicted.iter().map(|p| (p.x, p.y)).unzip();
        let (next_x, next_y) = reference.iter().map(|p| (p.x, p.y)).unzip();
        Self {
            steering_angle: command.steering,
            throttle: command.throttle,
            mpc_x,
            mpc_y,
            next_x,
            next_y,
        }
    }

    pub fn to_frame(&self) -> String {
        let packet = json!([
            "steer",
            {
                "steering_angle": self.steering_angle,
                "throttle": self.throttle,
                "mpc_x": self.mpc_x,
                "mpc_y": self.mpc_y,
                "next_x": self.next_x,
                "next_y": self.next_y,
            }
        ]);
        format!("{EVENT_PREFIX}{packet}")
    }
}
