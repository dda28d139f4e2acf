use crate::solver::SolverSettings;

/// Penalty parameter schedule for the augmented Lagrangian.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PenaltyAdapter {
    pub growth: f64,
    pub penalty_max: f64,
    /// Fraction of the previous violation the new one must fall below.
    pub sufficient_reduction: f64,
}

impl Default for PenaltyAdapter {
    fn default() -> Self {
        Self::from(&SolverSettings::default())
    }
}

impl From<&SolverSettings> for PenaltyAdapter {
    fn from(settings: &SolverSettings) -> Self {
        Self {
            growth: settings.penalty_growth,
            penalty_max: settings.max_penalty,
            sufficient_reduction: settings.sufficient_reduction,
        }
    }
}

impl PenaltyAdapter {
    /// Keeps the penalty while the violation shrinks fast enough, grows it
    /// up to `penalty_max` otherwise.
    pub fn next_penalty(&self, previous_violation: f64, violation: f64, penalty: f64) -> f64 {
        if violation <= self.sufficient_reduction * previous_violation {
            return penalty;
        }
        (penalty * self.growth).min(self.penalty_max)
    }
}
