//! Overall confidence score aggregation
//!
//! Combines per-field match scores into one weighted confidence score in
//! [0, 100]. A field the model could not evaluate is excluded and the
//! remaining weights renormalized, so missing data neither drags the
//! average toward zero nor counts as a perfect match.

use crate::models::detection::MatchScores;

/// Field weights used when no plate score is available (sum 1.0)
#[derive(Debug, Clone, Copy)]
pub struct BaseWeights {
    pub brand: f64,
    pub model: f64,
    pub vehicle_type: f64,
    pub fuel_type: f64,
}

impl Default for BaseWeights {
    fn default() -> Self {
        Self {
            brand: 0.30,
            model: 0.30,
            vehicle_type: 0.25,
            fuel_type: 0.15,
        }
    }
}

/// Field weights used when a plate score is available (sum 1.0)
///
/// The plate is the strongest single piece of evidence when present, so it
/// carries the largest weight and the others shrink proportionally.
#[derive(Debug, Clone, Copy)]
pub struct PlateWeights {
    pub brand: f64,
    pub model: f64,
    pub vehicle_type: f64,
    pub fuel_type: f64,
    pub plate: f64,
}

impl Default for PlateWeights {
    fn default() -> Self {
        Self {
            brand: 0.20,
            model: 0.20,
            vehicle_type: 0.15,
            fuel_type: 0.10,
            plate: 0.35,
        }
    }
}

/// Score aggregator
///
/// Pure and stateless: the same `MatchScores` always yields the same
/// result. Weight tables are plain fields so tuning stays a visible,
/// testable code change.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreAggregator {
    pub base_weights: BaseWeights,
    pub plate_weights: PlateWeights,
}

impl ScoreAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute the weighted overall score, rounded to 2 decimal places
    ///
    /// Only present fields enter the weighted sum; the weight actually used
    /// is accumulated and the sum renormalized by it. All-absent input
    /// yields 0.0.
    pub fn aggregate(&self, scores: &MatchScores) -> f64 {
        let weighted: Vec<(Option<f64>, f64)> = if scores.plate.is_some() {
            vec![
                (scores.brand, self.plate_weights.brand),
                (scores.model, self.plate_weights.model),
                (scores.vehicle_type, self.plate_weights.vehicle_type),
                (scores.fuel_type, self.plate_weights.fuel_type),
                (scores.plate, self.plate_weights.plate),
            ]
        } else {
            vec![
                (scores.brand, self.base_weights.brand),
                (scores.model, self.base_weights.model),
                (scores.vehicle_type, self.base_weights.vehicle_type),
                (scores.fuel_type, self.base_weights.fuel_type),
            ]
        };

        let mut total = 0.0;
        let mut weight_used = 0.0;
        for (score, weight) in weighted {
            if let Some(value) = score {
                total += value * weight;
                weight_used += weight;
            }
        }

        if weight_used <= 0.0 {
            return 0.0;
        }

        round2(total / weight_used)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
