// Hyperparameters for the feature learning engine.
//
// Deserializable from the JSON the request façade hands over; every field
// has a default so partial documents are accepted.

use serde::{Deserialize, Serialize};

use crate::aggregations::Aggregation;
use crate::error::{EngineError, Result};

fn default_num_features() -> usize {
    30
}

fn default_max_depth() -> usize {
    2
}

fn default_min_num_samples() -> usize {
    200
}

fn default_num_bins() -> usize {
    20
}

fn default_shrinkage() -> f64 {
    0.1
}

fn default_share_aggregations() -> f64 {
    1.0
}

fn default_seed() -> u64 {
    5843
}

fn default_loss_function() -> String {
    "SquareLoss".to_string()
}

fn default_aggregation() -> Vec<String> {
    Aggregation::all()
        .iter()
        .map(|agg| agg.to_str().to_string())
        .collect()
}

fn default_num_subfeatures() -> usize {
    10
}

fn default_use_timestamps() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    /// Number of features (trees) trained by the outer boosting loop.
    #[serde(default = "default_num_features")]
    pub num_features: usize,

    /// Maximum number of conditions committed per tree.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Minimum number of matches that must remain on either side of a
    /// committed split.
    #[serde(default = "default_min_num_samples")]
    pub min_num_samples: usize,

    /// Number of equal-width bins enumerated per numerical candidate column.
    #[serde(default = "default_num_bins")]
    pub num_bins: usize,

    /// Multiplier applied to every tree's update rate.
    #[serde(default = "default_shrinkage")]
    pub shrinkage: f64,

    /// Share of candidate trees kept per feature; the rest are dropped by
    /// the seeded RNG.
    #[serde(default = "default_share_aggregations")]
    pub share_aggregations: f64,

    /// L2 regularization on the tree weights.
    #[serde(default)]
    pub lambda: f64,

    /// Seed for all random draws; fit is bit-for-bit reproducible under a
    /// fixed seed and any worker count.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// "SquareLoss" or "CrossEntropyLoss".
    #[serde(default = "default_loss_function")]
    pub loss_function: String,

    /// Keep exactly one candidate tree per feature, cycling through the
    /// candidate list, instead of random subsampling.
    #[serde(default)]
    pub round_robin: bool,

    /// Aggregations the candidate builder may use.
    #[serde(default = "default_aggregation")]
    pub aggregation: Vec<String>,

    /// Number of trees per subfeature ensemble.
    #[serde(default = "default_num_subfeatures")]
    pub num_subfeatures: usize,

    /// When false, time stamps are ignored during matching and no
    /// time-stamp conditions are generated.
    #[serde(default = "default_use_timestamps")]
    pub use_timestamps: bool,

    /// Worker threads; 0 picks `max(2, available_parallelism / 2)`.
    #[serde(default)]
    pub num_threads: usize,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        serde_json::from_str("{}").expect("default hyperparameters")
    }
}

impl Hyperparameters {
    pub fn from_json(json: &str) -> Result<Self> {
        let hyperparameters: Hyperparameters = serde_json::from_str(json)?;
        hyperparameters.validate()?;
        Ok(hyperparameters)
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_features == 0 {
            return Err(EngineError::InvalidInput(
                "num_features must be positive".to_string(),
            ));
        }

        if self.num_bins == 0 {
            return Err(EngineError::InvalidInput(
                "num_bins must be positive".to_string(),
            ));
        }

        if self.min_num_samples == 0 {
            return Err(EngineError::InvalidInput(
                "min_num_samples must be positive".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.shrinkage) {
            return Err(EngineError::InvalidInput(format!(
                "shrinkage must be in [0, 1], got {}",
                self.shrinkage
            )));
        }

        if !(self.share_aggregations > 0.0 && self.share_aggregations <= 1.0) {
            return Err(EngineError::InvalidInput(format!(
                "share_aggregations must be in (0, 1], got {}",
                self.share_aggregations
            )));
        }

        if self.lambda < 0.0 {
            return Err(EngineError::InvalidInput(format!(
                "lambda must be non-negative, got {}",
                self.lambda
            )));
        }

        if self.loss_function != "SquareLoss" && self.loss_function != "CrossEntropyLoss" {
            return Err(EngineError::InvalidInput(format!(
                "unknown loss function: '{}'",
                self.loss_function
            )));
        }

        for agg in &self.aggregation {
            Aggregation::parse(agg)?;
        }

        Ok(())
    }

    /// Resolved worker count.
    pub fn resolve_num_threads(&self) -> usize {
        if self.num_threads > 0 {
            self.num_threads
        } else {
            std::cmp::max(2, num_cpus::get() / 2)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let hyperparameters = Hyperparameters::default();
        assert!(hyperparameters.validate().is_ok());
        assert_eq!(hyperparameters.num_features, 30);
        assert_eq!(hyperparameters.aggregation.len(), 13);
    }

    #[test]
    fn test_partial_json() {
        let hyperparameters =
            Hyperparameters::from_json(r#"{ "num_features": 5, "lambda": 0.5 }"#).unwrap();
        assert_eq!(hyperparameters.num_features, 5);
        assert_eq!(hyperparameters.lambda, 0.5);
        assert_eq!(hyperparameters.shrinkage, 0.1);
    }

    #[test]
    fn test_rejects_bad_loss() {
        let result = Hyperparameters::from_json(r#"{ "loss_function": "HingeLoss" }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_bad_aggregation() {
        let result = Hyperparameters::from_json(r#"{ "aggregation": ["avg"] }"#);
        assert!(matches!(result, Err(EngineError::UnknownAggregation(_))));
    }
}
