use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// A recursive join-graph node. Each entry of `joined_tables` describes one
/// peripheral edge; the per-edge arrays (`join_keys_used`,
/// `other_join_keys_used`, `time_stamps_used`, `other_time_stamps_used`,
/// `upper_time_stamps_used`, `allow_lagged_targets`) run parallel to it.
/// Empty strings mean "no time stamp used on this side".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placeholder {
    pub name: String,

    #[serde(default)]
    pub joined_tables: Vec<Placeholder>,

    /// Join key names in this table (LEFT side), one per edge.
    #[serde(default)]
    pub join_keys_used: Vec<String>,

    /// Join key names in the joined table (RIGHT side), one per edge.
    #[serde(default)]
    pub other_join_keys_used: Vec<String>,

    /// Time stamp names in this table (LEFT side), one per edge.
    #[serde(default)]
    pub time_stamps_used: Vec<String>,

    /// Time stamp names in the joined table (RIGHT side), one per edge.
    #[serde(default)]
    pub other_time_stamps_used: Vec<String>,

    /// Upper time stamp names in the joined table, one per edge; bounds
    /// the validity of a peripheral row to `[ts, upper_ts)`.
    #[serde(default)]
    pub upper_time_stamps_used: Vec<String>,

    /// Whether the joined table's target columns may be aggregated
    /// (time-series lookback), one per edge.
    #[serde(default)]
    pub allow_lagged_targets: Vec<bool>,
}

impl Placeholder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            joined_tables: Vec::new(),
            join_keys_used: Vec::new(),
            other_join_keys_used: Vec::new(),
            time_stamps_used: Vec::new(),
            other_time_stamps_used: Vec::new(),
            upper_time_stamps_used: Vec::new(),
            allow_lagged_targets: Vec::new(),
        }
    }

    /// Adds one peripheral edge.
    pub fn join(
        mut self,
        joined: Placeholder,
        join_key: &str,
        other_join_key: &str,
        time_stamp: &str,
        other_time_stamp: &str,
        upper_time_stamp: &str,
    ) -> Self {
        self.joined_tables.push(joined);
        self.join_keys_used.push(join_key.to_string());
        self.other_join_keys_used.push(other_join_key.to_string());
        self.time_stamps_used.push(time_stamp.to_string());
        self.other_time_stamps_used.push(other_time_stamp.to_string());
        self.upper_time_stamps_used.push(upper_time_stamp.to_string());
        self.allow_lagged_targets.push(false);
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let placeholder: Placeholder = serde_json::from_str(json)?;
        placeholder.check_vector_length()?;
        Ok(placeholder)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn num_edges(&self) -> usize {
        self.joined_tables.len()
    }

    /// Every per-edge array must run parallel to `joined_tables`.
    pub fn check_vector_length(&self) -> Result<()> {
        let n = self.joined_tables.len();

        let check = |len: usize, field: &str| -> Result<()> {
            if len != n {
                return Err(EngineError::Schema(format!(
                    "{}: {} has length {}, expected {}",
                    self.name, field, len, n
                )));
            }
            Ok(())
        };

        check(self.join_keys_used.len(), "join_keys_used")?;
        check(self.other_join_keys_used.len(), "other_join_keys_used")?;
        check(self.time_stamps_used.len(), "time_stamps_used")?;
        check(self.other_time_stamps_used.len(), "other_time_stamps_used")?;
        check(self.upper_time_stamps_used.len(), "upper_time_stamps_used")?;

        if !self.allow_lagged_targets.is_empty() {
            check(self.allow_lagged_targets.len(), "allow_lagged_targets")?;
        }

        for joined in &self.joined_tables {
            joined.check_vector_length()?;
        }

        Ok(())
    }

    /// Makes sure every joined table is found among the peripheral names.
    pub fn check_data_model(&self, peripheral_names: &[String]) -> Result<()> {
        for joined in &self.joined_tables {
            if !peripheral_names.contains(&joined.name) {
                return Err(EngineError::Schema(format!(
                    "Peripheral table named '{}' not found",
                    joined.name
                )));
            }
            joined.check_data_model(peripheral_names)?;
        }
        Ok(())
    }

    pub fn allow_lagged(&self, edge: usize) -> bool {
        self.allow_lagged_targets.get(edge).copied().unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_round_trip() {
        let json = r#"{
            "name": "POPULATION",
            "joined_tables": [ { "name": "PERIPHERAL" } ],
            "join_keys_used": ["jk"],
            "other_join_keys_used": ["jk"],
            "time_stamps_used": ["ts"],
            "other_time_stamps_used": ["ts"],
            "upper_time_stamps_used": [""],
            "allow_lagged_targets": [false]
        }"#;
        let placeholder = Placeholder::from_json(json).unwrap();
        assert_eq!(placeholder.num_edges(), 1);
        let round_tripped =
            Placeholder::from_json(&placeholder.to_json().unwrap()).unwrap();
        assert_eq!(placeholder, round_tripped);
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let json = r#"{
            "name": "POPULATION",
            "joined_tables": [ { "name": "PERIPHERAL" } ],
            "join_keys_used": [],
            "other_join_keys_used": ["jk"],
            "time_stamps_used": ["ts"],
            "other_time_stamps_used": ["ts"],
            "upper_time_stamps_used": [""]
        }"#;
        assert!(matches!(
            Placeholder::from_json(json),
            Err(EngineError::Schema(_))
        ));
    }

    #[test]
    fn test_check_data_model() {
        let placeholder =
            Placeholder::new("POPULATION").join(Placeholder::new("P2"), "jk", "jk", "", "", "");
        assert!(placeholder
            .check_data_model(&["P1".to_string()])
            .is_err());
        assert!(placeholder
            .check_data_model(&["P2".to_string()])
            .is_ok());
    }
}
