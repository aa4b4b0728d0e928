use serde::{Deserialize, Serialize};

use crate::containers::data_frame::DataFrame;

/// Column names of one table, grouped by role. Captured at fit time so
/// the serialized ensemble can render SQL without the data frames.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub categoricals: Vec<String>,
    pub discretes: Vec<String>,
    pub join_keys: Vec<String>,
    pub numericals: Vec<String>,
    pub targets: Vec<String>,
    pub time_stamps: Vec<String>,
}

impl TableSchema {
    pub fn from_data_frame(df: &DataFrame) -> Self {
        Self {
            name: df.name().to_string(),
            categoricals: (0..df.num_categoricals())
                .map(|j| df.categorical_col(j).name().to_string())
                .collect(),
            discretes: (0..df.num_discretes())
                .map(|j| df.discrete_col(j).name().to_string())
                .collect(),
            join_keys: (0..df.num_join_keys())
                .map(|j| df.join_key_col(j).name().to_string())
                .collect(),
            numericals: (0..df.num_numericals())
                .map(|j| df.numerical_col(j).name().to_string())
                .collect(),
            targets: (0..df.num_targets())
                .map(|j| df.target_col(j).name().to_string())
                .collect(),
            time_stamps: (0..df.num_time_stamps())
                .map(|j| df.time_stamp_col(j).name().to_string())
                .collect(),
        }
    }

    /// Numerical column name, with lagged targets exposed behind the
    /// numerical columns.
    pub fn numerical_name(&self, column: usize) -> &str {
        if column < self.numericals.len() {
            &self.numericals[column]
        } else {
            &self.targets[column - self.numericals.len()]
        }
    }
}
