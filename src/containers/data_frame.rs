use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

use crate::containers::column::{FloatColumn, IntColumn};
use crate::containers::view::DataFrameView;
use crate::error::{EngineError, Result};

// ============================================================================
// Join-key index
// ============================================================================

/// Mapping from a join-key value to the sorted list of rows carrying it.
/// Null keys (negative values) are excluded.
#[derive(Debug, Default)]
pub struct Index {
    map: HashMap<i32, Vec<usize>>,
}

impl Index {
    pub fn build(column: &IntColumn) -> Self {
        let mut map: HashMap<i32, Vec<usize>> = HashMap::new();
        for (row, &value) in column.data().iter().enumerate() {
            if value >= 0 {
                map.entry(value).or_default().push(row);
            }
        }
        Self { map }
    }

    /// Index restricted to `rows` (base row numbers, ascending).
    pub fn build_for_rows(column: &IntColumn, rows: &[usize]) -> Self {
        let mut map: HashMap<i32, Vec<usize>> = HashMap::new();
        for &row in rows {
            let value = column.get(row);
            if value >= 0 {
                map.entry(value).or_default().push(row);
            }
        }
        Self { map }
    }

    pub fn find(&self, join_key: i32) -> Option<&[usize]> {
        self.map.get(&join_key).map(|rows| rows.as_slice())
    }

    pub fn contains(&self, join_key: i32) -> bool {
        self.map.contains_key(&join_key)
    }

    pub fn num_keys(&self) -> usize {
        self.map.len()
    }
}

// ============================================================================
// DataFrame
// ============================================================================

/// An ordered collection of columns grouped by role. All columns have the
/// same row count; every join-key column carries an index kept consistent
/// with it. Construction is the only mutation point.
#[derive(Debug)]
pub struct DataFrame {
    name: String,
    categoricals: Vec<IntColumn>,
    discretes: Vec<FloatColumn>,
    join_keys: Vec<IntColumn>,
    numericals: Vec<FloatColumn>,
    targets: Vec<FloatColumn>,
    time_stamps: Vec<FloatColumn>,
    indices: Vec<Arc<Index>>,
    nrows: usize,
}

impl DataFrame {
    pub fn new(
        name: impl Into<String>,
        categoricals: Vec<IntColumn>,
        discretes: Vec<FloatColumn>,
        join_keys: Vec<IntColumn>,
        numericals: Vec<FloatColumn>,
        targets: Vec<FloatColumn>,
        time_stamps: Vec<FloatColumn>,
    ) -> Result<Self> {
        let name = name.into();

        let nrows = categoricals
            .iter()
            .map(|c| c.len())
            .chain(discretes.iter().map(|c| c.len()))
            .chain(join_keys.iter().map(|c| c.len()))
            .chain(numericals.iter().map(|c| c.len()))
            .chain(targets.iter().map(|c| c.len()))
            .chain(time_stamps.iter().map(|c| c.len()))
            .next()
            .unwrap_or(0);

        let check = |len: usize, col_name: &str| -> Result<()> {
            if len != nrows {
                return Err(EngineError::Schema(format!(
                    "{}.{}: length mismatch, expected {} rows, got {}",
                    name, col_name, nrows, len
                )));
            }
            Ok(())
        };

        for col in &categoricals {
            check(col.len(), col.name())?;
        }
        for col in &discretes {
            check(col.len(), col.name())?;
        }
        for col in &join_keys {
            check(col.len(), col.name())?;
        }
        for col in &numericals {
            check(col.len(), col.name())?;
        }
        for col in &targets {
            check(col.len(), col.name())?;
        }
        for col in &time_stamps {
            check(col.len(), col.name())?;
        }

        let indices = join_keys
            .iter()
            .map(|col| Arc::new(Index::build(col)))
            .collect();

        Ok(Self {
            name,
            categoricals,
            discretes,
            join_keys,
            numericals,
            targets,
            time_stamps,
            indices,
            nrows,
        })
    }

    // ------------------------------------------------------------------
    // Cell accessors (base rows)
    // ------------------------------------------------------------------

    #[inline]
    pub fn categorical(&self, row: usize, col: usize) -> i32 {
        self.categoricals[col].get(row)
    }

    #[inline]
    pub fn discrete(&self, row: usize, col: usize) -> f64 {
        self.discretes[col].get(row)
    }

    #[inline]
    pub fn numerical(&self, row: usize, col: usize) -> f64 {
        self.numericals[col].get(row)
    }

    #[inline]
    pub fn target(&self, row: usize, col: usize) -> f64 {
        self.targets[col].get(row)
    }

    #[inline]
    pub fn join_key(&self, row: usize, col: usize) -> i32 {
        self.join_keys[col].get(row)
    }

    #[inline]
    pub fn time_stamp(&self, row: usize, col: usize) -> f64 {
        self.time_stamps[col].get(row)
    }

    // ------------------------------------------------------------------
    // Schema accessors
    // ------------------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn num_categoricals(&self) -> usize {
        self.categoricals.len()
    }

    pub fn num_discretes(&self) -> usize {
        self.discretes.len()
    }

    pub fn num_join_keys(&self) -> usize {
        self.join_keys.len()
    }

    pub fn num_numericals(&self) -> usize {
        self.numericals.len()
    }

    pub fn num_targets(&self) -> usize {
        self.targets.len()
    }

    pub fn num_time_stamps(&self) -> usize {
        self.time_stamps.len()
    }

    pub fn categorical_col(&self, col: usize) -> &IntColumn {
        &self.categoricals[col]
    }

    pub fn discrete_col(&self, col: usize) -> &FloatColumn {
        &self.discretes[col]
    }

    pub fn numerical_col(&self, col: usize) -> &FloatColumn {
        &self.numericals[col]
    }

    pub fn target_col(&self, col: usize) -> &FloatColumn {
        &self.targets[col]
    }

    pub fn time_stamp_col(&self, col: usize) -> &FloatColumn {
        &self.time_stamps[col]
    }

    pub fn join_key_col(&self, col: usize) -> &IntColumn {
        &self.join_keys[col]
    }

    pub fn index(&self, join_key_col: usize) -> &Arc<Index> {
        &self.indices[join_key_col]
    }

    pub fn find_join_key(&self, name: &str) -> Option<usize> {
        self.join_keys.iter().position(|c| c.name() == name)
    }

    pub fn find_time_stamp(&self, name: &str) -> Option<usize> {
        self.time_stamps.iter().position(|c| c.name() == name)
    }

    /// Canonical description of the schema, used by the fingerprints.
    pub fn schema_value(&self) -> serde_json::Value {
        let describe = |cols: &[FloatColumn]| -> Vec<serde_json::Value> {
            cols.iter()
                .map(|c| json!({ "name": c.name(), "unit": c.unit() }))
                .collect()
        };
        let describe_int = |cols: &[IntColumn]| -> Vec<serde_json::Value> {
            cols.iter()
                .map(|c| json!({ "name": c.name(), "unit": c.unit() }))
                .collect()
        };

        json!({
            "name": self.name,
            "categoricals": describe_int(&self.categoricals),
            "discretes": describe(&self.discretes),
            "join_keys": describe_int(&self.join_keys),
            "numericals": describe(&self.numericals),
            "targets": describe(&self.targets),
            "time_stamps": describe(&self.time_stamps),
            "nrows": self.nrows,
        })
    }

    // ------------------------------------------------------------------
    // Subview construction
    // ------------------------------------------------------------------

    /// A view over all rows exposing the nominated join key and time
    /// stamps. The join-key index of the underlying frame is reused.
    pub fn create_subview(
        self: &Arc<Self>,
        join_key: &str,
        time_stamp: Option<&str>,
        upper_time_stamp: Option<&str>,
    ) -> Result<DataFrameView> {
        DataFrameView::new(Arc::clone(self)).create_subview(join_key, time_stamp, upper_time_stamp)
    }
}
