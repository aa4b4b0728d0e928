use serde::{Deserialize, Serialize};

use crate::aggregations::DataUsed;

/// One predicate on one column. A split is total: every match is either
/// on the predicate-true side ("left") or the false side. Numerical
/// predicates are `value <= critical_value` (NaN falls right),
/// categorical predicates are `category in categories_used` (null falls
/// right), and `is_nan` marks the NaN-dummy predicate.
///
/// `keep_left` records which side stays inside the aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Split {
    pub data_used: DataUsed,

    /// Peripheral column, same-unit pair index or subfeature index,
    /// depending on `data_used`.
    #[serde(default)]
    pub column: usize,

    /// Population-side column for same-unit pairs resolved at emission
    /// time; unused otherwise.
    #[serde(default)]
    pub column_input: usize,

    #[serde(default)]
    pub critical_value: f64,

    /// Sorted member set for categorical predicates.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories_used: Vec<i32>,

    #[serde(default)]
    pub is_nan: bool,

    pub keep_left: bool,
}

impl Split {
    pub fn numerical(
        data_used: DataUsed,
        column: usize,
        critical_value: f64,
        keep_left: bool,
    ) -> Self {
        Self {
            data_used,
            column,
            column_input: 0,
            critical_value,
            categories_used: Vec::new(),
            is_nan: false,
            keep_left,
        }
    }

    pub fn nan_dummy(data_used: DataUsed, column: usize, keep_left: bool) -> Self {
        Self {
            data_used,
            column,
            column_input: 0,
            critical_value: 0.0,
            categories_used: Vec::new(),
            is_nan: true,
            keep_left,
        }
    }

    pub fn categorical(column: usize, mut categories_used: Vec<i32>, keep_left: bool) -> Self {
        categories_used.sort_unstable();
        Self {
            data_used: DataUsed::Categorical,
            column,
            column_input: 0,
            critical_value: 0.0,
            categories_used,
            is_nan: false,
            keep_left,
        }
    }

    pub fn is_categorical(&self) -> bool {
        !self.categories_used.is_empty()
    }

    /// Predicate over a numerical condition value. Non-finite values
    /// are only caught by the NaN-dummy predicate; they never satisfy a
    /// threshold.
    #[inline]
    pub fn passes_value(&self, value: f64) -> bool {
        if !value.is_finite() {
            return self.is_nan;
        }
        if self.is_nan {
            false
        } else {
            value <= self.critical_value
        }
    }

    /// Predicate over a category.
    #[inline]
    pub fn passes_category(&self, category: i32) -> bool {
        if self.is_nan {
            category < 0
        } else {
            category >= 0 && self.categories_used.binary_search(&category).is_ok()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numerical_predicate_sends_nan_right() {
        let split = Split::numerical(DataUsed::Numerical, 0, 1.5, true);
        assert!(split.passes_value(1.5));
        assert!(!split.passes_value(2.0));
        assert!(!split.passes_value(f64::NAN));
    }

    #[test]
    fn test_nan_dummy_predicate() {
        let split = Split::nan_dummy(DataUsed::Numerical, 0, true);
        assert!(split.passes_value(f64::NAN));
        assert!(!split.passes_value(0.0));
    }

    #[test]
    fn test_categorical_membership() {
        let split = Split::categorical(0, vec![5, 1, 3], true);
        assert_eq!(split.categories_used, vec![1, 3, 5]);
        assert!(split.passes_category(3));
        assert!(!split.passes_category(2));
        assert!(!split.passes_category(-1));
    }

    #[test]
    fn test_serde_round_trip() {
        let split = Split::categorical(2, vec![1, 9], false);
        let json = serde_json::to_string(&split).unwrap();
        let back: Split = serde_json::from_str(&json).unwrap();
        assert_eq!(split, back);
    }
}
