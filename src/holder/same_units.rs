use serde::{Deserialize, Serialize};

use crate::containers::DataFrame;

/// Which table supplies the second column of a same-unit pair. Pairs
/// spanning two distinct peripheral tables are meaningless under the
/// star-schema assumption and never generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Population,
    Peripheral,
}

/// Two columns sharing a non-empty unit, enabling aggregations such as
/// `AVG(t2.x - t1.y)`. The first column is always from the peripheral
/// side. `comparison_only` marks time-stamp units where only differences
/// are admissible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SameUnitPair {
    pub peripheral_column: usize,
    pub other_side: Side,
    pub other_column: usize,
    pub comparison_only: bool,
}

/// The three pair lists of one peripheral edge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SameUnits {
    pub categorical: Vec<SameUnitPair>,
    pub discrete: Vec<SameUnitPair>,
    pub numerical: Vec<SameUnitPair>,
}

impl SameUnits {
    /// Pair indices of the numerical list split by the comparison-only
    /// marker, preserving list order.
    pub fn numerical_indices(&self, comparison_only: bool) -> Vec<usize> {
        Self::indices(&self.numerical, comparison_only)
    }

    pub fn discrete_indices(&self, comparison_only: bool) -> Vec<usize> {
        Self::indices(&self.discrete, comparison_only)
    }

    fn indices(pairs: &[SameUnitPair], comparison_only: bool) -> Vec<usize> {
        pairs
            .iter()
            .enumerate()
            .filter(|(_, pair)| pair.comparison_only == comparison_only)
            .map(|(i, _)| i)
            .collect()
    }
}

/// Collects the same-unit pairs for one peripheral edge. Population-only
/// pairs are excluded by construction (the first column is peripheral);
/// within the peripheral, each unordered pair appears once.
pub fn identify_same_units(population: &DataFrame, peripheral: &DataFrame) -> SameUnits {
    let mut same_units = SameUnits::default();

    // Categorical
    for c in 0..peripheral.num_categoricals() {
        let col = peripheral.categorical_col(c);
        if col.unit().is_empty() {
            continue;
        }
        for pc in 0..population.num_categoricals() {
            if population.categorical_col(pc).unit() == col.unit() {
                same_units.categorical.push(SameUnitPair {
                    peripheral_column: c,
                    other_side: Side::Population,
                    other_column: pc,
                    comparison_only: col.is_comparison_only(),
                });
            }
        }
        for oc in c + 1..peripheral.num_categoricals() {
            if peripheral.categorical_col(oc).unit() == col.unit() {
                same_units.categorical.push(SameUnitPair {
                    peripheral_column: c,
                    other_side: Side::Peripheral,
                    other_column: oc,
                    comparison_only: col.is_comparison_only(),
                });
            }
        }
    }

    // Discrete
    for c in 0..peripheral.num_discretes() {
        let col = peripheral.discrete_col(c);
        if col.unit().is_empty() {
            continue;
        }
        for pc in 0..population.num_discretes() {
            if population.discrete_col(pc).unit() == col.unit() {
                same_units.discrete.push(SameUnitPair {
                    peripheral_column: c,
                    other_side: Side::Population,
                    other_column: pc,
                    comparison_only: col.is_comparison_only(),
                });
            }
        }
        for oc in c + 1..peripheral.num_discretes() {
            if peripheral.discrete_col(oc).unit() == col.unit() {
                same_units.discrete.push(SameUnitPair {
                    peripheral_column: c,
                    other_side: Side::Peripheral,
                    other_column: oc,
                    comparison_only: col.is_comparison_only(),
                });
            }
        }
    }

    // Numerical
    for c in 0..peripheral.num_numericals() {
        let col = peripheral.numerical_col(c);
        if col.unit().is_empty() {
            continue;
        }
        for pc in 0..population.num_numericals() {
            if population.numerical_col(pc).unit() == col.unit() {
                same_units.numerical.push(SameUnitPair {
                    peripheral_column: c,
                    other_side: Side::Population,
                    other_column: pc,
                    comparison_only: col.is_comparison_only(),
                });
            }
        }
        for oc in c + 1..peripheral.num_numericals() {
            if peripheral.numerical_col(oc).unit() == col.unit() {
                same_units.numerical.push(SameUnitPair {
                    peripheral_column: c,
                    other_side: Side::Peripheral,
                    other_column: oc,
                    comparison_only: col.is_comparison_only(),
                });
            }
        }
    }

    same_units
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containers::{FloatColumn, IntColumn, Role, COMPARISON_ONLY_UNIT};

    fn population() -> DataFrame {
        DataFrame::new(
            "POPULATION",
            vec![IntColumn::with_unit("color", Role::Categorical, "color", vec![0])],
            vec![],
            vec![IntColumn::new("jk", Role::JoinKey, vec![0])],
            vec![
                FloatColumn::with_unit("budget", Role::Numerical, "dollar", vec![1.0]),
                FloatColumn::with_unit("height", Role::Numerical, "meter", vec![2.0]),
            ],
            vec![],
            vec![],
        )
        .unwrap()
    }

    fn peripheral() -> DataFrame {
        DataFrame::new(
            "PERIPHERAL",
            vec![IntColumn::with_unit("hue", Role::Categorical, "color", vec![0])],
            vec![],
            vec![IntColumn::new("jk", Role::JoinKey, vec![0])],
            vec![
                FloatColumn::with_unit("price", Role::Numerical, "dollar", vec![1.0]),
                FloatColumn::with_unit("fee", Role::Numerical, "dollar", vec![2.0]),
                FloatColumn::with_unit(
                    "shipped",
                    Role::Numerical,
                    COMPARISON_ONLY_UNIT,
                    vec![3.0],
                ),
                FloatColumn::with_unit(
                    "delivered",
                    Role::Numerical,
                    COMPARISON_ONLY_UNIT,
                    vec![4.0],
                ),
            ],
            vec![],
            vec![],
        )
        .unwrap()
    }

    #[test]
    fn test_pairs_are_peripheral_first_and_deduplicated() {
        let same_units = identify_same_units(&population(), &peripheral());

        // price-budget, fee-budget across tables; price-fee within the
        // peripheral exactly once; shipped-delivered as comparison only.
        assert_eq!(same_units.numerical.len(), 4);
        assert_eq!(
            same_units.numerical[0],
            SameUnitPair {
                peripheral_column: 0,
                other_side: Side::Population,
                other_column: 0,
                comparison_only: false,
            }
        );
        assert_eq!(
            same_units.numerical[1],
            SameUnitPair {
                peripheral_column: 0,
                other_side: Side::Peripheral,
                other_column: 1,
                comparison_only: false,
            }
        );
        assert_eq!(
            same_units.numerical[2],
            SameUnitPair {
                peripheral_column: 1,
                other_side: Side::Population,
                other_column: 0,
                comparison_only: false,
            }
        );
        assert!(same_units.numerical[3].comparison_only);
        assert_eq!(same_units.numerical[3].peripheral_column, 2);
        assert_eq!(same_units.numerical[3].other_column, 3);

        assert_eq!(same_units.categorical.len(), 1);
        assert_eq!(same_units.categorical[0].other_side, Side::Population);
    }

    #[test]
    fn test_index_split_by_comparison_only() {
        let same_units = identify_same_units(&population(), &peripheral());
        assert_eq!(same_units.numerical_indices(false), vec![0, 1, 2]);
        assert_eq!(same_units.numerical_indices(true), vec![3]);
    }
}
