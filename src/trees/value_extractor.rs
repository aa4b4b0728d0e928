use crate::aggregations::DataUsed;
use crate::containers::{DataFrameView, Match};
use crate::holder::{SameUnits, Side};

/// Composes column accessors per `DataUsed` without materializing the
/// derived series: same-unit differences, time-stamp arithmetic and
/// subfeature lookups are evaluated per match.
pub struct ValueExtractor<'a> {
    population: &'a DataFrameView,
    peripheral: &'a DataFrameView,
    same_units: &'a SameUnits,
    /// Per subfeature, indexed by peripheral base row.
    subfeatures: &'a [Vec<f64>],
    /// Whether peripheral target columns are exposed as additional
    /// numerical columns (lagged targets).
    allow_lagged: bool,
}

impl<'a> ValueExtractor<'a> {
    pub fn new(
        population: &'a DataFrameView,
        peripheral: &'a DataFrameView,
        same_units: &'a SameUnits,
        subfeatures: &'a [Vec<f64>],
        allow_lagged: bool,
    ) -> Self {
        Self {
            population,
            peripheral,
            same_units,
            subfeatures,
            allow_lagged,
        }
    }

    pub fn population(&self) -> &DataFrameView {
        self.population
    }

    pub fn peripheral(&self) -> &DataFrameView {
        self.peripheral
    }

    pub fn same_units(&self) -> &SameUnits {
        self.same_units
    }

    pub fn num_numerical_columns(&self) -> usize {
        let df = self.peripheral.df();
        df.num_numericals() + if self.allow_lagged { df.num_targets() } else { 0 }
    }

    pub fn num_subfeatures(&self) -> usize {
        self.subfeatures.len()
    }

    /// The numerical value this (condition or aggregation) column takes
    /// on one match. Null categories map to NaN.
    pub fn numeric(&self, data_used: DataUsed, column: usize, m: &Match) -> f64 {
        let l = m.population_row as usize;
        let r = m.peripheral_row as usize;
        let df = self.peripheral.df();

        match data_used {
            DataUsed::NotApplicable => f64::NAN,

            DataUsed::Numerical => {
                if column < df.num_numericals() {
                    df.numerical(r, column)
                } else {
                    // Lagged target exposed behind the numerical columns.
                    df.target(r, column - df.num_numericals())
                }
            }

            DataUsed::Discrete => df.discrete(r, column),

            DataUsed::Categorical => {
                let category = df.categorical(r, column);
                if category < 0 {
                    f64::NAN
                } else {
                    category as f64
                }
            }

            DataUsed::SameUnitsNumerical | DataUsed::SameUnitsNumericalTs => {
                let pair = &self.same_units.numerical[column];
                let a = df.numerical(r, pair.peripheral_column);
                let b = match pair.other_side {
                    Side::Population => self.population.numerical(l, pair.other_column),
                    Side::Peripheral => df.numerical(r, pair.other_column),
                };
                a - b
            }

            DataUsed::SameUnitsDiscrete | DataUsed::SameUnitsDiscreteTs => {
                let pair = &self.same_units.discrete[column];
                let a = df.discrete(r, pair.peripheral_column);
                let b = match pair.other_side {
                    Side::Population => self.population.discrete(l, pair.other_column),
                    Side::Peripheral => df.discrete(r, pair.other_column),
                };
                a - b
            }

            DataUsed::SameUnitsCategorical => {
                let pair = &self.same_units.categorical[column];
                let a = df.categorical(r, pair.peripheral_column);
                let b = match pair.other_side {
                    Side::Population => self.population.categorical(l, pair.other_column),
                    Side::Peripheral => df.categorical(r, pair.other_column),
                };
                if a < 0 || b < 0 {
                    f64::NAN
                } else {
                    f64::from(u8::from(a == b))
                }
            }

            DataUsed::Subfeatures => self.subfeatures[column][r],

            DataUsed::TimeStampsDiff => {
                self.population.time_stamp(l) - self.peripheral.time_stamp_of_base(r)
            }

            DataUsed::TimeStampsWindow => {
                self.peripheral.upper_time_stamp_of_base(r) - self.population.time_stamp(l)
            }
        }
    }

    /// The raw category of a categorical condition column; -1 is null.
    pub fn category(&self, column: usize, m: &Match) -> i32 {
        self.peripheral.df().categorical(m.peripheral_row as usize, column)
    }

    /// The peripheral time stamp backing FIRST/LAST/AVG TIME BETWEEN.
    pub fn time_stamp(&self, m: &Match) -> f64 {
        self.peripheral.time_stamp_of_base(m.peripheral_row as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containers::{DataFrame, FloatColumn, IntColumn, Role};
    use crate::holder::identify_same_units;
    use std::sync::Arc;

    fn setup() -> (DataFrameView, DataFrameView, SameUnits) {
        let population = Arc::new(
            DataFrame::new(
                "POPULATION",
                vec![],
                vec![],
                vec![IntColumn::new("jk", Role::JoinKey, vec![1, 2, 3])],
                vec![FloatColumn::with_unit(
                    "x",
                    Role::Numerical,
                    "dollar",
                    vec![10.0, 20.0, 30.0],
                )],
                vec![],
                vec![FloatColumn::new("ts", Role::TimeStamp, vec![5.0, 6.0, 7.0])],
            )
            .unwrap(),
        );
        let peripheral = Arc::new(
            DataFrame::new(
                "PERIPHERAL",
                vec![],
                vec![],
                vec![IntColumn::new("jk", Role::JoinKey, vec![1, 1, 2, 2])],
                vec![FloatColumn::with_unit(
                    "x",
                    Role::Numerical,
                    "dollar",
                    vec![1.0, 2.0, 3.0, 4.0],
                )],
                vec![],
                vec![FloatColumn::new("ts", Role::TimeStamp, vec![1.0, 2.0, 3.0, 4.0])],
            )
            .unwrap(),
        );

        let same_units = identify_same_units(&population, &peripheral);
        let population_view = population.create_subview("jk", Some("ts"), None).unwrap();
        let peripheral_view = peripheral.create_subview("jk", Some("ts"), None).unwrap();
        (population_view, peripheral_view, same_units)
    }

    #[test]
    fn test_same_unit_difference() {
        let (population, peripheral, same_units) = setup();
        let extractor = ValueExtractor::new(&population, &peripheral, &same_units, &[], false);

        // Population row 0 (x = 10) against peripheral row 1 (x = 2).
        let m = Match {
            population_row: 0,
            peripheral_row: 1,
            category: -1,
        };
        assert_eq!(
            extractor.numeric(DataUsed::SameUnitsNumerical, 0, &m),
            2.0 - 10.0
        );
    }

    #[test]
    fn test_time_stamps_diff() {
        let (population, peripheral, same_units) = setup();
        let extractor = ValueExtractor::new(&population, &peripheral, &same_units, &[], false);
        let m = Match {
            population_row: 1,
            peripheral_row: 2,
            category: -1,
        };
        assert_eq!(extractor.numeric(DataUsed::TimeStampsDiff, 0, &m), 6.0 - 3.0);
    }

    #[test]
    fn test_subfeature_lookup() {
        let (population, peripheral, same_units) = setup();
        let subfeatures = vec![vec![0.0, 0.5, 1.0, 1.5]];
        let extractor =
            ValueExtractor::new(&population, &peripheral, &same_units, &subfeatures, false);
        let m = Match {
            population_row: 0,
            peripheral_row: 3,
            category: -1,
        };
        assert_eq!(extractor.numeric(DataUsed::Subfeatures, 0, &m), 1.5);
    }
}
