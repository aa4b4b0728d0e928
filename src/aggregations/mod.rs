// Aggregation library. An aggregation is a pure description of how
// per-population-row statistics change as matches enter and leave the
// aggregated set; the accumulator does the bookkeeping. The `DataUsed`
// tag identifies which side and role supplies the aggregated (or
// compared) value.

pub mod accumulator;

pub use accumulator::AggAccumulator;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

// ============================================================================
// Aggregation
// ============================================================================

/// Aggregation functions supported by the feature learner. The string
/// grammar is stable and case-sensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Aggregation {
    Avg,
    AvgTimeBetween,
    Count,
    CountDistinct,
    CountMinusCountDistinct,
    First,
    Last,
    Max,
    Median,
    Min,
    Stddev,
    Sum,
    Var,
}

impl Aggregation {
    pub const AVG: &'static str = "AVG";
    pub const AVG_TIME_BETWEEN: &'static str = "AVG TIME BETWEEN";
    pub const COUNT: &'static str = "COUNT";
    pub const COUNT_DISTINCT: &'static str = "COUNT DISTINCT";
    pub const COUNT_MINUS_COUNT_DISTINCT: &'static str = "COUNT MINUS COUNT DISTINCT";
    pub const FIRST: &'static str = "FIRST";
    pub const LAST: &'static str = "LAST";
    pub const MAX: &'static str = "MAX";
    pub const MEDIAN: &'static str = "MEDIAN";
    pub const MIN: &'static str = "MIN";
    pub const STDDEV: &'static str = "STDDEV";
    pub const SUM: &'static str = "SUM";
    pub const VAR: &'static str = "VAR";

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            Self::AVG => Ok(Aggregation::Avg),
            Self::AVG_TIME_BETWEEN => Ok(Aggregation::AvgTimeBetween),
            Self::COUNT => Ok(Aggregation::Count),
            Self::COUNT_DISTINCT => Ok(Aggregation::CountDistinct),
            Self::COUNT_MINUS_COUNT_DISTINCT => Ok(Aggregation::CountMinusCountDistinct),
            Self::FIRST => Ok(Aggregation::First),
            Self::LAST => Ok(Aggregation::Last),
            Self::MAX => Ok(Aggregation::Max),
            Self::MEDIAN => Ok(Aggregation::Median),
            Self::MIN => Ok(Aggregation::Min),
            Self::STDDEV => Ok(Aggregation::Stddev),
            Self::SUM => Ok(Aggregation::Sum),
            Self::VAR => Ok(Aggregation::Var),
            _ => Err(EngineError::UnknownAggregation(s.to_string())),
        }
    }

    pub fn to_str(self) -> &'static str {
        match self {
            Aggregation::Avg => Self::AVG,
            Aggregation::AvgTimeBetween => Self::AVG_TIME_BETWEEN,
            Aggregation::Count => Self::COUNT,
            Aggregation::CountDistinct => Self::COUNT_DISTINCT,
            Aggregation::CountMinusCountDistinct => Self::COUNT_MINUS_COUNT_DISTINCT,
            Aggregation::First => Self::FIRST,
            Aggregation::Last => Self::LAST,
            Aggregation::Max => Self::MAX,
            Aggregation::Median => Self::MEDIAN,
            Aggregation::Min => Self::MIN,
            Aggregation::Stddev => Self::STDDEV,
            Aggregation::Sum => Self::SUM,
            Aggregation::Var => Self::VAR,
        }
    }

    pub fn all() -> &'static [Aggregation] {
        &[
            Aggregation::Avg,
            Aggregation::AvgTimeBetween,
            Aggregation::Count,
            Aggregation::CountDistinct,
            Aggregation::CountMinusCountDistinct,
            Aggregation::First,
            Aggregation::Last,
            Aggregation::Max,
            Aggregation::Median,
            Aggregation::Min,
            Aggregation::Stddev,
            Aggregation::Sum,
            Aggregation::Var,
        ]
    }

    /// FIRST, LAST and AVG TIME BETWEEN are undefined without a peripheral
    /// time stamp.
    pub fn needs_time_stamps(self) -> bool {
        matches!(
            self,
            Aggregation::AvgTimeBetween | Aggregation::First | Aggregation::Last
        )
    }

    /// COUNT and AVG TIME BETWEEN aggregate rows, not values.
    pub fn needs_value(self) -> bool {
        !matches!(self, Aggregation::Count | Aggregation::AvgTimeBetween)
    }
}

impl From<Aggregation> for String {
    fn from(agg: Aggregation) -> Self {
        agg.to_str().to_string()
    }
}

impl TryFrom<String> for Aggregation {
    type Error = EngineError;

    fn try_from(s: String) -> Result<Self> {
        Aggregation::parse(&s)
    }
}

// ============================================================================
// DataUsed
// ============================================================================

/// Which side and role supplies the value of a split condition or an
/// aggregated value. Declaration order is the tie-break ordinal for the
/// split search.
///
/// The string grammar is stable; `time_stamps_diff` and
/// `time_stamps_window` are internal condition tags accepted by the
/// parser so serialized splits round-trip.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(into = "String", try_from = "String")]
pub enum DataUsed {
    Categorical,
    Discrete,
    NotApplicable,
    Numerical,
    SameUnitsCategorical,
    SameUnitsDiscrete,
    SameUnitsDiscreteTs,
    SameUnitsNumerical,
    SameUnitsNumericalTs,
    Subfeatures,
    TimeStampsDiff,
    TimeStampsWindow,
}

impl DataUsed {
    pub const CATEGORICAL: &'static str = "categorical";
    pub const DISCRETE: &'static str = "discrete";
    pub const NOT_APPLICABLE: &'static str = "na";
    pub const NUMERICAL: &'static str = "numerical";
    pub const SAME_UNITS_CATEGORICAL: &'static str = "same_units_categorical";
    pub const SAME_UNITS_DISCRETE: &'static str = "same_units_discrete";
    pub const SAME_UNITS_DISCRETE_TS: &'static str = "same_units_discrete_ts";
    pub const SAME_UNITS_NUMERICAL: &'static str = "same_units_numerical";
    pub const SAME_UNITS_NUMERICAL_TS: &'static str = "same_units_numerical_ts";
    pub const SUBFEATURES: &'static str = "subfeatures";
    pub const TIME_STAMPS_DIFF: &'static str = "time_stamps_diff";
    pub const TIME_STAMPS_WINDOW: &'static str = "time_stamps_window";

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            Self::CATEGORICAL => Ok(DataUsed::Categorical),
            Self::DISCRETE => Ok(DataUsed::Discrete),
            Self::NOT_APPLICABLE => Ok(DataUsed::NotApplicable),
            Self::NUMERICAL => Ok(DataUsed::Numerical),
            Self::SAME_UNITS_CATEGORICAL => Ok(DataUsed::SameUnitsCategorical),
            Self::SAME_UNITS_DISCRETE => Ok(DataUsed::SameUnitsDiscrete),
            Self::SAME_UNITS_DISCRETE_TS => Ok(DataUsed::SameUnitsDiscreteTs),
            Self::SAME_UNITS_NUMERICAL => Ok(DataUsed::SameUnitsNumerical),
            Self::SAME_UNITS_NUMERICAL_TS => Ok(DataUsed::SameUnitsNumericalTs),
            Self::SUBFEATURES => Ok(DataUsed::Subfeatures),
            Self::TIME_STAMPS_DIFF => Ok(DataUsed::TimeStampsDiff),
            Self::TIME_STAMPS_WINDOW => Ok(DataUsed::TimeStampsWindow),
            _ => Err(EngineError::UnknownDataUsed(s.to_string())),
        }
    }

    pub fn to_str(self) -> &'static str {
        match self {
            DataUsed::Categorical => Self::CATEGORICAL,
            DataUsed::Discrete => Self::DISCRETE,
            DataUsed::NotApplicable => Self::NOT_APPLICABLE,
            DataUsed::Numerical => Self::NUMERICAL,
            DataUsed::SameUnitsCategorical => Self::SAME_UNITS_CATEGORICAL,
            DataUsed::SameUnitsDiscrete => Self::SAME_UNITS_DISCRETE,
            DataUsed::SameUnitsDiscreteTs => Self::SAME_UNITS_DISCRETE_TS,
            DataUsed::SameUnitsNumerical => Self::SAME_UNITS_NUMERICAL,
            DataUsed::SameUnitsNumericalTs => Self::SAME_UNITS_NUMERICAL_TS,
            DataUsed::Subfeatures => Self::SUBFEATURES,
            DataUsed::TimeStampsDiff => Self::TIME_STAMPS_DIFF,
            DataUsed::TimeStampsWindow => Self::TIME_STAMPS_WINDOW,
        }
    }

    pub fn is_categorical(self) -> bool {
        matches!(self, DataUsed::Categorical | DataUsed::SameUnitsCategorical)
    }

    pub fn is_same_units(self) -> bool {
        matches!(
            self,
            DataUsed::SameUnitsCategorical
                | DataUsed::SameUnitsDiscrete
                | DataUsed::SameUnitsDiscreteTs
                | DataUsed::SameUnitsNumerical
                | DataUsed::SameUnitsNumericalTs
        )
    }
}

impl From<DataUsed> for String {
    fn from(data_used: DataUsed) -> Self {
        data_used.to_str().to_string()
    }
}

impl TryFrom<String> for DataUsed {
    type Error = EngineError;

    fn try_from(s: String) -> Result<Self> {
        DataUsed::parse(&s)
    }
}
