use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Unit marker for columns that may be compared but never aggregated as
/// levels (time stamps on different scales).
pub const COMPARISON_ONLY_UNIT: &str = "time stamp, comparison only";

/// The role a column plays inside a data frame. Fixed after construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Categorical,
    Discrete,
    Numerical,
    JoinKey,
    Target,
    TimeStamp,
    Text,
    Unused,
}

/// A named, typed, immutable sequence of cells. Storage is shared; clones
/// are cheap handles over the same data.
#[derive(Debug, Clone)]
pub struct Column<T> {
    name: String,
    unit: String,
    role: Role,
    data: Arc<Vec<T>>,
}

impl<T> Column<T> {
    pub fn new(name: impl Into<String>, role: Role, data: Vec<T>) -> Self {
        Self {
            name: name.into(),
            unit: String::new(),
            role,
            data: Arc::new(data),
        }
    }

    pub fn with_unit(
        name: impl Into<String>,
        role: Role,
        unit: impl Into<String>,
        data: Vec<T>,
    ) -> Self {
        Self {
            name: name.into(),
            unit: unit.into(),
            role,
            data: Arc::new(data),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    /// Columns carrying this unit may only participate in comparisons,
    /// never in level aggregations.
    pub fn is_comparison_only(&self) -> bool {
        self.unit.contains(COMPARISON_ONLY_UNIT)
    }

    /// Two columns are joinable for same-unit aggregations iff their units
    /// are equal and non-empty.
    pub fn shares_unit(&self, other: &Column<T>) -> bool {
        !self.unit.is_empty() && self.unit == other.unit
    }
}

impl<T: Copy> Column<T> {
    #[inline]
    pub fn get(&self, row: usize) -> T {
        self.data[row]
    }
}

pub type FloatColumn = Column<f64>;
pub type IntColumn = Column<i32>;
