use std::sync::Arc;

use crate::containers::data_frame::{DataFrame, Index};
use crate::error::{EngineError, Result};
use crate::multithreading::partition_range;

/// A data frame plus a shared, immutable, sorted list of row indices into
/// it, optionally exposing one nominated join key and time stamp pair.
/// Views never copy cells; clones share the underlying storage.
#[derive(Debug, Clone)]
pub struct DataFrameView {
    df: Arc<DataFrame>,
    rows: Option<Arc<Vec<usize>>>,
    join_key_col: Option<usize>,
    time_stamp_col: Option<usize>,
    upper_time_stamp_col: Option<usize>,
    index: Option<Arc<Index>>,
}

impl DataFrameView {
    /// Identity view over all rows, with nothing nominated.
    pub fn new(df: Arc<DataFrame>) -> Self {
        Self {
            df,
            rows: None,
            join_key_col: None,
            time_stamp_col: None,
            upper_time_stamp_col: None,
            index: None,
        }
    }

    /// View restricted to `rows` (base row numbers, ascending).
    pub fn with_rows(df: Arc<DataFrame>, rows: Arc<Vec<usize>>) -> Self {
        debug_assert!(rows.windows(2).all(|w| w[0] < w[1]));
        Self {
            df,
            rows: Some(rows),
            join_key_col: None,
            time_stamp_col: None,
            upper_time_stamp_col: None,
            index: None,
        }
    }

    /// Nominates the join key and time stamps this view joins on. The
    /// join-key index respects the view's row restriction.
    pub fn create_subview(
        &self,
        join_key: &str,
        time_stamp: Option<&str>,
        upper_time_stamp: Option<&str>,
    ) -> Result<DataFrameView> {
        let join_key_col = self
            .df
            .find_join_key(join_key)
            .ok_or_else(|| EngineError::missing_column(self.df.name(), join_key, "join key"))?;

        let time_stamp_col = match time_stamp.filter(|name| !name.is_empty()) {
            Some(name) => Some(self.df.find_time_stamp(name).ok_or_else(|| {
                EngineError::missing_column(self.df.name(), name, "time stamp")
            })?),
            None => None,
        };

        let upper_time_stamp_col = match upper_time_stamp.filter(|name| !name.is_empty()) {
            Some(name) => Some(self.df.find_time_stamp(name).ok_or_else(|| {
                EngineError::missing_column(self.df.name(), name, "upper time stamp")
            })?),
            None => None,
        };

        let index = match &self.rows {
            None => Arc::clone(self.df.index(join_key_col)),
            Some(rows) => Arc::new(Index::build_for_rows(
                self.df.join_key_col(join_key_col),
                rows,
            )),
        };

        Ok(DataFrameView {
            df: Arc::clone(&self.df),
            rows: self.rows.clone(),
            join_key_col: Some(join_key_col),
            time_stamp_col,
            upper_time_stamp_col,
            index: Some(index),
        })
    }

    /// The contiguous partition of this view's rows owned by `rank`.
    /// Nominations are preserved; the index is not (workers on the
    /// population side never probe it).
    pub fn scatter(&self, num_workers: usize, rank: usize) -> DataFrameView {
        let n = self.nrows();
        let (begin, end) = partition_range(n, num_workers, rank);
        let rows: Vec<usize> = (begin..end).map(|i| self.base_row(i)).collect();
        DataFrameView {
            df: Arc::clone(&self.df),
            rows: Some(Arc::new(rows)),
            join_key_col: self.join_key_col,
            time_stamp_col: self.time_stamp_col,
            upper_time_stamp_col: self.upper_time_stamp_col,
            index: None,
        }
    }

    // ------------------------------------------------------------------
    // Row projection
    // ------------------------------------------------------------------

    pub fn nrows(&self) -> usize {
        match &self.rows {
            Some(rows) => rows.len(),
            None => self.df.nrows(),
        }
    }

    #[inline]
    pub fn base_row(&self, row: usize) -> usize {
        match &self.rows {
            Some(rows) => rows[row],
            None => row,
        }
    }

    pub fn rows(&self) -> Option<&Arc<Vec<usize>>> {
        self.rows.as_ref()
    }

    pub fn df(&self) -> &Arc<DataFrame> {
        &self.df
    }

    pub fn name(&self) -> &str {
        self.df.name()
    }

    pub fn index(&self) -> Option<&Index> {
        self.index.as_deref()
    }

    pub fn has_time_stamp(&self) -> bool {
        self.time_stamp_col.is_some()
    }

    pub fn has_upper_time_stamp(&self) -> bool {
        self.upper_time_stamp_col.is_some()
    }

    pub fn time_stamp_name(&self) -> Option<&str> {
        self.time_stamp_col
            .map(|col| self.df.time_stamp_col(col).name())
    }

    pub fn upper_time_stamp_name(&self) -> Option<&str> {
        self.upper_time_stamp_col
            .map(|col| self.df.time_stamp_col(col).name())
    }

    pub fn join_key_name(&self) -> Option<&str> {
        self.join_key_col.map(|col| self.df.join_key_col(col).name())
    }

    // ------------------------------------------------------------------
    // Cell accessors (view rows)
    // ------------------------------------------------------------------

    #[inline]
    pub fn categorical(&self, row: usize, col: usize) -> i32 {
        self.df.categorical(self.base_row(row), col)
    }

    #[inline]
    pub fn discrete(&self, row: usize, col: usize) -> f64 {
        self.df.discrete(self.base_row(row), col)
    }

    #[inline]
    pub fn numerical(&self, row: usize, col: usize) -> f64 {
        self.df.numerical(self.base_row(row), col)
    }

    #[inline]
    pub fn target(&self, row: usize, col: usize) -> f64 {
        self.df.target(self.base_row(row), col)
    }

    /// Nominated join key of a view row; null (-1) when nothing is
    /// nominated.
    #[inline]
    pub fn join_key(&self, row: usize) -> i32 {
        match self.join_key_col {
            Some(col) => self.df.join_key(self.base_row(row), col),
            None => -1,
        }
    }

    /// Nominated time stamp of a view row; NaN when nothing is nominated.
    #[inline]
    pub fn time_stamp(&self, row: usize) -> f64 {
        match self.time_stamp_col {
            Some(col) => self.df.time_stamp(self.base_row(row), col),
            None => f64::NAN,
        }
    }

    // ------------------------------------------------------------------
    // Cell accessors (base rows — the peripheral side of a match)
    // ------------------------------------------------------------------

    #[inline]
    pub fn time_stamp_of_base(&self, base_row: usize) -> f64 {
        match self.time_stamp_col {
            Some(col) => self.df.time_stamp(base_row, col),
            None => f64::NAN,
        }
    }

    #[inline]
    pub fn upper_time_stamp_of_base(&self, base_row: usize) -> f64 {
        match self.upper_time_stamp_col {
            Some(col) => self.df.time_stamp(base_row, col),
            None => f64::NAN,
        }
    }

    pub fn num_targets(&self) -> usize {
        self.df.num_targets()
    }
}
