use std::collections::{BTreeMap, HashMap};

use crate::aggregations::Aggregation;

const SIGN_BIT: u64 = 0x8000_0000_0000_0000;

/// Order-preserving bit transform; maps the non-NaN floats onto u64 so a
/// BTreeMap can act as an ordered multiset.
#[inline]
fn sort_key(value: f64) -> u64 {
    debug_assert!(!value.is_nan());
    let bits = value.to_bits();
    if bits & SIGN_BIT != 0 {
        !bits
    } else {
        bits | SIGN_BIT
    }
}

#[inline]
fn key_to_value(key: u64) -> f64 {
    if key & SIGN_BIT != 0 {
        f64::from_bits(key & !SIGN_BIT)
    } else {
        f64::from_bits(!key)
    }
}

/// Bit pattern used for distinct counting; collapses -0.0 onto 0.0.
#[inline]
fn distinct_key(value: f64) -> u64 {
    debug_assert!(!value.is_nan());
    if value == 0.0 {
        0.0f64.to_bits()
    } else {
        value.to_bits()
    }
}

#[derive(Debug, Clone, Default)]
struct RowState {
    /// All matched rows, nulls included (COUNT).
    num_rows: f64,
    /// Non-null values.
    count: f64,
    sum: f64,
    sum_sq: f64,
    /// Non-null value multiset keyed by bit pattern (COUNT DISTINCT).
    distinct: HashMap<u64, u32>,
    /// Ordered multiset of values (MIN/MAX/MEDIAN) or of peripheral time
    /// stamps (AVG TIME BETWEEN).
    ordered: BTreeMap<u64, u32>,
    /// (time stamp, peripheral row) -> value; ties on the time stamp
    /// resolve by peripheral row order (FIRST/LAST).
    by_time: BTreeMap<(u64, u32), f64>,
}

/// Per-population-row sufficient state for one aggregation. Supports
/// incremental `insert`/`remove` of matches so the split search never
/// rescans the whole match set.
#[derive(Debug, Clone)]
pub struct AggAccumulator {
    agg: Aggregation,
    rows: Vec<RowState>,
}

impl AggAccumulator {
    pub fn new(agg: Aggregation, nrows: usize) -> Self {
        Self {
            agg,
            rows: vec![RowState::default(); nrows],
        }
    }

    pub fn aggregation(&self) -> Aggregation {
        self.agg
    }

    pub fn nrows(&self) -> usize {
        self.rows.len()
    }

    pub fn insert(&mut self, row: usize, value: f64, time_stamp: f64, peripheral_row: u32) {
        let state = &mut self.rows[row];
        state.num_rows += 1.0;

        match self.agg {
            Aggregation::Count => {}

            Aggregation::Sum | Aggregation::Avg => {
                if !value.is_nan() {
                    state.count += 1.0;
                    state.sum += value;
                }
            }

            Aggregation::Stddev | Aggregation::Var => {
                if !value.is_nan() {
                    state.count += 1.0;
                    state.sum += value;
                    state.sum_sq += value * value;
                }
            }

            Aggregation::CountDistinct | Aggregation::CountMinusCountDistinct => {
                if !value.is_nan() {
                    state.count += 1.0;
                    *state.distinct.entry(distinct_key(value)).or_insert(0) += 1;
                }
            }

            Aggregation::Min | Aggregation::Max | Aggregation::Median => {
                if !value.is_nan() {
                    *state.ordered.entry(sort_key(value)).or_insert(0) += 1;
                }
            }

            Aggregation::First | Aggregation::Last => {
                if !time_stamp.is_nan() {
                    state
                        .by_time
                        .insert((sort_key(time_stamp), peripheral_row), value);
                }
            }

            Aggregation::AvgTimeBetween => {
                if !time_stamp.is_nan() {
                    *state.ordered.entry(sort_key(time_stamp)).or_insert(0) += 1;
                }
            }
        }
    }

    pub fn remove(&mut self, row: usize, value: f64, time_stamp: f64, peripheral_row: u32) {
        let state = &mut self.rows[row];
        debug_assert!(state.num_rows >= 1.0);
        state.num_rows -= 1.0;

        match self.agg {
            Aggregation::Count => {}

            Aggregation::Sum | Aggregation::Avg => {
                if !value.is_nan() {
                    state.count -= 1.0;
                    state.sum -= value;
                }
            }

            Aggregation::Stddev | Aggregation::Var => {
                if !value.is_nan() {
                    state.count -= 1.0;
                    state.sum -= value;
                    state.sum_sq -= value * value;
                }
            }

            Aggregation::CountDistinct | Aggregation::CountMinusCountDistinct => {
                if !value.is_nan() {
                    state.count -= 1.0;
                    Self::decrement(&mut state.distinct, distinct_key(value));
                }
            }

            Aggregation::Min | Aggregation::Max | Aggregation::Median => {
                if !value.is_nan() {
                    Self::decrement_ordered(&mut state.ordered, sort_key(value));
                }
            }

            Aggregation::First | Aggregation::Last => {
                if !time_stamp.is_nan() {
                    state.by_time.remove(&(sort_key(time_stamp), peripheral_row));
                }
            }

            Aggregation::AvgTimeBetween => {
                if !time_stamp.is_nan() {
                    Self::decrement_ordered(&mut state.ordered, sort_key(time_stamp));
                }
            }
        }
    }

    fn decrement(map: &mut HashMap<u64, u32>, key: u64) {
        if let Some(count) = map.get_mut(&key) {
            *count -= 1;
            if *count == 0 {
                map.remove(&key);
            }
        } else {
            debug_assert!(false, "removing a value that was never inserted");
        }
    }

    fn decrement_ordered(map: &mut BTreeMap<u64, u32>, key: u64) {
        if let Some(count) = map.get_mut(&key) {
            *count -= 1;
            if *count == 0 {
                map.remove(&key);
            }
        } else {
            debug_assert!(false, "removing a value that was never inserted");
        }
    }

    /// The aggregated value for one population row; the identity element
    /// for empty sets (SUM -> 0, COUNT -> 0, AVG/MIN/MAX/... -> NaN).
    pub fn value(&self, row: usize) -> f64 {
        let state = &self.rows[row];

        match self.agg {
            Aggregation::Count => state.num_rows,

            Aggregation::Sum => state.sum,

            Aggregation::Avg => {
                if state.count > 0.0 {
                    state.sum / state.count
                } else {
                    f64::NAN
                }
            }

            Aggregation::Var => Self::variance(state),

            Aggregation::Stddev => Self::variance(state).sqrt(),

            Aggregation::CountDistinct => state.distinct.len() as f64,

            Aggregation::CountMinusCountDistinct => state.count - state.distinct.len() as f64,

            Aggregation::Min => state
                .ordered
                .keys()
                .next()
                .map(|&k| key_to_value(k))
                .unwrap_or(f64::NAN),

            Aggregation::Max => state
                .ordered
                .keys()
                .next_back()
                .map(|&k| key_to_value(k))
                .unwrap_or(f64::NAN),

            Aggregation::Median => Self::median(&state.ordered),

            Aggregation::First => state
                .by_time
                .values()
                .next()
                .copied()
                .unwrap_or(f64::NAN),

            Aggregation::Last => state
                .by_time
                .values()
                .next_back()
                .copied()
                .unwrap_or(f64::NAN),

            Aggregation::AvgTimeBetween => {
                let n: u64 = state.ordered.values().map(|&c| c as u64).sum();
                if n >= 2 {
                    let first = key_to_value(*state.ordered.keys().next().unwrap());
                    let last = key_to_value(*state.ordered.keys().next_back().unwrap());
                    (last - first) / (n - 1) as f64
                } else {
                    f64::NAN
                }
            }
        }
    }

    /// All per-row values in one pass.
    pub fn value_column(&self) -> Vec<f64> {
        (0..self.rows.len()).map(|row| self.value(row)).collect()
    }

    fn variance(state: &RowState) -> f64 {
        // Population variance; undefined below two samples.
        if state.count < 2.0 {
            return f64::NAN;
        }
        let mean = state.sum / state.count;
        (state.sum_sq / state.count - mean * mean).max(0.0)
    }

    fn median(ordered: &BTreeMap<u64, u32>) -> f64 {
        let n: u64 = ordered.values().map(|&c| c as u64).sum();
        if n == 0 {
            return f64::NAN;
        }

        let pick = |target: u64| -> f64 {
            let mut seen = 0u64;
            for (&key, &count) in ordered {
                seen += count as u64;
                if seen > target {
                    return key_to_value(key);
                }
            }
            unreachable!("median target beyond multiset size")
        };

        if n % 2 == 1 {
            pick(n / 2)
        } else {
            (pick(n / 2 - 1) + pick(n / 2)) / 2.0
        }
    }
}
