use std::collections::VecDeque;

use crate::error::Result;
use crate::multithreading::Communicator;
use crate::optimization::finite_or_zero;

/// Split-scoring surface. The R-squared criterion is the shipped
/// implementation; the trait is the seam where a different scoring
/// engine would plug in.
pub trait OptimizationCriterion: Send {
    /// Fixes the targets for this boosting iteration: centers them with
    /// the global mean and stores the global total sum of squares.
    fn init(&mut self, targets: &[Vec<f64>], comm: &dyn Communicator) -> Result<()>;

    /// Recomputes the current sufficient statistics from a full feature
    /// column and commits them as the baseline.
    fn init_yhat(&mut self, yhat: &[f64], comm: &dyn Communicator) -> Result<()>;

    /// Applies an incremental feature-column change in O(|indices|).
    fn update_samples(&mut self, indices: &[usize], new_values: &[f64], old_values: &[f64]);

    /// Pushes the current statistics onto the candidate deque, together
    /// with the local match counts of the two sides.
    fn store_current_stage(&mut self, num_samples_left: f64, num_samples_right: f64);

    /// All-reduces the stored stages in fixed order, scores each, drops
    /// stages violating `min_num_samples` on either side, and returns the
    /// earliest argmax.
    fn find_maximum(
        &mut self,
        min_num_samples: f64,
        comm: &dyn Communicator,
    ) -> Result<Option<(usize, f64)>>;

    /// Accepts stage `ix` (as returned by `find_maximum`) as the new
    /// committed state.
    fn commit_stage(&mut self, ix: usize, value: f64);

    fn revert_to_commit(&mut self);

    /// Zeroes both statistic buffers and drops the stored stages.
    fn reset(&mut self);

    fn reset_storage(&mut self);

    /// Criterion value of the committed state (global).
    fn value(&self) -> f64;

    fn num_stored(&self) -> usize;

    /// Non-finite feature values mapped to zero so far.
    fn num_non_finite(&self) -> usize;
}

// ============================================================================
// RSquaredCriterion
// ============================================================================

/// Scores a feature column by the R-squared of regressing the (centered)
/// targets on it. Sufficient statistics per target:
/// `{n, sum((y - mean)^2), sum((y - mean) * yhat), sum(yhat),
/// sum(yhat^2)}`; the first two are fixed at `init`, the rest live in a
/// committed/current buffer pair.
///
/// Statistics layout: `[sum_yhat, sum_yhat_sq, sum_y_yhat[0..T]]`; stored
/// stages append `[n_left, n_right]`.
#[derive(Debug, Default)]
pub struct RSquaredCriterion {
    num_targets: usize,
    /// Global row count.
    num_samples: f64,
    /// Targets minus their global mean, local rows.
    y_centered: Vec<Vec<f64>>,
    /// Global total sum of squares per target.
    tss: Vec<f64>,
    current: Vec<f64>,
    committed: Vec<f64>,
    stored: VecDeque<Vec<f64>>,
    value: f64,
    non_finite: usize,
}

impl RSquaredCriterion {
    pub fn new() -> Self {
        Self::default()
    }

    fn stats_len(&self) -> usize {
        2 + self.num_targets
    }

    fn r_squared(&self, stats: &[f64]) -> f64 {
        let n = self.num_samples;
        if n <= 0.0 {
            return 0.0;
        }

        let sum_yhat = stats[0];
        let sum_yhat_sq = stats[1];
        let var_yhat = sum_yhat_sq - sum_yhat * sum_yhat / n;

        if var_yhat <= 0.0 || !var_yhat.is_finite() {
            return 0.0;
        }

        let mut total = 0.0;
        for t in 0..self.num_targets {
            if self.tss[t] <= 0.0 {
                continue;
            }
            let cov = stats[2 + t];
            total += cov * cov / (var_yhat * self.tss[t]);
        }

        total / self.num_targets as f64
    }
}

impl OptimizationCriterion for RSquaredCriterion {
    fn init(&mut self, targets: &[Vec<f64>], comm: &dyn Communicator) -> Result<()> {
        self.num_targets = targets.len();

        let local_rows = targets.first().map(|t| t.len()).unwrap_or(0);

        // One reduction for the row count and all target sums.
        let mut sums = vec![0.0; 1 + self.num_targets];
        sums[0] = local_rows as f64;
        for (t, target) in targets.iter().enumerate() {
            sums[1 + t] = target.iter().sum();
        }
        comm.all_reduce_sum(&mut sums)?;

        self.num_samples = sums[0];

        self.y_centered = targets
            .iter()
            .enumerate()
            .map(|(t, target)| {
                let mean = if self.num_samples > 0.0 {
                    sums[1 + t] / self.num_samples
                } else {
                    0.0
                };
                target.iter().map(|&y| y - mean).collect()
            })
            .collect();

        let mut tss: Vec<f64> = self
            .y_centered
            .iter()
            .map(|centered| centered.iter().map(|&y| y * y).sum())
            .collect();
        comm.all_reduce_sum(&mut tss)?;
        self.tss = tss;

        self.current = vec![0.0; self.stats_len()];
        self.committed = vec![0.0; self.stats_len()];
        self.stored.clear();
        self.value = 0.0;
        self.non_finite = 0;

        Ok(())
    }

    fn init_yhat(&mut self, yhat: &[f64], comm: &dyn Communicator) -> Result<()> {
        debug_assert_eq!(
            yhat.len(),
            self.y_centered.first().map(|y| y.len()).unwrap_or(0)
        );

        let mut stats = vec![0.0; self.stats_len()];
        for (i, &raw) in yhat.iter().enumerate() {
            if !raw.is_finite() {
                self.non_finite += 1;
            }
            let v = finite_or_zero(raw);
            stats[0] += v;
            stats[1] += v * v;
            for t in 0..self.num_targets {
                stats[2 + t] += self.y_centered[t][i] * v;
            }
        }

        self.current = stats.clone();
        self.committed = stats.clone();
        self.stored.clear();

        comm.all_reduce_sum(&mut stats)?;
        self.value = self.r_squared(&stats);

        Ok(())
    }

    fn update_samples(&mut self, indices: &[usize], new_values: &[f64], old_values: &[f64]) {
        debug_assert_eq!(indices.len(), new_values.len());
        debug_assert_eq!(indices.len(), old_values.len());

        for k in 0..indices.len() {
            let i = indices[k];
            if !new_values[k].is_finite() {
                self.non_finite += 1;
            }
            let new = finite_or_zero(new_values[k]);
            let old = finite_or_zero(old_values[k]);
            let delta = new - old;

            self.current[0] += delta;
            self.current[1] += new * new - old * old;
            for t in 0..self.num_targets {
                self.current[2 + t] += self.y_centered[t][i] * delta;
            }
        }
    }

    fn store_current_stage(&mut self, num_samples_left: f64, num_samples_right: f64) {
        let mut stage = self.current.clone();
        stage.push(num_samples_left);
        stage.push(num_samples_right);
        self.stored.push_back(stage);
    }

    fn find_maximum(
        &mut self,
        min_num_samples: f64,
        comm: &dyn Communicator,
    ) -> Result<Option<(usize, f64)>> {
        if self.stored.is_empty() {
            return Ok(None);
        }

        let width = self.stats_len() + 2;

        let mut flattened: Vec<f64> = Vec::with_capacity(width * self.stored.len());
        for stage in &self.stored {
            debug_assert_eq!(stage.len(), width);
            flattened.extend_from_slice(stage);
        }
        comm.all_reduce_sum(&mut flattened)?;

        let mut best: Option<(usize, f64)> = None;

        for (ix, stage) in flattened.chunks_exact(width).enumerate() {
            let n_left = stage[width - 2];
            let n_right = stage[width - 1];

            if n_left < min_num_samples || n_right < min_num_samples {
                continue;
            }

            let value = self.r_squared(&stage[..width - 2]);

            // Strict comparison keeps the earliest maximum, which is what
            // makes equal-scoring splits resolve deterministically.
            if best.map_or(true, |(_, best_value)| value > best_value) {
                best = Some((ix, value));
            }
        }

        Ok(best)
    }

    fn commit_stage(&mut self, ix: usize, value: f64) {
        debug_assert!(ix < self.stored.len());
        let width = self.stats_len();
        let stage = &self.stored[ix];
        self.committed.copy_from_slice(&stage[..width]);
        self.current.copy_from_slice(&stage[..width]);
        self.value = value;
    }

    fn revert_to_commit(&mut self) {
        debug_assert_eq!(self.current.len(), self.committed.len());
        self.current.copy_from_slice(&self.committed);
    }

    fn reset(&mut self) {
        self.current.iter_mut().for_each(|v| *v = 0.0);
        self.committed.iter_mut().for_each(|v| *v = 0.0);
        self.stored.clear();
        self.value = 0.0;
    }

    fn reset_storage(&mut self) {
        self.stored.clear();
    }

    fn value(&self) -> f64 {
        self.value
    }

    fn num_stored(&self) -> usize {
        self.stored.len()
    }

    fn num_non_finite(&self) -> usize {
        self.non_finite
    }
}
