use std::cmp::Ordering;

use crate::aggregations::{AggAccumulator, DataUsed};
use crate::binning::{
    partition_nan_tail, partition_null_categories, CategoricalBinner, NumericalBinner,
};
use crate::containers::Match;
use crate::error::Result;
use crate::hyperparameters::Hyperparameters;
use crate::multithreading::Communicator;
use crate::optimization::OptimizationCriterion;
use crate::trees::candidates::CandidateSpec;
use crate::trees::split::Split;
use crate::trees::tree::Node;
use crate::trees::value_extractor::ValueExtractor;

/// One condition column the split search may bin by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Condition {
    data_used: DataUsed,
    column: usize,
}

/// Mutable per-candidate state: the aggregation accumulator over the
/// currently included matches and the feature column it implies.
struct FitContext {
    data_used: DataUsed,
    column: usize,
    acc: AggAccumulator,
    yhat: Vec<f64>,
}

/// Fits one candidate tree by greedy predicate refinement. Every
/// decision is taken on reduced (global) quantities, so all workers
/// derive the same tree.
pub struct TreeFitter<'a> {
    pub hyperparameters: &'a Hyperparameters,
    pub extractor: &'a ValueExtractor<'a>,
    /// Criterion targets of this boosting iteration (pseudo-residuals);
    /// used for the categorical mean-target ordering.
    pub residuals: &'a [f64],
    pub comm: &'a dyn Communicator,
}

impl<'a> TreeFitter<'a> {
    /// Returns the fitted root, the committed criterion value and the
    /// final feature column over this worker's population rows.
    pub fn fit(
        &self,
        spec: &CandidateSpec,
        matches: &mut [Match],
        criterion: &mut dyn OptimizationCriterion,
    ) -> Result<(Node, f64, Vec<f64>)> {
        let nrows = self.residuals.len();

        let mut ctx = FitContext {
            data_used: spec.data_used,
            column: spec.column,
            acc: AggAccumulator::new(spec.aggregation, nrows),
            yhat: Vec::new(),
        };

        for m in matches.iter() {
            let value = self.extractor.numeric(ctx.data_used, ctx.column, m);
            let ts = self.extractor.time_stamp(m);
            ctx.acc
                .insert(m.population_row as usize, value, ts, m.peripheral_row);
        }
        ctx.yhat = ctx.acc.value_column();

        criterion.init_yhat(&ctx.yhat, self.comm)?;

        let root = self.fit_node(0, matches, &mut ctx, criterion)?;

        Ok((root, criterion.value(), ctx.yhat))
    }

    // ------------------------------------------------------------------
    // Node recursion
    // ------------------------------------------------------------------

    fn fit_node(
        &self,
        depth: usize,
        matches: &mut [Match],
        ctx: &mut FitContext,
        criterion: &mut dyn OptimizationCriterion,
    ) -> Result<Node> {
        let min_num_samples = self.hyperparameters.min_num_samples as f64;

        let mut n_global = [matches.len() as f64];
        self.comm.all_reduce_sum(&mut n_global)?;

        if depth >= self.hyperparameters.max_depth
            || n_global[0] < 2.0 * min_num_samples
        {
            return Ok(Node::leaf(1.0));
        }

        criterion.reset_storage();
        let mut plans: Vec<Split> = Vec::new();

        for condition in self.conditions() {
            if condition.data_used == DataUsed::Categorical {
                self.scan_categorical(condition, matches, ctx, criterion, &mut plans)?;
            } else {
                self.scan_numerical(condition, matches, ctx, criterion, &mut plans)?;
            }
        }

        debug_assert_eq!(plans.len(), criterion.num_stored());

        let best = criterion.find_maximum(min_num_samples, self.comm)?;

        let Some((best_ix, best_value)) = best else {
            return Ok(Node::leaf(1.0));
        };

        // Degenerate split: nothing beats the committed state.
        if best_value <= criterion.value() {
            return Ok(Node::leaf(1.0));
        }

        let split = plans[best_ix].clone();
        let num_kept = self.apply_split(&split, matches, ctx);
        criterion.commit_stage(best_ix, best_value);

        let child = self.fit_node(depth + 1, &mut matches[..num_kept], ctx, criterion)?;

        Ok(if split.keep_left {
            Node::internal(split, child, Node::leaf(0.0))
        } else {
            Node::internal(split, Node::leaf(0.0), child)
        })
    }

    // ------------------------------------------------------------------
    // Condition enumeration (tie-break order: data_used ordinal, then
    // column)
    // ------------------------------------------------------------------

    fn conditions(&self) -> Vec<Condition> {
        let peripheral = self.extractor.peripheral();
        let population = self.extractor.population();
        let same_units = self.extractor.same_units();
        let df = peripheral.df();

        fn push_range(conditions: &mut Vec<Condition>, data_used: DataUsed, columns: usize) {
            for column in 0..columns {
                conditions.push(Condition { data_used, column });
            }
        }

        let mut conditions = Vec::new();

        push_range(&mut conditions, DataUsed::Categorical, df.num_categoricals());
        push_range(&mut conditions, DataUsed::Discrete, df.num_discretes());
        push_range(
            &mut conditions,
            DataUsed::Numerical,
            self.extractor.num_numerical_columns(),
        );
        push_range(
            &mut conditions,
            DataUsed::SameUnitsCategorical,
            same_units.categorical.len(),
        );

        for ix in same_units.discrete_indices(false) {
            conditions.push(Condition {
                data_used: DataUsed::SameUnitsDiscrete,
                column: ix,
            });
        }
        for ix in same_units.discrete_indices(true) {
            conditions.push(Condition {
                data_used: DataUsed::SameUnitsDiscreteTs,
                column: ix,
            });
        }
        for ix in same_units.numerical_indices(false) {
            conditions.push(Condition {
                data_used: DataUsed::SameUnitsNumerical,
                column: ix,
            });
        }
        for ix in same_units.numerical_indices(true) {
            conditions.push(Condition {
                data_used: DataUsed::SameUnitsNumericalTs,
                column: ix,
            });
        }

        push_range(
            &mut conditions,
            DataUsed::Subfeatures,
            self.extractor.num_subfeatures(),
        );

        if self.hyperparameters.use_timestamps
            && population.has_time_stamp()
            && peripheral.has_time_stamp()
        {
            conditions.push(Condition {
                data_used: DataUsed::TimeStampsDiff,
                column: 0,
            });
        }

        if self.hyperparameters.use_timestamps && peripheral.has_upper_time_stamp() {
            conditions.push(Condition {
                data_used: DataUsed::TimeStampsWindow,
                column: 0,
            });
        }

        conditions
    }

    // ------------------------------------------------------------------
    // Numerical conditions: two-pass bin walk plus the NaN dummy
    // ------------------------------------------------------------------

    fn scan_numerical(
        &self,
        condition: Condition,
        matches: &mut [Match],
        ctx: &mut FitContext,
        criterion: &mut dyn OptimizationCriterion,
        plans: &mut Vec<Split>,
    ) -> Result<()> {
        let get = |m: &Match| self.extractor.numeric(condition.data_used, condition.column, m);

        let nan_begin = partition_nan_tail(matches, &get);
        let total = matches.len();

        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for m in &matches[..nan_begin] {
            let value = get(m);
            min = min.min(value);
            max = max.max(value);
        }
        self.comm.all_reduce_min(&mut min)?;
        self.comm.all_reduce_max(&mut max)?;

        let num_bins = self.hyperparameters.num_bins;

        if min < max {
            let (indptr, step_size) =
                NumericalBinner::bin(min, max, &get, num_bins, matches, nan_begin);
            debug_assert_eq!(indptr.len(), num_bins + 1);

            let critical_value = |k: usize| {
                if k + 1 == num_bins {
                    max
                } else {
                    min + step_size * (k + 1) as f64
                }
            };

            // Pass 1: start from nothing, re-include bin prefixes. The
            // stage after the last bin is the drop-the-NaN-tail dummy.
            self.shift(matches, false, ctx, criterion)?;
            for k in 0..num_bins {
                self.shift(&matches[indptr[k]..indptr[k + 1]], true, ctx, criterion)?;
                criterion
                    .store_current_stage(indptr[k + 1] as f64, (total - indptr[k + 1]) as f64);
                plans.push(Split::numerical(
                    condition.data_used,
                    condition.column,
                    critical_value(k),
                    true,
                ));
            }
            self.shift(&matches[nan_begin..], true, ctx, criterion)?;

            // Pass 2: start from everything, exclude bin prefixes.
            for k in 0..num_bins - 1 {
                self.shift(&matches[indptr[k]..indptr[k + 1]], false, ctx, criterion)?;
                criterion
                    .store_current_stage((total - indptr[k + 1]) as f64, indptr[k + 1] as f64);
                plans.push(Split::numerical(
                    condition.data_used,
                    condition.column,
                    critical_value(k),
                    false,
                ));
            }
            self.shift(&matches[..indptr[num_bins - 1]], true, ctx, criterion)?;
        }

        // Keep-the-NaN-tail dummy. Stored even when no NaN exists
        // anywhere (the empty stage can never win), so that every worker
        // stores the same stage sequence without an extra reduction.
        self.shift(&matches[..nan_begin], false, ctx, criterion)?;
        criterion.store_current_stage((total - nan_begin) as f64, nan_begin as f64);
        plans.push(Split::nan_dummy(condition.data_used, condition.column, true));
        self.shift(&matches[..nan_begin], true, ctx, criterion)?;

        criterion.revert_to_commit();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Categorical conditions: single categories, then prefix unions of
    // the per-category mean-target argsort
    // ------------------------------------------------------------------

    fn scan_categorical(
        &self,
        condition: Condition,
        matches: &mut [Match],
        ctx: &mut FitContext,
        criterion: &mut dyn OptimizationCriterion,
        plans: &mut Vec<Split>,
    ) -> Result<()> {
        let get = |m: &Match| self.extractor.category(condition.column, m);

        let nan_begin = partition_null_categories(matches, &get);
        let total = matches.len();

        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for m in &matches[..nan_begin] {
            let category = get(m) as f64;
            min = min.min(category);
            max = max.max(category);
        }
        self.comm.all_reduce_min(&mut min)?;
        self.comm.all_reduce_max(&mut max)?;

        if min > max {
            // No worker saw a non-null category.
            return Ok(());
        }

        let min_cat = min as i32;
        let max_cat = max as i32;

        let (indptr, occurring) =
            CategoricalBinner::bin(min_cat, max_cat, &get, matches, nan_begin, self.comm)?;
        debug_assert!(!occurring.is_empty());

        let bin_range = |cat: i32| {
            let b = (cat - min_cat) as usize;
            indptr[b]..indptr[b + 1]
        };

        // Global per-category residual means.
        let mut sums = vec![0.0; occurring.len()];
        let mut counts = vec![0.0; occurring.len()];
        for (i, &cat) in occurring.iter().enumerate() {
            for m in &matches[bin_range(cat)] {
                sums[i] += self.residuals[m.population_row as usize];
                counts[i] += 1.0;
            }
        }
        self.comm.all_reduce_sum(&mut sums)?;
        self.comm.all_reduce_sum(&mut counts)?;

        // Single-category stages.
        self.shift(matches, false, ctx, criterion)?;
        for &cat in &occurring {
            let range = bin_range(cat);
            let num_kept = (range.end - range.start) as f64;
            self.shift(&matches[range], true, ctx, criterion)?;
            criterion.store_current_stage(num_kept, total as f64 - num_kept);
            plans.push(Split::categorical(condition.column, vec![cat], true));
            self.shift(&matches[bin_range(cat)], false, ctx, criterion)?;
        }

        // Group categories by descending mean target, ties by category.
        let mut order: Vec<usize> = (0..occurring.len()).collect();
        order.sort_by(|&a, &b| {
            let mean_a = sums[a] / counts[a];
            let mean_b = sums[b] / counts[b];
            mean_b
                .partial_cmp(&mean_a)
                .unwrap_or(Ordering::Equal)
                .then_with(|| occurring[a].cmp(&occurring[b]))
        });

        let mut prefix = vec![occurring[order[0]]];
        let mut num_kept = 0usize;
        {
            let range = bin_range(occurring[order[0]]);
            num_kept += range.end - range.start;
            self.shift(&matches[range], true, ctx, criterion)?;
        }
        for &ord in &order[1..] {
            let cat = occurring[ord];
            let range = bin_range(cat);
            num_kept += range.end - range.start;
            self.shift(&matches[range], true, ctx, criterion)?;
            prefix.push(cat);
            criterion.store_current_stage(num_kept as f64, (total - num_kept) as f64);
            plans.push(Split::categorical(condition.column, prefix.clone(), true));
        }

        // Restore the null tail.
        self.shift(&matches[nan_begin..], true, ctx, criterion)?;

        criterion.revert_to_commit();
        Ok(())
    }

    // ------------------------------------------------------------------
    // State shifting
    // ------------------------------------------------------------------

    /// Moves a chunk of matches into (`insert`) or out of the aggregated
    /// set, updating the accumulator, the feature column and the
    /// criterion via `update_samples`.
    fn shift(
        &self,
        chunk: &[Match],
        insert: bool,
        ctx: &mut FitContext,
        criterion: &mut dyn OptimizationCriterion,
    ) -> Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }

        let mut rows: Vec<usize> = chunk.iter().map(|m| m.population_row as usize).collect();
        rows.sort_unstable();
        rows.dedup();

        let old_values: Vec<f64> = rows.iter().map(|&r| ctx.yhat[r]).collect();

        for m in chunk {
            let value = self.extractor.numeric(ctx.data_used, ctx.column, m);
            let ts = self.extractor.time_stamp(m);
            let row = m.population_row as usize;
            if insert {
                ctx.acc.insert(row, value, ts, m.peripheral_row);
            } else {
                ctx.acc.remove(row, value, ts, m.peripheral_row);
            }
        }

        let new_values: Vec<f64> = rows.iter().map(|&r| ctx.acc.value(r)).collect();

        criterion.update_samples(&rows, &new_values, &old_values);

        for (i, &row) in rows.iter().enumerate() {
            ctx.yhat[row] = new_values[i];
        }

        Ok(())
    }

    /// Re-applies the winning stage: permutes the range so kept matches
    /// are contiguous at the front, removes the dropped ones from the
    /// aggregation, and returns the kept count. The criterion is NOT
    /// updated here; `commit_stage` installs the winner's statistics.
    fn apply_split(&self, split: &Split, matches: &mut [Match], ctx: &mut FitContext) -> usize {
        let keeps = |m: &Match| -> bool {
            let passes =
                if split.is_categorical() || split.data_used == DataUsed::Categorical {
                    split.passes_category(self.extractor.category(split.column, m))
                } else {
                    split.passes_value(self.extractor.numeric(
                        split.data_used,
                        split.column,
                        m,
                    ))
                };
            passes == split.keep_left
        };

        let mut kept = Vec::with_capacity(matches.len());
        let mut dropped = Vec::new();
        for m in matches.iter() {
            if keeps(m) {
                kept.push(*m);
            } else {
                dropped.push(*m);
            }
        }

        let num_kept = kept.len();
        matches[..num_kept].copy_from_slice(&kept);
        matches[num_kept..].copy_from_slice(&dropped);

        for m in &matches[num_kept..] {
            let value = self.extractor.numeric(ctx.data_used, ctx.column, m);
            let ts = self.extractor.time_stamp(m);
            ctx.acc
                .remove(m.population_row as usize, value, ts, m.peripheral_row);
        }

        // Refresh the feature column for every touched row.
        let mut rows: Vec<usize> = matches[num_kept..]
            .iter()
            .map(|m| m.population_row as usize)
            .collect();
        rows.sort_unstable();
        rows.dedup();
        for row in rows {
            ctx.yhat[row] = ctx.acc.value(row);
        }

        num_kept
    }
}
