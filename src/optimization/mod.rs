// Loss functions and the optimization criterion. The loss supplies
// gradients, tree weights and the per-tree update rate; the criterion
// scores candidate splits from sufficient statistics. Both reduce across
// workers at fixed points, driven exclusively by the reduced values, so
// every worker takes the same decisions.

pub mod criterion;
pub mod cross_entropy_loss;
pub mod square_loss;

pub use criterion::{OptimizationCriterion, RSquaredCriterion};
pub use cross_entropy_loss::CrossEntropyLoss;
pub use square_loss::SquareLoss;

use crate::error::{EngineError, Result};
use crate::multithreading::Communicator;

/// Floor for second derivatives; keeps the Newton steps finite when the
/// sigmoid saturates.
pub(crate) const HESSIAN_FLOOR: f64 = 1e-12;

const MAX_LINE_SEARCH_ITER: usize = 100;
const MAX_BACKTRACKS: usize = 30;

pub fn parse_loss_function(name: &str) -> Result<Box<dyn LossFunction>> {
    match name {
        "SquareLoss" => Ok(Box::new(SquareLoss::new())),
        "CrossEntropyLoss" => Ok(Box::new(CrossEntropyLoss::new())),
        _ => Err(EngineError::InvalidInput(format!(
            "unknown loss function: '{}'",
            name
        ))),
    }
}

/// Second-order loss surface shared by the boosting loop and the tree
/// fitter.
pub trait LossFunction: Send {
    fn type_str(&self) -> &'static str;

    /// Stores the targets and returns the initial (constant) prediction:
    /// the global target mean, in link space.
    fn init(&mut self, targets: &[f64], comm: &dyn Communicator) -> Result<f64>;

    /// First and second derivatives of the loss at `yhat_old` (link
    /// space).
    fn calc_gradients(&mut self, yhat_old: &[f64]);

    /// Global (reduced) gradient totals.
    fn calc_sums(&mut self, comm: &dyn Communicator) -> Result<(f64, f64)>;

    /// `-g/h` per row; the targets the criterion fits during this
    /// boosting iteration.
    fn pseudo_residuals(&self) -> Vec<f64>;

    /// Optimal `[intercept, slope, _]` mapping the feature column `eta`
    /// onto the residuals under the second-order approximation with L2
    /// penalty `lambda`. Non-finite entries of `eta` count as zero.
    fn calc_weights(
        &self,
        eta: &[f64],
        lambda: f64,
        comm: &dyn Communicator,
    ) -> Result<[f64; 3]>;

    /// Loss reduction of applying `weights` over `eta`, against leaving
    /// the prediction unchanged.
    fn evaluate_split(
        &self,
        weights: &[f64; 3],
        lambda: f64,
        eta: &[f64],
        comm: &dyn Communicator,
    ) -> Result<f64>;

    /// Scalar by which the tree's predictions are rescaled before they
    /// are added to `yhat_old`: a 1-D Newton line search with
    /// backtracking, bounded iterations, clamped to `[0, 10]`.
    fn calc_update_rate(
        &self,
        yhat_old: &[f64],
        predictions: &[f64],
        comm: &dyn Communicator,
    ) -> Result<f64>;

    /// `yhat_old += rate * predictions`, dropping non-finite updates.
    /// Returns how many were dropped.
    fn apply_update(&self, yhat_old: &mut [f64], predictions: &[f64], rate: f64) -> usize;

    /// Link-space predictions to output space (sigmoid for cross
    /// entropy, identity otherwise).
    fn transform_output(&self, yhat: &mut [f64]);

    fn commit(&mut self);

    fn revert_to_commit(&mut self);

    fn reset(&mut self);
}

// ============================================================================
// Shared second-order math
// ============================================================================

#[inline]
pub(crate) fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Solves the 2x2 ridge system for (intercept, slope) given per-row
/// gradients and the feature column.
pub(crate) fn solve_weights(
    g: &[f64],
    h: &[f64],
    eta: &[f64],
    lambda: f64,
    comm: &dyn Communicator,
) -> Result<[f64; 3]> {
    debug_assert_eq!(g.len(), eta.len());

    let mut sums = [0.0f64; 5];
    for i in 0..g.len() {
        let e = finite_or_zero(eta[i]);
        sums[0] += h[i];
        sums[1] += h[i] * e;
        sums[2] += h[i] * e * e;
        sums[3] += g[i];
        sums[4] += g[i] * e;
    }
    comm.all_reduce_sum(&mut sums)?;

    let [sum_h, sum_he, sum_hee, sum_g, sum_ge] = sums;

    let a11 = sum_h + lambda;
    let a22 = sum_hee + lambda;
    let det = a11 * a22 - sum_he * sum_he;

    if det.abs() > 1e-12 * (1.0 + a11.abs() * a22.abs()) {
        let intercept = (-sum_g * a22 + sum_ge * sum_he) / det;
        let slope = (-sum_ge * a11 + sum_g * sum_he) / det;
        if intercept.is_finite() && slope.is_finite() {
            return Ok([intercept, slope, 0.0]);
        }
    }

    // Degenerate feature column; fall back to the intercept-only optimum.
    let intercept = if sum_h + lambda > 0.0 {
        -sum_g / (sum_h + lambda)
    } else {
        0.0
    };
    Ok([finite_or_zero(intercept), 0.0, 0.0])
}

/// Second-order loss reduction of the update `u = a + b * eta` relative
/// to no update.
pub(crate) fn second_order_gain(
    g: &[f64],
    h: &[f64],
    weights: &[f64; 3],
    lambda: f64,
    eta: &[f64],
    comm: &dyn Communicator,
) -> Result<f64> {
    let [a, b, _] = *weights;

    let mut sums = [0.0f64; 2];
    for i in 0..g.len() {
        let u = a + b * finite_or_zero(eta[i]);
        sums[0] += g[i] * u;
        sums[1] += h[i] * u * u;
    }
    comm.all_reduce_sum(&mut sums)?;

    Ok(-(sums[0] + 0.5 * sums[1]) - 0.5 * lambda * (a * a + b * b))
}

/// Damped Newton line search on `r -> loss(yhat_old + r * predictions)`.
/// `derivatives(rate)` returns the local (first, second) derivative
/// sums; both are reduced here, and every decision is taken on the
/// reduced values only.
pub(crate) fn newton_line_search<D>(mut derivatives: D, comm: &dyn Communicator) -> Result<f64>
where
    D: FnMut(f64) -> (f64, f64),
{
    let reduce = |local: (f64, f64), comm: &dyn Communicator| -> Result<(f64, f64)> {
        let mut buffer = [local.0, local.1];
        comm.all_reduce_sum(&mut buffer)?;
        Ok((buffer[0], buffer[1]))
    };

    let mut rate = 0.0f64;
    let (mut d1, mut d2) = reduce(derivatives(rate), comm)?;

    for _ in 0..MAX_LINE_SEARCH_ITER {
        if d2.abs() < HESSIAN_FLOOR || !d1.is_finite() || !d2.is_finite() {
            break;
        }

        let mut step = -d1 / d2;
        if step.abs() < 1e-12 {
            break;
        }

        // Backtrack while the step does not shrink the gradient.
        let mut accepted = None;
        for _ in 0..MAX_BACKTRACKS {
            let candidate = rate + step;
            let (c1, c2) = reduce(derivatives(candidate), comm)?;
            if c1.abs() <= d1.abs() {
                accepted = Some((candidate, c1, c2));
                break;
            }
            step *= 0.5;
        }

        match accepted {
            Some((candidate, c1, c2)) => {
                rate = candidate;
                d1 = c1;
                d2 = c2;
            }
            None => break,
        }
    }

    Ok(rate.clamp(0.0, 10.0))
}
