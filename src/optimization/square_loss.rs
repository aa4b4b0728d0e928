use crate::error::Result;
use crate::multithreading::Communicator;
use crate::optimization::{
    finite_or_zero, newton_line_search, second_order_gain, solve_weights, LossFunction,
};

/// Squared-error loss for regression. Gradients are `yhat - y`, the
/// Hessian is constant 1.
#[derive(Debug, Default)]
pub struct SquareLoss {
    y: Vec<f64>,
    g: Vec<f64>,
    h: Vec<f64>,
    g_committed: Vec<f64>,
    h_committed: Vec<f64>,
    sum_g: f64,
    sum_h: f64,
}

impl SquareLoss {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LossFunction for SquareLoss {
    fn type_str(&self) -> &'static str {
        "SquareLoss"
    }

    fn init(&mut self, targets: &[f64], comm: &dyn Communicator) -> Result<f64> {
        self.y = targets.to_vec();
        self.g = vec![0.0; targets.len()];
        self.h = vec![1.0; targets.len()];

        let mut sums = [targets.len() as f64, targets.iter().sum::<f64>()];
        comm.all_reduce_sum(&mut sums)?;

        if sums[0] > 0.0 {
            Ok(sums[1] / sums[0])
        } else {
            Ok(0.0)
        }
    }

    fn calc_gradients(&mut self, yhat_old: &[f64]) {
        debug_assert_eq!(yhat_old.len(), self.y.len());
        for i in 0..self.y.len() {
            self.g[i] = yhat_old[i] - self.y[i];
            self.h[i] = 1.0;
        }
    }

    fn calc_sums(&mut self, comm: &dyn Communicator) -> Result<(f64, f64)> {
        let mut sums = [self.g.iter().sum::<f64>(), self.h.iter().sum::<f64>()];
        comm.all_reduce_sum(&mut sums)?;
        self.sum_g = sums[0];
        self.sum_h = sums[1];
        Ok((self.sum_g, self.sum_h))
    }

    fn pseudo_residuals(&self) -> Vec<f64> {
        self.g.iter().map(|&g| -g).collect()
    }

    fn calc_weights(
        &self,
        eta: &[f64],
        lambda: f64,
        comm: &dyn Communicator,
    ) -> Result<[f64; 3]> {
        solve_weights(&self.g, &self.h, eta, lambda, comm)
    }

    fn evaluate_split(
        &self,
        weights: &[f64; 3],
        lambda: f64,
        eta: &[f64],
        comm: &dyn Communicator,
    ) -> Result<f64> {
        second_order_gain(&self.g, &self.h, weights, lambda, eta, comm)
    }

    fn calc_update_rate(
        &self,
        yhat_old: &[f64],
        predictions: &[f64],
        comm: &dyn Communicator,
    ) -> Result<f64> {
        let y = &self.y;
        newton_line_search(
            |rate| {
                let mut d1 = 0.0;
                let mut d2 = 0.0;
                for i in 0..y.len() {
                    let p = finite_or_zero(predictions[i]);
                    d1 += (yhat_old[i] + rate * p - y[i]) * p;
                    d2 += p * p;
                }
                (d1, d2)
            },
            comm,
        )
    }

    fn apply_update(&self, yhat_old: &mut [f64], predictions: &[f64], rate: f64) -> usize {
        let mut dropped = 0;
        for i in 0..yhat_old.len() {
            let update = rate * predictions[i];
            if update.is_finite() {
                yhat_old[i] += update;
            } else {
                dropped += 1;
            }
        }
        dropped
    }

    fn transform_output(&self, _yhat: &mut [f64]) {}

    fn commit(&mut self) {
        self.g_committed = self.g.clone();
        self.h_committed = self.h.clone();
    }

    fn revert_to_commit(&mut self) {
        self.g.copy_from_slice(&self.g_committed);
        self.h.copy_from_slice(&self.h_committed);
    }

    fn reset(&mut self) {
        self.g.iter_mut().for_each(|g| *g = 0.0);
        self.h.iter_mut().for_each(|h| *h = 1.0);
        self.sum_g = 0.0;
        self.sum_h = 0.0;
    }
}
