use crate::containers::Match;

pub struct NumericalBinner;

impl NumericalBinner {
    /// Bins `matches[..nan_begin]` into `num_bins` equal-width ascending
    /// bins over `[min, max]`, permuting the range so bins are contiguous.
    /// The NaN tail at `matches[nan_begin..]` is left untouched. Returns
    /// the indptr and the step size; an empty indptr signals that no
    /// split is possible (`min >= max` or `num_bins == 0`).
    ///
    /// Invariant: `indptr.last() == nan_begin`.
    pub fn bin<F>(
        min: f64,
        max: f64,
        get_value: &F,
        num_bins: usize,
        matches: &mut [Match],
        nan_begin: usize,
    ) -> (Vec<usize>, f64)
    where
        F: Fn(&Match) -> f64,
    {
        debug_assert!(!min.is_nan() && !max.is_nan());
        debug_assert!(!min.is_infinite() && !max.is_infinite());
        debug_assert!(nan_begin <= matches.len());

        // All critical values may be NaN in all workers; min >= max
        // covers that case.
        if min >= max || num_bins == 0 {
            return (Vec::new(), 0.0);
        }

        let step_size = (max - min) / num_bins as f64;

        let indptr =
            Self::bin_with_bounds(min, get_value, num_bins, step_size, matches, nan_begin);

        (indptr, step_size)
    }

    /// Bins under the assumption that the step size is already known
    /// (transform time reuses the step learned during fit).
    pub fn bin_given_step_size<F>(
        min: f64,
        max: f64,
        get_value: &F,
        step_size: f64,
        matches: &mut [Match],
        nan_begin: usize,
    ) -> Vec<usize>
    where
        F: Fn(&Match) -> f64,
    {
        if min >= max || step_size <= 0.0 {
            return Vec::new();
        }

        let num_bins = (((max - min) / step_size).ceil() as usize).max(1);
        Self::bin_with_bounds(min, get_value, num_bins, step_size, matches, nan_begin)
    }

    fn bin_with_bounds<F>(
        min: f64,
        get_value: &F,
        num_bins: usize,
        step_size: f64,
        matches: &mut [Match],
        nan_begin: usize,
    ) -> Vec<usize>
    where
        F: Fn(&Match) -> f64,
    {
        let bin_of = |m: &Match| -> usize {
            let value = get_value(m);
            debug_assert!(!value.is_nan());
            let ix = ((value - min) / step_size).floor();
            (ix.max(0.0) as usize).min(num_bins - 1)
        };

        let mut indptr = vec![0usize; num_bins + 1];

        for m in matches[..nan_begin].iter() {
            indptr[bin_of(m) + 1] += 1;
        }

        for i in 1..indptr.len() {
            indptr[i] += indptr[i - 1];
        }

        debug_assert_eq!(*indptr.last().unwrap(), nan_begin);

        let mut cursors = indptr.clone();
        let mut binned = vec![
            Match {
                population_row: 0,
                peripheral_row: 0,
                category: -1,
            };
            nan_begin
        ];

        for m in matches[..nan_begin].iter() {
            let ix = bin_of(m);
            binned[cursors[ix]] = *m;
            cursors[ix] += 1;
        }

        matches[..nan_begin].copy_from_slice(&binned);

        indptr
    }
}
