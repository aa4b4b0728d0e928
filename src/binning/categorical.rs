use crate::containers::Match;
use crate::error::Result;
use crate::multithreading::Communicator;

pub struct CategoricalBinner;

impl CategoricalBinner {
    /// Bins `matches[..nan_begin]` by category over `[min, max]`, one bin
    /// per category, permuting the range so bins are contiguous; the null
    /// tail is left in place. Returns the indptr (length `max - min + 2`)
    /// and the list of categories that actually occur, reduced across
    /// workers so every worker sees the same list.
    ///
    /// The match's `category` scratch field is filled from `get_value` so
    /// later passes over the binned range need not re-extract.
    pub fn bin<F>(
        min: i32,
        max: i32,
        get_value: &F,
        matches: &mut [Match],
        nan_begin: usize,
        comm: &dyn Communicator,
    ) -> Result<(Vec<usize>, Vec<i32>)>
    where
        F: Fn(&Match) -> i32,
    {
        debug_assert!(nan_begin <= matches.len());

        // min > max happens when no worker saw a non-null category.
        if min > max {
            return Ok((Vec::new(), Vec::new()));
        }

        let num_bins = (max - min + 1) as usize;

        for m in matches[..nan_begin].iter_mut() {
            m.category = get_value(m);
            debug_assert!(m.category >= min && m.category <= max);
        }

        let mut indptr = vec![0usize; num_bins + 1];
        for m in matches[..nan_begin].iter() {
            indptr[(m.category - min) as usize + 1] += 1;
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
            let ix = (m.category - min) as usize;
            binned[cursors[ix]] = *m;
            cursors[ix] += 1;
        }
        matches[..nan_begin].copy_from_slice(&binned);

        // bool is smaller than the reduction element, so occurrence is
        // tracked as i8.
        let mut occurrence = vec![0i8; num_bins];
        for m in matches[..nan_begin].iter() {
            occurrence[(m.category - min) as usize] = 1;
        }
        comm.all_reduce_max_i8(&mut occurrence)?;

        let categories = occurrence
            .iter()
            .enumerate()
            .filter(|(_, &seen)| seen == 1)
            .map(|(i, _)| min + i as i32)
            .collect();

        Ok((indptr, categories))
    }
}
