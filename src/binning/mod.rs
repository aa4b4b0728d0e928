// Binners for the split search. Both binners permute the match range so
// bins are contiguous, leave the NaN tail in place behind `nan_begin`,
// and return an indptr (prefix sums of per-bin counts) over the non-NaN
// head.

pub mod categorical;
pub mod numerical;

pub use categorical::CategoricalBinner;
pub use numerical::NumericalBinner;

use crate::containers::Match;

/// Stably partitions the range so all matches with a finite value come
/// first; returns the position where the NaN tail begins. Infinities
/// (overflow products) travel with the NaN tail rather than poisoning
/// the bin bounds.
pub fn partition_nan_tail<F>(matches: &mut [Match], get_value: &F) -> usize
where
    F: Fn(&Match) -> f64,
{
    let mut head = Vec::with_capacity(matches.len());
    let mut tail = Vec::new();

    for m in matches.iter() {
        if get_value(m).is_finite() {
            head.push(*m);
        } else {
            tail.push(*m);
        }
    }

    let nan_begin = head.len();
    matches[..nan_begin].copy_from_slice(&head);
    matches[nan_begin..].copy_from_slice(&tail);
    nan_begin
}

/// Same, but for categorical values: negative categories (null) form the
/// tail.
pub fn partition_null_categories<F>(matches: &mut [Match], get_value: &F) -> usize
where
    F: Fn(&Match) -> i32,
{
    let mut head = Vec::with_capacity(matches.len());
    let mut tail = Vec::new();

    for m in matches.iter() {
        if get_value(m) < 0 {
            tail.push(*m);
        } else {
            head.push(*m);
        }
    }

    let nan_begin = head.len();
    matches[..nan_begin].copy_from_slice(&head);
    matches[nan_begin..].copy_from_slice(&tail);
    nan_begin
}
