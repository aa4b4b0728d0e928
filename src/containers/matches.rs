use crate::containers::view::DataFrameView;
use crate::error::{EngineError, Result};

/// One surviving (population row, peripheral row) pair for one peripheral
/// edge. `population_row` indexes the population view, `peripheral_row`
/// the peripheral frame's base rows. `category` is scratch space for the
/// categorical binner; -1 outside a categorical pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    pub population_row: u32,
    pub peripheral_row: u32,
    pub category: i32,
}

/// Produces the match set for one peripheral edge. A pair `(l, r)` is
/// admitted iff the nominated join keys are equal and, when time stamps
/// are in play, `ts_right[r] <= ts_left[l]` and (the peripheral upper
/// time stamp is NaN or `ts_left[l] < upper_ts_right[r]`).
///
/// Output order is population row ascending, then peripheral row
/// ascending.
pub fn make_matches(
    population: &DataFrameView,
    peripheral: &DataFrameView,
    use_timestamps: bool,
) -> Result<Vec<Match>> {
    let index = peripheral.index().ok_or_else(|| {
        EngineError::Schema(format!(
            "{}: no join key nominated on the peripheral side",
            peripheral.name()
        ))
    })?;

    let check_ts =
        use_timestamps && population.has_time_stamp() && peripheral.has_time_stamp();

    let mut matches = Vec::new();

    for l in 0..population.nrows() {
        let join_key = population.join_key(l);

        if join_key < 0 {
            continue;
        }

        let Some(rows) = index.find(join_key) else {
            continue;
        };

        let ts_left = population.time_stamp(l);

        for &r in rows {
            if check_ts {
                let ts_right = peripheral.time_stamp_of_base(r);

                if !(ts_right <= ts_left) {
                    continue;
                }

                let upper = peripheral.upper_time_stamp_of_base(r);

                if !upper.is_nan() && !(ts_left < upper) {
                    continue;
                }
            }

            matches.push(Match {
                population_row: l as u32,
                peripheral_row: r as u32,
                category: -1,
            });
        }
    }

    Ok(matches)
}
