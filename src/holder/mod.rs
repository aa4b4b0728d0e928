// The table holder materializes the join graph for one (sub)population:
// per peripheral edge a population subview and a peripheral subview, the
// recursive holders for grandchild joins, and the same-unit descriptors.

pub mod same_units;

pub use same_units::{identify_same_units, SameUnitPair, SameUnits, Side};

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::containers::{DataFrame, DataFrameView, Placeholder};
use crate::error::{EngineError, Result};

#[derive(Debug)]
pub struct TableHolder {
    /// The (scattered) population rows this worker trains on.
    population: DataFrameView,
    /// Population subview per edge: the worker partition with the edge's
    /// join key and time stamp nominated.
    main_tables: Vec<DataFrameView>,
    /// Peripheral subview per edge.
    peripheral_tables: Vec<DataFrameView>,
    /// Recursive holders for grandchild joins (subfeatures).
    subtables: Vec<Option<Box<TableHolder>>>,
    /// Same-unit descriptors per edge.
    same_units: Vec<SameUnits>,
    /// Name of the joined table per edge.
    edge_names: Vec<String>,
    /// Whether the edge may aggregate the peripheral's target columns.
    allow_lagged: Vec<bool>,
}

impl TableHolder {
    /// Builds the holder for one worker. `population` is the full
    /// (sub)population view; the worker's contiguous partition of it is
    /// taken internally so that subtable row ownership stays independent
    /// of how the parent level was partitioned.
    pub fn new(
        placeholder: &Placeholder,
        population: &DataFrameView,
        peripherals: &[Arc<DataFrame>],
        peripheral_names: &[String],
        num_workers: usize,
        rank: usize,
    ) -> Result<TableHolder> {
        placeholder.check_vector_length()?;

        let partition = population.scatter(num_workers, rank);

        let mut main_tables = Vec::new();
        let mut peripheral_tables = Vec::new();
        let mut subtables = Vec::new();
        let mut same_units = Vec::new();
        let mut edge_names = Vec::new();
        let mut allow_lagged = Vec::new();

        for edge in 0..placeholder.num_edges() {
            let joined = &placeholder.joined_tables[edge];

            let peripheral_df = find_peripheral(peripherals, peripheral_names, &joined.name)?;

            let main = partition.create_subview(
                &placeholder.join_keys_used[edge],
                Some(placeholder.time_stamps_used[edge].as_str()),
                None,
            )?;

            let peripheral = DataFrameView::new(Arc::clone(peripheral_df)).create_subview(
                &placeholder.other_join_keys_used[edge],
                Some(placeholder.other_time_stamps_used[edge].as_str()),
                Some(placeholder.upper_time_stamps_used[edge].as_str()),
            )?;

            let subtable = if joined.num_edges() > 0 {
                // Subtable rows are derived from the full population so
                // their ownership is the same at every worker count.
                let full_main = population.create_subview(
                    &placeholder.join_keys_used[edge],
                    Some(placeholder.time_stamps_used[edge].as_str()),
                    None,
                )?;

                let rows = make_subrows(&full_main, &peripheral);
                let sub_population =
                    DataFrameView::with_rows(Arc::clone(peripheral_df), Arc::new(rows));

                Some(Box::new(TableHolder::new(
                    joined,
                    &sub_population,
                    peripherals,
                    peripheral_names,
                    num_workers,
                    rank,
                )?))
            } else {
                None
            };

            same_units.push(identify_same_units(population.df(), peripheral_df));
            main_tables.push(main);
            peripheral_tables.push(peripheral);
            subtables.push(subtable);
            edge_names.push(joined.name.clone());
            allow_lagged.push(placeholder.allow_lagged(edge));
        }

        Ok(TableHolder {
            population: partition,
            main_tables,
            peripheral_tables,
            subtables,
            same_units,
            edge_names,
            allow_lagged,
        })
    }

    pub fn num_edges(&self) -> usize {
        self.main_tables.len()
    }

    pub fn population(&self) -> &DataFrameView {
        &self.population
    }

    pub fn main_table(&self, edge: usize) -> &DataFrameView {
        &self.main_tables[edge]
    }

    pub fn peripheral_table(&self, edge: usize) -> &DataFrameView {
        &self.peripheral_tables[edge]
    }

    pub fn subtable(&self, edge: usize) -> Option<&TableHolder> {
        self.subtables[edge].as_deref()
    }

    pub fn same_units(&self, edge: usize) -> &SameUnits {
        &self.same_units[edge]
    }

    pub fn edge_name(&self, edge: usize) -> &str {
        &self.edge_names[edge]
    }

    pub fn allow_lagged(&self, edge: usize) -> bool {
        self.allow_lagged[edge]
    }
}

fn find_peripheral<'a>(
    peripherals: &'a [Arc<DataFrame>],
    peripheral_names: &[String],
    name: &str,
) -> Result<&'a Arc<DataFrame>> {
    let position = peripheral_names
        .iter()
        .position(|n| n == name)
        .ok_or_else(|| {
            EngineError::Schema(format!("Peripheral table named '{}' not found", name))
        })?;
    Ok(&peripherals[position])
}

/// The sorted set of peripheral rows reachable from the population
/// subview through its join key. Time stamps are deliberately not
/// applied here; the subtable's own matching does that.
fn make_subrows(population: &DataFrameView, peripheral: &DataFrameView) -> Vec<usize> {
    let mut rows = BTreeSet::new();

    if let Some(index) = peripheral.index() {
        for l in 0..population.nrows() {
            let join_key = population.join_key(l);
            if join_key < 0 {
                continue;
            }
            if let Some(matched) = index.find(join_key) {
                rows.extend(matched.iter().copied());
            }
        }
    }

    rows.into_iter().collect()
}
