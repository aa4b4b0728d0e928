use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::aggregations::{Aggregation, DataUsed};
use crate::error::Result;
use crate::holder::TableHolder;
use crate::hyperparameters::Hyperparameters;

/// One candidate tree before fitting: an aggregation over one peripheral
/// edge plus the descriptor of the aggregated value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateSpec {
    pub peripheral_used: usize,
    pub aggregation: Aggregation,
    pub data_used: DataUsed,
    pub column: usize,
}

/// Builds the candidate list for one feature. The full list is
/// enumerated first (edges ascending, aggregations in the configured
/// order, data_used ordinal, column ascending), then thinned: round
/// robin keeps exactly the candidate at `feature_ix mod len`, and
/// `share_aggregations < 1` drops candidates through the RNG seeded by
/// `(seed, feature_ix)` so pruning is reproducible at any worker count.
pub fn build_candidates(
    holder: &TableHolder,
    hyperparameters: &Hyperparameters,
    num_subfeatures_per_edge: &[usize],
    feature_ix: usize,
) -> Result<Vec<CandidateSpec>> {
    fn push_range(
        candidates: &mut Vec<CandidateSpec>,
        edge: usize,
        aggregation: Aggregation,
        data_used: DataUsed,
        columns: usize,
    ) {
        for column in 0..columns {
            candidates.push(CandidateSpec {
                peripheral_used: edge,
                aggregation,
                data_used,
                column,
            });
        }
    }

    let mut candidates = Vec::new();

    for edge in 0..holder.num_edges() {
        let peripheral = holder.peripheral_table(edge);
        let same_units = holder.same_units(edge);
        let df = peripheral.df();
        let has_time_stamps = peripheral.has_time_stamp();

        let num_numericals = df.num_numericals()
            + if holder.allow_lagged(edge) {
                df.num_targets()
            } else {
                0
            };
        let num_subfeatures = num_subfeatures_per_edge[edge];

        for name in &hyperparameters.aggregation {
            let aggregation = Aggregation::parse(name)?;

            if aggregation.needs_time_stamps() && !has_time_stamps {
                continue;
            }

            match aggregation {
                Aggregation::Count | Aggregation::AvgTimeBetween => {
                    push_range(&mut candidates, edge, aggregation, DataUsed::NotApplicable, 1);
                }

                Aggregation::First | Aggregation::Last => {
                    push_range(
                        &mut candidates,
                        edge,
                        aggregation,
                        DataUsed::Discrete,
                        df.num_discretes(),
                    );
                    push_range(
                        &mut candidates,
                        edge,
                        aggregation,
                        DataUsed::Numerical,
                        num_numericals,
                    );
                }

                Aggregation::CountDistinct | Aggregation::CountMinusCountDistinct => {
                    push_range(
                        &mut candidates,
                        edge,
                        aggregation,
                        DataUsed::Categorical,
                        df.num_categoricals(),
                    );
                    push_range(
                        &mut candidates,
                        edge,
                        aggregation,
                        DataUsed::Discrete,
                        df.num_discretes(),
                    );
                    push_range(
                        &mut candidates,
                        edge,
                        aggregation,
                        DataUsed::Numerical,
                        num_numericals,
                    );
                }

                Aggregation::Avg
                | Aggregation::Sum
                | Aggregation::Min
                | Aggregation::Max
                | Aggregation::Median
                | Aggregation::Stddev
                | Aggregation::Var => {
                    push_range(
                        &mut candidates,
                        edge,
                        aggregation,
                        DataUsed::Discrete,
                        df.num_discretes(),
                    );
                    push_range(
                        &mut candidates,
                        edge,
                        aggregation,
                        DataUsed::Numerical,
                        num_numericals,
                    );
                    push_range(
                        &mut candidates,
                        edge,
                        aggregation,
                        DataUsed::SameUnitsCategorical,
                        same_units.categorical.len(),
                    );
                    for ix in same_units.discrete_indices(false) {
                        candidates.push(CandidateSpec {
                            peripheral_used: edge,
                            aggregation,
                            data_used: DataUsed::SameUnitsDiscrete,
                            column: ix,
                        });
                    }
                    for ix in same_units.discrete_indices(true) {
                        candidates.push(CandidateSpec {
                            peripheral_used: edge,
                            aggregation,
                            data_used: DataUsed::SameUnitsDiscreteTs,
                            column: ix,
                        });
                    }
                    for ix in same_units.numerical_indices(false) {
                        candidates.push(CandidateSpec {
                            peripheral_used: edge,
                            aggregation,
                            data_used: DataUsed::SameUnitsNumerical,
                            column: ix,
                        });
                    }
                    for ix in same_units.numerical_indices(true) {
                        candidates.push(CandidateSpec {
                            peripheral_used: edge,
                            aggregation,
                            data_used: DataUsed::SameUnitsNumericalTs,
                            column: ix,
                        });
                    }
                    push_range(
                        &mut candidates,
                        edge,
                        aggregation,
                        DataUsed::Subfeatures,
                        num_subfeatures,
                    );
                }
            }
        }
    }

    if hyperparameters.round_robin && !candidates.is_empty() {
        let keep = feature_ix % candidates.len();
        return Ok(vec![candidates[keep].clone()]);
    }

    if hyperparameters.share_aggregations < 1.0 && !candidates.is_empty() {
        let seed = hyperparameters
            .seed
            .wrapping_add((feature_ix as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
        let mut rng = StdRng::seed_from_u64(seed);
        let kept: Vec<CandidateSpec> = candidates
            .iter()
            .filter(|_| rng.random::<f64>() < hyperparameters.share_aggregations)
            .cloned()
            .collect();

        if kept.is_empty() {
            return Ok(vec![candidates[0].clone()]);
        }
        return Ok(kept);
    }

    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containers::{DataFrame, DataFrameView, FloatColumn, IntColumn, Placeholder, Role};
    use std::sync::Arc;

    fn holder() -> TableHolder {
        let population = Arc::new(
            DataFrame::new(
                "POPULATION",
                vec![],
                vec![],
                vec![IntColumn::new("jk", Role::JoinKey, vec![1, 2])],
                vec![],
                vec![FloatColumn::new("y", Role::Target, vec![0.0, 1.0])],
                vec![FloatColumn::new("ts", Role::TimeStamp, vec![1.0, 2.0])],
            )
            .unwrap(),
        );
        let peripheral = Arc::new(
            DataFrame::new(
                "P1",
                vec![IntColumn::new("cat", Role::Categorical, vec![0, 1])],
                vec![],
                vec![IntColumn::new("jk", Role::JoinKey, vec![1, 2])],
                vec![FloatColumn::new("x", Role::Numerical, vec![1.0, 2.0])],
                vec![],
                vec![FloatColumn::new("ts", Role::TimeStamp, vec![0.0, 0.0])],
            )
            .unwrap(),
        );
        let placeholder =
            Placeholder::new("POPULATION").join(Placeholder::new("P1"), "jk", "jk", "ts", "ts", "");
        TableHolder::new(
            &placeholder,
            &DataFrameView::new(population),
            &[peripheral],
            &["P1".to_string()],
            1,
            0,
        )
        .unwrap()
    }

    fn hyperparameters(aggregation: &[&str]) -> Hyperparameters {
        Hyperparameters {
            aggregation: aggregation.iter().map(|s| s.to_string()).collect(),
            ..Hyperparameters::default()
        }
    }

    #[test]
    fn test_eligibility_per_aggregation() {
        let holder = holder();

        // COUNT: one candidate; AVG: one numerical column; COUNT
        // DISTINCT: categorical + numerical.
        let candidates =
            build_candidates(&holder, &hyperparameters(&["COUNT"]), &[0], 0).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].data_used, DataUsed::NotApplicable);

        let candidates =
            build_candidates(&holder, &hyperparameters(&["AVG"]), &[0], 0).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].data_used, DataUsed::Numerical);

        let candidates =
            build_candidates(&holder, &hyperparameters(&["COUNT DISTINCT"]), &[0], 0)
                .unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].data_used, DataUsed::Categorical);
        assert_eq!(candidates[1].data_used, DataUsed::Numerical);
    }

    #[test]
    fn test_round_robin_keeps_one_rotating() {
        let holder = holder();
        let mut hyperparameters = hyperparameters(&["AVG", "SUM", "MAX"]);
        hyperparameters.round_robin = true;

        let all = build_candidates(
            &holder,
            &Hyperparameters {
                round_robin: false,
                ..hyperparameters.clone()
            },
            &[0],
            0,
        )
        .unwrap();
        assert_eq!(all.len(), 3);

        for t in 0..6 {
            let kept = build_candidates(&holder, &hyperparameters, &[0], t).unwrap();
            assert_eq!(kept.len(), 1);
            assert_eq!(kept[0], all[t % 3]);
        }
    }

    #[test]
    fn test_share_aggregations_is_seeded() {
        let holder = holder();
        let mut hyperparameters =
            hyperparameters(&["AVG", "SUM", "MAX", "MIN", "MEDIAN", "VAR", "STDDEV"]);
        hyperparameters.share_aggregations = 0.5;

        let once = build_candidates(&holder, &hyperparameters, &[0], 3).unwrap();
        let twice = build_candidates(&holder, &hyperparameters, &[0], 3).unwrap();
        assert_eq!(once, twice);
        assert!(!once.is_empty());
        assert!(once.len() < 7);
    }
}
