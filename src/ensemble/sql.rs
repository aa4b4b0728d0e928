// SQL emission. Every trained tree renders as one DROP + CREATE TABLE
// pair whose aggregation runs over the joined rows surviving the
// time-stamp predicates and the learned split predicates. Subfeature
// tables are emitted before the features referencing them.

use crate::aggregations::{Aggregation, DataUsed};
use crate::containers::{Encoding, TableSchema};
use crate::ensemble::FeatureEnsemble;
use crate::holder::{SameUnits, Side};
use crate::trees::{DecisionTree, Split};

impl FeatureEnsemble {
    /// The SQL script: one statement pair per feature, subfeatures
    /// first. `categories` decodes the categorical split members.
    pub fn to_sql(&self, categories: &Encoding) -> Vec<String> {
        self.sql_with_prefix("", categories)
    }

    pub(crate) fn sql_with_prefix(&self, prefix: &str, categories: &Encoding) -> Vec<String> {
        let mut statements = Vec::new();

        for (edge, subensemble) in self.subensembles.iter().enumerate() {
            if let Some(subensemble) = subensemble {
                let sub_prefix = format!("{}{}_", prefix, edge + 1);
                statements.extend(subensemble.sql_with_prefix(&sub_prefix, categories));
            }
        }

        for (t, tree) in self.trees.iter().enumerate() {
            let feature = format!("{}{}", prefix, t + 1);
            statements.push(self.tree_sql(tree, prefix, &feature, categories));
        }

        statements
    }

    fn tree_sql(
        &self,
        tree: &DecisionTree,
        prefix: &str,
        feature: &str,
        categories: &Encoding,
    ) -> String {
        let edge = tree.peripheral_used;
        let population = &self.population_schema;
        let peripheral = &self.peripheral_schemas[edge];
        let same_units = &self.same_units[edge];

        let mut sql = String::new();

        sql.push_str(&format!("DROP TABLE IF EXISTS \"FEATURE_{}\";\n\n", feature));

        sql.push_str(&format!("CREATE TABLE \"FEATURE_{}\" AS\n", feature));
        sql.push_str(&format!(
            "SELECT {} AS \"feature_{}\",\n       t1.rownum AS \"rownum\"\n",
            aggregation_sql(tree, prefix, population, peripheral, same_units),
            feature
        ));
        sql.push_str(&format!("FROM \"{}\" t1\n", population.name));
        sql.push_str(&format!(
            "LEFT JOIN \"{}\" t2\nON t1.\"{}\" = t2.\"{}\"\n",
            peripheral.name,
            self.placeholder.join_keys_used[edge],
            self.placeholder.other_join_keys_used[edge]
        ));

        for sub in subfeatures_used(tree) {
            let number = format!("{}{}_{}", prefix, edge + 1, sub + 1);
            sql.push_str(&format!(
                "LEFT JOIN \"FEATURE_{}\" f_{} ON t2.rownum = f_{}.rownum\n",
                number, number, number
            ));
        }

        let mut predicates = Vec::new();

        if self.hyperparameters.use_timestamps {
            let ts_left = &self.placeholder.time_stamps_used[edge];
            let ts_right = &self.placeholder.other_time_stamps_used[edge];
            if !ts_left.is_empty() && !ts_right.is_empty() {
                predicates.push(format!("t2.\"{}\" <= t1.\"{}\"", ts_right, ts_left));
            }
            let upper = &self.placeholder.upper_time_stamps_used[edge];
            if !ts_left.is_empty() && !upper.is_empty() {
                predicates.push(format!(
                    "( t1.\"{}\" < t2.\"{}\" OR t2.\"{}\" IS NULL )",
                    ts_left, upper, upper
                ));
            }
        }

        let paths = tree.included_paths();
        let path_sql: Vec<String> = paths
            .iter()
            .map(|path| {
                path.iter()
                    .map(|(split, went_left)| {
                        split_sql(
                            split,
                            *went_left,
                            prefix,
                            edge,
                            population,
                            peripheral,
                            same_units,
                            &self.placeholder.time_stamps_used[edge],
                            &self.placeholder.other_time_stamps_used[edge],
                            &self.placeholder.upper_time_stamps_used[edge],
                            categories,
                        )
                    })
                    .collect::<Vec<String>>()
                    .join(" AND ")
            })
            .filter(|conjunction| !conjunction.is_empty())
            .collect();

        match path_sql.len() {
            0 => {}
            1 => predicates.push(path_sql.into_iter().next().unwrap()),
            _ => predicates.push(format!(
                "( {} )",
                path_sql
                    .iter()
                    .map(|p| format!("( {} )", p))
                    .collect::<Vec<String>>()
                    .join(" OR ")
            )),
        }

        if !predicates.is_empty() {
            sql.push_str(&format!("WHERE {}\n", predicates.join("\n  AND ")));
        }

        sql.push_str("GROUP BY t1.rownum;\n");
        sql
    }
}

/// Columns referenced as subfeatures anywhere in the tree; needed for
/// the joins.
fn subfeatures_used(tree: &DecisionTree) -> Vec<usize> {
    let mut used = Vec::new();
    if tree.data_used == DataUsed::Subfeatures {
        used.push(tree.column);
    }
    for path in tree.included_paths() {
        for (split, _) in path {
            if split.data_used == DataUsed::Subfeatures {
                used.push(split.column);
            }
        }
    }
    used.sort_unstable();
    used.dedup();
    used
}

fn value_sql(
    data_used: DataUsed,
    column: usize,
    prefix: &str,
    edge: usize,
    population: &TableSchema,
    peripheral: &TableSchema,
    same_units: &SameUnits,
    ts_left: &str,
    ts_right: &str,
    upper: &str,
) -> String {
    match data_used {
        DataUsed::Numerical => format!("t2.\"{}\"", peripheral.numerical_name(column)),

        DataUsed::Discrete => format!("t2.\"{}\"", peripheral.discretes[column]),

        DataUsed::Categorical => format!("t2.\"{}\"", peripheral.categoricals[column]),

        DataUsed::SameUnitsNumerical | DataUsed::SameUnitsNumericalTs => {
            let pair = &same_units.numerical[column];
            let a = format!("t2.\"{}\"", peripheral.numericals[pair.peripheral_column]);
            let b = match pair.other_side {
                Side::Population => format!("t1.\"{}\"", population.numericals[pair.other_column]),
                Side::Peripheral => format!("t2.\"{}\"", peripheral.numericals[pair.other_column]),
            };
            format!("{} - {}", a, b)
        }

        DataUsed::SameUnitsDiscrete | DataUsed::SameUnitsDiscreteTs => {
            let pair = &same_units.discrete[column];
            let a = format!("t2.\"{}\"", peripheral.discretes[pair.peripheral_column]);
            let b = match pair.other_side {
                Side::Population => format!("t1.\"{}\"", population.discretes[pair.other_column]),
                Side::Peripheral => format!("t2.\"{}\"", peripheral.discretes[pair.other_column]),
            };
            format!("{} - {}", a, b)
        }

        DataUsed::SameUnitsCategorical => {
            let pair = &same_units.categorical[column];
            let a = format!("t2.\"{}\"", peripheral.categoricals[pair.peripheral_column]);
            let b = match pair.other_side {
                Side::Population => {
                    format!("t1.\"{}\"", population.categoricals[pair.other_column])
                }
                Side::Peripheral => {
                    format!("t2.\"{}\"", peripheral.categoricals[pair.other_column])
                }
            };
            format!("CASE WHEN {} = {} THEN 1 ELSE 0 END", a, b)
        }

        DataUsed::Subfeatures => {
            let number = format!("{}{}_{}", prefix, edge + 1, column + 1);
            format!("COALESCE( f_{}.\"feature_{}\", 0.0 )", number, number)
        }

        DataUsed::TimeStampsDiff => {
            format!("t1.\"{}\" - t2.\"{}\"", ts_left, ts_right)
        }

        DataUsed::TimeStampsWindow => {
            format!("t2.\"{}\" - t1.\"{}\"", upper, ts_left)
        }

        DataUsed::NotApplicable => "*".to_string(),
    }
}

fn aggregation_sql(
    tree: &DecisionTree,
    prefix: &str,
    population: &TableSchema,
    peripheral: &TableSchema,
    same_units: &SameUnits,
) -> String {
    let edge = tree.peripheral_used;
    let ts_left = "";
    let ts_right = peripheral
        .time_stamps
        .first()
        .map(|s| s.as_str())
        .unwrap_or("");

    let value = value_sql(
        tree.data_used,
        tree.column,
        prefix,
        edge,
        population,
        peripheral,
        same_units,
        ts_left,
        ts_right,
        "",
    );

    match tree.aggregation {
        Aggregation::Avg => format!("AVG( {} )", value),
        Aggregation::Sum => format!("SUM( {} )", value),
        Aggregation::Min => format!("MIN( {} )", value),
        Aggregation::Max => format!("MAX( {} )", value),
        Aggregation::Median => format!("MEDIAN( {} )", value),
        Aggregation::Stddev => format!("STDDEV( {} )", value),
        Aggregation::Var => format!("VARIANCE( {} )", value),
        Aggregation::Count => "COUNT( * )".to_string(),
        Aggregation::CountDistinct => format!("COUNT( DISTINCT {} )", value),
        Aggregation::CountMinusCountDistinct => {
            format!("COUNT( {} ) - COUNT( DISTINCT {} )", value, value)
        }
        Aggregation::First => format!("ARG_MIN( {}, t2.\"{}\" )", value, ts_right),
        Aggregation::Last => format!("ARG_MAX( {}, t2.\"{}\" )", value, ts_right),
        Aggregation::AvgTimeBetween => format!(
            "( MAX( t2.\"{}\" ) - MIN( t2.\"{}\" ) ) / NULLIF( COUNT( t2.\"{}\" ) - 1, 0 )",
            ts_right, ts_right, ts_right
        ),
    }
}

#[allow(clippy::too_many_arguments)]
fn split_sql(
    split: &Split,
    went_left: bool,
    prefix: &str,
    edge: usize,
    population: &TableSchema,
    peripheral: &TableSchema,
    same_units: &SameUnits,
    ts_left: &str,
    ts_right: &str,
    upper: &str,
    categories: &Encoding,
) -> String {
    if split.is_categorical() {
        let column = format!("t2.\"{}\"", peripheral.categoricals[split.column]);
        let members: Vec<String> = split
            .categories_used
            .iter()
            .map(|&cat| match categories.at(cat) {
                Some(s) => format!("'{}'", s),
                None => format!("'{}'", cat),
            })
            .collect();
        let op = if went_left { "IN" } else { "NOT IN" };
        return format!("{} {} ( {} )", column, op, members.join(", "));
    }

    let value = value_sql(
        split.data_used,
        split.column,
        prefix,
        edge,
        population,
        peripheral,
        same_units,
        ts_left,
        ts_right,
        upper,
    );

    if split.is_nan {
        if went_left {
            format!("{} IS NULL", value)
        } else {
            format!("{} IS NOT NULL", value)
        }
    } else if went_left {
        format!("{} <= {}", value, split.critical_value)
    } else {
        format!("{} > {}", value, split.critical_value)
    }
}
