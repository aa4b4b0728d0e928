// The feature ensemble: the gradient-boosting outer loop over candidate
// relational trees, subfeature pre-training, the transform producing the
// feature matrix, predictions, SQL emission and persistence.

pub mod importance;
pub mod persist;
pub mod sql;

pub use importance::ImportanceMaker;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::aggregations::DataUsed;
use crate::containers::{make_matches, DataFrame, DataFrameView, Match, Placeholder, TableSchema};
use crate::error::{EngineError, Result};
use crate::fingerprints::Fingerprint;
use crate::holder::{SameUnits, Side, TableHolder};
use crate::hyperparameters::Hyperparameters;
use crate::multithreading::{Communicator, NoOpCommunicator, ThreadCommunicator};
use crate::optimization::{
    finite_or_zero, parse_loss_function, OptimizationCriterion, RSquaredCriterion,
};
use crate::trees::{build_candidates, DecisionTree, TreeFitter, ValueExtractor};

/// Per-fit tally of numeric anomalies; degraded values never abort
/// training, they are counted and summarized once.
#[derive(Debug, Default)]
struct AnomalyCounter {
    dropped_updates: usize,
    non_finite_features: usize,
}

impl AnomalyCounter {
    fn warn_summary(&self) {
        if self.dropped_updates > 0 || self.non_finite_features > 0 {
            warn!(
                dropped_updates = self.dropped_updates,
                non_finite_features = self.non_finite_features,
                "numeric anomalies degraded to NaN/zero during fit"
            );
        }
    }
}

/// Ordered list of trained relational trees plus everything needed to
/// transform new data and render SQL: the join graph, the captured
/// schemas, the same-unit descriptors and the subfeature ensembles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureEnsemble {
    hyperparameters: Hyperparameters,
    placeholder: Placeholder,
    peripheral_names: Vec<String>,

    #[serde(default)]
    trees: Vec<DecisionTree>,

    #[serde(default)]
    subensembles: Vec<Option<Box<FeatureEnsemble>>>,

    #[serde(default)]
    same_units: Vec<SameUnits>,

    #[serde(default)]
    population_schema: TableSchema,

    #[serde(default)]
    peripheral_schemas: Vec<TableSchema>,

    #[serde(default)]
    initial_prediction: f64,

    #[serde(default)]
    importances: Vec<(String, f64)>,

    #[serde(default)]
    fitted: bool,
}

impl FeatureEnsemble {
    pub fn new(
        hyperparameters: Hyperparameters,
        placeholder: Placeholder,
        peripheral_names: Vec<String>,
    ) -> Result<Self> {
        hyperparameters.validate()?;
        placeholder.check_vector_length()?;

        Ok(Self {
            hyperparameters,
            placeholder,
            peripheral_names,
            trees: Vec::new(),
            subensembles: Vec::new(),
            same_units: Vec::new(),
            population_schema: TableSchema::default(),
            peripheral_schemas: Vec::new(),
            initial_prediction: 0.0,
            importances: Vec::new(),
            fitted: false,
        })
    }

    pub fn hyperparameters(&self) -> &Hyperparameters {
        &self.hyperparameters
    }

    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }

    pub fn num_features(&self) -> usize {
        self.trees.len()
    }

    pub fn initial_prediction(&self) -> f64 {
        self.initial_prediction
    }

    /// Column importances, largest share first.
    pub fn importances(&self) -> &[(String, f64)] {
        &self.importances
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted
    }

    /// Identity of this ensemble's output given the hyperparameters and
    /// the join graph.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::new("feature_ensemble", self.hyperparameters.seed)
            .with_param(
                "hyperparameters",
                serde_json::to_value(&self.hyperparameters).unwrap_or(json!(null)),
            )
            .with_param(
                "placeholder",
                serde_json::to_value(&self.placeholder).unwrap_or(json!(null)),
            )
            .with_param("peripheral_names", json!(self.peripheral_names))
    }

    /// Fingerprint including the input schemas as dependencies; this is
    /// the key the artifact cache uses.
    pub fn fingerprint_with_data(
        &self,
        population: &DataFrame,
        peripherals: &[Arc<DataFrame>],
    ) -> Fingerprint {
        let mut fingerprint = self
            .fingerprint()
            .with_dependency(Fingerprint::new("data_frame", 0).with_param(
                "schema",
                population.schema_value(),
            ));
        for peripheral in peripherals {
            fingerprint = fingerprint.with_dependency(
                Fingerprint::new("data_frame", 0).with_param("schema", peripheral.schema_value()),
            );
        }
        fingerprint
    }

    // ------------------------------------------------------------------
    // Fit
    // ------------------------------------------------------------------

    /// Trains the ensemble. Workers run the full algorithm over disjoint
    /// population partitions and meet at the communicator's reductions;
    /// given a seed and a worker count the result is bit-for-bit
    /// reproducible.
    pub fn fit(
        &mut self,
        population: &DataFrameView,
        peripherals: &[Arc<DataFrame>],
    ) -> Result<()> {
        self.hyperparameters.validate()?;
        self.placeholder.check_vector_length()?;
        self.placeholder.check_data_model(&self.peripheral_names)?;

        if population.df().num_targets() != 1 {
            return Err(EngineError::InvalidInput(format!(
                "exactly one target column required, got {}",
                population.df().num_targets()
            )));
        }

        // Surface schema errors up front, before any worker could die
        // between barriers.
        TableHolder::new(
            &self.placeholder,
            population,
            peripherals,
            &self.peripheral_names,
            1,
            0,
        )?;

        let num_workers = self.hyperparameters.resolve_num_threads();

        info!(
            num_workers,
            num_features = self.hyperparameters.num_features,
            loss_function = %self.hyperparameters.loss_function,
            seed = self.hyperparameters.seed,
            "fitting feature ensemble"
        );

        let population_df = population.df();
        let full_targets: Vec<f64> = (0..population_df.nrows())
            .map(|i| population_df.target(i, 0))
            .collect();

        let fitted = if num_workers <= 1 {
            let mut worker = self.clone();
            let holder = TableHolder::new(
                &self.placeholder,
                population,
                peripherals,
                &self.peripheral_names,
                1,
                0,
            )?;
            worker.fit_with_holder(&holder, &full_targets, peripherals, &NoOpCommunicator)?;
            worker
        } else {
            let communicators = ThreadCommunicator::for_workers(num_workers);
            let template = &*self;
            let full_targets = &full_targets;

            let results: Vec<Result<FeatureEnsemble>> = std::thread::scope(|scope| {
                let handles: Vec<_> = communicators
                    .into_iter()
                    .map(|comm| {
                        scope.spawn(move || -> Result<FeatureEnsemble> {
                            let mut worker = template.clone();
                            let placeholder = worker.placeholder.clone();
                            let peripheral_names = worker.peripheral_names.clone();
                            let holder = TableHolder::new(
                                &placeholder,
                                population,
                                peripherals,
                                &peripheral_names,
                                comm.num_workers(),
                                comm.rank(),
                            )?;
                            worker.fit_with_holder(&holder, full_targets, peripherals, &comm)?;
                            Ok(worker)
                        })
                    })
                    .collect();

                handles
                    .into_iter()
                    .map(|handle| handle.join().expect("worker thread panicked"))
                    .collect()
            });

            let mut fitted = None;
            for (rank, result) in results.into_iter().enumerate() {
                let worker = result?;
                if rank == 0 {
                    fitted = Some(worker);
                }
            }
            fitted.expect("rank 0 always reports")
        };

        *self = fitted;
        self.fitted = true;

        info!(num_trees = self.trees.len(), "feature ensemble fitted");
        Ok(())
    }

    /// The SPMD body run by every worker. `full_targets` holds one value
    /// per base row of the (sub)population frame so that target
    /// propagation into subtables is independent of the partitioning.
    fn fit_with_holder(
        &mut self,
        holder: &TableHolder,
        full_targets: &[f64],
        peripherals: &[Arc<DataFrame>],
        comm: &dyn Communicator,
    ) -> Result<()> {
        let num_edges = holder.num_edges();
        let population = holder.population();
        let nrows = population.nrows();

        self.same_units = (0..num_edges)
            .map(|edge| holder.same_units(edge).clone())
            .collect();
        self.population_schema = TableSchema::from_data_frame(population.df());
        self.peripheral_schemas = (0..num_edges)
            .map(|edge| TableSchema::from_data_frame(holder.peripheral_table(edge).df()))
            .collect();

        // Subfeature ensembles are trained before the main loop, in
        // dependency order.
        self.subensembles = (0..num_edges).map(|_| None).collect();
        for edge in 0..num_edges {
            let Some(subtable) = holder.subtable(edge) else {
                continue;
            };

            let mut sub_hyperparameters = self.hyperparameters.clone();
            sub_hyperparameters.num_features = self.hyperparameters.num_subfeatures;

            let mut subensemble = FeatureEnsemble::new(
                sub_hyperparameters,
                self.placeholder.joined_tables[edge].clone(),
                self.peripheral_names.clone(),
            )?;

            let sub_targets = self.propagate_targets(holder, edge, full_targets)?;
            subensemble.fit_with_holder(subtable, &sub_targets, peripherals, comm)?;
            subensemble.fitted = true;

            self.subensembles[edge] = Some(Box::new(subensemble));
        }

        // Static per-edge data: match sets and subfeature columns.
        let mut match_sets: Vec<Vec<Match>> = Vec::with_capacity(num_edges);
        for edge in 0..num_edges {
            match_sets.push(make_matches(
                holder.main_table(edge),
                holder.peripheral_table(edge),
                self.hyperparameters.use_timestamps,
            )?);
        }

        let mut subfeature_columns: Vec<Vec<Vec<f64>>> = Vec::with_capacity(num_edges);
        for edge in 0..num_edges {
            subfeature_columns.push(self.subfeature_columns(
                holder,
                edge,
                &match_sets[edge],
                peripherals,
            )?);
        }
        let num_subfeatures_per_edge: Vec<usize> =
            subfeature_columns.iter().map(|cols| cols.len()).collect();

        // The boosting loop.
        let targets: Vec<f64> = (0..nrows)
            .map(|i| full_targets[population.base_row(i)])
            .collect();

        let mut loss = parse_loss_function(&self.hyperparameters.loss_function)?;
        self.initial_prediction = loss.init(&targets, comm)?;

        let mut yhat_old = vec![self.initial_prediction; nrows];
        let mut criterion = RSquaredCriterion::new();
        let mut anomalies = AnomalyCounter::default();
        let mut importance = ImportanceMaker::new();

        for t in 0..self.hyperparameters.num_features {
            loss.calc_gradients(&yhat_old);
            loss.calc_sums(comm)?;
            loss.commit();

            let residuals = loss.pseudo_residuals();
            criterion.init(std::slice::from_ref(&residuals), comm)?;

            let candidates =
                build_candidates(holder, &self.hyperparameters, &num_subfeatures_per_edge, t)?;
            if candidates.is_empty() {
                break;
            }

            let mut best: Option<(DecisionTree, Vec<f64>)> = None;
            let mut best_value = f64::NEG_INFINITY;

            for spec in &candidates {
                let edge = spec.peripheral_used;
                let extractor = ValueExtractor::new(
                    holder.main_table(edge),
                    holder.peripheral_table(edge),
                    holder.same_units(edge),
                    &subfeature_columns[edge],
                    holder.allow_lagged(edge),
                );
                let fitter = TreeFitter {
                    hyperparameters: &self.hyperparameters,
                    extractor: &extractor,
                    residuals: &residuals,
                    comm,
                };

                let mut matches = match_sets[edge].clone();
                let (root, value, eta) = fitter.fit(spec, &mut matches, &mut criterion)?;

                // Strict comparison: the earliest candidate wins ties.
                if value > best_value {
                    best_value = value;
                    best = Some((
                        DecisionTree {
                            peripheral_used: edge,
                            aggregation: spec.aggregation,
                            data_used: spec.data_used,
                            column: spec.column,
                            root,
                            weights: [0.0; 3],
                            update_rate: 0.0,
                            criterion_value: value,
                        },
                        eta,
                    ));
                }
            }

            let Some((mut tree, eta)) = best else {
                break;
            };

            let weights =
                loss.calc_weights(&eta, self.hyperparameters.lambda, comm)?;
            let gain = loss.evaluate_split(
                &weights,
                self.hyperparameters.lambda,
                &eta,
                comm,
            )?;
            tree.weights = weights;

            let predictions: Vec<f64> = eta
                .iter()
                .map(|&e| weights[0] + weights[1] * finite_or_zero(e))
                .collect();

            tree.update_rate = loss.calc_update_rate(&yhat_old, &predictions, comm)?;

            anomalies.dropped_updates += loss.apply_update(
                &mut yhat_old,
                &predictions,
                tree.update_rate * self.hyperparameters.shrinkage,
            );

            debug!(
                feature = t,
                criterion = best_value,
                gain,
                update_rate = tree.update_rate,
                aggregation = tree.aggregation.to_str(),
                "trained feature"
            );

            self.credit_importance(&mut importance, &tree);
            self.trees.push(tree);
        }

        anomalies.non_finite_features = criterion.num_non_finite();
        if comm.rank() == 0 {
            anomalies.warn_summary();
        }
        self.importances = importance.normalized();

        Ok(())
    }

    /// Target per peripheral base row of `edge`: the mean target of the
    /// population rows sharing the join key. Used as the training target
    /// of the edge's subfeature ensemble.
    fn propagate_targets(
        &self,
        holder: &TableHolder,
        edge: usize,
        full_targets: &[f64],
    ) -> Result<Vec<f64>> {
        let population_df = holder.population().df();
        let jk_name = &self.placeholder.join_keys_used[edge];
        let jk_col = population_df.find_join_key(jk_name).ok_or_else(|| {
            EngineError::missing_column(population_df.name(), jk_name, "join key")
        })?;
        let index = population_df.index(jk_col);

        let peripheral_df = holder.peripheral_table(edge).df();
        let other_jk_name = &self.placeholder.other_join_keys_used[edge];
        let other_jk_col = peripheral_df.find_join_key(other_jk_name).ok_or_else(|| {
            EngineError::missing_column(peripheral_df.name(), other_jk_name, "join key")
        })?;

        Ok((0..peripheral_df.nrows())
            .map(|r| {
                let jk = peripheral_df.join_key(r, other_jk_col);
                match index.find(jk) {
                    Some(rows) if !rows.is_empty() => {
                        rows.iter().map(|&l| full_targets[l]).sum::<f64>() / rows.len() as f64
                    }
                    _ => 0.0,
                }
            })
            .collect())
    }

    /// Subfeature columns for one edge, indexed by peripheral base row;
    /// rows never touched by this worker's matches stay NaN.
    fn subfeature_columns(
        &self,
        holder: &TableHolder,
        edge: usize,
        matches: &[Match],
        peripherals: &[Arc<DataFrame>],
    ) -> Result<Vec<Vec<f64>>> {
        let Some(subensemble) = self.subensembles.get(edge).and_then(|s| s.as_ref()) else {
            return Ok(Vec::new());
        };

        let peripheral_df = holder.peripheral_table(edge).df();

        let mut needed: Vec<usize> = matches.iter().map(|m| m.peripheral_row as usize).collect();
        needed.sort_unstable();
        needed.dedup();

        let view = DataFrameView::with_rows(Arc::clone(peripheral_df), Arc::new(needed.clone()));
        let sub_holder = TableHolder::new(
            &self.placeholder.joined_tables[edge],
            &view,
            peripherals,
            &self.peripheral_names,
            1,
            0,
        )?;

        let columns = subensemble.transform_with_holder(&sub_holder, peripherals)?;

        let mut expanded = vec![vec![f64::NAN; peripheral_df.nrows()]; columns.len()];
        for (f, column) in columns.iter().enumerate() {
            for (i, &row) in needed.iter().enumerate() {
                expanded[f][row] = column[i];
            }
        }
        Ok(expanded)
    }

    // ------------------------------------------------------------------
    // Transform / predict
    // ------------------------------------------------------------------

    /// The feature matrix: `(population rows x num_features)`, row-major.
    /// Empty aggregation sets degrade to NaN and are summarized in a
    /// warning.
    pub fn transform(
        &self,
        population: &DataFrameView,
        peripherals: &[Arc<DataFrame>],
    ) -> Result<Vec<f64>> {
        let columns = self.transform_columns(population, peripherals)?;
        let nrows = population.nrows();

        let mut matrix = vec![0.0; nrows * columns.len()];
        let mut nan_count = 0usize;
        for i in 0..nrows {
            for (f, column) in columns.iter().enumerate() {
                matrix[i * columns.len() + f] = column[i];
                if column[i].is_nan() {
                    nan_count += 1;
                }
            }
        }

        if nan_count > 0 {
            warn!(nan_count, "feature cells degraded to NaN (empty aggregation sets)");
        }

        Ok(matrix)
    }

    /// One column per trained feature.
    pub fn transform_columns(
        &self,
        population: &DataFrameView,
        peripherals: &[Arc<DataFrame>],
    ) -> Result<Vec<Vec<f64>>> {
        if !self.fitted {
            return Err(EngineError::InvalidInput(
                "the ensemble must be fitted before transform".to_string(),
            ));
        }

        let holder = TableHolder::new(
            &self.placeholder,
            population,
            peripherals,
            &self.peripheral_names,
            1,
            0,
        )?;
        self.transform_with_holder(&holder, peripherals)
    }

    fn transform_with_holder(
        &self,
        holder: &TableHolder,
        peripherals: &[Arc<DataFrame>],
    ) -> Result<Vec<Vec<f64>>> {
        let nrows = holder.population().nrows();
        let num_edges = holder.num_edges();

        let mut match_sets: Vec<Vec<Match>> = Vec::with_capacity(num_edges);
        for edge in 0..num_edges {
            match_sets.push(make_matches(
                holder.main_table(edge),
                holder.peripheral_table(edge),
                self.hyperparameters.use_timestamps,
            )?);
        }

        let mut subfeature_columns: Vec<Vec<Vec<f64>>> = Vec::with_capacity(num_edges);
        for edge in 0..num_edges {
            subfeature_columns.push(self.subfeature_columns(
                holder,
                edge,
                &match_sets[edge],
                peripherals,
            )?);
        }

        let columns: Vec<Vec<f64>> = self
            .trees
            .par_iter()
            .map(|tree| {
                let edge = tree.peripheral_used;
                let extractor = ValueExtractor::new(
                    holder.main_table(edge),
                    holder.peripheral_table(edge),
                    holder.same_units(edge),
                    &subfeature_columns[edge],
                    holder.allow_lagged(edge),
                );
                tree.feature_column(&extractor, &match_sets[edge], nrows)
            })
            .collect();

        Ok(columns)
    }

    /// Ensemble predictions:
    /// `initial + sum(update_rate * shrinkage * (a + b * feature))`,
    /// passed through the loss function's output transformation.
    pub fn predict(
        &self,
        population: &DataFrameView,
        peripherals: &[Arc<DataFrame>],
    ) -> Result<Vec<f64>> {
        let columns = self.transform_columns(population, peripherals)?;
        let nrows = population.nrows();
        let shrinkage = self.hyperparameters.shrinkage;

        let mut yhat = vec![self.initial_prediction; nrows];
        for (tree, column) in self.trees.iter().zip(&columns) {
            for i in 0..nrows {
                let contribution = tree.update_rate
                    * shrinkage
                    * (tree.weights[0] + tree.weights[1] * finite_or_zero(column[i]));
                if contribution.is_finite() {
                    yhat[i] += contribution;
                }
            }
        }

        let loss = parse_loss_function(&self.hyperparameters.loss_function)?;
        loss.transform_output(&mut yhat);
        Ok(yhat)
    }

    // ------------------------------------------------------------------
    // Importances
    // ------------------------------------------------------------------

    fn credit_importance(&self, importance: &mut ImportanceMaker, tree: &DecisionTree) {
        let gain = tree.criterion_value;
        if !(gain > 0.0) {
            return;
        }

        let mut condition_columns = Vec::new();
        for path in tree.included_paths() {
            for (split, _) in path {
                condition_columns
                    .push(self.column_label(tree.peripheral_used, split.data_used, split.column));
            }
        }

        let aggregated = self.column_label(tree.peripheral_used, tree.data_used, tree.column);

        if condition_columns.is_empty() {
            importance.add(aggregated, gain);
        } else {
            importance.add(aggregated, 0.5 * gain);
            let share = 0.5 * gain / condition_columns.len() as f64;
            for column in condition_columns {
                importance.add(column, share);
            }
        }
    }

    fn column_label(&self, edge: usize, data_used: DataUsed, column: usize) -> String {
        let population = &self.population_schema;
        let peripheral = &self.peripheral_schemas[edge];
        let same_units = &self.same_units[edge];

        match data_used {
            DataUsed::NotApplicable => peripheral.name.clone(),
            DataUsed::Numerical => {
                format!("{}.{}", peripheral.name, peripheral.numerical_name(column))
            }
            DataUsed::Discrete => format!("{}.{}", peripheral.name, peripheral.discretes[column]),
            DataUsed::Categorical => {
                format!("{}.{}", peripheral.name, peripheral.categoricals[column])
            }
            DataUsed::SameUnitsNumerical | DataUsed::SameUnitsNumericalTs => {
                let pair = &same_units.numerical[column];
                let other = match pair.other_side {
                    Side::Population => {
                        format!("{}.{}", population.name, population.numericals[pair.other_column])
                    }
                    Side::Peripheral => {
                        format!("{}.{}", peripheral.name, peripheral.numericals[pair.other_column])
                    }
                };
                format!(
                    "{}.{} - {}",
                    peripheral.name, peripheral.numericals[pair.peripheral_column], other
                )
            }
            DataUsed::SameUnitsDiscrete | DataUsed::SameUnitsDiscreteTs => {
                let pair = &same_units.discrete[column];
                let other = match pair.other_side {
                    Side::Population => {
                        format!("{}.{}", population.name, population.discretes[pair.other_column])
                    }
                    Side::Peripheral => {
                        format!("{}.{}", peripheral.name, peripheral.discretes[pair.other_column])
                    }
                };
                format!(
                    "{}.{} - {}",
                    peripheral.name, peripheral.discretes[pair.peripheral_column], other
                )
            }
            DataUsed::SameUnitsCategorical => {
                let pair = &same_units.categorical[column];
                format!(
                    "{}.{} = ...",
                    peripheral.name, peripheral.categoricals[pair.peripheral_column]
                )
            }
            DataUsed::Subfeatures => {
                format!("{}.subfeature_{}", peripheral.name, column + 1)
            }
            DataUsed::TimeStampsDiff | DataUsed::TimeStampsWindow => {
                format!("{}.time stamps", peripheral.name)
            }
        }
    }
}
