use serde::{Deserialize, Serialize};

use crate::aggregations::{AggAccumulator, Aggregation, DataUsed};
use crate::containers::Match;
use crate::trees::split::Split;
use crate::trees::value_extractor::ValueExtractor;

/// A decision-tree node. Internal nodes carry a split and two children;
/// leaves carry a weight that decides whether matches routed to them
/// participate in the aggregation (1.0) or are excluded from it (0.0).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split: Option<Split>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left: Option<Box<Node>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right: Option<Box<Node>>,

    pub weight: f64,
}

impl Node {
    pub fn leaf(weight: f64) -> Self {
        Self {
            split: None,
            left: None,
            right: None,
            weight,
        }
    }

    pub fn internal(split: Split, left: Node, right: Node) -> Self {
        Self {
            split: Some(split),
            left: Some(Box::new(left)),
            right: Some(Box::new(right)),
            weight: 0.0,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.split.is_none()
    }

    /// Number of committed splits along the deepest path.
    pub fn depth(&self) -> usize {
        match (&self.left, &self.right) {
            (Some(left), Some(right)) => 1 + left.depth().max(right.depth()),
            _ => 0,
        }
    }
}

/// One trained tree: an aggregation over one peripheral edge, refined by
/// the committed predicates of its nodes, mapped onto the residuals by
/// the weight triple and rescaled by the update rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    /// Index of the peripheral edge this tree aggregates over.
    pub peripheral_used: usize,

    pub aggregation: Aggregation,

    /// The aggregated value: which side/role supplies it.
    pub data_used: DataUsed,

    /// Column (or same-unit pair / subfeature index) of the aggregated
    /// value.
    pub column: usize,

    pub root: Node,

    /// `[intercept, slope, unused]` mapping the raw feature onto the
    /// residuals.
    pub weights: [f64; 3],

    /// Scalar from the 1-D loss minimization; multiplied by the
    /// configured shrinkage when the tree's contribution is added.
    pub update_rate: f64,

    /// Criterion value at commit time; used to select among candidate
    /// trees and reported as column importance.
    #[serde(default)]
    pub criterion_value: f64,
}

impl DecisionTree {
    /// Whether a match reaches a leaf with non-zero weight.
    pub fn includes(&self, extractor: &ValueExtractor<'_>, m: &Match) -> bool {
        let mut node = &self.root;
        loop {
            let Some(split) = &node.split else {
                return node.weight != 0.0;
            };

            let passes = if split.is_categorical() || split.data_used == DataUsed::Categorical
            {
                split.passes_category(extractor.category(split.column, m))
            } else {
                split.passes_value(extractor.numeric(split.data_used, split.column, m))
            };

            node = if passes {
                node.left.as_deref().expect("internal node without left child")
            } else {
                node.right.as_deref().expect("internal node without right child")
            };
        }
    }

    /// The raw feature column: the aggregation over each population
    /// row's included matches. Rows without included matches take the
    /// aggregation's identity element (possibly NaN).
    pub fn feature_column(
        &self,
        extractor: &ValueExtractor<'_>,
        matches: &[Match],
        nrows: usize,
    ) -> Vec<f64> {
        let mut acc = AggAccumulator::new(self.aggregation, nrows);
        for m in matches {
            if self.includes(extractor, m) {
                let value = extractor.numeric(self.data_used, self.column, m);
                let ts = extractor.time_stamp(m);
                acc.insert(m.population_row as usize, value, ts, m.peripheral_row);
            }
        }
        acc.value_column()
    }

    /// The predicate paths from the root to every included leaf, as
    /// (split, took-the-left-branch) pairs. With chain-style trees this
    /// is a single conjunction, which is exactly what the SQL WHERE
    /// clause renders.
    pub fn included_paths(&self) -> Vec<Vec<(&Split, bool)>> {
        let mut paths = Vec::new();
        let mut stack: Vec<(&Node, Vec<(&Split, bool)>)> = vec![(&self.root, Vec::new())];

        while let Some((node, path)) = stack.pop() {
            match &node.split {
                None => {
                    if node.weight != 0.0 {
                        paths.push(path);
                    }
                }
                Some(split) => {
                    if let (Some(left), Some(right)) = (&node.left, &node.right) {
                        let mut left_path = path.clone();
                        left_path.push((split, true));
                        let mut right_path = path;
                        right_path.push((split, false));
                        stack.push((right, right_path));
                        stack.push((left, left_path));
                    }
                }
            }
        }

        paths.reverse();
        paths
    }
}
