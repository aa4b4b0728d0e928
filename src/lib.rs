// RelFeat - Relational feature learning engine
// Core library module

pub mod aggregations;
pub mod binning;
pub mod containers;
pub mod ensemble;
pub mod error;
pub mod fingerprints;
pub mod holder;
pub mod hyperparameters;
pub mod multithreading;
pub mod optimization;
pub mod trees;

pub use containers::{Column, DataFrame, DataFrameView, Encoding, Placeholder, Role};
pub use ensemble::FeatureEnsemble;
pub use error::{EngineError, Result};
pub use hyperparameters::Hyperparameters;

/// Installs a compact default tracing subscriber. Intended for tests and
/// embedding applications that do not configure their own subscriber;
/// calling it twice is harmless.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt().compact().try_init();
}
