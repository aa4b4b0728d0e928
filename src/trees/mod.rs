// Decision trees over match sets: the split record, the candidate
// builder, the fitter that runs the split search, and the trained tree.

pub mod candidates;
pub mod fitter;
pub mod split;
pub mod tree;
pub mod value_extractor;

pub use candidates::{build_candidates, CandidateSpec};
pub use fitter::TreeFitter;
pub use split::Split;
pub use tree::{DecisionTree, Node};
pub use value_extractor::ValueExtractor;
