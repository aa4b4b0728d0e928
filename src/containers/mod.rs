// Container types for the feature learning engine: typed columns, the
// string encodings, data frames with join-key indices, shared row views,
// the join-graph placeholder and the match set.

pub mod column;
pub mod data_frame;
pub mod encoding;
pub mod matches;
pub mod placeholder;
pub mod schema;
pub mod view;

pub use column::{Column, FloatColumn, IntColumn, Role, COMPARISON_ONLY_UNIT};
pub use data_frame::{DataFrame, Index};
pub use encoding::{Encoding, NULL_CATEGORY};
pub use matches::{make_matches, Match};
pub use placeholder::Placeholder;
pub use schema::TableSchema;
pub use view::DataFrameView;
