use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Unknown aggregation: '{0}'")]
    UnknownAggregation(String),

    #[error("Unknown data used: '{0}'")]
    UnknownDataUsed(String),

    #[error("Empty column: {0}")]
    EmptyColumn(String),

    #[error("Communicator error: {0}")]
    Comm(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Schema error carrying the full `table.column` path.
    pub fn missing_column(table: &str, column: &str, what: &str) -> Self {
        EngineError::Schema(format!("{}.{}: {} not found", table, column, what))
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Serialization(e.to_string())
    }
}
