//! Error types for the ampliclean library.

use thiserror::Error;

/// Main error type for the library.
#[derive(Error, Debug)]
pub enum CleanError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Invalid value '{value}' at row {row}, column '{column}'")]
    InvalidValue {
        value: String,
        row: usize,
        column: String,
    },

    #[error("No sequence for variant {0}")]
    MissingSequence(u32),

    #[error("Invalid taxonomy: {0}")]
    InvalidTaxonomy(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Empty data: {0}")]
    EmptyData(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, CleanError>;
