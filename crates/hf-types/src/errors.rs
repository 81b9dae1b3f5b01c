use thiserror::Error;

/// Main error type for the Hyperforge system
#[derive(Error, Debug)]
pub enum HfError {
    #[error("Data error: {0}")]
    Data(#[from] DataError),

    #[error("Trainer error: {0}")]
    Trainer(#[from] TrainerError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Ledger and dataset errors
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Ledger not found: {path}")]
    LedgerNotFound { path: String },

    #[error("Invalid ledger format: {message}")]
    InvalidFormat { message: String },

    #[error("Missing ledger column: {column}")]
    MissingColumn { column: String },

    #[error("Ledger parsing error in column {column}: {message}")]
    ParseError { column: String, message: String },

    #[error("Dataset materialization failed (size {size}, ratio {positive_ratio}): {message}")]
    DatasetFailed {
        size: u64,
        positive_ratio: f64,
        message: String,
    },
}

/// Failures of the external training collaborator.
///
/// All variants are per-individual and non-fatal: the evaluator drops the
/// individual and the generation carries on.
#[derive(Error, Debug)]
pub enum TrainerError {
    #[error("Training failed: {message}")]
    Failed { message: String },

    #[error("Failed to launch trainer {program}: {message}")]
    Spawn { program: String, message: String },

    #[error("Result artifact missing: {path}")]
    MissingResultArtifact { path: String },

    #[error("Result artifact {path} unreadable: {message}")]
    UnreadableResult { path: String, message: String },

    #[error("Dataset unavailable: {message}")]
    DatasetUnavailable { message: String },
}

impl TrainerError {
    /// True when the trainer ran but left no usable result behind.
    pub fn is_missing_artifact(&self) -> bool {
        matches!(
            self,
            Self::MissingResultArtifact { .. } | Self::UnreadableResult { .. }
        )
    }
}

/// Search-level conditions of the genetic algorithm
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Generation {generation} produced no survivors")]
    EmptyGeneration { generation: u32 },

    #[error("Reproduction after generation {generation} produced no children")]
    EmptyReproduction { generation: u32 },

    #[error("Value {value} of parameter {parameter} is outside [{min}, {max}]")]
    OutOfBoundsValue {
        parameter: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Value {value} of parameter {parameter} is not a multiple of step {step}")]
    Unquantized {
        parameter: String,
        value: f64,
        step: i64,
    },

    #[error("Unknown parameter: {parameter}")]
    UnknownParameter { parameter: String },

    #[error("Parameter {parameter} has no value")]
    MissingParameter { parameter: String },
}

/// Result type alias for Hyperforge operations
pub type HfResult<T> = Result<T, HfError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::HfError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::HfError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::HfError::Config(format!($($arg)*))
    };
}
