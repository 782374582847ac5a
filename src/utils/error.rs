use crate::domain::model::ExecutionReport;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Ingestion failed for '{source_name}': {message}")]
    Ingestion { source_name: String, message: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("No records available for {stage}")]
    EmptyInput { stage: String },

    #[error("Unresolvable schema at '{path}' (column '{column}'): observed {observed} and no coercion rule matches")]
    UnresolvableSchema {
        path: String,
        column: String,
        observed: String,
    },

    #[error("Unsupported rule '{rule}': {reason}")]
    UnsupportedRule { rule: String, reason: String },

    #[error("Rule '{rule}' failed on row {row}, column '{column}': {message}")]
    RuleApplication {
        rule: String,
        column: String,
        row: usize,
        message: String,
    },

    #[error("Execution aborted: {}", .report.failure_message())]
    ExecutionAborted { report: Box<ExecutionReport> },

    #[error("Table '{table}' already exists with columns [{}], incoming columns are [{}]", .existing.join(", "), .incoming.join(", "))]
    SchemaMismatch {
        table: String,
        existing: Vec<String>,
        incoming: Vec<String>,
    },

    #[error("Verification of table '{table}' failed: {message}")]
    VerificationFailed { table: String, message: String },

    #[error("Table store error: {0}")]
    StoreError(#[from] sqlx::Error),

    #[error("Table store failed to {operation} '{table}': {source}")]
    TableStoreFailed {
        table: String,
        operation: String,
        source: sqlx::Error,
    },

    #[error("Export to '{path}' failed: {message}")]
    ExportFailed { path: String, message: String },

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration validation failed for '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },
}

/// 錯誤分類，對應 pipeline 的各個階段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Ingestion,
    Schema,
    Execution,
    Load,
    Configuration,
}

impl ErrorCategory {
    /// Process exit code; every category maps to its own code.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorCategory::Configuration => 1,
            ErrorCategory::Ingestion => 2,
            ErrorCategory::Schema => 3,
            ErrorCategory::Execution => 4,
            ErrorCategory::Load => 5,
        }
    }
}

impl EtlError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            EtlError::Ingestion { .. }
            | EtlError::IoError(_)
            | EtlError::SerializationError(_)
            | EtlError::EmptyInput { .. } => ErrorCategory::Ingestion,
            EtlError::UnresolvableSchema { .. } | EtlError::UnsupportedRule { .. } => {
                ErrorCategory::Schema
            }
            EtlError::RuleApplication { .. } | EtlError::ExecutionAborted { .. } => {
                ErrorCategory::Execution
            }
            EtlError::SchemaMismatch { .. }
            | EtlError::VerificationFailed { .. }
            | EtlError::StoreError(_)
            | EtlError::TableStoreFailed { .. }
            | EtlError::ExportFailed { .. }
            | EtlError::CsvError(_) => ErrorCategory::Load,
            EtlError::ConfigError { .. }
            | EtlError::ConfigValidationError { .. }
            | EtlError::InvalidConfigValueError { .. }
            | EtlError::MissingConfigError { .. } => ErrorCategory::Configuration,
        }
    }

    /// Name of the pipeline stage the error originates from.
    pub fn stage(&self) -> &'static str {
        match self {
            EtlError::Ingestion { .. } | EtlError::IoError(_) | EtlError::SerializationError(_) => {
                "ingestion"
            }
            EtlError::EmptyInput { .. } => "profiling",
            EtlError::UnresolvableSchema { .. } => "planning",
            EtlError::UnsupportedRule { .. } => "synthesis",
            EtlError::RuleApplication { .. } | EtlError::ExecutionAborted { .. } => "execution",
            EtlError::SchemaMismatch { .. }
            | EtlError::StoreError(_)
            | EtlError::TableStoreFailed { .. }
            | EtlError::ExportFailed { .. }
            | EtlError::CsvError(_) => "load",
            EtlError::VerificationFailed { .. } => "verification",
            _ => "configuration",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            EtlError::Ingestion { source_name, .. } => {
                format!("Could not read events from '{}'", source_name)
            }
            EtlError::IoError(e) => format!("Could not access the input file: {}", e),
            EtlError::SerializationError(e) => format!("Input is not valid JSON: {}", e),
            EtlError::EmptyInput { .. } => "The input contains no event records".to_string(),
            EtlError::UnresolvableSchema { path, observed, .. } => format!(
                "Field '{}' has inconsistent types ({}) and no coercion rule covers it",
                path, observed
            ),
            EtlError::UnsupportedRule { rule, .. } => {
                format!("The transformation plan contains an unsupported rule: {}", rule)
            }
            EtlError::RuleApplication { rule, row, .. } => {
                format!("Rule {} could not be applied to row {}", rule, row)
            }
            EtlError::ExecutionAborted { report } => {
                format!("Transformation stopped: {}", report.failure_message())
            }
            EtlError::SchemaMismatch { table, .. } => {
                format!("Table '{}' already exists with a different set of columns", table)
            }
            EtlError::VerificationFailed { table, message } => {
                format!("Verification of '{}' failed: {}", table, message)
            }
            EtlError::TableStoreFailed { table, operation, .. } => {
                format!("The table store could not {} '{}'", operation, table)
            }
            EtlError::ExportFailed { path, .. } => {
                format!("Could not write the CSV export to '{}'", path)
            }
            other => other.to_string(),
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Ingestion => {
                "Check that the input file exists and holds a JSON array of event objects"
            }
            ErrorCategory::Schema => {
                "Add a coercion for the conflicting column to the rule catalog, or fix the plan"
            }
            ErrorCategory::Execution => {
                "Inspect the execution report; relax the fail-fast policy if row-level recovery is acceptable"
            }
            ErrorCategory::Load => match self {
                EtlError::ExportFailed { .. } => {
                    "Check that the export directory can be created and written to"
                }
                _ => "Use --overwrite to replace the existing table, or choose another table name",
            },
            ErrorCategory::Configuration => "Review the command line flags or the TOML configuration",
        }
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;
