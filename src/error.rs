//! Error types for the EcoHab analytics engine

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur while loading configuration or running stages
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Table '{table}' has not been produced and no artifact exists at {}", path.display())]
    MissingArtifact { table: String, path: PathBuf },

    #[error("Table '{0}' contains no rows")]
    EmptyTable(String),

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Invalid stage option: {0}")]
    InvalidOption(String),

    #[error("Schema mismatch in column '{column}': {reason}")]
    SchemaMismatch { column: String, reason: String },

    #[error("Match stream is not chronological: {next} follows {previous}")]
    UnorderedMatches {
        previous: DateTime<Utc>,
        next: DateTime<Utc>,
    },

    #[error("Match references unknown animal: {0}")]
    UnknownAnimal(String),

    #[error("Project results are locked by another run: {}", .0.display())]
    ProjectLocked(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}
