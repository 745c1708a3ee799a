use thiserror::Error;

use crate::generation::GenerationError;
use crate::graph::RecordError;

/// Main error type for the curriculum graph engine
#[derive(Error, Debug)]
pub enum CurriculumError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors for artifacts and extractor output
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Graph store unreachable or its worker failed
    #[error("Graph store unavailable: {0}")]
    Store(String),

    /// A single extractor record failed schema validation
    #[error("Invalid record: {0}")]
    InvalidRecord(#[from] RecordError),

    /// Every anchor tier, including the sample, came back empty
    #[error("No anchor nodes found for objective: {0}")]
    NoAnchor(String),

    /// Content generation errors
    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    /// Task chain artifacts are immutable
    #[error("Artifact already exists: {0}")]
    ArtifactExists(String),
}

/// Convenient Result type using CurriculumError
pub type Result<T> = std::result::Result<T, CurriculumError>;
