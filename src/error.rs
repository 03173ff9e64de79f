//! Error handling for the inspection engine
//!
//! A single closed error enum using thiserror. The web boundary maps
//! each variant to an HTTP status exhaustively, so controllers never
//! branch on error message text.

use thiserror::Error;

/// Main error type for the inspection and issue lifecycle engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Equipment not found: {equipment_id}")]
    EquipmentNotFound { equipment_id: i64 },

    #[error("Inspection not found: {inspection_id}")]
    InspectionNotFound { inspection_id: i64 },

    #[error("Issue not found: {issue_id}")]
    IssueNotFound { issue_id: i64 },

    #[error("Permission denied: {operation}")]
    PermissionDenied { operation: String },

    #[error("Invalid state for {operation}: expected {expected}")]
    InvalidState { operation: String, expected: String },

    #[error("Image already attached: {url}")]
    ImageAlreadyExists { url: String },

    #[error("Image not attached: {url}")]
    ImageNotFound { url: String },

    #[error("Validation failed: {details}")]
    Validation { details: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
