//! Service Layer Error Types
//!
//! Errors for document-level operations. Reads of missing nodes are not
//! errors (they return `Ok(None)`); `NodeNotFound` is only raised when a
//! mutation names a node that does not exist.

use crate::db::StoreError;
use crate::models::{NodeId, ValidationError};
use thiserror::Error;

/// Document service errors
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Node not found by ID
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// Tree constraint violated (cycle, unknown parent)
    #[error("Structural violation: {0}")]
    StructuralViolation(String),

    /// Storage accepted the request but the save could not complete
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// Storage operation failed
    #[error("Storage operation failed: {0}")]
    Store(#[from] StoreError),

    /// Operation not allowed in the current state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Node metadata failed validation
    #[error("Node validation failed: {0}")]
    Validation(#[from] ValidationError),
}

impl ServiceError {
    pub fn structural(msg: impl Into<String>) -> Self {
        Self::StructuralViolation(msg.into())
    }

    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    pub fn write_failed(msg: impl Into<String>) -> Self {
        Self::WriteFailed(msg.into())
    }
}
