//! Storage Error Types
//!
//! Errors raised by the storage backends. Codec-level problems that do not
//! stop an operation are [`CodecWarning`](crate::codec::CodecWarning)s
//! instead and never show up here.

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::codec::xml::XmlError;
use crate::models::NodeId;

/// Storage backend errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// Filesystem operation failed
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// libsql operation error
    #[error("Database operation failed: {0}")]
    Sql(#[from] libsql::Error),

    /// SQL execution error with context
    #[error("SQL execution failed: {context}")]
    SqlExecution { context: String },

    /// XML could not be parsed or has an unexpected shape
    #[error("Malformed XML in {context}: {message}")]
    MalformedXml { context: String, message: String },

    /// Required attribute or column missing
    #[error("Element <{element}> is missing attribute '{attribute}'")]
    MissingAttribute { element: String, attribute: String },

    /// Node id absent from storage
    #[error("Node {0} not found in storage")]
    NodeNotFound(NodeId),

    /// Document format or operation not supported by this backend
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// A multi-step write could not be committed; prior state is intact
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),
}

impl StoreError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn sql_execution(context: impl Into<String>) -> Self {
        Self::SqlExecution {
            context: context.into(),
        }
    }

    pub fn malformed(context: impl Into<String>, message: impl ToString) -> Self {
        Self::MalformedXml {
            context: context.into(),
            message: message.to_string(),
        }
    }

    pub fn transaction_failed(msg: impl Into<String>) -> Self {
        Self::TransactionFailed(msg.into())
    }
}

impl From<XmlError> for StoreError {
    fn from(err: XmlError) -> Self {
        match err {
            XmlError::MissingAttribute { element, attribute } => {
                Self::MissingAttribute { element, attribute }
            }
            other => Self::malformed("document", other),
        }
    }
}
