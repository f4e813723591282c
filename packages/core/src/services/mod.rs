//! Business Services
//!
//! - `DocumentService` - open documents, load and save node content through
//!   the codec, and manage the node hierarchy, aliases and bookmarks
//!
//! Services coordinate between the storage layer and callers; they enforce
//! structural rules before anything reaches a backend.

pub mod document_service;
pub mod error;

pub use document_service::{CreateNodeParams, DocumentService};
pub use error::ServiceError;
