//! CherryNote Core
//!
//! Node content codec and document storage for CherryTree-format outliner
//! documents.
//!
//! # Architecture
//!
//! - **Unified content model**: a node's content is an ordered list of
//!   [`ContentBlock`](models::ContentBlock)s (styled text runs and embedded
//!   objects), independent of how it is stored
//! - **Offset-addressed records**: backends persist text and objects
//!   separately, objects carrying integer character offsets
//! - **One codec, three backends**: a single XML file, a SQLite database, or
//!   a directory tree of per-node XML fragments
//!
//! # Modules
//!
//! - [`models`] - Data structures (Node, ContentModel, Style)
//! - [`codec`] - Decoder, encoder, offset resolver, style mapping
//! - [`db`] - Storage backends behind the `DocumentStore` trait
//! - [`services`] - `DocumentService`, the handle to an open document
//! - [`config`] - Storage and codec configuration

pub mod codec;
pub mod config;
pub mod db;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use codec::{decode, encode, CodecWarning, DecodedContent, EncodedContent};
pub use config::CherryConfig;
pub use db::{BackendKind, DocumentEvent, DocumentStore, StoreError};
pub use models::*;
pub use services::*;
