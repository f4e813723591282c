//! DocumentStore Trait - Storage Abstraction Layer
//!
//! The capability interface each backend implements. The codec is written
//! once against [`NodeRecords`]; a backend only has to:
//!
//! - materialize the node tree once at open
//! - read a node's records and blobs
//! - write a node's records atomically, dropping orphaned blobs
//! - persist structural changes (insert, update, move, delete, bookmarks)
//!
//! # Implementations
//!
//! - [`XmlStore`](crate::db::XmlStore) - single `.ctd` XML file
//! - [`SqliteStore`](crate::db::SqliteStore) - single `.ctb` SQLite database
//! - [`MultiFileStore`](crate::db::MultiFileStore) - directory per node
//!
//! # Thread Safety
//!
//! Implementations must be `Send + Sync`; each serializes its own writes.

use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;

use crate::codec::{CodecWarning, NodeRecords};
use crate::db::error::StoreError;
use crate::db::tree::{NodeTree, Placement};
use crate::models::{Node, NodeId};

/// Physical document representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Xml,
    Sqlite,
    MultiFile,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Xml => write!(f, "xml"),
            BackendKind::Sqlite => write!(f, "sqlite"),
            BackendKind::MultiFile => write!(f, "multifile"),
        }
    }
}

/// A node's persisted records as read from storage
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredContent {
    pub records: NodeRecords,
    /// Problems met while reading the physical layout
    pub warnings: Vec<CodecWarning>,
}

/// One atomic content save
#[derive(Debug, Clone, Copy)]
pub struct ContentWrite<'a> {
    /// Node metadata to persist alongside the content (kind, timestamps)
    pub node: &'a Node,
    pub records: &'a NodeRecords,
    /// Previously stored blob keys no longer referenced by `records`
    pub orphaned_keys: &'a BTreeSet<String>,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Materialize the node hierarchy and bookmarks
    async fn load_tree(&self) -> Result<NodeTree, StoreError>;

    /// Records of one node; `Ok(None)` when the node is not in storage
    ///
    /// Payloads above the configured ceiling come back without bytes.
    async fn read_content(&self, id: NodeId) -> Result<Option<StoredContent>, StoreError>;

    /// Keys of every image/attachment payload currently stored for the node
    async fn stored_blob_keys(&self, id: NodeId) -> Result<BTreeSet<String>, StoreError>;

    /// Full payload bytes by key, bypassing the size ceiling
    async fn read_blob(&self, id: NodeId, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Replace a node's content in one atomic unit
    ///
    /// New payloads are stored under backend-assigned keys; blobs listed in
    /// `orphaned_keys` are deleted unless the new records still use them.
    async fn write_content(&self, write: ContentWrite<'_>) -> Result<(), StoreError>;

    /// Add a new, empty node; `placement` lists its siblings including itself
    async fn insert_node(&self, node: &Node, placement: &Placement) -> Result<(), StoreError>;

    /// Persist changed node metadata
    async fn update_node(&self, node: &Node) -> Result<(), StoreError>;

    /// Re-parent or reorder a node; placements are the sibling lists after the move
    async fn move_node(
        &self,
        id: NodeId,
        from: &Placement,
        to: &Placement,
    ) -> Result<(), StoreError>;

    /// Delete `ids` (a subtree, root first) and everything they own
    ///
    /// `from` is the root's former sibling list without the root.
    async fn delete_nodes(&self, ids: &[NodeId], from: &Placement) -> Result<(), StoreError>;

    async fn write_bookmarks(&self, bookmarks: &[NodeId]) -> Result<(), StoreError>;
}
