//! Storage Layer
//!
//! This module owns the three physical document representations:
//!
//! - [`XmlStore`] - a single `.ctd` XML file
//! - [`SqliteStore`] - a single `.ctb` SQLite database (libsql)
//! - [`MultiFileStore`] - a directory per node with `node.xml` fragments
//!
//! All of them implement [`DocumentStore`]; the codec never sees which one
//! it is talking to. [`open_document`] picks the backend from the path.

mod error;
pub mod events;
mod multifile_store;
mod sqlite_store;
mod store;
mod tree;
mod xml_store;

use std::path::Path;
use std::sync::Arc;

use crate::codec::{NodeRecords, Payload};
use crate::config::CherryConfig;
use crate::models::NodeId;

pub use error::StoreError;
pub use events::{DocumentEvent, EventSummary};
pub use multifile_store::MultiFileStore;
pub use sqlite_store::SqliteStore;
pub use store::{BackendKind, ContentWrite, DocumentStore, StoredContent};
pub use tree::{NodeTree, Placement, TreeEntry};
pub use xml_store::XmlStore;

impl BackendKind {
    /// Backend for `path`: a directory is multi-file, otherwise by extension
    ///
    /// Password-protected archives (`.ctz`, `.ctx`) are reported as
    /// unsupported.
    pub fn from_path(path: &Path) -> Result<Self, StoreError> {
        if path.is_dir() {
            return Ok(BackendKind::MultiFile);
        }
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("ctd") => Ok(BackendKind::Xml),
            Some("ctb") => Ok(BackendKind::Sqlite),
            Some(other @ ("ctz" | "ctx")) => Err(StoreError::Unsupported(format!(
                "encrypted .{other} archives are not supported"
            ))),
            _ => Err(StoreError::Unsupported(format!(
                "cannot tell the document format of {}",
                path.display()
            ))),
        }
    }
}

/// Open an existing document, detecting its backend
pub async fn open_document(
    path: impl AsRef<Path>,
    config: &CherryConfig,
) -> Result<Arc<dyn DocumentStore>, StoreError> {
    let path = path.as_ref();
    let store: Arc<dyn DocumentStore> = match BackendKind::from_path(path)? {
        BackendKind::Xml => Arc::new(XmlStore::open(path, config.clone()).await?),
        BackendKind::Sqlite => Arc::new(SqliteStore::open(path, config.clone()).await?),
        BackendKind::MultiFile => Arc::new(MultiFileStore::open(path, config.clone()).await?),
    };
    Ok(store)
}

/// Create a new, empty document of the given kind
pub async fn create_document(
    path: impl AsRef<Path>,
    kind: BackendKind,
    config: &CherryConfig,
) -> Result<Arc<dyn DocumentStore>, StoreError> {
    let path = path.as_ref();
    let store: Arc<dyn DocumentStore> = match kind {
        BackendKind::Xml => Arc::new(XmlStore::create(path, config.clone()).await?),
        BackendKind::Sqlite => Arc::new(SqliteStore::create(path, config.clone()).await?),
        BackendKind::MultiFile => Arc::new(MultiFileStore::create(path, config.clone()).await?),
    };
    Ok(store)
}

/// Parse a comma- or newline-separated id list, skipping junk
pub(crate) fn parse_id_list(text: &str) -> Vec<NodeId> {
    text.split(|c: char| c == ',' || c.is_whitespace())
        .filter_map(|part| part.trim().parse().ok())
        .collect()
}

/// Withhold bytes of payloads larger than `max_bytes`, keeping their size
pub(crate) fn apply_blob_ceiling(records: &mut NodeRecords, max_bytes: u64) {
    for object in &mut records.objects {
        if let Some(Payload::Stored { bytes, size, .. }) = object.body.payload_mut() {
            let len = bytes.as_ref().map(|b| b.len() as u64);
            if let Some(len) = len.filter(|&len| len > max_bytes) {
                *bytes = None;
                *size = Some(len);
            }
        }
    }
}

/// Write through a sibling temporary file and rename it into place
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!("{file_name}.tmp"));
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| StoreError::io(&tmp, e))?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _cleanup = tokio::fs::remove_file(&tmp).await;
        return Err(StoreError::io(path, e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_detection() {
        let dir = tempfile::TempDir::new().unwrap();
        assert_eq!(
            BackendKind::from_path(dir.path()).unwrap(),
            BackendKind::MultiFile
        );
        assert_eq!(
            BackendKind::from_path(Path::new("notes.ctd")).unwrap(),
            BackendKind::Xml
        );
        assert_eq!(
            BackendKind::from_path(Path::new("notes.CTB")).unwrap(),
            BackendKind::Sqlite
        );
        assert!(matches!(
            BackendKind::from_path(Path::new("notes.ctz")),
            Err(StoreError::Unsupported(_))
        ));
    }

    #[test]
    fn test_id_list_parsing() {
        assert_eq!(parse_id_list("3,1, 2\n7"), vec![3, 1, 2, 7]);
        assert_eq!(parse_id_list(""), Vec::<NodeId>::new());
        assert_eq!(parse_id_list("4,x,5"), vec![4, 5]);
    }
}
