//! Per-Node Directory Backend
//!
//! Layout under the document root:
//!
//! ```text
//! <root>/subnodes.lst          top-level ids, comma-joined, in order
//! <root>/bookmarks.lst         sorted bookmark ids, comma-joined
//! <root>/<id>/node.xml         <node> element: attributes and content
//! <root>/<id>/subnodes.lst     child ids of <id>
//! <root>/<id>/<sha256>.<ext>   one file per image/attachment payload
//! <root>/<id>/<child id>/...
//! ```
//!
//! The directory tree is walked once into an owned index of node paths; no
//! directory handle outlives the call that opened it. Payload keys are the
//! blob file names.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::codec::xml::{
    blob_file_name, node_attributes, read_node_attributes, read_node_content, sha256_hex,
    write_node_content, PayloadEncoding, XmlWriter,
};
use crate::codec::{CodecWarning, FragmentBody, NodeRecords, Payload};
use crate::config::CherryConfig;
use crate::db::error::StoreError;
use crate::db::store::{BackendKind, ContentWrite, DocumentStore, StoredContent};
use crate::db::tree::{NodeTree, Placement};
use crate::db::{parse_id_list, write_atomic};
use crate::models::{Node, NodeId, NodeKind};

const NODE_FILE: &str = "node.xml";
const SUBNODES_FILE: &str = "subnodes.lst";
const BOOKMARKS_FILE: &str = "bookmarks.lst";

pub struct MultiFileStore {
    root: PathBuf,
    config: CherryConfig,
    /// Directory of every node; the lock also serializes writers
    paths: Mutex<HashMap<NodeId, PathBuf>>,
}

impl MultiFileStore {
    /// Open an existing document directory
    pub async fn open(root: impl AsRef<Path>, config: CherryConfig) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&root)
            .await
            .map_err(|e| StoreError::io(&root, e))?;
        if !metadata.is_dir() {
            return Err(StoreError::Unsupported(format!(
                "{} is not a directory",
                root.display()
            )));
        }
        let (tree, paths) = scan(&root).await?;
        tracing::info!(
            "Opened multi-file document {} ({} nodes)",
            root.display(),
            tree.len()
        );
        Ok(Self {
            root,
            config,
            paths: Mutex::new(paths),
        })
    }

    /// Create a new, empty document directory; fails if it exists
    pub async fn create(root: impl AsRef<Path>, config: CherryConfig) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir(&root)
            .await
            .map_err(|e| StoreError::io(&root, e))?;
        write_id_list(&root.join(SUBNODES_FILE), &[]).await?;
        tracing::info!("Created multi-file document {}", root.display());
        Ok(Self {
            root,
            config,
            paths: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn parent_dir(&self, paths: &HashMap<NodeId, PathBuf>, parent: Option<NodeId>) -> PathBuf {
        parent
            .and_then(|p| paths.get(&p).cloned())
            .unwrap_or_else(|| self.root.clone())
    }

    fn node_dir(paths: &HashMap<NodeId, PathBuf>, id: NodeId) -> Result<PathBuf, StoreError> {
        paths.get(&id).cloned().ok_or(StoreError::NodeNotFound(id))
    }

    fn serialize_node(&self, node: &Node, records: &NodeRecords) -> Result<String, StoreError> {
        let mut w = XmlWriter::new(self.config.pretty_xml);
        w.open("node", &node_attributes(node, false));
        write_node_content(&mut w, records, PayloadEncoding::Sha256File)?;
        w.close("node");
        Ok(w.finish())
    }

    /// Store new payloads as files and check that retained ones exist
    async fn store_payloads(dir: &Path, records: &NodeRecords) -> Result<NodeRecords, StoreError> {
        let mut resolved = records.clone();
        for object in &mut resolved.objects {
            let attachment_name = match &object.body {
                FragmentBody::Attachment(attachment) => Some(attachment.filename.clone()),
                _ => None,
            };
            let Some(payload) = object.body.payload_mut() else {
                continue;
            };
            match payload {
                Payload::New(bytes) => {
                    let bytes = std::mem::take(bytes);
                    let name = blob_file_name(&sha256_hex(&bytes), attachment_name.as_deref());
                    let path = dir.join(&name);
                    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                        write_atomic(&path, &bytes).await?;
                    }
                    *payload = Payload::stored(name, bytes);
                }
                Payload::Stored { key, bytes, .. } => {
                    let path = dir.join(key.as_str());
                    if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                        continue;
                    }
                    match bytes {
                        Some(bytes) => write_atomic(&path, bytes).await?,
                        None => {
                            return Err(StoreError::transaction_failed(format!(
                                "payload {} is not stored in {}",
                                key,
                                dir.display()
                            )))
                        }
                    }
                }
            }
        }
        Ok(resolved)
    }

    async fn read_records(
        dir: &Path,
        warnings: &mut Vec<CodecWarning>,
    ) -> Result<(Node, NodeRecords), StoreError> {
        let id = dir_id(dir).ok_or_else(|| {
            StoreError::malformed(dir.display().to_string(), "directory name is not a node id")
        })?;
        let path = dir.join(NODE_FILE);
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| StoreError::io(&path, e))?;
        let doc = roxmltree::Document::parse(&text)
            .map_err(|e| StoreError::malformed(path.display().to_string(), e))?;
        let root = doc.root_element();
        if !root.has_tag_name("node") {
            return Err(StoreError::malformed(
                path.display().to_string(),
                format!("root element is <{}>", root.tag_name().name()),
            ));
        }
        let node = read_node_attributes(root, Some(id))?;
        let records = read_node_content(root, PayloadEncoding::Sha256File, warnings);
        Ok((node, records))
    }
}

fn dir_id(dir: &Path) -> Option<NodeId> {
    dir.file_name()?.to_str()?.parse().ok()
}

/// Blob file names are plain names inside the node directory
fn is_blob_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains(['/', '\\'])
        && !name.starts_with('.')
        && name != NODE_FILE
        && name != SUBNODES_FILE
        && !name.ends_with(".tmp")
}

async fn write_id_list(path: &Path, ids: &[NodeId]) -> Result<(), StoreError> {
    let list: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
    write_atomic(path, list.join(",").as_bytes()).await
}

async fn read_id_list(path: &Path) -> Result<Vec<NodeId>, StoreError> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(parse_id_list(&text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

/// Child directories of `dir` in `subnodes.lst` order; unlisted ones follow by id
async fn ordered_children(dir: &Path) -> Result<Vec<NodeId>, StoreError> {
    let mut ordered = read_id_list(&dir.join(SUBNODES_FILE)).await?;

    let mut on_disk = Vec::new();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| StoreError::io(dir, e))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| StoreError::io(dir, e))?
    {
        let path = entry.path();
        if let Some(id) = dir_id(&path) {
            if path.join(NODE_FILE).is_file() {
                on_disk.push(id);
            }
        }
    }

    ordered.retain(|id| on_disk.contains(id));
    on_disk.sort_unstable();
    for id in on_disk {
        if !ordered.contains(&id) {
            tracing::debug!("Node {} missing from {}/{}", id, dir.display(), SUBNODES_FILE);
            ordered.push(id);
        }
    }
    Ok(ordered)
}

/// Materialize the node tree and the path index
async fn scan(root: &Path) -> Result<(NodeTree, HashMap<NodeId, PathBuf>), StoreError> {
    let mut tree = NodeTree::new();
    let mut paths = HashMap::new();

    let mut stack: Vec<(PathBuf, Option<NodeId>)> = ordered_children(root)
        .await?
        .into_iter()
        .rev()
        .map(|id| (root.join(id.to_string()), None))
        .collect();
    while let Some((dir, parent)) = stack.pop() {
        let mut ignored = Vec::new();
        let node = match MultiFileStore::read_records(&dir, &mut ignored).await {
            Ok((node, _)) => node,
            Err(e) => {
                // Keep the subtree reachable under a stand-in node
                let Some(id) = dir_id(&dir) else {
                    continue;
                };
                tracing::warn!("Unreadable node {}: {}", dir.display(), e);
                Node::new(id, id.to_string(), NodeKind::RichText)
            }
        };
        let id = node.id;
        if !tree.insert(node, parent, None) {
            tracing::warn!("Duplicate node id {} at {}", id, dir.display());
            continue;
        }
        for child in ordered_children(&dir).await?.into_iter().rev() {
            stack.push((dir.join(child.to_string()), Some(id)));
        }
        paths.insert(id, dir);
    }

    tree.set_bookmarks(read_id_list(&root.join(BOOKMARKS_FILE)).await?);
    Ok((tree, paths))
}

#[async_trait]
impl DocumentStore for MultiFileStore {
    fn kind(&self) -> BackendKind {
        BackendKind::MultiFile
    }

    async fn load_tree(&self) -> Result<NodeTree, StoreError> {
        let mut paths = self.paths.lock().await;
        let (tree, scanned) = scan(&self.root).await?;
        *paths = scanned;
        Ok(tree)
    }

    async fn read_content(&self, id: NodeId) -> Result<Option<StoredContent>, StoreError> {
        let Some(dir) = self.paths.lock().await.get(&id).cloned() else {
            return Ok(None);
        };
        let mut content = StoredContent::default();
        match Self::read_records(&dir, &mut content.warnings).await {
            Ok((_, records)) => content.records = records,
            Err(e) => {
                content.warnings.push(CodecWarning::MalformedFragment {
                    context: format!("node {id}: {e}"),
                });
                return Ok(Some(content));
            }
        }

        for object in &mut content.records.objects {
            let Some(Payload::Stored { key, bytes, size }) = object.body.payload_mut() else {
                continue;
            };
            let path = dir.join(key.as_str());
            // Missing files stay unresolved; decoding reports them
            let Ok(metadata) = tokio::fs::metadata(&path).await else {
                continue;
            };
            *size = Some(metadata.len());
            if metadata.len() > self.config.max_blob_bytes {
                continue;
            }
            match tokio::fs::read(&path).await {
                Ok(data) => *bytes = Some(data),
                Err(e) => {
                    tracing::warn!("Failed to read {}: {}", path.display(), e);
                    *size = None;
                }
            }
        }
        Ok(Some(content))
    }

    async fn stored_blob_keys(&self, id: NodeId) -> Result<BTreeSet<String>, StoreError> {
        let dir = Self::node_dir(&*self.paths.lock().await, id)?;
        let mut keys = BTreeSet::new();
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| StoreError::io(&dir, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&dir, e))?
        {
            let is_file = entry
                .file_type()
                .await
                .map(|t| t.is_file())
                .unwrap_or(false);
            if let Some(name) = entry.file_name().to_str() {
                if is_file && is_blob_name(name) {
                    keys.insert(name.to_string());
                }
            }
        }
        Ok(keys)
    }

    async fn read_blob(&self, id: NodeId, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        if !is_blob_name(key) {
            return Ok(None);
        }
        let Some(dir) = self.paths.lock().await.get(&id).cloned() else {
            return Ok(None);
        };
        let path = dir.join(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    async fn write_content(&self, write: ContentWrite<'_>) -> Result<(), StoreError> {
        let paths = self.paths.lock().await;
        let dir = Self::node_dir(&paths, write.node.id)?;

        let resolved = Self::store_payloads(&dir, write.records).await?;
        let xml = self.serialize_node(write.node, &resolved)?;
        write_atomic(&dir.join(NODE_FILE), xml.as_bytes()).await?;

        let kept: BTreeSet<&str> = resolved.payload_keys().collect();
        for key in write.orphaned_keys {
            if kept.contains(key.as_str()) || !is_blob_name(key) {
                continue;
            }
            let path = dir.join(key);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => tracing::debug!("Removed orphaned blob {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
        Ok(())
    }

    async fn insert_node(&self, node: &Node, placement: &Placement) -> Result<(), StoreError> {
        let mut paths = self.paths.lock().await;
        let parent_dir = self.parent_dir(&paths, placement.parent);
        let dir = parent_dir.join(node.id.to_string());
        tokio::fs::create_dir(&dir)
            .await
            .map_err(|e| StoreError::io(&dir, e))?;

        let xml = self.serialize_node(node, &NodeRecords::default())?;
        write_atomic(&dir.join(NODE_FILE), xml.as_bytes()).await?;
        write_id_list(&parent_dir.join(SUBNODES_FILE), &placement.siblings).await?;
        paths.insert(node.id, dir);
        Ok(())
    }

    async fn update_node(&self, node: &Node) -> Result<(), StoreError> {
        let paths = self.paths.lock().await;
        let dir = Self::node_dir(&paths, node.id)?;
        let mut ignored = Vec::new();
        let (_, records) = Self::read_records(&dir, &mut ignored).await?;
        let xml = self.serialize_node(node, &records)?;
        write_atomic(&dir.join(NODE_FILE), xml.as_bytes()).await
    }

    async fn move_node(
        &self,
        id: NodeId,
        from: &Placement,
        to: &Placement,
    ) -> Result<(), StoreError> {
        let mut paths = self.paths.lock().await;
        let old_dir = Self::node_dir(&paths, id)?;
        let new_dir = self.parent_dir(&paths, to.parent).join(id.to_string());

        if old_dir != new_dir {
            tokio::fs::rename(&old_dir, &new_dir)
                .await
                .map_err(|e| StoreError::io(&old_dir, e))?;
            for path in paths.values_mut() {
                if let Ok(rest) = path.strip_prefix(&old_dir) {
                    *path = new_dir.join(rest);
                }
            }
        }

        let from_dir = self.parent_dir(&paths, from.parent);
        let to_dir = self.parent_dir(&paths, to.parent);
        write_id_list(&from_dir.join(SUBNODES_FILE), &from.siblings).await?;
        write_id_list(&to_dir.join(SUBNODES_FILE), &to.siblings).await
    }

    async fn delete_nodes(&self, ids: &[NodeId], from: &Placement) -> Result<(), StoreError> {
        let Some(&root_id) = ids.first() else {
            return Ok(());
        };
        let mut paths = self.paths.lock().await;
        let dir = Self::node_dir(&paths, root_id)?;
        tokio::fs::remove_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(&dir, e))?;
        for id in ids {
            paths.remove(id);
        }
        let parent_dir = self.parent_dir(&paths, from.parent);
        write_id_list(&parent_dir.join(SUBNODES_FILE), &from.siblings).await
    }

    async fn write_bookmarks(&self, bookmarks: &[NodeId]) -> Result<(), StoreError> {
        let _paths = self.paths.lock().await;
        let mut sorted = bookmarks.to_vec();
        sorted.sort_unstable();
        write_id_list(&self.root.join(BOOKMARKS_FILE), &sorted).await
    }
}
