//! Single XML File Backend
//!
//! A `.ctd` document is one `cherrytree` root element with `node` elements
//! nested to form the tree and a top-level `bookmarks` element. The whole
//! file is parsed once at open into an in-memory document; every write
//! applies the change to a copy, serializes it to a temporary file, renames
//! it over the original, and only then swaps the in-memory copy.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::codec::xml::{
    node_attributes, read_node_attributes, read_node_content, sha256_hex, write_node_content,
    PayloadEncoding, XmlWriter,
};
use crate::codec::{CodecWarning, NodeRecords, Payload};
use crate::config::CherryConfig;
use crate::db::error::StoreError;
use crate::db::store::{BackendKind, ContentWrite, DocumentStore, StoredContent};
use crate::db::tree::{NodeTree, Placement};
use crate::db::{apply_blob_ceiling, parse_id_list, write_atomic};
use crate::models::{Node, NodeId};

const ROOT_ELEMENT: &str = "cherrytree";

#[derive(Debug, Clone, Default)]
struct XmlDocument {
    tree: NodeTree,
    content: HashMap<NodeId, NodeRecords>,
    load_warnings: HashMap<NodeId, Vec<CodecWarning>>,
}

pub struct XmlStore {
    path: PathBuf,
    config: CherryConfig,
    state: Mutex<XmlDocument>,
}

impl XmlStore {
    /// Open an existing `.ctd` file
    pub async fn open(path: impl AsRef<Path>, config: CherryConfig) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| StoreError::io(&path, e))?;
        let document = parse_document(&text)?;
        tracing::info!(
            "Opened XML document {} ({} nodes)",
            path.display(),
            document.tree.len()
        );
        Ok(Self {
            path,
            config,
            state: Mutex::new(document),
        })
    }

    /// Create a new, empty `.ctd` file; fails if the file exists
    pub async fn create(path: impl AsRef<Path>, config: CherryConfig) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StoreError::io(
                &path,
                std::io::Error::new(std::io::ErrorKind::AlreadyExists, "document exists"),
            ));
        }
        let document = XmlDocument::default();
        let xml = serialize_document(&document, config.pretty_xml)?;
        write_atomic(&path, xml.as_bytes()).await?;
        tracing::info!("Created XML document {}", path.display());
        Ok(Self {
            path,
            config,
            state: Mutex::new(document),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `change` to a copy of the document, persist it, then swap it in
    async fn commit<F>(&self, change: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut XmlDocument) -> Result<(), StoreError> + Send,
    {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        change(&mut next)?;
        let xml = serialize_document(&next, self.config.pretty_xml)?;
        write_atomic(&self.path, xml.as_bytes()).await?;
        *state = next;
        Ok(())
    }
}

fn parse_document(text: &str) -> Result<XmlDocument, StoreError> {
    let doc = roxmltree::Document::parse(text).map_err(|e| StoreError::malformed("document", e))?;
    let root = doc.root_element();
    if !root.has_tag_name(ROOT_ELEMENT) {
        return Err(StoreError::malformed(
            "document",
            format!("root element is <{}>", root.tag_name().name()),
        ));
    }

    let mut document = XmlDocument::default();
    let mut bookmarks = Vec::new();
    let mut stack: Vec<(roxmltree::Node, Option<NodeId>)> = root
        .children()
        .filter(|c| c.is_element())
        .map(|c| (c, None))
        .collect();
    stack.reverse();

    while let Some((element, parent)) = stack.pop() {
        match element.tag_name().name() {
            "node" => {
                let node = read_node_attributes(element, None)?;
                let id = node.id;
                if !document.tree.insert(node, parent, None) {
                    return Err(StoreError::malformed(
                        "document",
                        format!("duplicate unique_id {id}"),
                    ));
                }
                let mut warnings = Vec::new();
                let records = read_node_content(element, PayloadEncoding::Inline, &mut warnings);
                document.content.insert(id, records);
                if !warnings.is_empty() {
                    document.load_warnings.insert(id, warnings);
                }
                let children: Vec<_> = element
                    .children()
                    .filter(|c| c.has_tag_name("node"))
                    .map(|c| (c, Some(id)))
                    .collect();
                stack.extend(children.into_iter().rev());
            }
            "bookmarks" => {
                bookmarks = parse_id_list(element.attribute("list").unwrap_or_default());
            }
            other => tracing::debug!("Ignoring top-level element <{}>", other),
        }
    }

    document.tree.set_bookmarks(bookmarks);
    Ok(document)
}

fn serialize_document(document: &XmlDocument, pretty: bool) -> Result<String, StoreError> {
    enum Step {
        Open(NodeId),
        Close,
    }

    let empty = NodeRecords::default();
    let mut w = XmlWriter::new(pretty);
    w.open(ROOT_ELEMENT, &[]);

    let mut steps: Vec<Step> = document
        .tree
        .roots()
        .iter()
        .rev()
        .map(|&id| Step::Open(id))
        .collect();
    while let Some(step) = steps.pop() {
        let id = match step {
            Step::Close => {
                w.close("node");
                continue;
            }
            Step::Open(id) => id,
        };
        let Some(entry) = document.tree.entry(id) else {
            continue;
        };
        w.open("node", &node_attributes(&entry.node, true));
        let records = document.content.get(&id).unwrap_or(&empty);
        write_node_content(&mut w, records, PayloadEncoding::Inline)?;
        steps.push(Step::Close);
        steps.extend(entry.children.iter().rev().map(|&child| Step::Open(child)));
    }

    let list: Vec<String> = document
        .tree
        .bookmarks()
        .iter()
        .map(|id| id.to_string())
        .collect();
    w.empty("bookmarks", &[("list", list.join(","))]);
    w.close(ROOT_ELEMENT);
    Ok(w.finish())
}

/// Give new payloads their content-hash key and restore bytes of retained ones
fn resolve_payloads(
    records: &NodeRecords,
    previous: Option<&NodeRecords>,
) -> Result<NodeRecords, StoreError> {
    let mut resolved = records.clone();
    for object in &mut resolved.objects {
        let Some(payload) = object.body.payload_mut() else {
            continue;
        };
        match payload {
            Payload::New(bytes) => {
                let bytes = std::mem::take(bytes);
                *payload = Payload::stored(sha256_hex(&bytes), bytes);
            }
            Payload::Stored {
                key, bytes: None, ..
            } => {
                let restored = previous
                    .and_then(|p| {
                        p.objects
                            .iter()
                            .filter_map(|o| o.body.payload())
                            .find(|old| old.key() == Some(key.as_str()))
                    })
                    .and_then(Payload::bytes)
                    .map(<[u8]>::to_vec)
                    .ok_or_else(|| {
                        StoreError::transaction_failed(format!("payload {key} is not stored"))
                    })?;
                *payload = Payload::stored(key.clone(), restored);
            }
            Payload::Stored { .. } => {}
        }
    }
    Ok(resolved)
}

#[async_trait]
impl DocumentStore for XmlStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Xml
    }

    async fn load_tree(&self) -> Result<NodeTree, StoreError> {
        Ok(self.state.lock().await.tree.clone())
    }

    async fn read_content(&self, id: NodeId) -> Result<Option<StoredContent>, StoreError> {
        let state = self.state.lock().await;
        if !state.tree.contains(id) {
            return Ok(None);
        }
        let mut records = state.content.get(&id).cloned().unwrap_or_default();
        apply_blob_ceiling(&mut records, self.config.max_blob_bytes);
        Ok(Some(StoredContent {
            records,
            warnings: state.load_warnings.get(&id).cloned().unwrap_or_default(),
        }))
    }

    async fn stored_blob_keys(&self, id: NodeId) -> Result<BTreeSet<String>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .content
            .get(&id)
            .map(|records| records.payload_keys().map(str::to_string).collect())
            .unwrap_or_default())
    }

    async fn read_blob(&self, id: NodeId, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.content.get(&id).and_then(|records| {
            records
                .objects
                .iter()
                .filter_map(|o| o.body.payload())
                .find(|p| p.key() == Some(key))
                .and_then(Payload::bytes)
                .map(<[u8]>::to_vec)
        }))
    }

    async fn write_content(&self, write: ContentWrite<'_>) -> Result<(), StoreError> {
        let node = write.node.clone();
        let records = write.records;
        tracing::debug!(
            "Writing content of node {} ({} orphaned payloads)",
            node.id,
            write.orphaned_keys.len()
        );
        self.commit(move |doc| {
            if !doc.tree.contains(node.id) {
                return Err(StoreError::NodeNotFound(node.id));
            }
            let resolved = resolve_payloads(records, doc.content.get(&node.id))?;
            doc.content.insert(node.id, resolved);
            doc.load_warnings.remove(&node.id);
            doc.tree.update(node);
            Ok(())
        })
        .await
    }

    async fn insert_node(&self, node: &Node, placement: &Placement) -> Result<(), StoreError> {
        let node = node.clone();
        let parent = placement.parent;
        let index = placement.position_of(node.id);
        self.commit(move |doc| {
            let id = node.id;
            if !doc.tree.insert(node, parent, index) {
                return Err(StoreError::transaction_failed(format!(
                    "node {id} already exists"
                )));
            }
            doc.content.insert(id, NodeRecords::default());
            Ok(())
        })
        .await
    }

    async fn update_node(&self, node: &Node) -> Result<(), StoreError> {
        let node = node.clone();
        self.commit(move |doc| {
            let id = node.id;
            if doc.tree.update(node) {
                Ok(())
            } else {
                Err(StoreError::NodeNotFound(id))
            }
        })
        .await
    }

    async fn move_node(
        &self,
        id: NodeId,
        _from: &Placement,
        to: &Placement,
    ) -> Result<(), StoreError> {
        let parent = to.parent;
        let index = to.position_of(id);
        self.commit(move |doc| {
            if !doc.tree.contains(id) {
                return Err(StoreError::NodeNotFound(id));
            }
            doc.tree.move_to(id, parent, index);
            Ok(())
        })
        .await
    }

    async fn delete_nodes(&self, ids: &[NodeId], _from: &Placement) -> Result<(), StoreError> {
        let Some(&root) = ids.first() else {
            return Ok(());
        };
        self.commit(move |doc| {
            for id in doc.tree.remove_subtree(root) {
                doc.content.remove(&id);
                doc.load_warnings.remove(&id);
            }
            Ok(())
        })
        .await
    }

    async fn write_bookmarks(&self, bookmarks: &[NodeId]) -> Result<(), StoreError> {
        let bookmarks = bookmarks.to_vec();
        self.commit(move |doc| {
            doc.tree.set_bookmarks(bookmarks);
            Ok(())
        })
        .await
    }
}
