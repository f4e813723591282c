//! Document Service - Business Logic Layer
//!
//! `DocumentService` is the handle to one open document. It owns the
//! materialized [`NodeTree`] and a [`DocumentStore`], and routes every
//! content read and write through the codec:
//!
//! - `load_content` reads records from the store and decodes them
//! - `save_content` encodes a model and writes it atomically, dropping blobs
//!   the new content no longer references
//! - structural operations (create, move, delete, bookmarks) are checked
//!   against the tree first, persisted, and only then applied in memory
//!
//! Aliases are resolved to their content owner before any content access.
//! Changes are announced as [`DocumentEvent`]s on a broadcast channel.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, RwLock};

use crate::codec::plain_text::{convert_for_kind, render_code_node};
use crate::codec::{decode, encode, DecodedContent, NodeRecords, Payload};
use crate::config::CherryConfig;
use crate::db::{
    create_document, open_document, BackendKind, ContentWrite, DocumentEvent, DocumentStore,
    NodeTree,
};
use crate::models::{ContentModel, Node, NodeId, NodeKind, NodeUpdate};
use crate::services::error::ServiceError;

/// Parameters for node creation
#[derive(Debug, Clone)]
pub struct CreateNodeParams {
    pub name: String,
    pub kind: NodeKind,
    /// `None` creates a top-level node
    pub parent: Option<NodeId>,
    /// Index among the parent's children; appended when `None`
    pub position: Option<usize>,
    /// Make the new node an alias of this node's content
    pub master_id: Option<NodeId>,
}

impl CreateNodeParams {
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            parent: None,
            position: None,
            master_id: None,
        }
    }

    pub fn under(mut self, parent: NodeId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn alias_of(mut self, master_id: NodeId) -> Self {
        self.master_id = Some(master_id);
        self
    }
}

pub struct DocumentService {
    store: Arc<dyn DocumentStore>,

    /// Node hierarchy; the write lock also serializes mutations
    tree: RwLock<NodeTree>,

    event_tx: broadcast::Sender<DocumentEvent>,

    config: CherryConfig,
}

impl DocumentService {
    /// Open the document at `path`, detecting its backend
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use cherrynote_core::services::DocumentService;
    /// # use cherrynote_core::config::CherryConfig;
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let service = DocumentService::open("notes.ctb", CherryConfig::default()).await?;
    /// for id in service.tree().await.preorder() {
    ///     println!("{}", id);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn open(path: impl AsRef<Path>, config: CherryConfig) -> Result<Self, ServiceError> {
        config.validate().map_err(ServiceError::InvalidOperation)?;
        let store = open_document(path, &config).await?;
        Self::from_store(store, config).await
    }

    /// Create a new, empty document
    pub async fn create(
        path: impl AsRef<Path>,
        kind: BackendKind,
        config: CherryConfig,
    ) -> Result<Self, ServiceError> {
        config.validate().map_err(ServiceError::InvalidOperation)?;
        let store = create_document(path, kind, &config).await?;
        Self::from_store(store, config).await
    }

    pub async fn from_store(
        store: Arc<dyn DocumentStore>,
        config: CherryConfig,
    ) -> Result<Self, ServiceError> {
        let tree = store.load_tree().await?;
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity);
        tracing::debug!("Document service ready: {} backend, {} nodes", store.kind(), tree.len());
        Ok(Self {
            store,
            tree: RwLock::new(tree),
            event_tx,
            config,
        })
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.store.kind()
    }

    pub fn config(&self) -> &CherryConfig {
        &self.config
    }

    /// Subscribe to document events
    pub fn subscribe_to_events(&self) -> broadcast::Receiver<DocumentEvent> {
        self.event_tx.subscribe()
    }

    /// Ignores send errors; having no subscribers is normal
    fn emit_event(&self, event: DocumentEvent) {
        let _ = self.event_tx.send(event);
    }

    //
    // READS
    //

    /// Snapshot of the node hierarchy
    pub async fn tree(&self) -> NodeTree {
        self.tree.read().await.clone()
    }

    pub async fn get_node(&self, id: NodeId) -> Option<Node> {
        self.tree.read().await.get(id).cloned()
    }

    /// Children of `parent` (top-level nodes for `None`), in order
    pub async fn children(&self, parent: Option<NodeId>) -> Vec<Node> {
        let tree = self.tree.read().await;
        tree.children(parent)
            .iter()
            .filter_map(|&id| tree.get(id).cloned())
            .collect()
    }

    pub async fn bookmarks(&self) -> Vec<NodeId> {
        self.tree.read().await.bookmarks().to_vec()
    }

    /// Node holding the content of `id`, following an alias
    async fn content_owner(&self, id: NodeId) -> Option<Node> {
        let tree = self.tree.read().await;
        let node = tree.get(id)?;
        match node.master_id {
            Some(master) => {
                let owner = tree.get(master).cloned();
                if owner.is_none() {
                    tracing::warn!("Alias {} points at missing node {}", id, master);
                }
                owner
            }
            None => Some(node.clone()),
        }
    }

    /// Decode the content of a node; `Ok(None)` when the node does not exist
    ///
    /// Aliases return their owner's content. Recoverable problems are logged,
    /// broadcast as [`DocumentEvent::Warning`] and returned with the model.
    pub async fn load_content(&self, id: NodeId) -> Result<Option<DecodedContent>, ServiceError> {
        let Some(owner) = self.content_owner(id).await else {
            return Ok(None);
        };
        let Some(stored) = self.store.read_content(owner.id).await? else {
            return Ok(None);
        };

        let decoded = decode(&owner.kind, &stored.records);
        let mut warnings = stored.warnings;
        warnings.extend(decoded.warnings);
        for warning in &warnings {
            tracing::warn!("Node {}: {}", owner.id, warning);
            self.emit_event(DocumentEvent::Warning {
                node_id: owner.id,
                warning: warning.clone(),
            });
        }
        Ok(Some(DecodedContent {
            model: decoded.model,
            warnings,
        }))
    }

    /// Plain-text rendering of a node's content, as used for search
    pub async fn node_plain_text(&self, id: NodeId) -> Result<Option<String>, ServiceError> {
        let Some(owner) = self.content_owner(id).await else {
            return Ok(None);
        };
        let Some(content) = self.load_content(id).await? else {
            return Ok(None);
        };
        Ok(Some(if owner.kind.is_code() {
            render_code_node(&content.model)
        } else {
            content.model.to_plain_text()
        }))
    }

    /// Full payload bytes of an image or attachment, ignoring the size ceiling
    pub async fn read_blob(&self, id: NodeId, key: &str) -> Result<Option<Vec<u8>>, ServiceError> {
        let Some(owner) = self.content_owner(id).await else {
            return Ok(None);
        };
        Ok(self.store.read_blob(owner.id, key).await?)
    }

    //
    // CONTENT WRITES
    //

    async fn write_model(
        &self,
        tree: &mut NodeTree,
        mut owner: Node,
        model: &ContentModel,
    ) -> Result<(), ServiceError> {
        let encoded = encode(&owner.kind, model);
        let stored = self.store.stored_blob_keys(owner.id).await?;
        let orphaned: BTreeSet<String> = stored
            .difference(&encoded.referenced_keys)
            .cloned()
            .collect();

        owner.modified_at = Utc::now();
        self.store
            .write_content(ContentWrite {
                node: &owner,
                records: &encoded.records,
                orphaned_keys: &orphaned,
            })
            .await
            .map_err(|e| ServiceError::write_failed(format!("node {}: {}", owner.id, e)))?;

        if !orphaned.is_empty() {
            tracing::debug!("Node {}: dropped {} orphaned blobs", owner.id, orphaned.len());
        }
        tree.update(owner);
        Ok(())
    }

    /// Encode and persist `model` as the content of `id` (or its alias owner)
    pub async fn save_content(&self, id: NodeId, model: &ContentModel) -> Result<(), ServiceError> {
        let mut tree = self.tree.write().await;
        let owner = resolve_owner(&tree, id)?;
        let owner_id = owner.id;

        let mut next = tree.clone();
        self.write_model(&mut next, owner, model).await?;
        *tree = next;
        drop(tree);

        self.emit_event(DocumentEvent::ContentSaved { id: owner_id });
        Ok(())
    }

    /// Change the content kind of a node, converting its content
    ///
    /// Objects that the new kind cannot hold are linearized as text; their
    /// blobs become orphans and are removed.
    pub async fn change_kind(&self, id: NodeId, kind: NodeKind) -> Result<Node, ServiceError> {
        let current = self
            .load_content(id)
            .await?
            .map(|content| content.model)
            .unwrap_or_default();

        let mut tree = self.tree.write().await;
        let owner = resolve_owner(&tree, id)?;
        if owner.kind == kind {
            return Ok(owner);
        }
        let converted = convert_for_kind(&current, &owner.kind, &kind);
        let mut changed = owner.clone();
        changed.kind = kind;
        changed.validate()?;

        let mut next = tree.clone();
        self.write_model(&mut next, changed, &converted).await?;
        let updated = next
            .get(owner.id)
            .cloned()
            .ok_or(ServiceError::NodeNotFound(owner.id))?;
        *tree = next;
        drop(tree);

        tracing::info!("Node {} is now {:?}", updated.id, updated.kind);
        self.emit_event(DocumentEvent::NodeUpdated(updated.clone()));
        Ok(updated)
    }

    //
    // STRUCTURE
    //

    /// Create a new empty node
    pub async fn create_node(&self, params: CreateNodeParams) -> Result<Node, ServiceError> {
        let mut tree = self.tree.write().await;

        if let Some(parent) = params.parent {
            if !tree.contains(parent) {
                return Err(ServiceError::structural(format!(
                    "parent node {} does not exist",
                    parent
                )));
            }
        }

        let mut node = Node::new(tree.next_id(), params.name, params.kind);
        if let Some(master) = params.master_id {
            let target = tree.get(master).ok_or(ServiceError::NodeNotFound(master))?;
            node.master_id = Some(target.content_owner());
        }
        node.validate()?;

        let mut next = tree.clone();
        next.insert(node.clone(), params.parent, params.position);
        let placement = next.placement(params.parent);
        self.store.insert_node(&node, &placement).await?;
        *tree = next;
        drop(tree);

        tracing::debug!("Created node {} under {:?}", node.id, params.parent);
        self.emit_event(DocumentEvent::NodeCreated(node.clone()));
        Ok(node)
    }

    /// Apply a sparse metadata update
    pub async fn update_node(&self, id: NodeId, update: NodeUpdate) -> Result<Node, ServiceError> {
        let mut tree = self.tree.write().await;
        let node = tree.get(id).cloned().ok_or(ServiceError::NodeNotFound(id))?;
        if update.is_empty() {
            return Ok(node);
        }

        let updated = update.apply_to(&node);
        updated.validate()?;
        self.store.update_node(&updated).await?;
        tree.update(updated.clone());
        drop(tree);

        self.emit_event(DocumentEvent::NodeUpdated(updated.clone()));
        Ok(updated)
    }

    /// Move a node under `new_parent` at `position`
    ///
    /// Moving a node under itself or one of its descendants is refused before
    /// anything is written.
    pub async fn move_node(
        &self,
        id: NodeId,
        new_parent: Option<NodeId>,
        position: Option<usize>,
    ) -> Result<(), ServiceError> {
        let mut tree = self.tree.write().await;
        if !tree.contains(id) {
            return Err(ServiceError::NodeNotFound(id));
        }
        if let Some(parent) = new_parent {
            if !tree.contains(parent) {
                return Err(ServiceError::structural(format!(
                    "parent node {} does not exist",
                    parent
                )));
            }
            if parent == id || tree.is_descendant(parent, id) {
                return Err(ServiceError::structural(format!(
                    "cannot move node {} under its own subtree (node {})",
                    id, parent
                )));
            }
        }

        let old_parent = tree.parent(id);
        let mut next = tree.clone();
        next.move_to(id, new_parent, position);
        let from = next.placement(old_parent);
        let to = next.placement(new_parent);
        self.store.move_node(id, &from, &to).await?;
        *tree = next;
        drop(tree);

        self.emit_event(DocumentEvent::NodeMoved {
            id,
            parent: new_parent,
        });
        Ok(())
    }

    /// Delete a node and its subtree, returning the removed ids
    ///
    /// Content owned by a deleted node that is still aliased from outside the
    /// subtree is first moved to the first such alias in document order; the
    /// remaining aliases are repointed at it.
    pub async fn delete_node(&self, id: NodeId) -> Result<Vec<NodeId>, ServiceError> {
        let mut tree = self.tree.write().await;
        let removed = tree.subtree(id);
        if removed.is_empty() {
            return Err(ServiceError::NodeNotFound(id));
        }

        let mut next = tree.clone();
        let mut promoted = Vec::new();
        for &owner in &removed {
            let outside: Vec<NodeId> = next
                .aliases_of(owner)
                .into_iter()
                .filter(|alias| !removed.contains(alias))
                .collect();
            if let Some((&heir, rest)) = outside.split_first() {
                promoted.extend(self.promote_alias(&mut next, owner, heir, rest).await?);
            }
        }

        let parent = next.parent(id);
        let bookmarks_before = next.bookmarks().to_vec();
        next.remove_subtree(id);
        let from = next.placement(parent);
        self.store.delete_nodes(&removed, &from).await?;
        let bookmarks_changed = next.bookmarks() != bookmarks_before.as_slice();
        if bookmarks_changed {
            self.store.write_bookmarks(next.bookmarks()).await?;
        }
        let bookmarks = next.bookmarks().to_vec();
        *tree = next;
        drop(tree);

        tracing::info!("Deleted node {} ({} nodes)", id, removed.len());
        for node in promoted {
            self.emit_event(DocumentEvent::NodeUpdated(node));
        }
        if bookmarks_changed {
            self.emit_event(DocumentEvent::BookmarksChanged(bookmarks));
        }
        self.emit_event(DocumentEvent::NodeDeleted {
            id,
            removed: removed.clone(),
        });
        Ok(removed)
    }

    /// Give `heir` its own copy of `owner`'s content and repoint `others`
    async fn promote_alias(
        &self,
        tree: &mut NodeTree,
        owner: NodeId,
        heir: NodeId,
        others: &[NodeId],
    ) -> Result<Vec<Node>, ServiceError> {
        let owner_node = tree.get(owner).cloned().ok_or(ServiceError::NodeNotFound(owner))?;
        let records = match self.store.read_content(owner).await? {
            Some(stored) => self.detach_payloads(owner, stored.records).await?,
            None => NodeRecords::default(),
        };

        let mut heir_node = tree.get(heir).cloned().ok_or(ServiceError::NodeNotFound(heir))?;
        heir_node.master_id = None;
        heir_node.kind = owner_node.kind.clone();
        heir_node.modified_at = Utc::now();
        self.store.update_node(&heir_node).await?;

        let orphaned = self.store.stored_blob_keys(heir).await?;
        self.store
            .write_content(ContentWrite {
                node: &heir_node,
                records: &records,
                orphaned_keys: &orphaned,
            })
            .await
            .map_err(|e| ServiceError::write_failed(format!("promoting alias {}: {}", heir, e)))?;
        tree.update(heir_node.clone());
        tracing::info!("Alias {} now owns the content of node {}", heir, owner);

        let mut changed = vec![heir_node];
        for &alias in others {
            let Some(mut node) = tree.get(alias).cloned() else {
                continue;
            };
            node.master_id = Some(heir);
            self.store.update_node(&node).await?;
            tree.update(node.clone());
            changed.push(node);
        }
        Ok(changed)
    }

    /// Turn stored payloads into new ones so another node can own them
    async fn detach_payloads(
        &self,
        owner: NodeId,
        mut records: NodeRecords,
    ) -> Result<NodeRecords, ServiceError> {
        let mut kept = Vec::with_capacity(records.objects.len());
        for mut object in records.objects {
            let kind = object.body.kind_name();
            if let Some(payload) = object.body.payload_mut() {
                if let Payload::Stored { key, bytes, .. } = payload {
                    let data = match bytes.take() {
                        Some(data) => Some(data),
                        None => self.store.read_blob(owner, key).await?,
                    };
                    match data {
                        Some(data) => *payload = Payload::New(data),
                        None => {
                            tracing::warn!(
                                "Dropping {} {} of node {}: blob is missing",
                                kind,
                                key,
                                owner
                            );
                            continue;
                        }
                    }
                }
            }
            kept.push(object);
        }
        records.objects = kept;
        Ok(records)
    }

    //
    // BOOKMARKS
    //

    pub async fn add_bookmark(&self, id: NodeId) -> Result<(), ServiceError> {
        let mut tree = self.tree.write().await;
        if !tree.contains(id) {
            return Err(ServiceError::NodeNotFound(id));
        }
        if tree.bookmarks().contains(&id) {
            return Ok(());
        }
        let mut bookmarks = tree.bookmarks().to_vec();
        bookmarks.push(id);
        self.store.write_bookmarks(&bookmarks).await?;
        tree.set_bookmarks(bookmarks.clone());
        drop(tree);

        self.emit_event(DocumentEvent::BookmarksChanged(bookmarks));
        Ok(())
    }

    pub async fn remove_bookmark(&self, id: NodeId) -> Result<(), ServiceError> {
        let mut tree = self.tree.write().await;
        if !tree.bookmarks().contains(&id) {
            return Ok(());
        }
        let bookmarks: Vec<NodeId> = tree
            .bookmarks()
            .iter()
            .copied()
            .filter(|&b| b != id)
            .collect();
        self.store.write_bookmarks(&bookmarks).await?;
        tree.set_bookmarks(bookmarks.clone());
        drop(tree);

        self.emit_event(DocumentEvent::BookmarksChanged(bookmarks));
        Ok(())
    }
}

fn resolve_owner(tree: &NodeTree, id: NodeId) -> Result<Node, ServiceError> {
    let node = tree.get(id).ok_or(ServiceError::NodeNotFound(id))?;
    let owner = node.content_owner();
    tree.get(owner).cloned().ok_or(ServiceError::NodeNotFound(owner))
}
