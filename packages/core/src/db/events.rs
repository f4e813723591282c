//! Document Events
//!
//! Events emitted by [`DocumentService`](crate::services::DocumentService)
//! after a change has been persisted. Subscribers receive them over a tokio
//! broadcast channel, so any number of observers (a UI, a search indexer)
//! can follow the document without coupling to the storage layer.

use serde::Serialize;

use crate::codec::CodecWarning;
use crate::models::{Node, NodeId};

#[derive(Debug, Clone)]
pub enum DocumentEvent {
    /// A new node was created
    NodeCreated(Node),

    /// Node metadata changed (name, flags, kind, alias target)
    NodeUpdated(Node),

    /// A node and its subtree were deleted
    NodeDeleted { id: NodeId, removed: Vec<NodeId> },

    /// A node's content was saved
    ContentSaved { id: NodeId },

    /// A node moved to a new parent or position
    NodeMoved { id: NodeId, parent: Option<NodeId> },

    /// Bookmark list changed
    BookmarksChanged(Vec<NodeId>),

    /// Recoverable problem found while decoding a node
    Warning {
        node_id: NodeId,
        warning: CodecWarning,
    },
}

impl DocumentEvent {
    pub fn event_type(&self) -> &str {
        match self {
            DocumentEvent::NodeCreated(_) => "node:created",
            DocumentEvent::NodeUpdated(_) => "node:updated",
            DocumentEvent::NodeDeleted { .. } => "node:deleted",
            DocumentEvent::ContentSaved { .. } => "content:saved",
            DocumentEvent::NodeMoved { .. } => "node:moved",
            DocumentEvent::BookmarksChanged(_) => "bookmarks:changed",
            DocumentEvent::Warning { .. } => "codec:warning",
        }
    }

    /// Node the event is about, if any
    pub fn node_id(&self) -> Option<NodeId> {
        match self {
            DocumentEvent::NodeCreated(node) | DocumentEvent::NodeUpdated(node) => Some(node.id),
            DocumentEvent::NodeDeleted { id, .. }
            | DocumentEvent::ContentSaved { id }
            | DocumentEvent::NodeMoved { id, .. } => Some(*id),
            DocumentEvent::Warning { node_id, .. } => Some(*node_id),
            DocumentEvent::BookmarksChanged(_) => None,
        }
    }
}

/// Serializable summary of an event, for logs and the CLI
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSummary {
    pub event_type: String,
    pub node_id: Option<NodeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl From<&DocumentEvent> for EventSummary {
    fn from(event: &DocumentEvent) -> Self {
        Self {
            event_type: event.event_type().to_string(),
            node_id: event.node_id(),
            detail: match event {
                DocumentEvent::Warning { warning, .. } => Some(warning.to_string()),
                _ => None,
            },
        }
    }
}
