//! Node Data Structures
//!
//! This module defines the `Node` struct: the metadata of a single document
//! unit in the outliner tree. Content lives separately in a
//! [`ContentModel`](crate::models::ContentModel) and is only loaded while a
//! node is being viewed or edited.
//!
//! # Content Kinds
//!
//! - **Rich text**: styled runs plus embedded objects (`prog_lang="custom-colors"`)
//! - **Plain text**: unstyled text (`prog_lang="plain-text"`)
//! - **Code**: one block of source code; any other `prog_lang` value is its language
//!
//! # Aliases
//!
//! A node with `master_id` set is a transparent alias of another node's
//! content. Content operations on it act on [`Node::content_owner`].
//!
//! # Examples
//!
//! ```rust
//! use cherrynote_core::models::{Node, NodeKind};
//!
//! let node = Node::new(7, "Meeting notes", NodeKind::RichText);
//! assert_eq!(node.kind.syntax(), "custom-colors");
//! assert_eq!(node.content_owner(), 7);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable unique node identifier
pub type NodeId = i64;

/// `prog_lang` value of rich-text nodes
pub const RICH_TEXT_SYNTAX: &str = "custom-colors";

/// `prog_lang` value of plain-text nodes
pub const PLAIN_TEXT_SYNTAX: &str = "plain-text";

/// Validation errors for Node operations
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Invalid node ID: {0}")]
    InvalidId(NodeId),

    #[error("Invalid foreground color '{0}': expected #rrggbb")]
    InvalidColor(String),

    #[error("Node {0} cannot be an alias of itself")]
    SelfAlias(NodeId),

    #[error("Code node language cannot be empty")]
    EmptyLanguage,
}

/// How a node's content is stored and edited
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "language", rename_all = "camelCase")]
pub enum NodeKind {
    RichText,
    PlainText,
    /// Source-highlighted code node with its language tag
    Code(String),
}

impl NodeKind {
    /// Interpret a persisted `prog_lang`/`syntax` value
    pub fn from_syntax(syntax: &str) -> Self {
        match syntax {
            RICH_TEXT_SYNTAX => NodeKind::RichText,
            PLAIN_TEXT_SYNTAX | "" => NodeKind::PlainText,
            lang => NodeKind::Code(lang.to_string()),
        }
    }

    /// Persisted `prog_lang`/`syntax` value
    pub fn syntax(&self) -> &str {
        match self {
            NodeKind::RichText => RICH_TEXT_SYNTAX,
            NodeKind::PlainText => PLAIN_TEXT_SYNTAX,
            NodeKind::Code(lang) => lang,
        }
    }

    pub fn is_rich_text(&self) -> bool {
        matches!(self, NodeKind::RichText)
    }

    pub fn is_code(&self) -> bool {
        matches!(self, NodeKind::Code(_))
    }
}

/// Node metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Unique identifier, stable for the life of the document
    pub id: NodeId,

    /// Display name shown in the tree
    pub name: String,

    /// Content kind
    pub kind: NodeKind,

    /// Node whose content this node shares (`None` = not an alias)
    pub master_id: Option<NodeId>,

    /// Exclude this node from search
    pub exclude_from_search: bool,

    /// Exclude this node's descendants from search
    pub exclude_children_from_search: bool,

    pub is_bold: bool,

    pub read_only: bool,

    /// Name color in the tree as `#rrggbb`
    pub foreground: Option<String>,

    /// Custom icon index, `0` for the default icon
    pub custom_icon_id: u32,

    /// Space separated tags
    pub tags: String,

    pub created_at: DateTime<Utc>,

    pub modified_at: DateTime<Utc>,
}

impl Node {
    /// Create a node stamped with the current time
    pub fn new(id: NodeId, name: impl Into<String>, kind: NodeKind) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            kind,
            master_id: None,
            exclude_from_search: false,
            exclude_children_from_search: false,
            is_bold: false,
            read_only: false,
            foreground: None,
            custom_icon_id: 0,
            tags: String::new(),
            created_at: now,
            modified_at: now,
        }
    }

    /// Node that actually holds this node's content
    pub fn content_owner(&self) -> NodeId {
        self.master_id.unwrap_or(self.id)
    }

    pub fn is_alias(&self) -> bool {
        self.master_id.is_some()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id <= 0 {
            return Err(ValidationError::InvalidId(self.id));
        }
        if self.master_id == Some(self.id) {
            return Err(ValidationError::SelfAlias(self.id));
        }
        if let Some(color) = &self.foreground {
            if !is_hex_color(color) {
                return Err(ValidationError::InvalidColor(color.clone()));
            }
        }
        if let NodeKind::Code(lang) = &self.kind {
            if lang.trim().is_empty() {
                return Err(ValidationError::EmptyLanguage);
            }
        }
        Ok(())
    }
}

/// Sparse update of node properties
///
/// Only `Some` fields are applied. `foreground: Some(None)` clears the color.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeUpdate {
    pub name: Option<String>,
    pub exclude_from_search: Option<bool>,
    pub exclude_children_from_search: Option<bool>,
    pub is_bold: Option<bool>,
    pub read_only: Option<bool>,
    pub foreground: Option<Option<String>>,
    pub custom_icon_id: Option<u32>,
    pub tags: Option<String>,
}

impl NodeUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.exclude_from_search.is_none()
            && self.exclude_children_from_search.is_none()
            && self.is_bold.is_none()
            && self.read_only.is_none()
            && self.foreground.is_none()
            && self.custom_icon_id.is_none()
            && self.tags.is_none()
    }

    /// Apply the update, returning the modified copy
    pub fn apply_to(self, node: &Node) -> Node {
        let mut updated = node.clone();
        if let Some(name) = self.name {
            updated.name = name;
        }
        if let Some(v) = self.exclude_from_search {
            updated.exclude_from_search = v;
        }
        if let Some(v) = self.exclude_children_from_search {
            updated.exclude_children_from_search = v;
        }
        if let Some(v) = self.is_bold {
            updated.is_bold = v;
        }
        if let Some(v) = self.read_only {
            updated.read_only = v;
        }
        if let Some(v) = self.foreground {
            updated.foreground = v;
        }
        if let Some(v) = self.custom_icon_id {
            updated.custom_icon_id = v;
        }
        if let Some(v) = self.tags {
            updated.tags = v;
        }
        updated.modified_at = Utc::now();
        updated
    }
}

fn is_hex_color(value: &str) -> bool {
    value.len() == 7
        && value.starts_with('#')
        && value[1..].chars().all(|c| c.is_ascii_hexdigit())
}

/// Parse a persisted timestamp (epoch seconds, integer or fractional)
pub(crate) fn timestamp_from_str(value: &str) -> DateTime<Utc> {
    let value = value.trim();
    let secs = value
        .parse::<i64>()
        .ok()
        .or_else(|| value.parse::<f64>().ok().map(|f| f as i64))
        .unwrap_or(0);
    timestamp_from_secs(secs)
}

pub(crate) fn timestamp_from_secs(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}
