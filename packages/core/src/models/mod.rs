//! Data Models
//!
//! This module contains the core data structures used throughout CherryNote:
//!
//! - `Node` - node metadata (name, kind, alias target, display hints)
//! - `ContentModel` - unified, backend-agnostic node content
//! - `Style` - the closed style record of a text run
//!
//! None of these types know how they are persisted; the codec and the
//! storage backends own that.

mod content;
mod node;
mod style;


pub use content::{
    Anchor, Attachment, BrokenKind, BrokenObject, CodeBlock, ContentBlock, ContentModel, Formula,
    Image, Table, TextRun,
};
pub(crate) use node::{timestamp_from_secs, timestamp_from_str};
pub use node::{
    Node, NodeId, NodeKind, NodeUpdate, ValidationError, PLAIN_TEXT_SYNTAX, RICH_TEXT_SYNTAX,
};
pub use style::{Justification, LinkTarget, Script, SizeClass, Style};
