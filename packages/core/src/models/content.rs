//! Unified Content Model
//!
//! Backend-agnostic, in-memory representation of a node's content: an ordered
//! sequence of [`ContentBlock`]s. Styled text and every non-table embedded
//! object form one continuous stream for offset purposes, where one character
//! of text and one embedded object each occupy exactly one unit. Tables split
//! that stream into a "before" and an "after" part.
//!
//! # Canonical Form
//!
//! Decoding always yields a model in canonical form, and the round-trip
//! property `decode(encode(m)) == m` holds for canonical models:
//!
//! - no empty `StyledText` blocks and no two adjacent `StyledText` blocks
//! - no empty runs, and adjacent runs never share a style
//! - no two adjacent code blocks with identical parameters
//!
//! [`ContentModel::normalize`] brings an arbitrary model into canonical form.
//!
//! # Examples
//!
//! ```rust
//! use cherrynote_core::models::{ContentBlock, ContentModel, Style};
//!
//! let mut model = ContentModel::new();
//! model.push_text("Hello ", Style::bold());
//! model.push_text("world", Style::default());
//! assert_eq!(model.blocks.len(), 1);
//! assert_eq!(model.unit_len(), 11);
//! ```

use crate::models::style::{Justification, Style};
use serde::{Deserialize, Serialize};

/// A run of text sharing one style
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRun {
    pub text: String,
    pub style: Style,
}

impl TextRun {
    pub fn new(text: impl Into<String>, style: Style) -> Self {
        Self {
            text: text.into(),
            style,
        }
    }

    pub fn plain(text: impl Into<String>) -> Self {
        Self::new(text, Style::default())
    }

    /// Length in stream units (characters)
    pub fn unit_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Named position marker used as an internal link target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anchor {
    pub name: String,
    pub justification: Justification,
}

/// Arbitrary file embedded in a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    /// Attachment time in epoch seconds; `0` means "not yet stamped"
    pub timestamp: i64,
    #[serde(with = "crate::models::content::bytes_b64")]
    pub data: Vec<u8>,
    /// Storage key when the attachment was loaded from storage
    pub key: Option<String>,
    pub justification: Justification,
}

impl Attachment {
    /// A freshly added attachment, stamped with the current time
    pub fn new(filename: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            timestamp: chrono::Utc::now().timestamp(),
            data,
            key: None,
            justification: Justification::Left,
        }
    }
}

/// Raster image embedded in a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    #[serde(with = "crate::models::content::bytes_b64")]
    pub data: Vec<u8>,
    pub key: Option<String>,
    /// Optional hyperlink attached to the image (persisted link syntax)
    pub link: String,
    pub justification: Justification,
}

impl Image {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            key: None,
            link: String::new(),
            justification: Justification::Left,
        }
    }
}

/// Math formula source, rendered to an image by the presentation layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Formula {
    pub source: String,
    pub justification: Justification,
}

/// Embedded source code block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeBlock {
    pub text: String,
    /// Syntax-highlighting language tag
    pub language: String,
    pub width: u32,
    pub height: u32,
    /// `true` when `width` is in pixels, `false` when it is a percentage
    pub width_in_pixels: bool,
    pub highlight_brackets: bool,
    pub show_line_numbers: bool,
    pub justification: Justification,
}

impl CodeBlock {
    pub const DEFAULT_WIDTH: u32 = 500;
    pub const DEFAULT_HEIGHT: u32 = 100;

    pub fn new(text: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            language: language.into(),
            width: Self::DEFAULT_WIDTH,
            height: Self::DEFAULT_HEIGHT,
            width_in_pixels: true,
            highlight_brackets: true,
            show_line_numbers: false,
            justification: Justification::Left,
        }
    }

    /// Whether `other` is a fragment of the same logical block
    ///
    /// Fragments share every parameter; only the text differs.
    pub fn can_merge_with(&self, other: &CodeBlock) -> bool {
        self.language == other.language
            && self.width == other.width
            && self.height == other.height
            && self.width_in_pixels == other.width_in_pixels
            && self.highlight_brackets == other.highlight_brackets
            && self.show_line_numbers == other.show_line_numbers
            && self.justification == other.justification
    }
}

/// Spreadsheet-like table; `rows[0]` is the header row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub rows: Vec<Vec<String>>,
    pub col_min: u32,
    pub col_max: u32,
    pub col_widths: String,
    pub is_light: bool,
    pub justification: Justification,
}

impl Table {
    pub const DEFAULT_COL_MIN: u32 = 40;
    pub const DEFAULT_COL_MAX: u32 = 400;

    pub fn new(rows: Vec<Vec<String>>) -> Self {
        let columns = rows.first().map(Vec::len).unwrap_or(0);
        Self {
            rows,
            col_min: Self::DEFAULT_COL_MIN,
            col_max: Self::DEFAULT_COL_MAX,
            col_widths: vec!["0"; columns].join(","),
            is_light: false,
            justification: Justification::Left,
        }
    }

    pub fn header(&self) -> Option<&[String]> {
        self.rows.first().map(Vec::as_slice)
    }

    pub fn column_count(&self) -> usize {
        self.rows.first().map(Vec::len).unwrap_or(0)
    }
}

/// Which kind of object a [`BrokenObject`] stands in for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BrokenKind {
    Image { link: String },
    Attachment { filename: String, timestamp: i64 },
}

/// Sentinel for an image or attachment whose payload could not be loaded
///
/// The payload stays in storage under `key`; saving a model that still holds
/// the sentinel keeps it there untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokenObject {
    pub kind: BrokenKind,
    pub key: String,
    /// Payload size in bytes when the storage reported it
    pub size: Option<u64>,
    pub justification: Justification,
}

/// One block of node content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ContentBlock {
    StyledText { runs: Vec<TextRun> },
    Anchor(Anchor),
    Attachment(Attachment),
    Image(Image),
    Formula(Formula),
    CodeBlock(CodeBlock),
    Table(Table),
    Broken(BrokenObject),
}

impl ContentBlock {
    pub fn text(runs: Vec<TextRun>) -> Self {
        ContentBlock::StyledText { runs }
    }

    /// Length in stream units; tables are outside the stream
    pub fn unit_len(&self) -> usize {
        match self {
            ContentBlock::StyledText { runs } => runs.iter().map(TextRun::unit_len).sum(),
            ContentBlock::Table(_) => 0,
            _ => 1,
        }
    }

    pub fn is_embedded(&self) -> bool {
        !matches!(self, ContentBlock::StyledText { .. })
    }

    /// Storage key of the payload this block references, if any
    pub fn blob_key(&self) -> Option<&str> {
        match self {
            ContentBlock::Attachment(a) => a.key.as_deref(),
            ContentBlock::Image(i) => i.key.as_deref(),
            ContentBlock::Broken(b) => Some(b.key.as_str()),
            _ => None,
        }
    }
}

/// Content of one node
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContentModel {
    pub blocks: Vec<ContentBlock>,
}

impl ContentModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// A model holding `text` as a single unstyled run
    pub fn from_plain_text(text: &str) -> Self {
        let mut model = Self::new();
        model.push_text(text, Style::default());
        model
    }

    /// Append text, extending the trailing run when the style matches
    pub fn push_text(&mut self, text: &str, style: Style) {
        if text.is_empty() {
            return;
        }
        if let Some(ContentBlock::StyledText { runs }) = self.blocks.last_mut() {
            match runs.last_mut() {
                Some(last) if last.style == style => last.text.push_str(text),
                _ => runs.push(TextRun::new(text, style)),
            }
            return;
        }
        self.blocks.push(ContentBlock::text(vec![TextRun::new(text, style)]));
    }

    /// Append a block, merging it into the trailing text block when both are text
    pub fn push(&mut self, block: ContentBlock) {
        match block {
            ContentBlock::StyledText { runs } => {
                for run in runs {
                    self.push_text(&run.text, run.style);
                }
            }
            other => self.blocks.push(other),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.iter().all(|b| match b {
            ContentBlock::StyledText { runs } => runs.iter().all(|r| r.text.is_empty()),
            _ => false,
        })
    }

    /// Total length of the offset stream in units
    pub fn unit_len(&self) -> usize {
        self.blocks.iter().map(ContentBlock::unit_len).sum()
    }

    /// Storage keys of every payload this model references
    pub fn blob_keys(&self) -> Vec<&str> {
        self.blocks.iter().filter_map(ContentBlock::blob_key).collect()
    }

    /// Bring the model into canonical form
    pub fn normalize(&mut self) {
        let blocks = std::mem::take(&mut self.blocks);
        for block in blocks {
            match block {
                ContentBlock::CodeBlock(code) => match self.blocks.last_mut() {
                    Some(ContentBlock::CodeBlock(prev)) if prev.can_merge_with(&code) => {
                        prev.text.push_str(&code.text);
                    }
                    _ => self.blocks.push(ContentBlock::CodeBlock(code)),
                },
                other => self.push(other),
            }
        }
    }

    /// Render the model as plain text
    ///
    /// See [`crate::codec::plain_text`] for the rendering rules.
    pub fn to_plain_text(&self) -> String {
        crate::codec::plain_text::render(self)
    }
}

/// Serde helper storing binary payloads as base64 strings
pub(crate) mod bytes_b64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
