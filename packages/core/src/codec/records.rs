//! Raw Persisted Records
//!
//! The flat, offset-addressed shape every backend reads and writes. A node's
//! content is a list of styled text fragments in storage order plus a list of
//! out-of-line fragments, each anchored at a persisted `char_offset`.
//!
//! Backends translate their physical layout (XML elements, SQL rows, files)
//! to and from these records; the decoder and encoder never see anything
//! backend-specific.

use crate::models::Justification;

/// `filename` marker distinguishing formulas from attachments
pub const FORMULA_FILENAME: &str = "__ct_special.tex";

/// Persisted content of one node
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeRecords {
    /// Styled text fragments in storage order
    pub text: Vec<TextFragment>,
    /// Out-of-line fragments; decoders sort them by offset
    pub objects: Vec<OffsetFragment>,
}

impl NodeRecords {
    pub fn is_empty(&self) -> bool {
        self.text.iter().all(|f| f.text.is_empty()) && self.objects.is_empty()
    }

    /// Concatenated text of all fragments
    pub fn joined_text(&self) -> String {
        self.text.iter().map(|f| f.text.as_str()).collect()
    }

    /// Storage keys referenced by payload-bearing fragments
    pub fn payload_keys(&self) -> impl Iterator<Item = &str> {
        self.objects.iter().filter_map(|o| o.body.payload()?.key())
    }
}

/// A styled run as persisted: literal text plus raw attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextFragment {
    pub text: String,
    pub attributes: Vec<(String, String)>,
}

impl TextFragment {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attributes: Vec::new(),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// An embedded object anchored at a persisted offset
#[derive(Debug, Clone, PartialEq)]
pub struct OffsetFragment {
    pub offset: usize,
    pub justification: Justification,
    pub body: FragmentBody,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FragmentBody {
    CodeBox(CodeBoxRecord),
    Table(TableRecord),
    Image(ImageRecord),
    Attachment(AttachmentRecord),
    Anchor { name: String },
    Formula { source: String },
}

impl FragmentBody {
    pub fn payload(&self) -> Option<&Payload> {
        match self {
            FragmentBody::Image(image) => Some(&image.payload),
            FragmentBody::Attachment(attachment) => Some(&attachment.payload),
            _ => None,
        }
    }

    pub fn payload_mut(&mut self) -> Option<&mut Payload> {
        match self {
            FragmentBody::Image(image) => Some(&mut image.payload),
            FragmentBody::Attachment(attachment) => Some(&mut attachment.payload),
            _ => None,
        }
    }

    /// Short name used in logs and warnings
    pub fn kind_name(&self) -> &'static str {
        match self {
            FragmentBody::CodeBox(_) => "codebox",
            FragmentBody::Table(_) => "table",
            FragmentBody::Image(_) => "image",
            FragmentBody::Attachment(_) => "attachment",
            FragmentBody::Anchor { .. } => "anchor",
            FragmentBody::Formula { .. } => "formula",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBoxRecord {
    pub text: String,
    pub syntax: String,
    pub width: u32,
    pub height: u32,
    pub width_in_pixels: bool,
    pub highlight_brackets: bool,
    pub show_line_numbers: bool,
}

/// Table as persisted: the header row is the *last* row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRecord {
    pub rows: Vec<Vec<String>>,
    pub col_min: u32,
    pub col_max: u32,
    pub col_widths: String,
    pub is_light: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    pub payload: Payload,
    pub link: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRecord {
    pub filename: String,
    pub time: i64,
    pub payload: Payload,
}

/// Binary payload of an image or attachment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Already in storage under `key`; `bytes` is `None` when the payload was
    /// not materialized (size ceiling, missing file)
    Stored {
        key: String,
        bytes: Option<Vec<u8>>,
        size: Option<u64>,
    },
    /// Not yet stored; the backend assigns a key when writing
    New(Vec<u8>),
}

impl Payload {
    pub fn stored(key: impl Into<String>, bytes: Vec<u8>) -> Self {
        let size = bytes.len() as u64;
        Payload::Stored {
            key: key.into(),
            bytes: Some(bytes),
            size: Some(size),
        }
    }

    pub fn key(&self) -> Option<&str> {
        match self {
            Payload::Stored { key, .. } => Some(key),
            Payload::New(_) => None,
        }
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            Payload::Stored { bytes, .. } => bytes.as_deref(),
            Payload::New(bytes) => Some(bytes),
        }
    }
}
