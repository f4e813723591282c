//! Text Style Record
//!
//! The closed style record attached to every run of styled text. The codec is
//! the only place that translates it to and from persisted attributes (see
//! [`crate::codec::style_map`]); rendering surfaces match on the fields here
//! instead of inspecting span types.

use serde::{Deserialize, Serialize};

/// Horizontal alignment of a paragraph or embedded object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Justification {
    #[default]
    Left,
    Center,
    Right,
    Fill,
}

impl Justification {
    /// Persisted attribute value
    pub fn as_str(&self) -> &'static str {
        match self {
            Justification::Left => "left",
            Justification::Center => "center",
            Justification::Right => "right",
            Justification::Fill => "fill",
        }
    }

    /// Parse a persisted value. Unknown values yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "left" => Some(Justification::Left),
            "center" => Some(Justification::Center),
            "right" => Some(Justification::Right),
            "fill" => Some(Justification::Fill),
            _ => None,
        }
    }
}

/// Superscript or subscript placement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Script {
    Superscript,
    Subscript,
}

/// Relative text size class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SizeClass {
    H1,
    H2,
    H3,
    H4,
    H5,
    H6,
    Small,
}

impl SizeClass {
    /// Multiplier applied to the base font size by rendering surfaces
    pub fn multiplier(&self) -> f32 {
        match self {
            SizeClass::H1 => 1.75,
            SizeClass::H2 => 1.5,
            SizeClass::H3 => 1.25,
            SizeClass::H4 => 1.20,
            SizeClass::H5 => 1.15,
            SizeClass::H6 => 1.10,
            SizeClass::Small => 0.75,
        }
    }
}

/// Target of a hyperlink run
///
/// File and folder paths are kept in their transport encoding; the codec never
/// decodes them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LinkTarget {
    /// Another node of the same document, optionally a named anchor inside it
    Node { id: i64, anchor: Option<String> },
    File { path: String },
    Folder { path: String },
    Web { url: String },
}

/// Style of a text run
///
/// `Style::default()` is plain, unstyled text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Style {
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub strikethrough: bool,
    pub script: Option<Script>,
    pub size: Option<SizeClass>,
    /// Foreground color as `#rrggbb`
    pub foreground: Option<String>,
    /// Background color as `#rrggbb`
    pub background: Option<String>,
    pub family: Option<String>,
    pub justification: Option<Justification>,
    /// Indentation level; rendering margin is `indent * INDENT_UNIT_WIDTH`
    pub indent: u32,
    pub link: Option<LinkTarget>,
}

impl Style {
    /// True when no attribute is set
    pub fn is_plain(&self) -> bool {
        *self == Style::default()
    }

    pub fn bold() -> Self {
        Self {
            bold: true,
            ..Default::default()
        }
    }

    pub fn with_link(link: LinkTarget) -> Self {
        Self {
            link: Some(link),
            ..Default::default()
        }
    }
}
