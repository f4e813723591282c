//! Style Attribute Mapper
//!
//! Closed bidirectional table between the persisted `rich_text` attribute
//! vocabulary and [`Style`]. This is the only place where style identity is
//! tested; everything else matches on the `Style` fields.
//!
//! | Style field      | attribute                                  |
//! |------------------|--------------------------------------------|
//! | bold             | `weight="heavy"`                           |
//! | italic           | `style="italic"`                           |
//! | underline        | `underline="single"`                       |
//! | strikethrough    | `strikethrough="true"`                     |
//! | script           | `scale="sup"` / `scale="sub"`              |
//! | size             | `scale="h1"`..`"h6"`, `scale="small"`      |
//! | foreground       | `foreground="#rrggbb"`                     |
//! | background       | `background="#rrggbb"`                     |
//! | family           | `family="monospace"`                       |
//! | justification    | `justification="left|center|right|fill"`   |
//! | indent           | `indent="<level>"`                         |
//! | link             | `link="node 12 anchor"`, `"file …"`, `"fold …"`, `"webs …"` |
//!
//! `script` and `size` share the `scale` attribute; when both are set the
//! script wins on encode.

use std::collections::BTreeSet;

use crate::codec::warnings::CodecWarning;
use crate::models::{Justification, LinkTarget, Script, SizeClass, Style};

/// Rendering margin of one indent level
pub const INDENT_UNIT_WIDTH: u32 = 40;

/// Rendering margin in pixels for an indent level
pub fn indent_margin(level: u32) -> u32 {
    level * INDENT_UNIT_WIDTH
}

/// Translate persisted attributes into a style
///
/// Unknown attribute names are reported once each through `unknown`; values
/// that cannot be interpreted are reported as malformed fragments.
pub fn style_from_attributes(
    attributes: &[(String, String)],
    unknown: &mut BTreeSet<String>,
    warnings: &mut Vec<CodecWarning>,
) -> Style {
    let mut style = Style::default();
    for (name, value) in attributes {
        let understood = match name.as_str() {
            "weight" => {
                style.bold = value == "heavy" || value == "bold";
                true
            }
            "style" => {
                style.italic = value == "italic";
                true
            }
            "underline" => {
                style.underline = value != "none";
                true
            }
            "strikethrough" => {
                style.strikethrough = value == "true";
                true
            }
            "scale" => apply_scale(&mut style, value),
            "foreground" => {
                style.foreground = Some(normalize_color(value));
                true
            }
            "background" => {
                style.background = Some(normalize_color(value));
                true
            }
            "family" => {
                style.family = Some(value.clone());
                true
            }
            "justification" => {
                style.justification = Justification::parse(value);
                style.justification.is_some()
            }
            "indent" => match value.trim().parse::<u32>() {
                Ok(level) => {
                    style.indent = level;
                    true
                }
                Err(_) => false,
            },
            "link" => match parse_link(value) {
                Some(link) => {
                    style.link = Some(link);
                    true
                }
                None => false,
            },
            _ => {
                if unknown.insert(name.clone()) {
                    warnings.push(CodecWarning::UnknownAttribute { name: name.clone() });
                }
                continue;
            }
        };
        if !understood {
            warnings.push(CodecWarning::MalformedFragment {
                context: format!("attribute {name}=\"{value}\""),
            });
        }
    }
    style
}

fn apply_scale(style: &mut Style, value: &str) -> bool {
    match value {
        "sup" => style.script = Some(Script::Superscript),
        "sub" => style.script = Some(Script::Subscript),
        "h1" => style.size = Some(SizeClass::H1),
        "h2" => style.size = Some(SizeClass::H2),
        "h3" => style.size = Some(SizeClass::H3),
        "h4" => style.size = Some(SizeClass::H4),
        "h5" => style.size = Some(SizeClass::H5),
        "h6" => style.size = Some(SizeClass::H6),
        "small" => style.size = Some(SizeClass::Small),
        _ => return false,
    }
    true
}

/// Translate a style into persisted attributes, in a fixed order
pub fn style_to_attributes(style: &Style) -> Vec<(String, String)> {
    let mut attributes = Vec::new();
    let mut put = |name: &str, value: String| attributes.push((name.to_string(), value));

    if let Some(color) = &style.foreground {
        put("foreground", color.clone());
    }
    if let Some(color) = &style.background {
        put("background", color.clone());
    }
    if style.bold {
        put("weight", "heavy".to_string());
    }
    if style.italic {
        put("style", "italic".to_string());
    }
    if style.underline {
        put("underline", "single".to_string());
    }
    if style.strikethrough {
        put("strikethrough", "true".to_string());
    }
    if let Some(scale) = scale_value(style) {
        put("scale", scale.to_string());
    }
    if let Some(family) = &style.family {
        put("family", family.clone());
    }
    if let Some(justification) = style.justification {
        put("justification", justification.as_str().to_string());
    }
    if style.indent > 0 {
        put("indent", style.indent.to_string());
    }
    if let Some(link) = &style.link {
        put("link", format_link(link));
    }
    attributes
}

fn scale_value(style: &Style) -> Option<&'static str> {
    match (style.script, style.size) {
        (Some(Script::Superscript), _) => Some("sup"),
        (Some(Script::Subscript), _) => Some("sub"),
        (None, Some(size)) => Some(match size {
            SizeClass::H1 => "h1",
            SizeClass::H2 => "h2",
            SizeClass::H3 => "h3",
            SizeClass::H4 => "h4",
            SizeClass::H5 => "h5",
            SizeClass::H6 => "h6",
            SizeClass::Small => "small",
        }),
        (None, None) => None,
    }
}

/// Parse a persisted link value
///
/// `node 12`, `node 12 anchor name`, `file <enc>`, `fold <enc>`, `webs <url>`.
pub fn parse_link(value: &str) -> Option<LinkTarget> {
    let (kind, rest) = value.split_once(' ')?;
    match kind {
        "node" => {
            let mut parts = rest.splitn(2, ' ');
            let id = parts.next()?.trim().parse::<i64>().ok()?;
            let anchor = parts
                .next()
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(str::to_string);
            Some(LinkTarget::Node { id, anchor })
        }
        "file" => Some(LinkTarget::File {
            path: rest.to_string(),
        }),
        "fold" | "folder" => Some(LinkTarget::Folder {
            path: rest.to_string(),
        }),
        "webs" => Some(LinkTarget::Web {
            url: rest.to_string(),
        }),
        _ => None,
    }
}

pub fn format_link(link: &LinkTarget) -> String {
    match link {
        LinkTarget::Node { id, anchor: None } => format!("node {id}"),
        LinkTarget::Node {
            id,
            anchor: Some(anchor),
        } => format!("node {id} {anchor}"),
        LinkTarget::File { path } => format!("file {path}"),
        LinkTarget::Folder { path } => format!("fold {path}"),
        LinkTarget::Web { url } => format!("webs {url}"),
    }
}

/// Colors written as `#rrrrggggbbbb` are reduced to `#rrggbb`
pub fn normalize_color(value: &str) -> String {
    let hex = value.trim_start_matches('#');
    if hex.len() == 12 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return format!("#{}{}{}", &hex[0..2], &hex[4..6], &hex[8..10]).to_lowercase();
    }
    value.to_string()
}
