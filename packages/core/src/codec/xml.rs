//! Shared XML Vocabulary
//!
//! Readers and writers for the element vocabulary all three backends share:
//! the `node` element and its attributes, `rich_text`, `codebox`, `table`
//! and `encoded_png` children, the SQLite `txt` rich-text document and the
//! SQLite `grid` table document.
//!
//! `encoded_png` is discriminated as follows:
//!
//! - `anchor` attribute present: anchor
//! - `filename="__ct_special.tex"`: formula, content is the base64 source
//! - any other `filename`: attachment
//! - otherwise: image
//!
//! Parsing uses `roxmltree`; writing builds a string with `html-escape`.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use roxmltree::Node as XmlNode;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::codec::records::{
    AttachmentRecord, CodeBoxRecord, FragmentBody, ImageRecord, NodeRecords, OffsetFragment,
    Payload, TableRecord, TextFragment, FORMULA_FILENAME,
};
use crate::codec::warnings::CodecWarning;
use crate::models::{
    timestamp_from_secs, timestamp_from_str, CodeBlock, Justification, Node, NodeId, NodeKind,
    Table,
};

#[derive(Error, Debug)]
pub enum XmlError {
    #[error("XML parse error: {0}")]
    Parse(#[from] roxmltree::Error),

    #[error("Element <{element}> is missing attribute '{attribute}'")]
    MissingAttribute {
        element: String,
        attribute: String,
    },

    #[error("Attribute '{attribute}' has invalid value '{value}'")]
    InvalidAttribute { attribute: String, value: String },

    #[error("Expected root element <{expected}>, found <{found}>")]
    UnexpectedRoot { expected: String, found: String },

    #[error("Payload '{0}' has no bytes to write")]
    UnresolvedPayload(String),
}

/// Where `encoded_png` payload bytes live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadEncoding {
    /// Base64 element content; the key is the SHA-256 of the bytes
    Inline,
    /// A sibling file named by the `sha256sum` attribute; the key is the file name
    Sha256File,
}

/// Lowercase hex SHA-256 of `bytes`
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

/// File name of a blob stored next to `node.xml`
///
/// Images are stored as `png`; attachments keep their own extension.
pub fn blob_file_name(sha256: &str, attachment_name: Option<&str>) -> String {
    let ext = match attachment_name {
        None => "png",
        Some(name) => name
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or("bin"),
    };
    format!("{sha256}.{ext}")
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

fn required<'a>(el: XmlNode<'a, '_>, name: &str) -> Result<&'a str, XmlError> {
    el.attribute(name).ok_or_else(|| XmlError::MissingAttribute {
        element: el.tag_name().name().to_string(),
        attribute: name.to_string(),
    })
}

fn flag(el: XmlNode<'_, '_>, name: &str) -> bool {
    matches!(el.attribute(name), Some("1" | "true" | "True"))
}

fn number<T: std::str::FromStr>(el: XmlNode<'_, '_>, name: &str, default: T) -> T {
    el.attribute(name)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// All text directly inside an element
pub fn element_text(el: XmlNode<'_, '_>) -> String {
    el.children()
        .filter(|child| child.is_text())
        .filter_map(|child| child.text())
        .collect()
}

/// Read the attributes of a `node` element
///
/// `id` overrides `unique_id`; multi-file `node.xml` fragments take their id
/// from the directory name.
pub fn read_node_attributes(el: XmlNode<'_, '_>, id: Option<NodeId>) -> Result<Node, XmlError> {
    let id = match id {
        Some(id) => id,
        None => {
            let raw = required(el, "unique_id")?;
            raw.trim()
                .parse::<NodeId>()
                .map_err(|_| XmlError::InvalidAttribute {
                    attribute: "unique_id".to_string(),
                    value: raw.to_string(),
                })?
        }
    };

    let kind = NodeKind::from_syntax(el.attribute("prog_lang").unwrap_or_default());
    let mut node = Node::new(id, el.attribute("name").unwrap_or_default(), kind);
    node.master_id = Some(number(el, "master_id", 0)).filter(|&m: &NodeId| m > 0);
    node.exclude_from_search = flag(el, "nosearch_me");
    node.exclude_children_from_search = flag(el, "nosearch_ch");
    node.is_bold = flag(el, "is_bold");
    node.read_only = flag(el, "readonly");
    node.foreground = el
        .attribute("foreground")
        .filter(|c| !c.is_empty())
        .map(str::to_string);
    node.custom_icon_id = number(el, "custom_icon_id", 0);
    node.tags = el.attribute("tags").unwrap_or_default().to_string();
    node.created_at = timestamp_from_str(el.attribute("ts_creation").unwrap_or("0"));
    node.modified_at = timestamp_from_str(el.attribute("ts_lastsave").unwrap_or("0"));
    Ok(node)
}

/// Read the content children of a `node` element
///
/// Child `node` elements are skipped; unknown elements and undecodable
/// payloads are reported as warnings.
pub fn read_node_content(
    el: XmlNode<'_, '_>,
    encoding: PayloadEncoding,
    warnings: &mut Vec<CodecWarning>,
) -> NodeRecords {
    let mut records = NodeRecords::default();
    for child in el.children().filter(XmlNode::is_element) {
        let tag = child.tag_name().name();
        if tag == "rich_text" {
            records.text.push(TextFragment {
                text: element_text(child),
                attributes: child
                    .attributes()
                    .map(|a| (a.name().to_string(), a.value().to_string()))
                    .collect(),
            });
            continue;
        }
        if tag == "node" {
            continue;
        }

        let body = match tag {
            "codebox" => Some(FragmentBody::CodeBox(read_codebox(child))),
            "table" => Some(FragmentBody::Table(read_table(child))),
            "encoded_png" => read_encoded_png(child, encoding, warnings),
            other => {
                warnings.push(CodecWarning::MalformedFragment {
                    context: format!("unknown element <{other}>"),
                });
                None
            }
        };
        let Some(body) = body else {
            continue;
        };

        let offset = match child.attribute("char_offset").map(|v| v.trim().parse()) {
            Some(Ok(offset)) => offset,
            _ => {
                warnings.push(CodecWarning::MalformedFragment {
                    context: format!("<{tag}> without a valid char_offset"),
                });
                0
            }
        };
        records.objects.push(OffsetFragment {
            offset,
            justification: read_justification(child),
            body,
        });
    }
    records
}

fn read_justification(el: XmlNode<'_, '_>) -> Justification {
    el.attribute("justification")
        .and_then(Justification::parse)
        .unwrap_or_default()
}

fn read_codebox(el: XmlNode<'_, '_>) -> CodeBoxRecord {
    CodeBoxRecord {
        text: element_text(el),
        syntax: el
            .attribute("syntax_highlighting")
            .unwrap_or(crate::models::PLAIN_TEXT_SYNTAX)
            .to_string(),
        width: number(el, "frame_width", CodeBlock::DEFAULT_WIDTH),
        height: number(el, "frame_height", CodeBlock::DEFAULT_HEIGHT),
        width_in_pixels: flag(el, "width_in_pixels"),
        highlight_brackets: flag(el, "highlight_brackets"),
        show_line_numbers: flag(el, "show_line_numbers"),
    }
}

fn read_rows(el: XmlNode<'_, '_>) -> Vec<Vec<String>> {
    el.children()
        .filter(|row| row.has_tag_name("row"))
        .map(|row| {
            row.children()
                .filter(|cell| cell.has_tag_name("cell"))
                .map(element_text)
                .collect()
        })
        .collect()
}

fn read_table(el: XmlNode<'_, '_>) -> TableRecord {
    TableRecord {
        rows: read_rows(el),
        col_min: number(el, "col_min", Table::DEFAULT_COL_MIN),
        col_max: number(el, "col_max", Table::DEFAULT_COL_MAX),
        col_widths: el.attribute("col_widths").unwrap_or_default().to_string(),
        is_light: flag(el, "is_light"),
    }
}

fn read_encoded_png(
    el: XmlNode<'_, '_>,
    encoding: PayloadEncoding,
    warnings: &mut Vec<CodecWarning>,
) -> Option<FragmentBody> {
    if let Some(name) = el.attribute("anchor") {
        return Some(FragmentBody::Anchor {
            name: name.to_string(),
        });
    }

    let filename = el.attribute("filename").filter(|f| !f.is_empty());
    if filename == Some(FORMULA_FILENAME) {
        let bytes = decode_base64(el, warnings)?;
        return Some(FragmentBody::Formula {
            source: String::from_utf8_lossy(&bytes).into_owned(),
        });
    }

    let payload = match encoding {
        PayloadEncoding::Inline => {
            let bytes = decode_base64(el, warnings)?;
            Payload::stored(sha256_hex(&bytes), bytes)
        }
        PayloadEncoding::Sha256File => match el.attribute("sha256sum") {
            Some(sha) => Payload::Stored {
                key: blob_file_name(sha, filename),
                bytes: None,
                size: None,
            },
            None => {
                warnings.push(CodecWarning::MalformedFragment {
                    context: "<encoded_png> without sha256sum".to_string(),
                });
                return None;
            }
        },
    };

    Some(match filename {
        Some(filename) => FragmentBody::Attachment(AttachmentRecord {
            filename: filename.to_string(),
            time: number::<f64>(el, "time", 0.0) as i64,
            payload,
        }),
        None => FragmentBody::Image(ImageRecord {
            payload,
            link: el.attribute("link").unwrap_or_default().to_string(),
        }),
    })
}

fn decode_base64(el: XmlNode<'_, '_>, warnings: &mut Vec<CodecWarning>) -> Option<Vec<u8>> {
    let text: String = element_text(el)
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    match STANDARD.decode(text.as_bytes()) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            warnings.push(CodecWarning::MalformedFragment {
                context: format!("<encoded_png> payload is not base64: {e}"),
            });
            None
        }
    }
}

/// Parse the SQLite `node.txt` rich-text document
pub fn read_rich_text_document(xml: &str) -> Result<Vec<TextFragment>, XmlError> {
    let doc = roxmltree::Document::parse(xml)?;
    let root = doc.root_element();
    Ok(root
        .children()
        .filter(|child| child.has_tag_name("rich_text"))
        .map(|child| TextFragment {
            text: element_text(child),
            attributes: child
                .attributes()
                .map(|a| (a.name().to_string(), a.value().to_string()))
                .collect(),
        })
        .collect())
}

/// Parse the SQLite `grid.txt` table document
pub fn read_grid_document(xml: &str, col_min: u32, col_max: u32) -> Result<TableRecord, XmlError> {
    let doc = roxmltree::Document::parse(xml)?;
    let root = doc.root_element();
    if !root.has_tag_name("table") {
        return Err(XmlError::UnexpectedRoot {
            expected: "table".to_string(),
            found: root.tag_name().name().to_string(),
        });
    }
    Ok(TableRecord {
        rows: read_rows(root),
        col_min,
        col_max,
        col_widths: root.attribute("col_widths").unwrap_or_default().to_string(),
        is_light: flag(root, "is_light"),
    })
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Escape a value for a double-quoted attribute
///
/// Newlines, tabs and carriage returns are written as character references so
/// that attribute-value normalization does not fold them into spaces.
pub fn escape_attribute(value: &str) -> String {
    html_escape::encode_double_quoted_attribute(value)
        .replace('\n', "&#10;")
        .replace('\r', "&#13;")
        .replace('\t', "&#9;")
}

pub fn escape_text(value: &str) -> String {
    html_escape::encode_text(value).replace('\r', "&#13;")
}

fn bool_attr(value: bool) -> String {
    if value { "1" } else { "0" }.to_string()
}

/// String-building XML writer
pub struct XmlWriter {
    out: String,
    pretty: bool,
    depth: usize,
}

impl XmlWriter {
    pub fn new(pretty: bool) -> Self {
        Self {
            out: String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"),
            pretty,
            depth: 0,
        }
    }

    fn indent(&mut self) {
        if self.pretty {
            self.out.push('\n');
            for _ in 0..self.depth {
                self.out.push_str("  ");
            }
        }
    }

    fn start_tag(&mut self, name: &str, attributes: &[(&str, String)]) {
        self.indent();
        self.out.push('<');
        self.out.push_str(name);
        for (key, value) in attributes {
            self.out.push(' ');
            self.out.push_str(key);
            self.out.push_str("=\"");
            self.out.push_str(&escape_attribute(value));
            self.out.push('"');
        }
    }

    pub fn open(&mut self, name: &str, attributes: &[(&str, String)]) {
        self.start_tag(name, attributes);
        self.out.push('>');
        self.depth += 1;
    }

    pub fn close(&mut self, name: &str) {
        self.depth = self.depth.saturating_sub(1);
        self.indent();
        self.out.push_str("</");
        self.out.push_str(name);
        self.out.push('>');
    }

    pub fn empty(&mut self, name: &str, attributes: &[(&str, String)]) {
        self.start_tag(name, attributes);
        self.out.push_str("/>");
    }

    /// Element with text content; the text itself is never reindented
    pub fn leaf(&mut self, name: &str, attributes: &[(&str, String)], text: &str) {
        if text.is_empty() {
            self.empty(name, attributes);
            return;
        }
        self.start_tag(name, attributes);
        self.out.push('>');
        self.out.push_str(&escape_text(text));
        self.out.push_str("</");
        self.out.push_str(name);
        self.out.push('>');
    }

    pub fn finish(mut self) -> String {
        if self.pretty {
            self.out.push('\n');
        }
        self.out
    }
}

/// Attributes of a `node` element; `unique_id` only when `with_id`
pub fn node_attributes(node: &Node, with_id: bool) -> Vec<(&'static str, String)> {
    let mut attributes = vec![("name", node.name.clone())];
    if with_id {
        attributes.push(("unique_id", node.id.to_string()));
    }
    attributes.extend([
        ("master_id", node.master_id.unwrap_or(0).to_string()),
        ("prog_lang", node.kind.syntax().to_string()),
        ("tags", node.tags.clone()),
        ("readonly", bool_attr(node.read_only)),
        ("nosearch_me", bool_attr(node.exclude_from_search)),
        ("nosearch_ch", bool_attr(node.exclude_children_from_search)),
        ("custom_icon_id", node.custom_icon_id.to_string()),
        ("is_bold", bool_attr(node.is_bold)),
        ("foreground", node.foreground.clone().unwrap_or_default()),
        ("ts_creation", node.created_at.timestamp().to_string()),
        ("ts_lastsave", node.modified_at.timestamp().to_string()),
    ]);
    attributes
}

/// Write the content children of a `node` element
pub fn write_node_content(
    w: &mut XmlWriter,
    records: &NodeRecords,
    encoding: PayloadEncoding,
) -> Result<(), XmlError> {
    for fragment in &records.text {
        let attributes: Vec<(&str, String)> = fragment
            .attributes
            .iter()
            .map(|(k, v)| (k.as_str(), v.clone()))
            .collect();
        w.leaf("rich_text", &attributes, &fragment.text);
    }

    for object in &records.objects {
        let mut attributes = vec![
            ("char_offset", object.offset.to_string()),
            ("justification", object.justification.as_str().to_string()),
        ];
        match &object.body {
            FragmentBody::CodeBox(code) => {
                attributes.extend([
                    ("frame_width", code.width.to_string()),
                    ("frame_height", code.height.to_string()),
                    ("width_in_pixels", bool_attr(code.width_in_pixels)),
                    ("syntax_highlighting", code.syntax.clone()),
                    ("highlight_brackets", bool_attr(code.highlight_brackets)),
                    ("show_line_numbers", bool_attr(code.show_line_numbers)),
                ]);
                w.leaf("codebox", &attributes, &code.text);
            }
            FragmentBody::Table(table) => {
                attributes.extend([
                    ("col_min", table.col_min.to_string()),
                    ("col_max", table.col_max.to_string()),
                    ("col_widths", table.col_widths.clone()),
                    ("is_light", bool_attr(table.is_light)),
                ]);
                w.open("table", &attributes);
                write_rows(w, &table.rows);
                w.close("table");
            }
            FragmentBody::Anchor { name } => {
                attributes.push(("anchor", name.clone()));
                w.empty("encoded_png", &attributes);
            }
            FragmentBody::Formula { source } => {
                attributes.push(("filename", FORMULA_FILENAME.to_string()));
                w.leaf("encoded_png", &attributes, &STANDARD.encode(source.as_bytes()));
            }
            FragmentBody::Image(image) => {
                attributes.push(("link", image.link.clone()));
                write_payload(w, attributes, &image.payload, encoding)?;
            }
            FragmentBody::Attachment(attachment) => {
                attributes.extend([
                    ("filename", attachment.filename.clone()),
                    ("time", attachment.time.to_string()),
                ]);
                write_payload(w, attributes, &attachment.payload, encoding)?;
            }
        }
    }
    Ok(())
}

fn write_payload(
    w: &mut XmlWriter,
    mut attributes: Vec<(&str, String)>,
    payload: &Payload,
    encoding: PayloadEncoding,
) -> Result<(), XmlError> {
    match encoding {
        PayloadEncoding::Inline => {
            let bytes = payload.bytes().ok_or_else(|| {
                XmlError::UnresolvedPayload(payload.key().unwrap_or_default().to_string())
            })?;
            w.leaf("encoded_png", &attributes, &STANDARD.encode(bytes));
        }
        PayloadEncoding::Sha256File => {
            let key = payload
                .key()
                .ok_or_else(|| XmlError::UnresolvedPayload("<new>".to_string()))?;
            let sha = key.split_once('.').map(|(sha, _)| sha).unwrap_or(key);
            attributes.push(("sha256sum", sha.to_string()));
            w.empty("encoded_png", &attributes);
        }
    }
    Ok(())
}

fn write_rows(w: &mut XmlWriter, rows: &[Vec<String>]) {
    for row in rows {
        w.open("row", &[]);
        for cell in row {
            w.leaf("cell", &[], cell);
        }
        w.close("row");
    }
}

/// SQLite `node.txt` document for a rich-text node
pub fn write_rich_text_document(fragments: &[TextFragment]) -> String {
    let mut w = XmlWriter::new(false);
    w.open("node", &[]);
    for fragment in fragments {
        let attributes: Vec<(&str, String)> = fragment
            .attributes
            .iter()
            .map(|(k, v)| (k.as_str(), v.clone()))
            .collect();
        w.leaf("rich_text", &attributes, &fragment.text);
    }
    w.close("node");
    w.finish()
}

/// SQLite `grid.txt` document; `col_min`/`col_max` live in their own columns
pub fn write_grid_document(table: &TableRecord) -> String {
    let mut w = XmlWriter::new(false);
    w.open(
        "table",
        &[
            ("col_widths", table.col_widths.clone()),
            ("is_light", bool_attr(table.is_light)),
        ],
    );
    write_rows(&mut w, &table.rows);
    w.close("table");
    w.finish()
}

/// Epoch seconds as stored in `ts_*` attributes and columns
pub fn epoch_seconds(value: i64) -> chrono::DateTime<chrono::Utc> {
    timestamp_from_secs(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_content(xml: &str, encoding: PayloadEncoding) -> (NodeRecords, Vec<CodecWarning>) {
        let doc = roxmltree::Document::parse(xml).unwrap();
        let mut warnings = Vec::new();
        let records = read_node_content(doc.root_element(), encoding, &mut warnings);
        (records, warnings)
    }

    #[test]
    fn test_encoded_png_discrimination() {
        let xml = r#"<node unique_id="1">
            <rich_text weight="heavy">Hi</rich_text>
            <encoded_png char_offset="0" anchor="top"/>
            <encoded_png char_offset="1" filename="__ct_special.tex">eF4y</encoded_png>
            <encoded_png char_offset="2" filename="a.txt" time="1700000000.5">aGk=</encoded_png>
            <encoded_png char_offset="3" justification="center" link="webs x">AAE=</encoded_png>
        </node>"#;
        let (records, warnings) = parse_content(xml, PayloadEncoding::Inline);
        assert!(warnings.is_empty(), "{warnings:?}");

        assert_eq!(records.text.len(), 1);
        assert_eq!(records.text[0].attribute("weight"), Some("heavy"));
        assert!(matches!(&records.objects[0].body, FragmentBody::Anchor { name } if name == "top"));
        assert!(
            matches!(&records.objects[1].body, FragmentBody::Formula { source } if source == "x^2")
        );
        match &records.objects[2].body {
            FragmentBody::Attachment(a) => {
                assert_eq!(a.filename, "a.txt");
                assert_eq!(a.time, 1_700_000_000);
                assert_eq!(a.payload.bytes(), Some(&b"hi"[..]));
                assert_eq!(a.payload.key(), Some(sha256_hex(b"hi").as_str()));
            }
            other => panic!("Expected attachment, got {:?}", other),
        }
        assert_eq!(records.objects[3].justification, Justification::Center);
        assert!(matches!(&records.objects[3].body, FragmentBody::Image(i) if i.link == "webs x"));
    }

    #[test]
    fn test_content_writer_output_parses_back() {
        let records = NodeRecords {
            text: vec![
                TextFragment {
                    text: "a < b & \"c\"\r\n".to_string(),
                    attributes: vec![("link".to_string(), "file L3Rt\ncA==".to_string())],
                },
                TextFragment::plain("  indented  "),
            ],
            objects: vec![
                OffsetFragment {
                    offset: 3,
                    justification: Justification::Fill,
                    body: FragmentBody::Table(TableRecord {
                        rows: vec![
                            vec!["1".to_string(), String::new()],
                            vec!["h".to_string(), "h2".to_string()],
                        ],
                        col_min: 10,
                        col_max: 90,
                        col_widths: "5,0".to_string(),
                        is_light: true,
                    }),
                },
                OffsetFragment {
                    offset: 4,
                    justification: Justification::Left,
                    body: FragmentBody::CodeBox(CodeBoxRecord {
                        text: "if a<b {}\n".to_string(),
                        syntax: "rust".to_string(),
                        width: 80,
                        height: 30,
                        width_in_pixels: false,
                        highlight_brackets: true,
                        show_line_numbers: true,
                    }),
                },
                OffsetFragment {
                    offset: 5,
                    justification: Justification::Right,
                    body: FragmentBody::Formula {
                        source: "\\frac{1}{2}".to_string(),
                    },
                },
            ],
        };

        for pretty in [false, true] {
            let mut w = XmlWriter::new(pretty);
            w.open("node", &[("unique_id", "1".to_string())]);
            write_node_content(&mut w, &records, PayloadEncoding::Inline).unwrap();
            w.close("node");
            let xml = w.finish();

            let (parsed, warnings) = parse_content(&xml, PayloadEncoding::Inline);
            assert!(warnings.is_empty());
            assert_eq!(parsed, records);
        }
    }

    #[test]
    fn test_sha256_file_payloads() {
        let xml = r#"<node>
            <encoded_png char_offset="0" sha256sum="abc"/>
            <encoded_png char_offset="1" filename="doc.pdf" time="5" sha256sum="def"/>
            <encoded_png char_offset="2"/>
        </node>"#;
        let (records, warnings) = parse_content(xml, PayloadEncoding::Sha256File);
        let keys: Vec<&str> = records.payload_keys().collect();
        assert_eq!(keys, vec!["abc.png", "def.pdf"]);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_node_attributes_round_trip() {
        let mut node = Node::new(12, "Name \"quoted\"", NodeKind::Code("python".to_string()));
        node.master_id = Some(3);
        node.read_only = true;
        node.exclude_children_from_search = true;
        node.foreground = Some("#aabbcc".to_string());
        node.custom_icon_id = 7;
        node.tags = "a b".to_string();
        node.created_at = epoch_seconds(100);
        node.modified_at = epoch_seconds(200);

        let mut w = XmlWriter::new(false);
        w.empty("node", &node_attributes(&node, true));
        let xml = w.finish();
        let doc = roxmltree::Document::parse(&xml).unwrap();
        let parsed = read_node_attributes(doc.root_element(), None).unwrap();
        assert_eq!(parsed, node);
    }

    #[test]
    fn test_missing_unique_id_is_an_error() {
        let doc = roxmltree::Document::parse(r#"<node name="x"/>"#).unwrap();
        assert!(matches!(
            read_node_attributes(doc.root_element(), None),
            Err(XmlError::MissingAttribute { .. })
        ));
        assert_eq!(read_node_attributes(doc.root_element(), Some(4)).unwrap().id, 4);
    }

    #[test]
    fn test_rich_text_and_grid_documents() {
        let fragments = vec![
            TextFragment {
                text: "bold".to_string(),
                attributes: vec![("weight".to_string(), "heavy".to_string())],
            },
            TextFragment::plain(" tail\n"),
        ];
        let xml = write_rich_text_document(&fragments);
        assert_eq!(read_rich_text_document(&xml).unwrap(), fragments);

        let table = TableRecord {
            rows: vec![vec!["r".to_string()], vec!["h".to_string()]],
            col_min: 1,
            col_max: 2,
            col_widths: "0".to_string(),
            is_light: false,
        };
        let xml = write_grid_document(&table);
        assert_eq!(read_grid_document(&xml, 1, 2).unwrap(), table);
    }

    #[test]
    fn test_blob_file_names() {
        assert_eq!(blob_file_name("ab", None), "ab.png");
        assert_eq!(blob_file_name("ab", Some("x.tar.gz")), "ab.gz");
        assert_eq!(blob_file_name("ab", Some("README")), "ab.bin");
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
