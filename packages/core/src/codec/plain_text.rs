//! Plain-Text Linearization
//!
//! Renders embedded objects as inline text, used when a node changes kind and
//! when plain text is needed for search-style consumers:
//!
//! - code block and formula: their text framed by a separator line on both sides
//! - table: a newline, then one `|cell|cell|` line per row, header first
//! - anchor and image: nothing
//! - attachment: `[filename]` (only when a whole model is rendered to text)

use crate::models::{
    BrokenKind, BrokenObject, CodeBlock, ContentBlock, ContentModel, NodeKind, Style,
};

/// Separator line framing code blocks and formulas
pub const SEPARATOR: &str = "---------------------------------";

/// Render the whole model as plain text
pub fn render(model: &ContentModel) -> String {
    let mut out = String::new();
    for block in &model.blocks {
        render_block(block, &mut out);
    }
    out
}

/// Render a code node's model: code block text is taken verbatim
pub fn render_code_node(model: &ContentModel) -> String {
    let mut out = String::new();
    for block in &model.blocks {
        match block {
            ContentBlock::CodeBlock(code) => out.push_str(&code.text),
            other => render_block(other, &mut out),
        }
    }
    out
}

fn render_block(block: &ContentBlock, out: &mut String) {
    match block {
        ContentBlock::StyledText { runs } => {
            for run in runs {
                out.push_str(&run.text);
            }
        }
        ContentBlock::CodeBlock(code) => framed(&code.text, out),
        ContentBlock::Formula(formula) => framed(&formula.source, out),
        ContentBlock::Table(table) => {
            out.push('\n');
            for row in &table.rows {
                out.push('|');
                for cell in row {
                    out.push_str(cell);
                    out.push('|');
                }
                out.push('\n');
            }
        }
        ContentBlock::Attachment(attachment) => {
            out.push('[');
            out.push_str(&attachment.filename);
            out.push(']');
        }
        ContentBlock::Broken(broken) => {
            if let BrokenKind::Attachment { filename, .. } = &broken.kind {
                out.push('[');
                out.push_str(filename);
                out.push(']');
            }
        }
        ContentBlock::Anchor(_) | ContentBlock::Image(_) => {}
    }
}

fn framed(text: &str, out: &mut String) {
    out.push('\n');
    out.push_str(SEPARATOR);
    out.push('\n');
    out.push_str(text);
    out.push('\n');
    out.push_str(SEPARATOR);
    out.push('\n');
}

/// Unstyled copy of `model` with every object except attachments rendered as text
///
/// This is the content a plain-text node can hold: default-style text plus
/// out-of-line attachments.
pub fn flatten_keeping_attachments(model: &ContentModel) -> ContentModel {
    let mut flat = ContentModel::new();
    for block in &model.blocks {
        match block {
            ContentBlock::Attachment(_)
            | ContentBlock::Broken(BrokenObject {
                kind: BrokenKind::Attachment { .. },
                ..
            }) => flat.push(block.clone()),
            other => {
                let mut text = String::new();
                render_block(other, &mut text);
                flat.push_text(&text, Style::default());
            }
        }
    }
    flat
}

/// Convert content between node kinds
///
/// - to rich text: code text becomes one default-style run, other content is kept
/// - to plain text: styles dropped, objects linearized, attachments kept
/// - to code: everything linearized into a single code block
pub fn convert_for_kind(model: &ContentModel, from: &NodeKind, to: &NodeKind) -> ContentModel {
    let source = if from.is_code() {
        ContentModel::from_plain_text(&render_code_node(model))
    } else {
        model.clone()
    };
    match to {
        NodeKind::RichText => source,
        NodeKind::PlainText => flatten_keeping_attachments(&source),
        NodeKind::Code(language) => ContentModel {
            blocks: vec![ContentBlock::CodeBlock(CodeBlock::new(
                render(&source),
                language.clone(),
            ))],
        },
    }
}
