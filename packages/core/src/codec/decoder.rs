//! Decoder
//!
//! Turns a node's [`NodeRecords`] into a [`ContentModel`]. The algorithm is
//! the same for every backend:
//!
//! 1. A code node becomes a single code block holding all fragment text.
//! 2. Otherwise the text fragments are walked in storage order, appending to
//!    the stream. Rich-text fragments are styled through the style mapper;
//!    plain-text fragments use the default style.
//! 3. Out-of-line fragments are sorted by persisted offset; consecutive code
//!    fragments at the same offset are concatenated first. Each fragment is
//!    spliced in when the stream reaches its resolved insert position.
//! 4. Tables split the stream: the text before becomes its own block and the
//!    stream continues in a new block after the table.
//! 5. Table rows are rotated from header-last to header-first.
//! 6. Payloads that storage did not materialize become broken sentinels.
//!
//! Decoding never fails; recoverable problems are returned as warnings.

use std::collections::{BTreeSet, VecDeque};

use crate::codec::offset::OffsetResolver;
use crate::codec::records::{FragmentBody, NodeRecords, OffsetFragment, Payload};
use crate::codec::style_map::style_from_attributes;
use crate::codec::warnings::CodecWarning;
use crate::models::{
    Anchor, Attachment, BrokenKind, BrokenObject, CodeBlock, ContentBlock, ContentModel, Formula,
    Image, NodeKind, Style, Table,
};

/// Result of decoding one node
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedContent {
    pub model: ContentModel,
    pub warnings: Vec<CodecWarning>,
}

pub fn decode(kind: &NodeKind, records: &NodeRecords) -> DecodedContent {
    match kind {
        NodeKind::Code(language) => decode_code_node(language, records),
        NodeKind::RichText => decode_stream(records, true),
        NodeKind::PlainText => decode_stream(records, false),
    }
}

fn decode_code_node(language: &str, records: &NodeRecords) -> DecodedContent {
    let mut warnings = Vec::new();
    if !records.objects.is_empty() {
        warnings.push(CodecWarning::MalformedFragment {
            context: format!(
                "{} embedded objects in a code node ignored",
                records.objects.len()
            ),
        });
    }
    let code = CodeBlock::new(records.joined_text(), language);
    DecodedContent {
        model: ContentModel {
            blocks: vec![ContentBlock::CodeBlock(code)],
        },
        warnings,
    }
}

fn decode_stream(records: &NodeRecords, rich: bool) -> DecodedContent {
    let mut warnings = Vec::new();
    let mut unknown = BTreeSet::new();
    let mut pending: VecDeque<OffsetFragment> = merge_code_fragments(&records.objects).into();
    let mut resolver = OffsetResolver::new();
    let mut model = ContentModel::new();
    let mut position = 0usize;

    for fragment in &records.text {
        let style = if rich {
            style_from_attributes(&fragment.attributes, &mut unknown, &mut warnings)
        } else {
            Style::default()
        };

        let mut run = String::new();
        for ch in fragment.text.chars() {
            while pending
                .front()
                .is_some_and(|next| resolver.insert_position(next.offset) <= position)
            {
                model.push_text(&run, style.clone());
                run.clear();
                if let Some(object) = pending.pop_front() {
                    splice(object, &mut model, &mut resolver, &mut position, &mut warnings);
                }
            }
            run.push(ch);
            position += 1;
        }
        model.push_text(&run, style);
    }

    while let Some(object) = pending.pop_front() {
        if resolver.insert_position(object.offset) > position {
            warnings.push(CodecWarning::OffsetOutOfRange {
                offset: object.offset,
                stream_len: position,
            });
        }
        splice(object, &mut model, &mut resolver, &mut position, &mut warnings);
    }

    DecodedContent { model, warnings }
}

/// Sort by offset and concatenate code fragments sharing an offset
fn merge_code_fragments(objects: &[OffsetFragment]) -> Vec<OffsetFragment> {
    let mut sorted = objects.to_vec();
    sorted.sort_by_key(|o| o.offset);

    let mut merged: Vec<OffsetFragment> = Vec::with_capacity(sorted.len());
    for object in sorted {
        if let Some(prev) = merged.last_mut() {
            if prev.offset == object.offset {
                if let (FragmentBody::CodeBox(prev_code), FragmentBody::CodeBox(code)) =
                    (&mut prev.body, &object.body)
                {
                    prev_code.text.push_str(&code.text);
                    continue;
                }
            }
        }
        merged.push(object);
    }
    merged
}

fn splice(
    object: OffsetFragment,
    model: &mut ContentModel,
    resolver: &mut OffsetResolver,
    position: &mut usize,
    warnings: &mut Vec<CodecWarning>,
) {
    match block_from_fragment(object, warnings) {
        table @ ContentBlock::Table(_) => {
            model.push(table);
            resolver.split();
        }
        block => {
            model.push(block);
            resolver.spliced(1);
            *position += 1;
        }
    }
}

fn block_from_fragment(object: OffsetFragment, warnings: &mut Vec<CodecWarning>) -> ContentBlock {
    let justification = object.justification;
    match object.body {
        FragmentBody::CodeBox(code) => ContentBlock::CodeBlock(CodeBlock {
            text: code.text,
            language: code.syntax,
            width: code.width,
            height: code.height,
            width_in_pixels: code.width_in_pixels,
            highlight_brackets: code.highlight_brackets,
            show_line_numbers: code.show_line_numbers,
            justification,
        }),
        FragmentBody::Table(table) => {
            let mut rows = table.rows;
            if let Some(header) = rows.pop() {
                rows.insert(0, header);
            }
            ContentBlock::Table(Table {
                rows,
                col_min: table.col_min,
                col_max: table.col_max,
                col_widths: table.col_widths,
                is_light: table.is_light,
                justification,
            })
        }
        FragmentBody::Image(image) => match materialize(image.payload, warnings) {
            Ok((data, key)) => ContentBlock::Image(Image {
                data,
                key,
                link: image.link,
                justification,
            }),
            Err((key, size)) => ContentBlock::Broken(BrokenObject {
                kind: BrokenKind::Image { link: image.link },
                key,
                size,
                justification,
            }),
        },
        FragmentBody::Attachment(attachment) => match materialize(attachment.payload, warnings) {
            Ok((data, key)) => ContentBlock::Attachment(Attachment {
                filename: attachment.filename,
                timestamp: attachment.time,
                data,
                key,
                justification,
            }),
            Err((key, size)) => ContentBlock::Broken(BrokenObject {
                kind: BrokenKind::Attachment {
                    filename: attachment.filename,
                    timestamp: attachment.time,
                },
                key,
                size,
                justification,
            }),
        },
        FragmentBody::Anchor { name } => ContentBlock::Anchor(Anchor {
            name,
            justification,
        }),
        FragmentBody::Formula { source } => ContentBlock::Formula(Formula {
            source,
            justification,
        }),
    }
}

type Materialized = Result<(Vec<u8>, Option<String>), (String, Option<u64>)>;

/// Payload bytes and key, or the key and size of a payload left in storage
fn materialize(payload: Payload, warnings: &mut Vec<CodecWarning>) -> Materialized {
    match payload {
        Payload::Stored {
            key,
            bytes: Some(bytes),
            ..
        } => Ok((bytes, Some(key))),
        Payload::Stored {
            key,
            bytes: None,
            size,
        } => {
            warnings.push(match size {
                Some(size) => CodecWarning::OversizedPayload {
                    key: key.clone(),
                    size,
                },
                None => CodecWarning::MissingBlob { key: key.clone() },
            });
            Err((key, size))
        }
        Payload::New(bytes) => Ok((bytes, None)),
    }
}
