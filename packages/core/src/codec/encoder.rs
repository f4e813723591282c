//! Encoder
//!
//! Turns a [`ContentModel`] back into [`NodeRecords`]:
//!
//! 1. Text runs are merged into maximal equal-style spans and mapped to
//!    persisted attributes; their characters count towards the text length.
//!    Objects do not break a span, since they are stored out of line.
//! 2. Every embedded block, tables included, is diverted to the offset-object
//!    list at the current text length.
//! 3. Diverted objects are walked in order; each gets the persisted offset
//!    `text_length + objects_emitted_so_far`. Consecutive code blocks with the
//!    same computed offset and identical parameters are coalesced, and any
//!    other object flushes a pending code block first.
//!
//! The encoder is pure. The set of storage keys the new records still
//! reference comes back with the records so the backend can delete orphans.

use std::collections::BTreeSet;

use chrono::Utc;

use crate::codec::offset::ExtraOffsetCounter;
use crate::codec::plain_text::{flatten_keeping_attachments, render_code_node};
use crate::codec::records::{
    AttachmentRecord, CodeBoxRecord, FragmentBody, ImageRecord, NodeRecords, OffsetFragment,
    Payload, TableRecord, TextFragment,
};
use crate::codec::style_map::style_to_attributes;
use crate::models::{BrokenKind, CodeBlock, ContentBlock, ContentModel, NodeKind, Style, Table};

/// Records to persist plus the storage keys they still reference
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodedContent {
    pub records: NodeRecords,
    pub referenced_keys: BTreeSet<String>,
}

/// Encode `model` for a node of `kind`
///
/// New attachments without a timestamp are stamped with the current time.
pub fn encode(kind: &NodeKind, model: &ContentModel) -> EncodedContent {
    encode_at(kind, model, Utc::now().timestamp())
}

/// Encode with an explicit "now" for attachment timestamps
pub fn encode_at(kind: &NodeKind, model: &ContentModel, now: i64) -> EncodedContent {
    match kind {
        NodeKind::RichText => encode_stream(model, now),
        NodeKind::PlainText => encode_stream(&flatten_keeping_attachments(model), now),
        NodeKind::Code(_) => {
            let text = render_code_node(model);
            let mut records = NodeRecords::default();
            if !text.is_empty() {
                records.text.push(TextFragment::plain(text));
            }
            EncodedContent {
                records,
                referenced_keys: BTreeSet::new(),
            }
        }
    }
}

#[derive(Default)]
struct SpanBuilder<'a> {
    current: Option<(String, &'a Style)>,
    fragments: Vec<TextFragment>,
}

impl<'a> SpanBuilder<'a> {
    fn push(&mut self, text: &str, style: &'a Style) {
        if text.is_empty() {
            return;
        }
        if let Some((span, span_style)) = &mut self.current {
            if *span_style == style {
                span.push_str(text);
                return;
            }
        }
        self.flush();
        self.current = Some((text.to_string(), style));
    }

    fn flush(&mut self) {
        if let Some((text, style)) = self.current.take() {
            self.fragments.push(TextFragment {
                text,
                attributes: style_to_attributes(style),
            });
        }
    }

    fn finish(mut self) -> Vec<TextFragment> {
        self.flush();
        self.fragments
    }
}

fn encode_stream(model: &ContentModel, now: i64) -> EncodedContent {
    let mut spans = SpanBuilder::default();
    let mut diverted: Vec<(usize, &ContentBlock)> = Vec::new();
    let mut text_length = 0usize;

    for block in &model.blocks {
        match block {
            ContentBlock::StyledText { runs } => {
                for run in runs {
                    spans.push(&run.text, &run.style);
                    text_length += run.unit_len();
                }
            }
            embedded => diverted.push((text_length, embedded)),
        }
    }

    let mut referenced_keys = BTreeSet::new();
    let mut objects = Vec::with_capacity(diverted.len());
    let mut counter = ExtraOffsetCounter::default();
    let mut pending_code: Option<(usize, CodeBlock)> = None;

    for (position, block) in diverted {
        if let ContentBlock::CodeBlock(code) = block {
            let offset = counter.persisted_offset(position);
            if let Some((pending_offset, pending)) = &mut pending_code {
                if *pending_offset == offset && pending.can_merge_with(code) {
                    pending.text.push_str(&code.text);
                    continue;
                }
            }
            flush_code(&mut pending_code, &mut objects, &mut counter);
            pending_code = Some((counter.persisted_offset(position), code.clone()));
            continue;
        }

        flush_code(&mut pending_code, &mut objects, &mut counter);
        if let Some(fragment) = object_fragment(
            block,
            counter.persisted_offset(position),
            now,
            &mut referenced_keys,
        ) {
            objects.push(fragment);
            counter.emitted();
        }
    }
    flush_code(&mut pending_code, &mut objects, &mut counter);

    EncodedContent {
        records: NodeRecords {
            text: spans.finish(),
            objects,
        },
        referenced_keys,
    }
}

fn flush_code(
    pending: &mut Option<(usize, CodeBlock)>,
    objects: &mut Vec<OffsetFragment>,
    counter: &mut ExtraOffsetCounter,
) {
    if let Some((offset, code)) = pending.take() {
        objects.push(OffsetFragment {
            offset,
            justification: code.justification,
            body: FragmentBody::CodeBox(CodeBoxRecord {
                text: code.text,
                syntax: code.language,
                width: code.width,
                height: code.height,
                width_in_pixels: code.width_in_pixels,
                highlight_brackets: code.highlight_brackets,
                show_line_numbers: code.show_line_numbers,
            }),
        });
        counter.emitted();
    }
}

fn object_fragment(
    block: &ContentBlock,
    offset: usize,
    now: i64,
    referenced_keys: &mut BTreeSet<String>,
) -> Option<OffsetFragment> {
    let (justification, body) = match block {
        ContentBlock::StyledText { .. } | ContentBlock::CodeBlock(_) => return None,
        ContentBlock::Anchor(anchor) => (
            anchor.justification,
            FragmentBody::Anchor {
                name: anchor.name.clone(),
            },
        ),
        ContentBlock::Formula(formula) => (
            formula.justification,
            FragmentBody::Formula {
                source: formula.source.clone(),
            },
        ),
        ContentBlock::Table(table) => (table.justification, FragmentBody::Table(table_record(table))),
        ContentBlock::Image(image) => (
            image.justification,
            FragmentBody::Image(ImageRecord {
                payload: payload(image.key.as_deref(), &image.data, referenced_keys),
                link: image.link.clone(),
            }),
        ),
        ContentBlock::Attachment(attachment) => (
            attachment.justification,
            FragmentBody::Attachment(AttachmentRecord {
                filename: attachment.filename.clone(),
                time: if attachment.timestamp == 0 {
                    now
                } else {
                    attachment.timestamp
                },
                payload: payload(attachment.key.as_deref(), &attachment.data, referenced_keys),
            }),
        ),
        ContentBlock::Broken(broken) => {
            referenced_keys.insert(broken.key.clone());
            let retained = Payload::Stored {
                key: broken.key.clone(),
                bytes: None,
                size: broken.size,
            };
            let body = match &broken.kind {
                BrokenKind::Image { link } => FragmentBody::Image(ImageRecord {
                    payload: retained,
                    link: link.clone(),
                }),
                BrokenKind::Attachment {
                    filename,
                    timestamp,
                } => FragmentBody::Attachment(AttachmentRecord {
                    filename: filename.clone(),
                    time: *timestamp,
                    payload: retained,
                }),
            };
            (broken.justification, body)
        }
    };
    Some(OffsetFragment {
        offset,
        justification,
        body,
    })
}

fn payload(key: Option<&str>, data: &[u8], referenced_keys: &mut BTreeSet<String>) -> Payload {
    match key {
        Some(key) => {
            referenced_keys.insert(key.to_string());
            Payload::stored(key, data.to_vec())
        }
        None => Payload::New(data.to_vec()),
    }
}

/// Header moves from first to last position
fn table_record(table: &Table) -> TableRecord {
    let mut rows = table.rows.clone();
    if !rows.is_empty() {
        let header = rows.remove(0);
        rows.push(header);
    }
    TableRecord {
        rows,
        col_min: table.col_min,
        col_max: table.col_max,
        col_widths: table.col_widths.clone(),
        is_light: table.is_light,
    }
}
