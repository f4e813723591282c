//! Decoder/encoder behaviour on hand-built records and models

use crate::codec::plain_text::render;
use crate::codec::records::{
    AttachmentRecord, CodeBoxRecord, FragmentBody, ImageRecord, NodeRecords, OffsetFragment,
    Payload, TableRecord, TextFragment,
};
use crate::codec::{decode, encode_at, CodecWarning};
use crate::models::{
    Anchor, Attachment, BrokenKind, BrokenObject, CodeBlock, ContentBlock, ContentModel, Formula,
    Image, Justification, LinkTarget, NodeKind, SizeClass, Style, Table, TextRun,
};

const NOW: i64 = 1_700_000_000;

fn anchor(name: &str) -> ContentBlock {
    ContentBlock::Anchor(Anchor {
        name: name.to_string(),
        justification: Justification::Left,
    })
}

fn at(offset: usize, body: FragmentBody) -> OffsetFragment {
    OffsetFragment {
        offset,
        justification: Justification::Left,
        body,
    }
}

fn codebox(text: &str) -> FragmentBody {
    FragmentBody::CodeBox(CodeBoxRecord {
        text: text.to_string(),
        syntax: "rust".to_string(),
        width: CodeBlock::DEFAULT_WIDTH,
        height: CodeBlock::DEFAULT_HEIGHT,
        width_in_pixels: true,
        highlight_brackets: true,
        show_line_numbers: false,
    })
}

fn rows(cells: &[&[&str]]) -> Vec<Vec<String>> {
    cells
        .iter()
        .map(|row| row.iter().map(|c| c.to_string()).collect())
        .collect()
}

fn table_body(storage_rows: &[&[&str]]) -> FragmentBody {
    FragmentBody::Table(TableRecord {
        rows: rows(storage_rows),
        col_min: Table::DEFAULT_COL_MIN,
        col_max: Table::DEFAULT_COL_MAX,
        col_widths: "0,0".to_string(),
        is_light: false,
    })
}

fn round_trip(kind: &NodeKind, model: &ContentModel) -> ContentModel {
    let encoded = encode_at(kind, model, NOW);
    let decoded = decode(kind, &encoded.records);
    assert!(decoded.warnings.is_empty(), "{:?}", decoded.warnings);
    decoded.model
}

#[test]
fn test_objects_are_spliced_at_their_offsets() {
    let records = NodeRecords {
        text: vec![TextFragment::plain("ABCD")],
        objects: vec![
            at(5, FragmentBody::Anchor { name: "end".to_string() }),
            at(2, FragmentBody::Anchor { name: "mid".to_string() }),
        ],
    };
    let decoded = decode(&NodeKind::RichText, &records);

    assert_eq!(
        decoded.model.blocks,
        vec![
            ContentBlock::text(vec![TextRun::plain("AB")]),
            anchor("mid"),
            ContentBlock::text(vec![TextRun::plain("CD")]),
            anchor("end"),
        ]
    );
    assert!(decoded.warnings.is_empty());
}

#[test]
fn test_offsets_count_characters_not_bytes() {
    let records = NodeRecords {
        text: vec![TextFragment::plain("héllo")],
        objects: vec![at(2, FragmentBody::Anchor { name: "a".to_string() })],
    };
    let decoded = decode(&NodeKind::RichText, &records);
    assert_eq!(decoded.model.blocks[0], ContentBlock::text(vec![TextRun::plain("hé")]));
    assert_eq!(decoded.model.blocks[2], ContentBlock::text(vec![TextRun::plain("llo")]));
}

#[test]
fn test_tables_split_the_stream_and_shift_later_offsets() {
    // Persisted stream: A B <table> C D <anchor>
    let records = NodeRecords {
        text: vec![TextFragment::plain("ABCD")],
        objects: vec![
            at(2, table_body(&[&["a", "b"], &["h1", "h2"]])),
            at(5, FragmentBody::Anchor { name: "x".to_string() }),
        ],
    };
    let decoded = decode(&NodeKind::RichText, &records);

    assert_eq!(decoded.model.blocks.len(), 4);
    assert_eq!(decoded.model.blocks[0], ContentBlock::text(vec![TextRun::plain("AB")]));
    match &decoded.model.blocks[1] {
        ContentBlock::Table(table) => assert_eq!(table.rows, rows(&[&["h1", "h2"], &["a", "b"]])),
        other => panic!("Expected table, got {:?}", other),
    }
    assert_eq!(decoded.model.blocks[2], ContentBlock::text(vec![TextRun::plain("CD")]));
    assert_eq!(decoded.model.blocks[3], anchor("x"));

    let encoded = encode_at(&NodeKind::RichText, &decoded.model, NOW);
    assert_eq!(encoded.records, records);
}

#[test]
fn test_table_header_rotates_on_decode_and_encode() {
    let records = NodeRecords {
        text: vec![],
        objects: vec![at(0, table_body(&[&["r1"], &["r2"], &["header"]]))],
    };
    let decoded = decode(&NodeKind::RichText, &records);
    let ContentBlock::Table(table) = &decoded.model.blocks[0] else {
        panic!("Expected table");
    };
    assert_eq!(table.rows, rows(&[&["header"], &["r1"], &["r2"]]));

    let model = ContentModel {
        blocks: vec![ContentBlock::Table(Table::new(rows(&[
            &["header"],
            &["r1"],
            &["r2"],
        ])))],
    };
    let encoded = encode_at(&NodeKind::RichText, &model, NOW);
    let FragmentBody::Table(record) = &encoded.records.objects[0].body else {
        panic!("Expected table record");
    };
    assert_eq!(record.rows, rows(&[&["r1"], &["r2"], &["header"]]));
}

#[test]
fn test_code_fragments_at_same_offset_merge() {
    let records = NodeRecords {
        text: vec![TextFragment::plain("XY")],
        objects: vec![at(2, codebox("ab")), at(2, codebox("cd"))],
    };
    let decoded = decode(&NodeKind::RichText, &records);

    assert_eq!(decoded.model.blocks.len(), 2);
    let ContentBlock::CodeBlock(code) = &decoded.model.blocks[1] else {
        panic!("Expected code block");
    };
    assert_eq!(code.text, "abcd");

    // Re-encoding never splits the block again
    let encoded = encode_at(&NodeKind::RichText, &decoded.model, NOW);
    assert_eq!(encoded.records.objects, vec![at(2, codebox("abcd"))]);
    assert_eq!(decode(&NodeKind::RichText, &encoded.records).model, decoded.model);
}

#[test]
fn test_encoder_coalesces_adjacent_identical_code_blocks() {
    let model = ContentModel {
        blocks: vec![
            ContentBlock::CodeBlock(CodeBlock::new("ab", "rust")),
            ContentBlock::CodeBlock(CodeBlock::new("cd", "rust")),
            anchor("after"),
        ],
    };
    let encoded = encode_at(&NodeKind::RichText, &model, NOW);
    assert_eq!(
        encoded.records.objects,
        vec![
            at(0, codebox("abcd")),
            at(1, FragmentBody::Anchor { name: "after".to_string() }),
        ]
    );
}

#[test]
fn test_code_blocks_with_different_parameters_stay_apart() {
    let mut python = CodeBlock::new("print()", "python");
    python.show_line_numbers = true;
    let model = ContentModel {
        blocks: vec![
            ContentBlock::CodeBlock(CodeBlock::new("let x;", "rust")),
            ContentBlock::CodeBlock(python),
        ],
    };
    let encoded = encode_at(&NodeKind::RichText, &model, NOW);
    let offsets: Vec<usize> = encoded.records.objects.iter().map(|o| o.offset).collect();
    assert_eq!(offsets, vec![0, 1]);
    assert_eq!(round_trip(&NodeKind::RichText, &model), model);
}

#[test]
fn test_out_of_range_offsets_are_clamped() {
    let records = NodeRecords {
        text: vec![TextFragment::plain("ab")],
        objects: vec![at(50, FragmentBody::Anchor { name: "far".to_string() })],
    };
    let decoded = decode(&NodeKind::RichText, &records);
    assert_eq!(decoded.model.blocks.last(), Some(&anchor("far")));
    assert_eq!(
        decoded.warnings,
        vec![CodecWarning::OffsetOutOfRange {
            offset: 50,
            stream_len: 2
        }]
    );
}

#[test]
fn test_unmaterialized_payload_becomes_broken_and_is_retained() {
    let records = NodeRecords {
        text: vec![TextFragment::plain("x")],
        objects: vec![at(
            1,
            FragmentBody::Image(ImageRecord {
                payload: Payload::Stored {
                    key: "42".to_string(),
                    bytes: None,
                    size: Some(9_000_000),
                },
                link: String::new(),
            }),
        )],
    };
    let decoded = decode(&NodeKind::RichText, &records);
    assert_eq!(
        decoded.model.blocks[1],
        ContentBlock::Broken(BrokenObject {
            kind: BrokenKind::Image {
                link: String::new()
            },
            key: "42".to_string(),
            size: Some(9_000_000),
            justification: Justification::Left,
        })
    );
    assert_eq!(
        decoded.warnings,
        vec![CodecWarning::OversizedPayload {
            key: "42".to_string(),
            size: 9_000_000
        }]
    );

    let encoded = encode_at(&NodeKind::RichText, &decoded.model, NOW);
    assert_eq!(encoded.records, records);
    assert!(encoded.referenced_keys.contains("42"));
}

#[test]
fn test_rich_model_round_trips() {
    let mut attachment = Attachment::new("notes.pdf", vec![1, 2, 3]);
    attachment.key = Some("abc".to_string());
    attachment.timestamp = 1_600_000_000;
    let heading = Style {
        size: Some(SizeClass::H1),
        justification: Some(Justification::Center),
        ..Default::default()
    };
    let link = Style::with_link(LinkTarget::Web {
        url: "https://example.org".to_string(),
    });

    let mut model = ContentModel::new();
    model.push_text("Title\n", heading);
    model.push_text("see ", Style::default());
    model.push_text("here", link);
    model.push(anchor("top"));
    model.push_text(" and ", Style::bold());
    model.push(ContentBlock::Attachment(attachment));
    model.push(ContentBlock::Image(Image::new(vec![0x89, 0x50])));
    model.push(ContentBlock::Table(Table::new(rows(&[&["k", "v"], &["a", "1"]]))));
    model.push(ContentBlock::Formula(Formula {
        source: "x^2".to_string(),
        justification: Justification::Right,
    }));
    model.push_text("tail", Style::default());
    model.push(ContentBlock::CodeBlock(CodeBlock::new("fn f() {}", "rust")));

    assert_eq!(round_trip(&NodeKind::RichText, &model), model);
}

#[test]
fn test_referenced_keys_cover_stored_payloads_only() {
    let mut stored = Image::new(vec![1]);
    stored.key = Some("k1".to_string());
    let model = ContentModel {
        blocks: vec![
            ContentBlock::Image(stored),
            ContentBlock::Image(Image::new(vec![2])),
        ],
    };
    let encoded = encode_at(&NodeKind::RichText, &model, NOW);
    assert_eq!(encoded.referenced_keys.len(), 1);
    assert!(encoded.referenced_keys.contains("k1"));
    assert_eq!(
        encoded.records.objects[1].body.payload(),
        Some(&Payload::New(vec![2]))
    );
}

#[test]
fn test_new_attachments_are_stamped() {
    let mut attachment = Attachment::new("f.txt", b"x".to_vec());
    attachment.timestamp = 0;
    let model = ContentModel {
        blocks: vec![ContentBlock::Attachment(attachment)],
    };
    let encoded = encode_at(&NodeKind::RichText, &model, NOW);
    let FragmentBody::Attachment(AttachmentRecord { time, .. }) = &encoded.records.objects[0].body
    else {
        panic!("Expected attachment");
    };
    assert_eq!(*time, NOW);
}

#[test]
fn test_plain_node_ignores_attributes() {
    let records = NodeRecords {
        text: vec![TextFragment {
            text: "plain".to_string(),
            attributes: vec![("weight".to_string(), "heavy".to_string())],
        }],
        objects: vec![],
    };
    let decoded = decode(&NodeKind::PlainText, &records);
    assert_eq!(decoded.model, ContentModel::from_plain_text("plain"));
}

#[test]
fn test_code_node_is_one_block() {
    let records = NodeRecords {
        text: vec![TextFragment::plain("a = 1\n"), TextFragment::plain("b = 2\n")],
        objects: vec![],
    };
    let kind = NodeKind::Code("python".to_string());
    let decoded = decode(&kind, &records);
    assert_eq!(
        decoded.model.blocks,
        vec![ContentBlock::CodeBlock(CodeBlock::new("a = 1\nb = 2\n", "python"))]
    );
    assert_eq!(round_trip(&kind, &decoded.model), decoded.model);
}

#[test]
fn test_rich_to_plain_keeps_attachment_between_text() {
    let mut model = ContentModel::new();
    model.push_text("A", Style::bold());
    model.push_text("B", Style::default());
    model.push(ContentBlock::Attachment(Attachment::new("f.txt", b"data".to_vec())));
    model.push_text("CD", Style::default());

    let encoded = encode_at(&NodeKind::PlainText, &model, NOW);
    assert_eq!(encoded.records.text, vec![TextFragment::plain("ABCD")]);
    assert_eq!(encoded.records.objects.len(), 1);
    assert_eq!(encoded.records.objects[0].offset, 2);

    let decoded = decode(&NodeKind::PlainText, &encoded.records);
    assert_eq!(render(&decoded.model), "AB[f.txt]CD");
}

#[test]
fn test_code_node_drops_embedded_objects() {
    let mut attachment = Attachment::new("f.txt", b"data".to_vec());
    attachment.key = Some("k".to_string());
    let model = ContentModel {
        blocks: vec![
            ContentBlock::CodeBlock(CodeBlock::new("x", "sh")),
            ContentBlock::Attachment(attachment),
        ],
    };
    let encoded = encode_at(&NodeKind::Code("sh".to_string()), &model, NOW);
    assert!(encoded.records.objects.is_empty());
    assert!(encoded.referenced_keys.is_empty());
    assert_eq!(encoded.records.joined_text(), "x[f.txt]");
}
