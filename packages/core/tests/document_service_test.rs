//! Document Service Tests
//!
//! Every scenario runs against all three backends: the same content must
//! come back unchanged after a save and a fresh open, whichever physical
//! representation holds it.

#[cfg(test)]
mod document_service_tests {
    use std::path::{Path, PathBuf};

    use anyhow::Result;
    use cherrynote_core::codec::CodecWarning;
    use cherrynote_core::config::CherryConfig;
    use cherrynote_core::db::{BackendKind, DocumentEvent};
    use cherrynote_core::models::{
        Anchor, Attachment, BrokenKind, CodeBlock, ContentBlock, ContentModel, Formula, Image,
        Justification, LinkTarget, NodeId, NodeKind, NodeUpdate, Style, Table,
    };
    use cherrynote_core::services::{CreateNodeParams, DocumentService, ServiceError};
    use tempfile::TempDir;
    use tokio::time::{timeout, Duration};

    const BACKENDS: [BackendKind; 3] = [
        BackendKind::Xml,
        BackendKind::Sqlite,
        BackendKind::MultiFile,
    ];

    fn document_path(dir: &Path, kind: BackendKind) -> PathBuf {
        match kind {
            BackendKind::Xml => dir.join("notes.ctd"),
            BackendKind::Sqlite => dir.join("notes.ctb"),
            BackendKind::MultiFile => dir.join("notes"),
        }
    }

    /// Helper to create an empty document of `kind`
    async fn create_document(
        kind: BackendKind,
        config: CherryConfig,
    ) -> Result<(DocumentService, PathBuf, TempDir)> {
        let temp_dir = TempDir::new()?;
        let path = document_path(temp_dir.path(), kind);
        let service = DocumentService::create(&path, kind, config).await?;
        Ok((service, path, temp_dir))
    }

    async fn add_node(
        service: &DocumentService,
        name: &str,
        kind: NodeKind,
        parent: Option<NodeId>,
    ) -> Result<NodeId> {
        let mut params = CreateNodeParams::new(name, kind);
        params.parent = parent;
        Ok(service.create_node(params).await?.id)
    }

    /// Storage keys are assigned by the backend; compare content without them
    fn without_keys(model: &ContentModel) -> ContentModel {
        let mut stripped = model.clone();
        for block in &mut stripped.blocks {
            match block {
                ContentBlock::Image(image) => image.key = None,
                ContentBlock::Attachment(attachment) => attachment.key = None,
                _ => {}
            }
        }
        stripped
    }

    fn rich_sample() -> ContentModel {
        let mut model = ContentModel::new();
        model.push_text("Title\n", Style::bold());
        model.push_text("plain ", Style::default());
        model.push(ContentBlock::Anchor(Anchor {
            name: "top".to_string(),
            justification: Justification::Left,
        }));
        model.push_text(
            " link",
            Style::with_link(LinkTarget::Web {
                url: "https://example.com/a?b=1&c=2".to_string(),
            }),
        );
        model.push(ContentBlock::CodeBlock(CodeBlock::new(
            "fn main() {\n    println!(\"<hi>\");\n}\n",
            "rust",
        )));
        model.push_text("\nbefore table\n", Style::default());
        model.push(ContentBlock::Table(Table::new(vec![
            vec!["name".to_string(), "qty".to_string()],
            vec!["apples".to_string(), "3".to_string()],
            vec!["pears".to_string(), String::new()],
        ])));
        model.push_text("after table ", Style::default());
        model.push(ContentBlock::Image(Image::new(vec![137, 80, 78, 71, 13, 10])));
        model.push(ContentBlock::Attachment(Attachment {
            filename: "notes.txt".to_string(),
            timestamp: 1_700_000_000,
            data: b"attached bytes".to_vec(),
            key: None,
            justification: Justification::Center,
        }));
        model.push(ContentBlock::Formula(Formula {
            source: "e^{i\\pi} + 1 = 0".to_string(),
            justification: Justification::Right,
        }));
        model.push_text("end ✓", Style::default());
        model
    }

    #[tokio::test]
    async fn test_rich_content_survives_reopen() -> Result<()> {
        for kind in BACKENDS {
            let (service, path, _temp_dir) = create_document(kind, CherryConfig::default()).await?;
            let id = add_node(&service, "Rich", NodeKind::RichText, None).await?;

            let model = rich_sample();
            service.save_content(id, &model).await?;

            let reopened = DocumentService::open(&path, CherryConfig::default()).await?;
            assert_eq!(reopened.backend_kind(), kind);
            let loaded = reopened.load_content(id).await?.expect("node content");
            assert!(loaded.warnings.is_empty(), "{kind}: {:?}", loaded.warnings);
            assert_eq!(without_keys(&loaded.model), model, "{kind}");

            // Saving what was loaded is a no-op for the stored payloads
            let keys_before = reopened.store().stored_blob_keys(id).await?;
            reopened.save_content(id, &loaded.model).await?;
            assert_eq!(reopened.store().stored_blob_keys(id).await?, keys_before, "{kind}");
            assert_eq!(keys_before.len(), 2, "{kind}");
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_orphaned_blobs_are_removed() -> Result<()> {
        for kind in BACKENDS {
            let (service, _path, _temp_dir) = create_document(kind, CherryConfig::default()).await?;
            let id = add_node(&service, "Images", NodeKind::RichText, None).await?;

            let mut model = ContentModel::new();
            model.push_text("pic: ", Style::default());
            model.push(ContentBlock::Image(Image::new(vec![1, 2, 3, 4])));
            model.push(ContentBlock::Image(Image::new(vec![5, 6, 7, 8])));
            service.save_content(id, &model).await?;
            assert_eq!(service.store().stored_blob_keys(id).await?.len(), 2, "{kind}");

            // Drop the first image, keep the second as loaded
            let mut loaded = service.load_content(id).await?.expect("content").model;
            loaded.blocks.remove(1);
            service.save_content(id, &loaded).await?;

            let keys = service.store().stored_blob_keys(id).await?;
            assert_eq!(keys.len(), 1, "{kind}");
            let key = keys.iter().next().expect("one key");
            assert_eq!(
                service.read_blob(id, key).await?,
                Some(vec![5, 6, 7, 8]),
                "{kind}"
            );
        }
        Ok(())
    }

    fn images(model: &ContentModel) -> Vec<&Image> {
        model
            .blocks
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Image(image) => Some(image),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_repeated_stored_image_keeps_every_copy() -> Result<()> {
        for kind in BACKENDS {
            let (service, path, _temp_dir) = create_document(kind, CherryConfig::default()).await?;
            let id = add_node(&service, "Repeat", NodeKind::RichText, None).await?;

            let mut model = ContentModel::new();
            model.push_text("x", Style::default());
            model.push(ContentBlock::Image(Image::new(vec![1, 2, 3, 4])));
            service.save_content(id, &model).await?;

            // Paste the loaded image again: both blocks carry the same key
            let mut loaded = service.load_content(id).await?.expect("content").model;
            let copy = loaded.blocks[1].clone();
            assert!(copy.blob_key().is_some(), "{kind}");
            loaded.push_text("y", Style::default());
            loaded.push(copy);
            service.save_content(id, &loaded).await?;

            let reopened = DocumentService::open(&path, CherryConfig::default()).await?;
            let twice = reopened.load_content(id).await?.expect("content").model;
            let found = images(&twice);
            assert_eq!(found.len(), 2, "{kind}");
            assert!(found.iter().all(|image| image.data == vec![1, 2, 3, 4]), "{kind}");
            assert_eq!(twice.to_plain_text(), "xy", "{kind}");

            // Dropping one copy leaves the other intact
            let mut once = twice.clone();
            once.blocks.pop();
            reopened.save_content(id, &once).await?;
            let reloaded = DocumentService::open(&path, CherryConfig::default())
                .await?
                .load_content(id)
                .await?
                .expect("content")
                .model;
            let found = images(&reloaded);
            assert_eq!(found.len(), 1, "{kind}");
            assert_eq!(found[0].data, vec![1, 2, 3, 4], "{kind}");
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_removing_one_attachment_keeps_the_others() -> Result<()> {
        for kind in BACKENDS {
            let (service, path, _temp_dir) = create_document(kind, CherryConfig::default()).await?;
            let id = add_node(&service, "Files", NodeKind::RichText, None).await?;

            let mut model = ContentModel::new();
            for (name, data) in [("a.txt", "alpha"), ("b.txt", "bravo"), ("c.txt", "charlie")] {
                model.push_text(name, Style::default());
                model.push(ContentBlock::Attachment(Attachment::new(
                    name,
                    data.as_bytes().to_vec(),
                )));
            }
            service.save_content(id, &model).await?;
            assert_eq!(service.store().stored_blob_keys(id).await?.len(), 3, "{kind}");

            let mut loaded = service.load_content(id).await?.expect("content").model;
            let removed = loaded
                .blocks
                .iter()
                .position(|block| {
                    matches!(block, ContentBlock::Attachment(a) if a.filename == "b.txt")
                })
                .expect("b.txt attachment");
            let removed_key = loaded.blocks[removed]
                .blob_key()
                .expect("stored key")
                .to_string();
            loaded.blocks.remove(removed);
            loaded.normalize();
            service.save_content(id, &loaded).await?;

            let keys = service.store().stored_blob_keys(id).await?;
            assert_eq!(keys.len(), 2, "{kind}");
            assert!(!keys.contains(&removed_key), "{kind}");
            let mut kept = Vec::new();
            for key in &keys {
                kept.push(service.read_blob(id, key).await?.expect("kept blob"));
            }
            kept.sort();
            assert_eq!(kept, vec![b"alpha".to_vec(), b"charlie".to_vec()], "{kind}");

            let reopened = DocumentService::open(&path, CherryConfig::default()).await?;
            let names: Vec<String> = reopened
                .load_content(id)
                .await?
                .expect("content")
                .model
                .blocks
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::Attachment(a) => Some(a.filename.clone()),
                    _ => None,
                })
                .collect();
            assert_eq!(names, vec!["a.txt", "c.txt"], "{kind}");
        }
        Ok(())
    }

    /// Damage the stored form of node `id` in a way each backend can only
    /// partly read
    async fn corrupt_node(kind: BackendKind, path: &Path, id: NodeId) -> Result<()> {
        match kind {
            BackendKind::Xml => {
                let xml = tokio::fs::read_to_string(path).await?;
                assert!(xml.contains(">AQID<"));
                tokio::fs::write(path, xml.replace(">AQID<", ">A!ID<")).await?;
            }
            BackendKind::Sqlite => {
                let db = libsql::Builder::new_local(path).build().await?;
                let conn = db.connect()?;
                conn.execute(
                    "UPDATE node SET txt = '<node><rich_text>cut off' WHERE node_id = ?1",
                    [id],
                )
                .await?;
            }
            BackendKind::MultiFile => {
                tokio::fs::write(
                    path.join(id.to_string()).join("node.xml"),
                    r#"<cherrytree><node name="A""#,
                )
                .await?;
            }
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_malformed_node_is_reported_as_warning() -> Result<()> {
        for kind in BACKENDS {
            let (service, path, _temp_dir) = create_document(kind, CherryConfig::default()).await?;
            let damaged = add_node(&service, "A", NodeKind::RichText, None).await?;
            let intact = add_node(&service, "B", NodeKind::RichText, None).await?;

            let mut model = ContentModel::new();
            model.push_text("before ", Style::bold());
            model.push(ContentBlock::Image(Image::new(vec![1, 2, 3])));
            model.push_text(" after", Style::default());
            service.save_content(damaged, &model).await?;
            service
                .save_content(intact, &ContentModel::from_plain_text("still here"))
                .await?;
            drop(service);

            corrupt_node(kind, &path, damaged).await?;

            // The document still opens and the other node is untouched
            let reopened = DocumentService::open(&path, CherryConfig::default()).await?;
            assert_eq!(reopened.tree().await.roots(), &[damaged, intact], "{kind}");
            let fine = reopened.load_content(intact).await?.expect("intact content");
            assert!(fine.warnings.is_empty(), "{kind}");
            assert_eq!(fine.model, ContentModel::from_plain_text("still here"), "{kind}");

            let mut rx = reopened.subscribe_to_events();
            let partial = reopened.load_content(damaged).await?.expect("partial content");
            assert!(
                partial
                    .warnings
                    .iter()
                    .any(|w| matches!(w, CodecWarning::MalformedFragment { .. })),
                "{kind}: {:?}",
                partial.warnings
            );

            let event = timeout(Duration::from_secs(1), rx.recv()).await??;
            match event {
                DocumentEvent::Warning { node_id, warning } => {
                    assert_eq!(node_id, damaged, "{kind}");
                    assert!(
                        matches!(warning, CodecWarning::MalformedFragment { .. }),
                        "{kind}"
                    );
                }
                other => panic!("{kind}: expected a warning event, got {:?}", other),
            }
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_rich_to_plain_and_back() -> Result<()> {
        for kind in BACKENDS {
            let (service, path, _temp_dir) = create_document(kind, CherryConfig::default()).await?;
            let id = add_node(&service, "Hello", NodeKind::RichText, None).await?;

            let mut model = ContentModel::new();
            model.push_text("hel", Style::bold());
            model.push_text("lo", Style::default());
            service.save_content(id, &model).await?;

            service.change_kind(id, NodeKind::PlainText).await?;
            let plain = service.load_content(id).await?.expect("content").model;
            assert_eq!(plain, ContentModel::from_plain_text("hello"), "{kind}");

            service.change_kind(id, NodeKind::RichText).await?;
            let reopened = DocumentService::open(&path, CherryConfig::default()).await?;
            assert_eq!(reopened.get_node(id).await.expect("node").kind, NodeKind::RichText);
            let rich = reopened.load_content(id).await?.expect("content").model;
            assert_eq!(rich, ContentModel::from_plain_text("hello"), "{kind}");
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_attachment_linearized_when_converting_to_code() -> Result<()> {
        for kind in BACKENDS {
            let (service, _path, _temp_dir) = create_document(kind, CherryConfig::default()).await?;
            let id = add_node(&service, "Mixed", NodeKind::RichText, None).await?;

            let mut model = ContentModel::new();
            model.push_text("AB", Style::default());
            model.push(ContentBlock::Attachment(Attachment::new(
                "f.txt",
                b"payload".to_vec(),
            )));
            model.push_text("CD", Style::default());
            service.save_content(id, &model).await?;

            // Plain text keeps the attachment as an object
            service.change_kind(id, NodeKind::PlainText).await?;
            assert_eq!(service.store().stored_blob_keys(id).await?.len(), 1, "{kind}");
            assert_eq!(
                service.node_plain_text(id).await?.as_deref(),
                Some("AB[f.txt]CD"),
                "{kind}"
            );

            // Code nodes hold text only; the attachment becomes an orphan
            service
                .change_kind(id, NodeKind::Code("sh".to_string()))
                .await?;
            assert_eq!(
                service.node_plain_text(id).await?.as_deref(),
                Some("AB[f.txt]CD"),
                "{kind}"
            );
            assert!(service.store().stored_blob_keys(id).await?.is_empty(), "{kind}");
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_promotes_first_alias() -> Result<()> {
        for kind in BACKENDS {
            let (service, path, _temp_dir) = create_document(kind, CherryConfig::default()).await?;
            let folder = add_node(&service, "Folder", NodeKind::RichText, None).await?;
            let owner = add_node(&service, "Owner", NodeKind::RichText, Some(folder)).await?;
            let other = add_node(&service, "Other", NodeKind::RichText, None).await?;

            let mut model = ContentModel::new();
            model.push_text("shared ", Style::bold());
            model.push(ContentBlock::Image(Image::new(vec![9, 9, 9])));
            service.save_content(owner, &model).await?;

            // One alias inside the deleted subtree, two outside
            let inner = service
                .create_node(CreateNodeParams::new("inner", NodeKind::RichText).under(owner).alias_of(owner))
                .await?
                .id;
            let first = service
                .create_node(CreateNodeParams::new("first", NodeKind::RichText).under(other).alias_of(owner))
                .await?
                .id;
            let second = service
                .create_node(CreateNodeParams::new("second", NodeKind::RichText).alias_of(owner))
                .await?
                .id;
            assert_eq!(
                without_keys(&service.load_content(first).await?.expect("alias content").model),
                model
            );

            let removed = service.delete_node(folder).await?;
            assert_eq!(removed, vec![folder, owner, inner], "{kind}");

            for service in [&service, &DocumentService::open(&path, CherryConfig::default()).await?] {
                let heir = service.get_node(first).await.expect("heir");
                assert_eq!(heir.master_id, None, "{kind}");
                let rest = service.get_node(second).await.expect("second alias");
                assert_eq!(rest.master_id, Some(first), "{kind}");
                assert!(service.get_node(owner).await.is_none(), "{kind}");

                let content = service.load_content(second).await?.expect("content");
                assert_eq!(without_keys(&content.model), model, "{kind}");
            }
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_move_under_descendant_is_refused() -> Result<()> {
        for kind in BACKENDS {
            let (service, path, _temp_dir) = create_document(kind, CherryConfig::default()).await?;
            let a = add_node(&service, "a", NodeKind::RichText, None).await?;
            let b = add_node(&service, "b", NodeKind::RichText, Some(a)).await?;
            let c = add_node(&service, "c", NodeKind::PlainText, Some(b)).await?;

            let result = service.move_node(a, Some(c), None).await;
            assert!(
                matches!(result, Err(ServiceError::StructuralViolation(_))),
                "{kind}: {result:?}"
            );
            assert!(matches!(
                service.move_node(a, Some(a), None).await,
                Err(ServiceError::StructuralViolation(_))
            ));

            // A legal move: c to the top level, first position
            service.move_node(c, None, Some(0)).await?;

            let reopened = DocumentService::open(&path, CherryConfig::default()).await?;
            let tree = reopened.tree().await;
            assert_eq!(tree.roots(), &[c, a], "{kind}");
            assert_eq!(tree.children(Some(a)), &[b], "{kind}");
            assert!(tree.children(Some(b)).is_empty(), "{kind}");
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_oversized_payload_is_broken_but_kept() -> Result<()> {
        let config = CherryConfig {
            max_blob_bytes: 8,
            ..Default::default()
        };
        for kind in BACKENDS {
            let (service, path, _temp_dir) = create_document(kind, config.clone()).await?;
            let id = add_node(&service, "Big", NodeKind::RichText, None).await?;

            let big = vec![7u8; 64];
            let mut model = ContentModel::new();
            model.push_text("x", Style::default());
            model.push(ContentBlock::Image(Image::new(big.clone())));
            service.save_content(id, &model).await?;

            let reopened = DocumentService::open(&path, config.clone()).await?;
            let loaded = reopened.load_content(id).await?.expect("content");
            let ContentBlock::Broken(broken) = &loaded.model.blocks[1] else {
                panic!("{kind}: expected a broken placeholder, got {:?}", loaded.model);
            };
            assert!(matches!(broken.kind, BrokenKind::Image { .. }));
            assert_eq!(broken.size, Some(64), "{kind}");
            assert!(loaded
                .warnings
                .iter()
                .any(|w| matches!(w, CodecWarning::OversizedPayload { size: 64, .. })));

            // Edit the text around the placeholder and save: the blob stays
            let key = broken.key.clone();
            let mut edited = ContentModel::new();
            edited.push_text("xy", Style::default());
            edited.push(loaded.model.blocks[1].clone());
            reopened.save_content(id, &edited).await?;
            assert_eq!(reopened.read_blob(id, &key).await?, Some(big.clone()), "{kind}");
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_node_metadata_round_trip() -> Result<()> {
        for kind in BACKENDS {
            let (service, path, _temp_dir) = create_document(kind, CherryConfig::default()).await?;
            let id = add_node(&service, "Meta", NodeKind::Code("python".to_string()), None).await?;

            let update = NodeUpdate {
                name: Some("Renamed <node> & \"quotes\"".to_string()),
                read_only: Some(true),
                is_bold: Some(true),
                foreground: Some(Some("#12ab34".to_string())),
                custom_icon_id: Some(17),
                exclude_children_from_search: Some(true),
                tags: Some("alpha beta".to_string()),
                ..Default::default()
            };
            let updated = service.update_node(id, update).await?;

            let reopened = DocumentService::open(&path, CherryConfig::default()).await?;
            let node = reopened.get_node(id).await.expect("node");
            assert_eq!(node.name, updated.name, "{kind}");
            assert_eq!(node.kind, NodeKind::Code("python".to_string()), "{kind}");
            assert!(node.read_only && node.is_bold, "{kind}");
            assert_eq!(node.foreground.as_deref(), Some("#12ab34"), "{kind}");
            assert_eq!(node.custom_icon_id, 17, "{kind}");
            assert!(!node.exclude_from_search, "{kind}");
            assert!(node.exclude_children_from_search, "{kind}");
            assert_eq!(node.tags, "alpha beta", "{kind}");
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_deleting_nodes_drops_their_bookmarks() -> Result<()> {
        for kind in BACKENDS {
            let (service, path, _temp_dir) = create_document(kind, CherryConfig::default()).await?;
            let a = add_node(&service, "a", NodeKind::RichText, None).await?;
            let b = add_node(&service, "b", NodeKind::RichText, Some(a)).await?;
            let c = add_node(&service, "c", NodeKind::RichText, None).await?;

            service.add_bookmark(b).await?;
            service.add_bookmark(c).await?;
            service.add_bookmark(c).await?;
            assert_eq!(service.bookmarks().await, vec![b, c], "{kind}");

            service.delete_node(a).await?;
            assert_eq!(service.bookmarks().await, vec![c], "{kind}");

            let reopened = DocumentService::open(&path, CherryConfig::default()).await?;
            assert_eq!(reopened.bookmarks().await, vec![c], "{kind}");

            reopened.remove_bookmark(c).await?;
            assert!(reopened.bookmarks().await.is_empty(), "{kind}");
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_events_follow_persisted_changes() -> Result<()> {
        let (service, _path, _temp_dir) =
            create_document(BackendKind::Sqlite, CherryConfig::default()).await?;
        let mut rx = service.subscribe_to_events();

        let id = add_node(&service, "evented", NodeKind::RichText, None).await?;
        let event = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("Event should be emitted within 1 second")
            .expect("Should receive event");
        match event {
            DocumentEvent::NodeCreated(node) => assert_eq!(node.id, id),
            other => panic!("Expected NodeCreated event, got {:?}", other),
        }

        service
            .save_content(id, &ContentModel::from_plain_text("hi"))
            .await?;
        let event = timeout(Duration::from_secs(1), rx.recv()).await??;
        assert!(matches!(event, DocumentEvent::ContentSaved { id: saved } if saved == id));

        // Failed operations emit nothing
        assert!(service.move_node(id, Some(id), None).await.is_err());
        assert!(rx.try_recv().is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_nodes() -> Result<()> {
        let (service, _path, _temp_dir) =
            create_document(BackendKind::Xml, CherryConfig::default()).await?;
        assert!(service.load_content(42).await?.is_none());
        assert!(service.node_plain_text(42).await?.is_none());
        assert!(matches!(
            service.save_content(42, &ContentModel::new()).await,
            Err(ServiceError::NodeNotFound(42))
        ));
        assert!(matches!(
            service.delete_node(42).await,
            Err(ServiceError::NodeNotFound(42))
        ));
        Ok(())
    }
}
