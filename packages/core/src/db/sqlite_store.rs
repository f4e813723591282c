//! SQLite Backend
//!
//! A `.ctb` document is a SQLite database with one row per node in `node`,
//! the hierarchy in `children`, embedded objects in `codebox`, `grid` and
//! `image`, and the bookmark list in `bookmark`.
//!
//! # Database Connection Pattern
//!
//! Every operation opens its own connection through `connect_with_timeout()`
//! so that futures can move between runtime threads; the 5-second busy
//! timeout lets concurrent operations wait instead of failing with
//! `SQLITE_BUSY`. Writers are additionally serialized by a mutex.
//!
//! # Packed Columns
//!
//! - `is_ro` = read_only | custom_icon_id << 1
//! - `is_richtxt` = rich | is_bold << 1 | has_foreground << 2 | rgb24 << 3
//! - `level` = nosearch_me | nosearch_ch << 1
//!
//! Image and attachment payload keys are `image` rowids.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use libsql::{params, Builder, Connection, Database};
use tokio::sync::Mutex;

use crate::codec::xml::{
    epoch_seconds, read_grid_document, read_rich_text_document, write_grid_document,
    write_rich_text_document,
};
use crate::codec::{
    AttachmentRecord, CodeBoxRecord, CodecWarning, FragmentBody, ImageRecord, NodeRecords,
    OffsetFragment, Payload, TextFragment, FORMULA_FILENAME,
};
use crate::config::CherryConfig;
use crate::db::error::StoreError;
use crate::db::store::{BackendKind, ContentWrite, DocumentStore, StoredContent};
use crate::db::tree::{NodeTree, Placement};
use crate::models::{Justification, Node, NodeId, NodeKind, Table};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS node (
        node_id INTEGER UNIQUE, name TEXT, txt TEXT, syntax TEXT, tags TEXT,
        is_ro INTEGER, is_richtxt INTEGER, has_codebox INTEGER, has_table INTEGER,
        has_image INTEGER, level INTEGER, ts_creation INTEGER, ts_lastsave INTEGER
    )",
    "CREATE TABLE IF NOT EXISTS codebox (
        node_id INTEGER, offset INTEGER, justification TEXT, txt TEXT, syntax TEXT,
        width INTEGER, height INTEGER, is_width_pix INTEGER, do_highl_bra INTEGER,
        do_show_linenum INTEGER
    )",
    "CREATE TABLE IF NOT EXISTS grid (
        node_id INTEGER, offset INTEGER, justification TEXT, txt TEXT,
        col_min INTEGER, col_max INTEGER
    )",
    "CREATE TABLE IF NOT EXISTS image (
        node_id INTEGER, offset INTEGER, justification TEXT, anchor TEXT, png BLOB,
        filename TEXT, link TEXT, time INTEGER
    )",
    "CREATE TABLE IF NOT EXISTS children (
        node_id INTEGER UNIQUE, father_id INTEGER, sequence INTEGER, master_id INTEGER
    )",
    "CREATE TABLE IF NOT EXISTS bookmark (node_id INTEGER UNIQUE, sequence INTEGER)",
];

/// Packed `(is_ro, is_richtxt, level)` columns of a node row
pub(crate) fn pack_flags(node: &Node) -> (i64, i64, i64) {
    let is_ro = i64::from(node.read_only) | (i64::from(node.custom_icon_id) << 1);

    let rgb = node.foreground.as_deref().and_then(parse_rgb24);
    let mut is_richtxt = i64::from(node.kind.is_rich_text()) | (i64::from(node.is_bold) << 1);
    if let Some(rgb) = rgb {
        is_richtxt |= 1 << 2;
        is_richtxt |= i64::from(rgb) << 3;
    }

    let level = i64::from(node.exclude_from_search)
        | (i64::from(node.exclude_children_from_search) << 1);
    (is_ro, is_richtxt, level)
}

/// Inverse of [`pack_flags`]; the rich bit is implied by the node kind
pub(crate) fn unpack_flags(node: &mut Node, is_ro: i64, is_richtxt: i64, level: i64) {
    node.read_only = is_ro & 1 == 1;
    node.custom_icon_id = u32::try_from(is_ro >> 1).unwrap_or(0);
    node.is_bold = (is_richtxt >> 1) & 1 == 1;
    node.foreground = ((is_richtxt >> 2) & 1 == 1)
        .then(|| format!("#{:06x}", (is_richtxt >> 3) & 0xff_ffff));
    node.exclude_from_search = level & 1 == 1;
    node.exclude_children_from_search = (level >> 1) & 1 == 1;
}

fn parse_rgb24(color: &str) -> Option<u32> {
    let hex = color.strip_prefix('#')?;
    match hex.len() {
        6 => u32::from_str_radix(hex, 16).ok(),
        // 16-bit channels; keep the high byte of each
        12 => {
            let channel = |i: usize| u32::from_str_radix(hex.get(i..i + 2)?, 16).ok();
            Some((channel(0)? << 16) | (channel(4)? << 8) | channel(8)?)
        }
        _ => None,
    }
}

/// One `image` row to insert
struct ImageRow<'a> {
    offset: i64,
    justification: &'a str,
    anchor: &'a str,
    png: Vec<u8>,
    filename: &'a str,
    link: &'a str,
    time: i64,
}

pub struct SqliteStore {
    db: Arc<Database>,
    path: PathBuf,
    config: CherryConfig,
    write_lock: Mutex<()>,
}

impl SqliteStore {
    /// Open an existing `.ctb` database
    pub async fn open(path: impl AsRef<Path>, config: CherryConfig) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(StoreError::io(
                &path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "document not found"),
            ));
        }
        Self::build(path, config).await
    }

    /// Create a new, empty `.ctb` database; fails if the file exists
    pub async fn create(path: impl AsRef<Path>, config: CherryConfig) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            return Err(StoreError::io(
                &path,
                std::io::Error::new(std::io::ErrorKind::AlreadyExists, "document exists"),
            ));
        }
        Self::build(path, config).await
    }

    async fn build(path: PathBuf, config: CherryConfig) -> Result<Self, StoreError> {
        let db = Builder::new_local(&path).build().await.map_err(|e| {
            StoreError::sql_execution(format!("Failed to open {}: {}", path.display(), e))
        })?;
        let store = Self {
            db: Arc::new(db),
            path,
            config,
            write_lock: Mutex::new(()),
        };
        store.initialize_schema().await?;
        tracing::info!("Opened SQLite document {}", store.path.display());
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn initialize_schema(&self) -> Result<(), StoreError> {
        let conn = self.connect_with_timeout().await?;
        for statement in SCHEMA {
            conn.execute(statement, ()).await.map_err(|e| {
                StoreError::sql_execution(format!("Failed to create schema: {}", e))
            })?;
        }
        Ok(())
    }

    /// Connection with a busy timeout; use in every async operation
    pub async fn connect_with_timeout(&self) -> Result<Connection, StoreError> {
        let conn = self.db.connect()?;
        let mut stmt = conn
            .prepare("PRAGMA busy_timeout = 5000")
            .await
            .map_err(|e| StoreError::sql_execution(format!("Failed to set busy timeout: {}", e)))?;
        let _ = stmt
            .query(())
            .await
            .map_err(|e| StoreError::sql_execution(format!("Failed to set busy timeout: {}", e)))?;
        Ok(conn)
    }

    async fn begin(conn: &Connection) -> Result<(), StoreError> {
        conn.execute("BEGIN TRANSACTION", ()).await.map_err(|e| {
            StoreError::sql_execution(format!("Failed to begin transaction: {}", e))
        })?;
        Ok(())
    }

    /// Commit on success, roll back on any error
    async fn finish(
        conn: &Connection,
        result: Result<(), StoreError>,
        what: &str,
    ) -> Result<(), StoreError> {
        if let Err(e) = result {
            let _rollback = conn.execute("ROLLBACK", ()).await;
            return Err(e);
        }
        if let Err(e) = conn.execute("COMMIT", ()).await {
            let _rollback = conn.execute("ROLLBACK", ()).await;
            return Err(StoreError::transaction_failed(format!(
                "Failed to commit {}: {}",
                what, e
            )));
        }
        Ok(())
    }

    async fn resequence(conn: &Connection, placement: &Placement) -> Result<(), StoreError> {
        for (index, sibling) in placement.siblings.iter().enumerate() {
            conn.execute(
                "UPDATE children SET sequence = ? WHERE node_id = ?",
                (index as i64 + 1, *sibling),
            )
            .await
            .map_err(|e| {
                StoreError::sql_execution(format!("Failed to order node {}: {}", sibling, e))
            })?;
        }
        Ok(())
    }

    async fn write_node_row(
        conn: &Connection,
        node: &Node,
        records: Option<&NodeRecords>,
    ) -> Result<u64, StoreError> {
        let (is_ro, is_richtxt, level) = pack_flags(node);
        let changed = match records {
            Some(records) => {
                let txt = if node.kind.is_rich_text() {
                    write_rich_text_document(&records.text)
                } else {
                    records.joined_text()
                };
                let has = |pred: fn(&FragmentBody) -> bool| {
                    i64::from(records.objects.iter().any(|o| pred(&o.body)))
                };
                let has_codebox = has(|b| matches!(b, FragmentBody::CodeBox(_)));
                let has_table = has(|b| matches!(b, FragmentBody::Table(_)));
                let has_image = has(|b| {
                    !matches!(b, FragmentBody::CodeBox(_) | FragmentBody::Table(_))
                });
                conn.execute(
                    "UPDATE node SET name = ?, txt = ?, syntax = ?, tags = ?, is_ro = ?,
                     is_richtxt = ?, has_codebox = ?, has_table = ?, has_image = ?, level = ?,
                     ts_creation = ?, ts_lastsave = ? WHERE node_id = ?",
                    params![
                        node.name.as_str(),
                        txt,
                        node.kind.syntax(),
                        node.tags.as_str(),
                        is_ro,
                        is_richtxt,
                        has_codebox,
                        has_table,
                        has_image,
                        level,
                        node.created_at.timestamp(),
                        node.modified_at.timestamp(),
                        node.id
                    ],
                )
                .await
            }
            None => {
                conn.execute(
                    "UPDATE node SET name = ?, syntax = ?, tags = ?, is_ro = ?, is_richtxt = ?,
                     level = ?, ts_creation = ?, ts_lastsave = ? WHERE node_id = ?",
                    params![
                        node.name.as_str(),
                        node.kind.syntax(),
                        node.tags.as_str(),
                        is_ro,
                        is_richtxt,
                        level,
                        node.created_at.timestamp(),
                        node.modified_at.timestamp(),
                        node.id
                    ],
                )
                .await
            }
        };
        changed.map_err(|e| {
            StoreError::sql_execution(format!("Failed to update node {}: {}", node.id, e))
        })
    }

    async fn insert_image(
        conn: &Connection,
        node_id: NodeId,
        row: ImageRow<'_>,
    ) -> Result<(), StoreError> {
        conn.execute(
            "INSERT INTO image (node_id, offset, justification, anchor, png, filename, link, time)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            (
                node_id,
                row.offset,
                row.justification,
                row.anchor,
                row.png,
                row.filename,
                row.link,
                row.time,
            ),
        )
        .await
        .map_err(|e| {
            StoreError::sql_execution(format!("Failed to insert image for node {}: {}", node_id, e))
        })?;
        Ok(())
    }

    /// Keep a stored payload row, moving it to its new offset
    ///
    /// `retained` holds the rows already claimed by this save; a key seen a
    /// second time gets a row of its own.
    async fn retain_payload(
        conn: &Connection,
        node_id: NodeId,
        payload: &Payload,
        row: ImageRow<'_>,
        retained: &mut HashSet<i64>,
    ) -> Result<(), StoreError> {
        let Payload::Stored { key, bytes, .. } = payload else {
            return Self::insert_image(conn, node_id, row).await;
        };
        let rowid = key.parse::<i64>().ok();

        if let Some(rowid) = rowid.filter(|rowid| retained.contains(rowid)) {
            if let Some(bytes) = bytes {
                return Self::insert_image(
                    conn,
                    node_id,
                    ImageRow {
                        png: bytes.clone(),
                        ..row
                    },
                )
                .await;
            }
            let copied = conn
                .execute(
                    "INSERT INTO image (node_id, offset, justification, anchor, png, filename, link, time)
                     SELECT node_id, ?, ?, anchor, png, ?, ?, ? FROM image
                     WHERE rowid = ? AND node_id = ?",
                    (
                        row.offset,
                        row.justification,
                        row.filename,
                        row.link,
                        row.time,
                        rowid,
                        node_id,
                    ),
                )
                .await
                .map_err(|e| {
                    StoreError::sql_execution(format!("Failed to copy image {}: {}", key, e))
                })?;
            if copied == 0 {
                return Err(StoreError::transaction_failed(format!(
                    "payload {} is not stored for node {}",
                    key, node_id
                )));
            }
            return Ok(());
        }

        let updated = match rowid {
            Some(rowid) => conn
                .execute(
                    "UPDATE image SET offset = ?, justification = ?, filename = ?, link = ?, time = ?
                     WHERE rowid = ? AND node_id = ?",
                    (
                        row.offset,
                        row.justification,
                        row.filename,
                        row.link,
                        row.time,
                        rowid,
                        node_id,
                    ),
                )
                .await
                .map_err(|e| {
                    StoreError::sql_execution(format!("Failed to update image {}: {}", key, e))
                })?,
            None => 0,
        };
        if let Some(rowid) = rowid.filter(|_| updated > 0) {
            retained.insert(rowid);
            return Ok(());
        }
        // Not one of ours (foreign key): store a copy if we have the bytes
        match bytes {
            Some(bytes) => {
                Self::insert_image(
                    conn,
                    node_id,
                    ImageRow {
                        png: bytes.clone(),
                        ..row
                    },
                )
                .await
            }
            None => Err(StoreError::transaction_failed(format!(
                "payload {} is not stored for node {}",
                key, node_id
            ))),
        }
    }

    async fn apply_content(conn: &Connection, write: ContentWrite<'_>) -> Result<(), StoreError> {
        let node_id = write.node.id;
        if Self::write_node_row(conn, write.node, Some(write.records)).await? == 0 {
            return Err(StoreError::NodeNotFound(node_id));
        }

        for sql in [
            "DELETE FROM codebox WHERE node_id = ?",
            "DELETE FROM grid WHERE node_id = ?",
        ] {
            conn.execute(sql, [node_id]).await.map_err(|e| {
                StoreError::sql_execution(format!("Failed to clear node {}: {}", node_id, e))
            })?;
        }
        conn.execute(
            "DELETE FROM image WHERE node_id = ? AND (COALESCE(anchor, '') != '' OR filename = ?)",
            (node_id, FORMULA_FILENAME),
        )
        .await
        .map_err(|e| {
            StoreError::sql_execution(format!("Failed to clear anchors of {}: {}", node_id, e))
        })?;

        let retained: BTreeSet<&str> = write.records.payload_keys().collect();
        for key in write.orphaned_keys {
            if retained.contains(key.as_str()) {
                continue;
            }
            let Ok(rowid) = key.parse::<i64>() else {
                continue;
            };
            conn.execute(
                "DELETE FROM image WHERE rowid = ? AND node_id = ?",
                (rowid, node_id),
            )
            .await
            .map_err(|e| {
                StoreError::sql_execution(format!("Failed to delete image {}: {}", key, e))
            })?;
        }

        let mut claimed = HashSet::new();
        for object in &write.records.objects {
            let offset = object.offset as i64;
            let justification = object.justification.as_str();
            let row = ImageRow {
                offset,
                justification,
                anchor: "",
                png: Vec::new(),
                filename: "",
                link: "",
                time: 0,
            };
            match &object.body {
                FragmentBody::CodeBox(code) => {
                    conn.execute(
                        "INSERT INTO codebox (node_id, offset, justification, txt, syntax, width,
                         height, is_width_pix, do_highl_bra, do_show_linenum)
                         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                        params![
                            node_id,
                            offset,
                            justification,
                            code.text.as_str(),
                            code.syntax.as_str(),
                            i64::from(code.width),
                            i64::from(code.height),
                            i64::from(code.width_in_pixels),
                            i64::from(code.highlight_brackets),
                            i64::from(code.show_line_numbers)
                        ],
                    )
                    .await
                    .map_err(|e| {
                        StoreError::sql_execution(format!("Failed to insert codebox: {}", e))
                    })?;
                }
                FragmentBody::Table(table) => {
                    conn.execute(
                        "INSERT INTO grid (node_id, offset, justification, txt, col_min, col_max)
                         VALUES (?, ?, ?, ?, ?, ?)",
                        (
                            node_id,
                            offset,
                            justification,
                            write_grid_document(table),
                            i64::from(table.col_min),
                            i64::from(table.col_max),
                        ),
                    )
                    .await
                    .map_err(|e| {
                        StoreError::sql_execution(format!("Failed to insert grid: {}", e))
                    })?;
                }
                FragmentBody::Anchor { name } => {
                    let row = ImageRow { anchor: name, ..row };
                    Self::insert_image(conn, node_id, row).await?;
                }
                FragmentBody::Formula { source } => {
                    let row = ImageRow {
                        png: source.as_bytes().to_vec(),
                        filename: FORMULA_FILENAME,
                        ..row
                    };
                    Self::insert_image(conn, node_id, row).await?;
                }
                FragmentBody::Image(ImageRecord { payload, link }) => {
                    let row = ImageRow {
                        png: payload.bytes().map(<[u8]>::to_vec).unwrap_or_default(),
                        link,
                        ..row
                    };
                    Self::retain_payload(conn, node_id, payload, row, &mut claimed).await?;
                }
                FragmentBody::Attachment(AttachmentRecord {
                    filename,
                    time,
                    payload,
                }) => {
                    let row = ImageRow {
                        png: payload.bytes().map(<[u8]>::to_vec).unwrap_or_default(),
                        filename,
                        time: *time,
                        ..row
                    };
                    Self::retain_payload(conn, node_id, payload, row, &mut claimed).await?;
                }
            }
        }
        Ok(())
    }

    async fn read_objects(
        &self,
        conn: &Connection,
        id: NodeId,
        records: &mut NodeRecords,
        warnings: &mut Vec<CodecWarning>,
    ) -> Result<(), StoreError> {
        let justification = |value: String| Justification::parse(&value).unwrap_or_default();

        let mut rows = conn
            .query(
                "SELECT offset, justification, txt, syntax, width, height, is_width_pix,
                 do_highl_bra, do_show_linenum FROM codebox WHERE node_id = ? ORDER BY offset",
                [id],
            )
            .await
            .map_err(|e| StoreError::sql_execution(format!("Failed to read codeboxes: {}", e)))?;
        while let Some(row) = rows.next().await? {
            records.objects.push(OffsetFragment {
                offset: row.get::<i64>(0)?.max(0) as usize,
                justification: justification(row.get::<Option<String>>(1)?.unwrap_or_default()),
                body: FragmentBody::CodeBox(CodeBoxRecord {
                    text: row.get::<Option<String>>(2)?.unwrap_or_default(),
                    syntax: row.get::<Option<String>>(3)?.unwrap_or_default(),
                    width: u32::try_from(row.get::<i64>(4)?).unwrap_or(0),
                    height: u32::try_from(row.get::<i64>(5)?).unwrap_or(0),
                    width_in_pixels: row.get::<i64>(6)? != 0,
                    highlight_brackets: row.get::<i64>(7)? != 0,
                    show_line_numbers: row.get::<i64>(8)? != 0,
                }),
            });
        }

        let mut rows = conn
            .query(
                "SELECT offset, justification, txt, col_min, col_max FROM grid
                 WHERE node_id = ? ORDER BY offset",
                [id],
            )
            .await
            .map_err(|e| StoreError::sql_execution(format!("Failed to read grids: {}", e)))?;
        while let Some(row) = rows.next().await? {
            let txt = row.get::<Option<String>>(2)?.unwrap_or_default();
            let col_min = u32::try_from(row.get::<i64>(3)?).unwrap_or(Table::DEFAULT_COL_MIN);
            let col_max = u32::try_from(row.get::<i64>(4)?).unwrap_or(Table::DEFAULT_COL_MAX);
            match read_grid_document(&txt, col_min, col_max) {
                Ok(table) => records.objects.push(OffsetFragment {
                    offset: row.get::<i64>(0)?.max(0) as usize,
                    justification: justification(
                        row.get::<Option<String>>(1)?.unwrap_or_default(),
                    ),
                    body: FragmentBody::Table(table),
                }),
                Err(e) => warnings.push(CodecWarning::MalformedFragment {
                    context: format!("grid of node {id}: {e}"),
                }),
            }
        }

        let mut rows = conn
            .query(
                "SELECT rowid, offset, justification, COALESCE(anchor, ''), COALESCE(filename, ''),
                 COALESCE(link, ''), COALESCE(time, 0), length(png),
                 CASE WHEN length(png) <= ?1 OR filename = ?3 THEN png END
                 FROM image WHERE node_id = ?2 ORDER BY offset",
                params![self.config.max_blob_bytes as i64, id, FORMULA_FILENAME],
            )
            .await
            .map_err(|e| StoreError::sql_execution(format!("Failed to read images: {}", e)))?;
        while let Some(row) = rows.next().await? {
            let rowid: i64 = row.get(0)?;
            let anchor: String = row.get(3)?;
            let filename: String = row.get(4)?;
            let size = row.get::<Option<i64>>(7)?.unwrap_or(0).max(0) as u64;
            let png: Option<Vec<u8>> = row.get(8)?;

            let body = if !anchor.is_empty() {
                FragmentBody::Anchor { name: anchor }
            } else if filename == FORMULA_FILENAME {
                let source = png.unwrap_or_default();
                FragmentBody::Formula {
                    source: String::from_utf8_lossy(&source).into_owned(),
                }
            } else {
                let payload = match png {
                    Some(bytes) => Payload::stored(rowid.to_string(), bytes),
                    None => Payload::Stored {
                        key: rowid.to_string(),
                        bytes: None,
                        size: Some(size),
                    },
                };
                if filename.is_empty() {
                    FragmentBody::Image(ImageRecord {
                        payload,
                        link: row.get(5)?,
                    })
                } else {
                    FragmentBody::Attachment(AttachmentRecord {
                        filename,
                        time: row.get(6)?,
                        payload,
                    })
                }
            };
            records.objects.push(OffsetFragment {
                offset: row.get::<i64>(1)?.max(0) as usize,
                justification: justification(row.get::<Option<String>>(2)?.unwrap_or_default()),
                body,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    async fn load_tree(&self) -> Result<NodeTree, StoreError> {
        let conn = self.connect_with_timeout().await?;

        let mut nodes: HashMap<NodeId, Node> = HashMap::new();
        let mut rows = conn
            .query(
                "SELECT node_id, name, syntax, tags, is_ro, is_richtxt, level, ts_creation,
                 ts_lastsave FROM node",
                (),
            )
            .await
            .map_err(|e| StoreError::sql_execution(format!("Failed to read nodes: {}", e)))?;
        while let Some(row) = rows.next().await? {
            let id: NodeId = row.get(0)?;
            let syntax = row.get::<Option<String>>(2)?.unwrap_or_default();
            let mut node = Node::new(
                id,
                row.get::<Option<String>>(1)?.unwrap_or_default(),
                NodeKind::from_syntax(&syntax),
            );
            node.tags = row.get::<Option<String>>(3)?.unwrap_or_default();
            unpack_flags(
                &mut node,
                row.get::<Option<i64>>(4)?.unwrap_or(0),
                row.get::<Option<i64>>(5)?.unwrap_or(0),
                row.get::<Option<i64>>(6)?.unwrap_or(0),
            );
            node.created_at = epoch_seconds(row.get::<Option<i64>>(7)?.unwrap_or(0));
            node.modified_at = epoch_seconds(row.get::<Option<i64>>(8)?.unwrap_or(0));
            nodes.insert(id, node);
        }

        let mut by_father: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        let mut rows = conn
            .query(
                "SELECT node_id, father_id, master_id FROM children ORDER BY father_id, sequence",
                (),
            )
            .await
            .map_err(|e| StoreError::sql_execution(format!("Failed to read children: {}", e)))?;
        while let Some(row) = rows.next().await? {
            let id: NodeId = row.get(0)?;
            let father = row.get::<Option<i64>>(1)?.unwrap_or(0);
            let master = row.get::<Option<i64>>(2)?.unwrap_or(0);
            if let Some(node) = nodes.get_mut(&id) {
                node.master_id = Some(master).filter(|&m| m > 0);
                by_father.entry(father).or_default().push(id);
            }
        }

        let mut tree = NodeTree::new();
        let mut queue: Vec<(Option<NodeId>, NodeId)> = by_father
            .remove(&0)
            .unwrap_or_default()
            .into_iter()
            .rev()
            .map(|id| (None, id))
            .collect();
        while let Some((parent, id)) = queue.pop() {
            let Some(node) = nodes.remove(&id) else {
                continue;
            };
            tree.insert(node, parent, None);
            if let Some(children) = by_father.remove(&id) {
                queue.extend(children.into_iter().rev().map(|child| (Some(id), child)));
            }
        }
        let mut stray: Vec<Node> = nodes.into_values().collect();
        stray.sort_by_key(|node| node.id);
        for node in stray {
            tracing::warn!("Node {} has no hierarchy row; placing it at top level", node.id);
            tree.insert(node, None, None);
        }

        let mut bookmarks = Vec::new();
        let mut rows = conn
            .query("SELECT node_id FROM bookmark ORDER BY sequence", ())
            .await
            .map_err(|e| StoreError::sql_execution(format!("Failed to read bookmarks: {}", e)))?;
        while let Some(row) = rows.next().await? {
            bookmarks.push(row.get::<NodeId>(0)?);
        }
        tree.set_bookmarks(bookmarks);

        tracing::debug!("Loaded {} nodes from {}", tree.len(), self.path.display());
        Ok(tree)
    }

    async fn read_content(&self, id: NodeId) -> Result<Option<StoredContent>, StoreError> {
        let conn = self.connect_with_timeout().await?;
        let mut rows = conn
            .query(
                "SELECT txt, syntax, has_codebox, has_table, has_image FROM node WHERE node_id = ?",
                [id],
            )
            .await
            .map_err(|e| StoreError::sql_execution(format!("Failed to read node {}: {}", id, e)))?;
        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        let txt = row.get::<Option<String>>(0)?.unwrap_or_default();
        let kind = NodeKind::from_syntax(&row.get::<Option<String>>(1)?.unwrap_or_default());
        let has_objects = [2, 3, 4]
            .into_iter()
            .map(|i| row.get::<Option<i64>>(i).map(|v| v.unwrap_or(0) != 0))
            .collect::<Result<Vec<_>, _>>()?
            .contains(&true);

        let mut content = StoredContent::default();
        if kind.is_rich_text() {
            if !txt.is_empty() {
                match read_rich_text_document(&txt) {
                    Ok(text) => content.records.text = text,
                    Err(e) => content.warnings.push(CodecWarning::MalformedFragment {
                        context: format!("txt of node {id}: {e}"),
                    }),
                }
            }
        } else if !txt.is_empty() {
            content.records.text.push(TextFragment::plain(txt));
        }

        if has_objects {
            self.read_objects(&conn, id, &mut content.records, &mut content.warnings)
                .await?;
        }
        Ok(Some(content))
    }

    async fn stored_blob_keys(&self, id: NodeId) -> Result<BTreeSet<String>, StoreError> {
        let conn = self.connect_with_timeout().await?;
        let mut rows = conn
            .query(
                "SELECT rowid FROM image WHERE node_id = ? AND COALESCE(anchor, '') = ''
                 AND COALESCE(filename, '') != ?",
                (id, FORMULA_FILENAME),
            )
            .await
            .map_err(|e| StoreError::sql_execution(format!("Failed to list images: {}", e)))?;
        let mut keys = BTreeSet::new();
        while let Some(row) = rows.next().await? {
            keys.insert(row.get::<i64>(0)?.to_string());
        }
        Ok(keys)
    }

    async fn read_blob(&self, id: NodeId, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let Ok(rowid) = key.parse::<i64>() else {
            return Ok(None);
        };
        let conn = self.connect_with_timeout().await?;
        let mut rows = conn
            .query(
                "SELECT png FROM image WHERE rowid = ? AND node_id = ?",
                (rowid, id),
            )
            .await
            .map_err(|e| StoreError::sql_execution(format!("Failed to read image: {}", e)))?;
        match rows.next().await? {
            Some(row) => Ok(row.get::<Option<Vec<u8>>>(0)?),
            None => Ok(None),
        }
    }

    async fn write_content(&self, write: ContentWrite<'_>) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let conn = self.connect_with_timeout().await?;
        Self::begin(&conn).await?;
        let result = Self::apply_content(&conn, write).await;
        Self::finish(&conn, result, "content").await
    }

    async fn insert_node(&self, node: &Node, placement: &Placement) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let conn = self.connect_with_timeout().await?;
        Self::begin(&conn).await?;
        let result: Result<(), StoreError> = async {
            conn.execute(
                "INSERT INTO node (node_id, txt, has_codebox, has_table, has_image)
                 VALUES (?, '', 0, 0, 0)",
                [node.id],
            )
            .await
            .map_err(|e| {
                StoreError::sql_execution(format!("Failed to insert node {}: {}", node.id, e))
            })?;
            Self::write_node_row(&conn, node, None).await?;
            conn.execute(
                "INSERT INTO children (node_id, father_id, sequence, master_id) VALUES (?, ?, ?, ?)",
                (
                    node.id,
                    placement.parent.unwrap_or(0),
                    placement.position_of(node.id).unwrap_or(0) as i64 + 1,
                    node.master_id.unwrap_or(0),
                ),
            )
            .await
            .map_err(|e| {
                StoreError::sql_execution(format!("Failed to place node {}: {}", node.id, e))
            })?;
            Self::resequence(&conn, placement).await
        }
        .await;
        Self::finish(&conn, result, "node insert").await
    }

    async fn update_node(&self, node: &Node) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let conn = self.connect_with_timeout().await?;
        Self::begin(&conn).await?;
        let result: Result<(), StoreError> = async {
            if Self::write_node_row(&conn, node, None).await? == 0 {
                return Err(StoreError::NodeNotFound(node.id));
            }
            conn.execute(
                "UPDATE children SET master_id = ? WHERE node_id = ?",
                (node.master_id.unwrap_or(0), node.id),
            )
            .await
            .map_err(|e| {
                StoreError::sql_execution(format!("Failed to update alias of {}: {}", node.id, e))
            })?;
            Ok(())
        }
        .await;
        Self::finish(&conn, result, "node update").await
    }

    async fn move_node(
        &self,
        id: NodeId,
        from: &Placement,
        to: &Placement,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let conn = self.connect_with_timeout().await?;
        Self::begin(&conn).await?;
        let result: Result<(), StoreError> = async {
            let moved = conn
                .execute(
                    "UPDATE children SET father_id = ? WHERE node_id = ?",
                    (to.parent.unwrap_or(0), id),
                )
                .await
                .map_err(|e| {
                    StoreError::sql_execution(format!("Failed to move node {}: {}", id, e))
                })?;
            if moved == 0 {
                return Err(StoreError::NodeNotFound(id));
            }
            Self::resequence(&conn, from).await?;
            Self::resequence(&conn, to).await
        }
        .await;
        Self::finish(&conn, result, "node move").await
    }

    async fn delete_nodes(&self, ids: &[NodeId], from: &Placement) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let conn = self.connect_with_timeout().await?;
        Self::begin(&conn).await?;
        let result: Result<(), StoreError> = async {
            for &id in ids {
                for sql in [
                    "DELETE FROM node WHERE node_id = ?",
                    "DELETE FROM codebox WHERE node_id = ?",
                    "DELETE FROM grid WHERE node_id = ?",
                    "DELETE FROM image WHERE node_id = ?",
                    "DELETE FROM children WHERE node_id = ?",
                    "DELETE FROM bookmark WHERE node_id = ?",
                ] {
                    conn.execute(sql, [id]).await.map_err(|e| {
                        StoreError::sql_execution(format!("Failed to delete node {}: {}", id, e))
                    })?;
                }
            }
            Self::resequence(&conn, from).await
        }
        .await;
        Self::finish(&conn, result, "node delete").await
    }

    async fn write_bookmarks(&self, bookmarks: &[NodeId]) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let conn = self.connect_with_timeout().await?;
        Self::begin(&conn).await?;
        let result: Result<(), StoreError> = async {
            conn.execute("DELETE FROM bookmark", ()).await.map_err(|e| {
                StoreError::sql_execution(format!("Failed to clear bookmarks: {}", e))
            })?;
            for (index, id) in bookmarks.iter().enumerate() {
                conn.execute(
                    "INSERT INTO bookmark (node_id, sequence) VALUES (?, ?)",
                    (*id, index as i64 + 1),
                )
                .await
                .map_err(|e| {
                    StoreError::sql_execution(format!("Failed to bookmark node {}: {}", id, e))
                })?;
            }
            Ok(())
        }
        .await;
        Self::finish(&conn, result, "bookmarks").await
    }
}
