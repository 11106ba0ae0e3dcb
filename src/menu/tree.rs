//! Persistent menu trees backed by SQLite.
//!
//! Two trees live side by side. `reply_nodes` is the reply-keyboard tree.
//! Every reply node owns exactly one inline page head in `inline_nodes`
//! (`reply_id` is unique), and each page head roots its own tree of inline
//! buttons. Deleting a reply node cascades through its reply subtree, the
//! paired pages, their inline descendants and attached files.

use rusqlite::{Connection, OptionalExtension, Row, ToSql, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

use super::error::{MenuError, MenuResult};

pub type NodeId = i64;

/// Id of the reply root. The root row is inserted with this fixed id.
pub const ROOT_ID: NodeId = 1;

/// Button layout of a node's children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    /// One button per row.
    Vertical,
    /// Two buttons per row.
    Horizontal,
}

impl Alignment {
    pub fn per_row(self) -> usize {
        match self {
            Alignment::Vertical => 1,
            Alignment::Horizontal => 2,
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Alignment::Vertical => Alignment::Horizontal,
            Alignment::Horizontal => Alignment::Vertical,
        }
    }

    fn from_db(value: i64) -> Self {
        if value == 1 { Alignment::Horizontal } else { Alignment::Vertical }
    }

    fn to_db(self) -> i64 {
        match self {
            Alignment::Vertical => 0,
            Alignment::Horizontal => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyNode {
    pub id: NodeId,
    pub parent_id: Option<NodeId>,
    pub name: String,
    pub alignment: Alignment,
    pub back_label: Option<String>,
    /// Head of this node's inline page.
    pub inline_id: NodeId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineNode {
    pub id: NodeId,
    pub parent_id: Option<NodeId>,
    /// Set only on page heads.
    pub reply_id: Option<NodeId>,
    pub name: String,
    pub text: Option<String>,
    pub url: Option<String>,
    pub back_label: Option<String>,
    pub alignment: Alignment,
}

impl InlineNode {
    pub fn is_link(&self) -> bool {
        self.url.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// A reply node with its children, ready for rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyView {
    pub node: ReplyNode,
    pub children: Vec<ReplyNode>,
}

impl ReplyView {
    pub fn is_root(&self) -> bool {
        self.node.parent_id.is_none()
    }

    pub fn child_named(&self, name: &str) -> Option<&ReplyNode> {
        self.children.iter().find(|c| c.name == name)
    }
}

/// An inline node with its children and file, ready for rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineView {
    pub node: InlineNode,
    pub children: Vec<InlineNode>,
    pub file: Option<AttachedFile>,
}

impl InlineView {
    pub fn has_parent(&self) -> bool {
        self.node.parent_id.is_some()
    }

    pub fn has_links(&self) -> bool {
        self.children.iter().any(InlineNode::is_link)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TreeStats {
    pub reply_nodes: usize,
    pub inline_nodes: usize,
    pub files: usize,
    pub users: usize,
}

const REPLY_COLUMNS: &str = "r.id, r.parent_id, r.name, r.alignment, r.back_label, i.id";
const INLINE_COLUMNS: &str = "id, parent_id, reply_id, name, text, url, back_label, alignment";

/// SQLite-backed store for both menu trees and the user registry.
pub struct MenuStore {
    conn: Mutex<Connection>,
}

impl MenuStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> MenuResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self::from_connection(conn)?;

        let stats = store.stats()?;
        info!(
            "Loaded menu database from {:?} ({} reply nodes, {} inline nodes, {} users)",
            path, stats.reply_nodes, stats.inline_nodes, stats.users
        );
        Ok(store)
    }

    /// Create a private in-memory database.
    pub fn open_in_memory() -> MenuResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> MenuResult<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update(None, "foreign_keys", true)?;
        let store = Self { conn: Mutex::new(conn) };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn init_schema(&self) -> MenuResult<()> {
        self.conn().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS reply_nodes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                parent_id INTEGER REFERENCES reply_nodes(id) ON DELETE CASCADE,
                name TEXT NOT NULL DEFAULT '',
                alignment INTEGER NOT NULL DEFAULT 0,
                back_label TEXT
            );

            CREATE TABLE IF NOT EXISTS inline_nodes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                parent_id INTEGER REFERENCES inline_nodes(id) ON DELETE CASCADE,
                reply_id INTEGER UNIQUE REFERENCES reply_nodes(id) ON DELETE CASCADE,
                name TEXT NOT NULL DEFAULT '',
                text TEXT,
                url TEXT,
                back_label TEXT,
                alignment INTEGER NOT NULL DEFAULT 1,
                CHECK ((parent_id IS NULL) <> (reply_id IS NULL))
            );

            CREATE TABLE IF NOT EXISTS files (
                inline_id INTEGER PRIMARY KEY REFERENCES inline_nodes(id) ON DELETE CASCADE,
                filename TEXT NOT NULL,
                bytes BLOB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS users (
                user_id INTEGER PRIMARY KEY,
                username TEXT,
                full_name TEXT NOT NULL,
                first_seen TEXT NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_reply_single_root
                ON reply_nodes((parent_id IS NULL)) WHERE parent_id IS NULL;
            CREATE INDEX IF NOT EXISTS idx_reply_parent ON reply_nodes(parent_id);
            CREATE INDEX IF NOT EXISTS idx_inline_parent ON inline_nodes(parent_id);
        "#,
        )?;
        Ok(())
    }

    pub fn stats(&self) -> MenuResult<TreeStats> {
        let conn = self.conn();
        let count = |table: &str| -> MenuResult<usize> {
            let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
            Ok(n as usize)
        };
        Ok(TreeStats {
            reply_nodes: count("reply_nodes")?,
            inline_nodes: count("inline_nodes")?,
            files: count("files")?,
            users: count("users")?,
        })
    }

    // ==================== REPLY TREE ====================

    /// Fetch the reply root, creating it and its page on first use.
    pub fn root(&self) -> MenuResult<ReplyNode> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let created = tx.execute(
            "INSERT OR IGNORE INTO reply_nodes (id, parent_id) VALUES (?1, NULL)",
            params![ROOT_ID],
        )?;
        tx.execute(
            "INSERT OR IGNORE INTO inline_nodes (reply_id) VALUES (?1)",
            params![ROOT_ID],
        )?;
        tx.commit()?;
        drop(conn);

        if created > 0 {
            info!("🌱 Created root menu");
        }
        self.reply_node(ROOT_ID)
    }

    pub fn reply_node(&self, id: NodeId) -> MenuResult<ReplyNode> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {REPLY_COLUMNS} FROM reply_nodes r
                     JOIN inline_nodes i ON i.reply_id = r.id
                     WHERE r.id = ?1"
                ),
                params![id],
                reply_from_row,
            )
            .optional()?
            .ok_or_else(|| MenuError::reply_node(id))
    }

    pub fn reply_children(&self, id: NodeId) -> MenuResult<Vec<ReplyNode>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {REPLY_COLUMNS} FROM reply_nodes r
             JOIN inline_nodes i ON i.reply_id = r.id
             WHERE r.parent_id = ?1 ORDER BY r.id"
        ))?;
        let children = stmt
            .query_map(params![id], reply_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(children)
    }

    pub fn reply_view(&self, id: NodeId) -> MenuResult<ReplyView> {
        let node = self.reply_node(id)?;
        let children = self.reply_children(id)?;
        Ok(ReplyView { node, children })
    }

    /// Add a reply button under `parent`, together with its inline page.
    pub fn create_reply_child(&self, parent: NodeId, name: &str) -> MenuResult<ReplyNode> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let exists: bool = tx
            .query_row("SELECT 1 FROM reply_nodes WHERE id = ?1", params![parent], |_| Ok(true))
            .optional()?
            .unwrap_or(false);
        if !exists {
            return Err(MenuError::reply_node(parent));
        }

        tx.execute(
            "INSERT INTO reply_nodes (parent_id, name) VALUES (?1, ?2)",
            params![parent, name],
        )?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO inline_nodes (reply_id, name) VALUES (?1, ?2)",
            params![id, name],
        )?;
        tx.commit()?;
        drop(conn);

        debug!(parent, id, name, "Created reply button");
        self.reply_node(id)
    }

    /// Remove a reply node with everything below it. Returns the parent id.
    pub fn delete_reply_subtree(&self, id: NodeId) -> MenuResult<NodeId> {
        let node = self.reply_node(id)?;
        let Some(parent) = node.parent_id else {
            return Err(MenuError::Rejected("the root menu cannot be removed"));
        };

        self.conn().execute("DELETE FROM reply_nodes WHERE id = ?1", params![id])?;
        info!("🗑️ Removed reply button {} ({:?})", id, node.name);
        Ok(parent)
    }

    pub fn set_reply_name(&self, id: NodeId, name: &str) -> MenuResult<()> {
        self.set_column("reply_nodes", "name", id, &name, MenuError::reply_node)
    }

    pub fn set_reply_back_label(&self, id: NodeId, label: &str) -> MenuResult<()> {
        self.set_column("reply_nodes", "back_label", id, &label, MenuError::reply_node)
    }

    pub fn set_reply_alignment(&self, id: NodeId, alignment: Alignment) -> MenuResult<()> {
        self.set_column("reply_nodes", "alignment", id, &alignment.to_db(), MenuError::reply_node)
    }

    pub fn toggle_reply_alignment(&self, id: NodeId) -> MenuResult<Alignment> {
        let alignment = self.reply_node(id)?.alignment.toggled();
        self.set_reply_alignment(id, alignment)?;
        Ok(alignment)
    }

    // ==================== INLINE TREE ====================

    pub fn inline_node(&self, id: NodeId) -> MenuResult<InlineNode> {
        self.conn()
            .query_row(
                &format!("SELECT {INLINE_COLUMNS} FROM inline_nodes WHERE id = ?1"),
                params![id],
                inline_from_row,
            )
            .optional()?
            .ok_or_else(|| MenuError::inline_node(id))
    }

    pub fn inline_children(&self, id: NodeId) -> MenuResult<Vec<InlineNode>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {INLINE_COLUMNS} FROM inline_nodes WHERE parent_id = ?1 ORDER BY id"
        ))?;
        let children = stmt
            .query_map(params![id], inline_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(children)
    }

    pub fn inline_view(&self, id: NodeId) -> MenuResult<InlineView> {
        let node = self.inline_node(id)?;
        let children = self.inline_children(id)?;
        let file = self.file(id)?;
        Ok(InlineView { node, children, file })
    }

    /// Add an inline button (or, with `url`, a link) under `parent`.
    pub fn create_inline_child(&self, parent: NodeId, name: &str, url: Option<&str>) -> MenuResult<InlineNode> {
        if self.inline_node(parent)?.is_link() {
            return Err(MenuError::Rejected("links cannot have children"));
        }

        let id = {
            let conn = self.conn();
            conn.execute(
                "INSERT INTO inline_nodes (parent_id, name, url) VALUES (?1, ?2, ?3)",
                params![parent, name, url],
            )?;
            conn.last_insert_rowid()
        };

        debug!(parent, id, name, ?url, "Created inline button");
        self.inline_node(id)
    }

    /// Remove an inline button and its descendants. Page heads go away only
    /// with their reply node. Returns the parent id.
    pub fn delete_inline_subtree(&self, id: NodeId) -> MenuResult<NodeId> {
        let node = self.inline_node(id)?;
        let Some(parent) = node.parent_id else {
            return Err(MenuError::Rejected("a menu page cannot be removed on its own"));
        };

        self.conn().execute("DELETE FROM inline_nodes WHERE id = ?1", params![id])?;
        info!("🗑️ Removed inline button {} ({:?})", id, node.name);
        Ok(parent)
    }

    /// Delete the links under `parent` pointing at exactly `url`.
    pub fn remove_links(&self, parent: NodeId, url: &str) -> MenuResult<usize> {
        self.inline_node(parent)?;
        let removed = self.conn().execute(
            "DELETE FROM inline_nodes WHERE parent_id = ?1 AND url = ?2",
            params![parent, url],
        )?;
        debug!(parent, url, removed, "Removed links");
        Ok(removed)
    }

    pub fn set_inline_text(&self, id: NodeId, text: &str) -> MenuResult<()> {
        self.set_column("inline_nodes", "text", id, &text, MenuError::inline_node)
    }

    pub fn set_inline_name(&self, id: NodeId, name: &str) -> MenuResult<()> {
        self.set_column("inline_nodes", "name", id, &name, MenuError::inline_node)
    }

    pub fn set_inline_back_label(&self, id: NodeId, label: &str) -> MenuResult<()> {
        self.set_column("inline_nodes", "back_label", id, &label, MenuError::inline_node)
    }

    pub fn set_inline_alignment(&self, id: NodeId, alignment: Alignment) -> MenuResult<()> {
        self.set_column("inline_nodes", "alignment", id, &alignment.to_db(), MenuError::inline_node)
    }

    pub fn toggle_inline_alignment(&self, id: NodeId) -> MenuResult<Alignment> {
        let alignment = self.inline_node(id)?.alignment.toggled();
        self.set_inline_alignment(id, alignment)?;
        Ok(alignment)
    }

    fn set_column(
        &self,
        table: &'static str,
        column: &'static str,
        id: NodeId,
        value: &dyn ToSql,
        missing: fn(NodeId) -> MenuError,
    ) -> MenuResult<()> {
        let changed = self.conn().execute(
            &format!("UPDATE {table} SET {column} = ?1 WHERE id = ?2"),
            params![value, id],
        )?;
        if changed == 0 {
            return Err(missing(id));
        }
        Ok(())
    }

    // ==================== FILES ====================

    pub fn file(&self, inline_id: NodeId) -> MenuResult<Option<AttachedFile>> {
        let file = self
            .conn()
            .query_row(
                "SELECT filename, bytes FROM files WHERE inline_id = ?1",
                params![inline_id],
                |row| Ok(AttachedFile { filename: row.get(0)?, bytes: row.get(1)? }),
            )
            .optional()?;
        Ok(file)
    }

    /// Attach a file to an inline node, replacing any previous one.
    pub fn attach_file(&self, inline_id: NodeId, filename: &str, bytes: &[u8]) -> MenuResult<()> {
        self.inline_node(inline_id)?;

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM files WHERE inline_id = ?1", params![inline_id])?;
        tx.execute(
            "INSERT INTO files (inline_id, filename, bytes) VALUES (?1, ?2, ?3)",
            params![inline_id, filename, bytes],
        )?;
        tx.commit()?;

        info!("📎 Attached {} ({} bytes) to inline node {}", filename, bytes.len(), inline_id);
        Ok(())
    }

    /// Returns whether a file was attached.
    pub fn remove_file(&self, inline_id: NodeId) -> MenuResult<bool> {
        self.inline_node(inline_id)?;
        let removed = self
            .conn()
            .execute("DELETE FROM files WHERE inline_id = ?1", params![inline_id])?;
        Ok(removed > 0)
    }

    // ==================== USERS ====================

    /// Record a user who interacted with the bot.
    pub fn register_user(&self, user_id: i64, username: Option<&str>, full_name: &str) -> MenuResult<()> {
        let first_seen = chrono::Utc::now().format("%Y-%m-%d %H:%M").to_string();
        self.conn().execute(
            "INSERT INTO users (user_id, username, full_name, first_seen)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id) DO UPDATE SET
                username = ?2,
                full_name = ?3",
            params![user_id, username, full_name, first_seen],
        )?;
        Ok(())
    }

    pub fn user_ids(&self) -> MenuResult<Vec<i64>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT user_id FROM users ORDER BY user_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }
}

fn reply_from_row(row: &Row<'_>) -> rusqlite::Result<ReplyNode> {
    Ok(ReplyNode {
        id: row.get(0)?,
        parent_id: row.get(1)?,
        name: row.get(2)?,
        alignment: Alignment::from_db(row.get(3)?),
        back_label: row.get(4)?,
        inline_id: row.get(5)?,
    })
}

fn inline_from_row(row: &Row<'_>) -> rusqlite::Result<InlineNode> {
    Ok(InlineNode {
        id: row.get(0)?,
        parent_id: row.get(1)?,
        reply_id: row.get(2)?,
        name: row.get(3)?,
        text: row.get(4)?,
        url: row.get(5)?,
        back_label: row.get(6)?,
        alignment: Alignment::from_db(row.get(7)?),
    })
}
