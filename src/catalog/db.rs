use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::{Connection, Row, params, params_from_iter};

use super::models::*;

const TOOL_COLUMNS: &str =
    "id, name, description, category, icon, url, is_active, created_at, updated_at";

/// Async-safe handle to the catalog database.
///
/// Wraps `CatalogDb` behind `Arc<Mutex>` and runs every query on tokio's
/// blocking thread pool via `spawn_blocking`.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<CatalogDb>>,
}

impl DbHandle {
    pub fn new(db: CatalogDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&CatalogDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }
}

pub struct CatalogDb {
    conn: Connection,
}

impl CatalogDb {
    /// Open (or create) the SQLite database at `path` and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS tools (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    category TEXT NOT NULL DEFAULT '',
                    icon TEXT NOT NULL DEFAULT '',
                    url TEXT NOT NULL DEFAULT '',
                    is_active INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                    deleted_at TEXT
                );

                CREATE TABLE IF NOT EXISTS tool_usage (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    tool_id INTEGER NOT NULL REFERENCES tools(id),
                    ip_address TEXT NOT NULL DEFAULT '',
                    user_agent TEXT NOT NULL DEFAULT '',
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE INDEX IF NOT EXISTS idx_tools_deleted ON tools(deleted_at);
                CREATE INDEX IF NOT EXISTS idx_tools_category ON tools(category);
                CREATE INDEX IF NOT EXISTS idx_tool_usage_tool ON tool_usage(tool_id);
                CREATE INDEX IF NOT EXISTS idx_tool_usage_created ON tool_usage(created_at);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Tool CRUD ─────────────────────────────────────────────────────

    pub fn list_tools(&self, filter: &ToolFilter) -> Result<Vec<Tool>> {
        let mut sql = format!("SELECT {} FROM tools WHERE deleted_at IS NULL", TOOL_COLUMNS);
        let mut args: Vec<String> = Vec::new();
        if !filter.include_inactive {
            sql.push_str(" AND is_active = 1");
        }
        if let Some(category) = filter.category.as_deref().filter(|c| !c.is_empty()) {
            args.push(category.to_string());
            sql.push_str(&format!(" AND category = ?{}", args.len()));
        }
        if let Some(q) = filter.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            args.push(format!("%{}%", q));
            let n = args.len();
            sql.push_str(&format!(" AND (name LIKE ?{n} OR description LIKE ?{n})"));
        }
        sql.push_str(" ORDER BY id");

        let mut stmt = self.conn.prepare(&sql).context("Failed to prepare list_tools")?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), row_to_tool)
            .context("Failed to query tools")?;
        let mut tools = Vec::new();
        for row in rows {
            tools.push(row.context("Failed to read tool row")?);
        }
        Ok(tools)
    }

    /// A tool that has not been deleted. Inactive tools only when asked for.
    pub fn get_tool(&self, id: i64, include_inactive: bool) -> Result<Option<Tool>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM tools WHERE id = ?1 AND deleted_at IS NULL AND (is_active = 1 OR ?2)",
                TOOL_COLUMNS
            ))
            .context("Failed to prepare get_tool")?;
        let mut rows = stmt
            .query_map(params![id, include_inactive], row_to_tool)
            .context("Failed to query tool")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read tool row")?)),
            None => Ok(None),
        }
    }

    pub fn create_tool(&self, tool: &NewTool) -> Result<Tool> {
        self.conn
            .execute(
                "INSERT INTO tools (name, description, category, icon, url, is_active) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    tool.name.trim(),
                    tool.description,
                    tool.category,
                    tool.icon,
                    tool.url,
                    tool.is_active.unwrap_or(true)
                ],
            )
            .context("Failed to insert tool")?;
        let id = self.conn.last_insert_rowid();
        self.get_tool(id, true)?.context("Tool not found after insert")
    }

    /// Apply `update` to a non-deleted tool. `None` when there is no such tool.
    pub fn update_tool(&self, id: i64, update: &ToolUpdate) -> Result<Option<Tool>> {
        let Some(current) = self.get_tool(id, true)? else {
            return Ok(None);
        };
        let pick = |new: &Option<String>, old: String| new.clone().unwrap_or(old);
        self.conn
            .execute(
                "UPDATE tools SET name = ?1, description = ?2, category = ?3, icon = ?4, url = ?5,
                 is_active = ?6, updated_at = datetime('now') WHERE id = ?7",
                params![
                    pick(&update.name, current.name),
                    pick(&update.description, current.description),
                    pick(&update.category, current.category),
                    pick(&update.icon, current.icon),
                    pick(&update.url, current.url),
                    update.is_active.unwrap_or(current.is_active),
                    id
                ],
            )
            .context("Failed to update tool")?;
        self.get_tool(id, true)
    }

    /// Soft delete. Returns false when the tool was missing or already deleted.
    pub fn delete_tool(&self, id: i64) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE tools SET deleted_at = datetime('now') WHERE id = ?1 AND deleted_at IS NULL",
                params![id],
            )
            .context("Failed to delete tool")?;
        Ok(changed > 0)
    }

    /// Insert the starter catalog when the table has never held a tool.
    pub fn seed_defaults(&self) -> Result<usize> {
        let existing: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM tools", [], |row| row.get(0))
            .context("Failed to count tools")?;
        if existing > 0 {
            return Ok(0);
        }
        for (name, description, category, icon, url) in DEFAULT_TOOLS {
            self.create_tool(&NewTool {
                name: name.to_string(),
                description: description.to_string(),
                category: category.to_string(),
                icon: icon.to_string(),
                url: url.to_string(),
                is_active: Some(true),
            })?;
        }
        Ok(DEFAULT_TOOLS.len())
    }

    // ── Usage ─────────────────────────────────────────────────────────

    /// Record one use of an active tool. `None` when the tool is not available.
    pub fn record_usage(
        &self,
        tool_id: i64,
        ip_address: &str,
        user_agent: &str,
    ) -> Result<Option<ToolUsage>> {
        if self.get_tool(tool_id, false)?.is_none() {
            return Ok(None);
        }
        self.conn
            .execute(
                "INSERT INTO tool_usage (tool_id, ip_address, user_agent) VALUES (?1, ?2, ?3)",
                params![tool_id, ip_address, user_agent],
            )
            .context("Failed to insert tool usage")?;
        let id = self.conn.last_insert_rowid();
        let usage = self
            .conn
            .query_row(
                "SELECT id, tool_id, ip_address, user_agent, created_at FROM tool_usage WHERE id = ?1",
                params![id],
                |row| {
                    Ok(ToolUsage {
                        id: row.get(0)?,
                        tool_id: row.get(1)?,
                        ip_address: row.get(2)?,
                        user_agent: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
            .context("Failed to read tool usage")?;
        Ok(Some(usage))
    }

    // ── Stats ─────────────────────────────────────────────────────────

    pub fn tool_stats(&self) -> Result<ToolStats> {
        let total_tools = self.count("SELECT COUNT(*) FROM tools WHERE deleted_at IS NULL", [])?;
        let active_tools = self.count(
            "SELECT COUNT(*) FROM tools WHERE deleted_at IS NULL AND is_active = 1",
            [],
        )?;
        let mut stmt = self
            .conn
            .prepare(
                "SELECT DISTINCT category FROM tools
                 WHERE deleted_at IS NULL AND category != '' ORDER BY category",
            )
            .context("Failed to prepare categories query")?;
        let categories = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("Failed to query categories")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read category row")?;
        Ok(ToolStats {
            total_tools,
            active_tools,
            total_categories: categories.len(),
            categories,
        })
    }

    pub fn usage_stats(&self, days: u32) -> Result<UsageStats> {
        Ok(UsageStats {
            total_usage: self.count("SELECT COUNT(*) FROM tool_usage", [])?,
            today_usage: self.count(
                "SELECT COUNT(*) FROM tool_usage WHERE created_at >= date('now')",
                [],
            )?,
            period_usage: self.count(
                "SELECT COUNT(*) FROM tool_usage WHERE created_at >= datetime('now', ?1)",
                params![days_modifier(days)],
            )?,
            period_days: days,
        })
    }

    /// Usage of one tool; `None` when the tool does not exist.
    pub fn tool_usage_stats(&self, tool_id: i64, days: u32) -> Result<Option<ToolUsageStats>> {
        if self.get_tool(tool_id, true)?.is_none() {
            return Ok(None);
        }
        Ok(Some(ToolUsageStats {
            tool_id,
            total_usage: self.count(
                "SELECT COUNT(*) FROM tool_usage WHERE tool_id = ?1",
                params![tool_id],
            )?,
            recent_usage: self.count(
                "SELECT COUNT(*) FROM tool_usage WHERE tool_id = ?1 AND created_at >= datetime('now', ?2)",
                params![tool_id, days_modifier(days)],
            )?,
            period_days: days,
        }))
    }

    pub fn overview(&self) -> Result<OverviewStats> {
        Ok(OverviewStats {
            total_tools: self.count(
                "SELECT COUNT(*) FROM tools WHERE deleted_at IS NULL AND is_active = 1",
                [],
            )?,
            total_usage: self.count("SELECT COUNT(*) FROM tool_usage", [])?,
            today_usage: self.count(
                "SELECT COUNT(*) FROM tool_usage WHERE created_at >= date('now')",
                [],
            )?,
            last_updated: chrono::Utc::now().to_rfc3339(),
        })
    }

    fn count<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<i64> {
        self.conn
            .query_row(sql, params, |row| row.get(0))
            .with_context(|| format!("Failed to run count query: {}", sql))
    }
}

fn row_to_tool(row: &Row<'_>) -> rusqlite::Result<Tool> {
    Ok(Tool {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        category: row.get(3)?,
        icon: row.get(4)?,
        url: row.get(5)?,
        is_active: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn days_modifier(days: u32) -> String {
    format!("-{} days", days)
}

const DEFAULT_TOOLS: &[(&str, &str, &str, &str, &str)] = &[
    (
        "Return Calculator",
        "Calculate the return on a crypto investment",
        "Calculators",
        "Calculator",
        "/tools/calculator",
    ),
    (
        "DCA Calculator",
        "Plan a dollar-cost averaging strategy",
        "Calculators",
        "TrendingUp",
        "/tools/dca",
    ),
    (
        "FIRE Calculator",
        "Plan for financial independence",
        "Calculators",
        "Target",
        "/tools/fire",
    ),
    (
        "Address Validator",
        "Check that a crypto address is well formed",
        "Security",
        "Shield",
        "/tools/address-validator",
    ),
    (
        "Compound Interest Calculator",
        "Project compound growth of an investment",
        "Calculators",
        "BarChart3",
        "/tools/compound",
    ),
];

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn new_tool(name: &str, category: &str, description: &str) -> NewTool {
        NewTool {
            name: name.into(),
            category: category.into(),
            description: description.into(),
            ..NewTool::default()
        }
    }

    #[test]
    fn test_create_database_and_run_migrations() -> Result<()> {
        let db = CatalogDb::new_in_memory()?;
        let table_count: i32 = db.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('tools', 'tool_usage')",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(table_count, 2);
        Ok(())
    }

    #[test]
    fn test_create_and_get_tool() -> Result<()> {
        let db = CatalogDb::new_in_memory()?;
        let tool = db.create_tool(&new_tool("  Hasher  ", "Security", "hash things"))?;
        assert!(tool.id > 0);
        assert_eq!(tool.name, "Hasher");
        assert!(tool.is_active);
        assert!(!tool.created_at.is_empty());

        let fetched = db.get_tool(tool.id, false)?.expect("tool should exist");
        assert_eq!(fetched, tool);
        Ok(())
    }

    #[test]
    fn test_list_filters_by_category_and_search() -> Result<()> {
        let db = CatalogDb::new_in_memory()?;
        db.create_tool(&new_tool("DCA", "Calculators", "dollar cost averaging"))?;
        db.create_tool(&new_tool("FIRE", "Calculators", "early retirement"))?;
        db.create_tool(&new_tool("Validator", "Security", "address checks"))?;

        let calculators = db.list_tools(&ToolFilter {
            category: Some("Calculators".into()),
            ..ToolFilter::default()
        })?;
        assert_eq!(calculators.len(), 2);

        let found = db.list_tools(&ToolFilter {
            q: Some("RETIRE".into()),
            ..ToolFilter::default()
        })?;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "FIRE");

        let both = db.list_tools(&ToolFilter {
            category: Some("Security".into()),
            q: Some("valid".into()),
            ..ToolFilter::default()
        })?;
        assert_eq!(both.len(), 1);
        Ok(())
    }

    #[test]
    fn test_inactive_tools_hidden_from_public_listing() -> Result<()> {
        let db = CatalogDb::new_in_memory()?;
        let tool = db.create_tool(&NewTool {
            is_active: Some(false),
            ..new_tool("Hidden", "", "")
        })?;
        assert!(db.list_tools(&ToolFilter::default())?.is_empty());
        assert!(db.get_tool(tool.id, false)?.is_none());

        let admin = db.list_tools(&ToolFilter {
            include_inactive: true,
            ..ToolFilter::default()
        })?;
        assert_eq!(admin.len(), 1);
        Ok(())
    }

    #[test]
    fn test_update_tool_is_partial() -> Result<()> {
        let db = CatalogDb::new_in_memory()?;
        let tool = db.create_tool(&new_tool("Old", "Cat", "desc"))?;
        let updated = db
            .update_tool(
                tool.id,
                &ToolUpdate {
                    name: Some("New".into()),
                    is_active: Some(false),
                    ..ToolUpdate::default()
                },
            )?
            .expect("tool should exist");
        assert_eq!(updated.name, "New");
        assert_eq!(updated.category, "Cat");
        assert_eq!(updated.description, "desc");
        assert!(!updated.is_active);

        assert!(db.update_tool(9999, &ToolUpdate::default())?.is_none());
        Ok(())
    }

    #[test]
    fn test_soft_delete() -> Result<()> {
        let db = CatalogDb::new_in_memory()?;
        let tool = db.create_tool(&new_tool("Gone", "", ""))?;
        assert!(db.delete_tool(tool.id)?);
        assert!(!db.delete_tool(tool.id)?);
        assert!(db.get_tool(tool.id, true)?.is_none());

        let still_there: i64 = db.conn.query_row(
            "SELECT COUNT(*) FROM tools WHERE id = ?1 AND deleted_at IS NOT NULL",
            params![tool.id],
            |row| row.get(0),
        )?;
        assert_eq!(still_there, 1);
        Ok(())
    }

    #[test]
    fn test_record_usage_requires_available_tool() -> Result<()> {
        let db = CatalogDb::new_in_memory()?;
        let tool = db.create_tool(&new_tool("Used", "", ""))?;
        let usage = db
            .record_usage(tool.id, "127.0.0.1", "curl/8")?
            .expect("usage should be recorded");
        assert_eq!(usage.tool_id, tool.id);
        assert_eq!(usage.user_agent, "curl/8");

        assert!(db.record_usage(4242, "127.0.0.1", "curl/8")?.is_none());
        db.delete_tool(tool.id)?;
        assert!(db.record_usage(tool.id, "127.0.0.1", "curl/8")?.is_none());
        Ok(())
    }

    #[test]
    fn test_usage_stats_respect_window() -> Result<()> {
        let db = CatalogDb::new_in_memory()?;
        let tool = db.create_tool(&new_tool("Counted", "", ""))?;
        db.record_usage(tool.id, "", "")?;
        db.record_usage(tool.id, "", "")?;
        db.conn.execute(
            "INSERT INTO tool_usage (tool_id, created_at) VALUES (?1, datetime('now', '-30 days'))",
            params![tool.id],
        )?;

        let stats = db.usage_stats(7)?;
        assert_eq!(stats.total_usage, 3);
        assert_eq!(stats.today_usage, 2);
        assert_eq!(stats.period_usage, 2);
        assert_eq!(db.usage_stats(60)?.period_usage, 3);

        let per_tool = db.tool_usage_stats(tool.id, 7)?.expect("tool should exist");
        assert_eq!(per_tool.total_usage, 3);
        assert_eq!(per_tool.recent_usage, 2);
        assert!(db.tool_usage_stats(777, 7)?.is_none());
        Ok(())
    }

    #[test]
    fn test_tool_stats_and_overview() -> Result<()> {
        let db = CatalogDb::new_in_memory()?;
        db.create_tool(&new_tool("A", "Calculators", ""))?;
        db.create_tool(&new_tool("B", "Security", ""))?;
        db.create_tool(&NewTool {
            is_active: Some(false),
            ..new_tool("C", "Calculators", "")
        })?;
        let deleted = db.create_tool(&new_tool("D", "Exchanges", ""))?;
        db.delete_tool(deleted.id)?;

        let stats = db.tool_stats()?;
        assert_eq!(stats.total_tools, 3);
        assert_eq!(stats.active_tools, 2);
        assert_eq!(stats.categories, vec!["Calculators", "Security"]);
        assert_eq!(stats.total_categories, 2);

        let overview = db.overview()?;
        assert_eq!(overview.total_tools, 2);
        assert_eq!(overview.total_usage, 0);
        Ok(())
    }

    #[test]
    fn test_seed_defaults_only_once() -> Result<()> {
        let db = CatalogDb::new_in_memory()?;
        assert_eq!(db.seed_defaults()?, DEFAULT_TOOLS.len());
        assert_eq!(db.seed_defaults()?, 0);
        assert_eq!(db.list_tools(&ToolFilter::default())?.len(), DEFAULT_TOOLS.len());
        Ok(())
    }

    #[tokio::test]
    async fn test_db_handle_runs_on_blocking_pool() -> Result<()> {
        let handle = DbHandle::new(CatalogDb::new_in_memory()?);
        let tool = handle
            .call(|db| db.create_tool(&new_tool("Async", "", "")))
            .await?;
        let fetched = handle.call(move |db| db.get_tool(tool.id, false)).await?;
        assert!(fetched.is_some());
        Ok(())
    }
}
