use std::sync::Mutex;

use rusqlite::Connection;
use tracing::debug;

use crate::error::{Result, ToolStoreError};
use crate::types::{Tool, ToolStatus};

const TOOL_COLUMNS: &str = "name, status, version, current_stage, config_data, last_updated";

/// Thread-safe store for persisted tool records.
///
/// Wraps a single SQLite connection in a `Mutex`. Write rates are tiny
/// (installs and sync passes), so a Mutex is sufficient.
pub struct ToolStore {
    db: Mutex<Connection>,
}

impl ToolStore {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    /// Return an existing tool row or create one with default status.
    ///
    /// The registry sync pass calls this for every registered module, so
    /// the insert races harmlessly with concurrent callers: `INSERT OR
    /// IGNORE` followed by a read-back yields one winner and identical
    /// results for everyone.
    pub fn get_or_create(&self, name: &str, version: Option<&str>) -> Result<Tool> {
        if let Some(tool) = self.get(name)? {
            return Ok(tool);
        }

        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT OR IGNORE INTO tools (name, status, version, config_data, last_updated)
             VALUES (?1, ?2, ?3, '{}', ?4)",
            rusqlite::params![name, ToolStatus::NotInstalled.as_str(), version, now],
        )?;
        debug!(tool = %name, "created tool row");

        let tool = db.query_row(
            &format!("SELECT {TOOL_COLUMNS} FROM tools WHERE name = ?1"),
            rusqlite::params![name],
            row_to_tool,
        )?;
        Ok(tool)
    }

    /// Retrieve a tool by name, returning `None` if it does not exist.
    pub fn get(&self, name: &str) -> Result<Option<Tool>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            &format!("SELECT {TOOL_COLUMNS} FROM tools WHERE name = ?1"),
            rusqlite::params![name],
            row_to_tool,
        ) {
            Ok(t) => Ok(Some(t)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(ToolStoreError::Database(e)),
        }
    }

    /// List all tool rows, ordered by name for deterministic output.
    pub fn list(&self) -> Result<Vec<Tool>> {
        let db = self.db.lock().unwrap();
        let mut stmt =
            db.prepare(&format!("SELECT {TOOL_COLUMNS} FROM tools ORDER BY name"))?;
        let rows = stmt.query_map([], row_to_tool)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Update the installation status, bumping `last_updated`.
    pub fn update_status(&self, name: &str, status: ToolStatus) -> Result<()> {
        self.execute_named(
            name,
            "UPDATE tools SET status = ?1, last_updated = ?2 WHERE name = ?3",
            rusqlite::params![status.as_str(), chrono::Utc::now().to_rfc3339(), name],
        )
    }

    /// Record the installed version.
    pub fn update_version(&self, name: &str, version: &str) -> Result<()> {
        self.execute_named(
            name,
            "UPDATE tools SET version = ?1, last_updated = ?2 WHERE name = ?3",
            rusqlite::params![version, chrono::Utc::now().to_rfc3339(), name],
        )
    }

    /// Set or clear the free-form install progress label.
    pub fn set_stage(&self, name: &str, stage: Option<&str>) -> Result<()> {
        self.execute_named(
            name,
            "UPDATE tools SET current_stage = ?1, last_updated = ?2 WHERE name = ?3",
            rusqlite::params![stage, chrono::Utc::now().to_rfc3339(), name],
        )
    }

    /// Replace the module-owned configuration blob.
    pub fn set_config(&self, name: &str, config: &serde_json::Value) -> Result<()> {
        let blob = serde_json::to_string(config)?;
        self.execute_named(
            name,
            "UPDATE tools SET config_data = ?1, last_updated = ?2 WHERE name = ?3",
            rusqlite::params![blob, chrono::Utc::now().to_rfc3339(), name],
        )
    }

    fn execute_named(
        &self,
        name: &str,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        let rows_changed = db.execute(sql, params)?;
        if rows_changed == 0 {
            return Err(ToolStoreError::NotFound {
                name: name.to_string(),
            });
        }
        Ok(())
    }
}

/// Map a SQLite row to a `Tool`.
fn row_to_tool(row: &rusqlite::Row<'_>) -> rusqlite::Result<Tool> {
    let status_str: String = row.get(1)?;
    // A malformed status column falls back to Error rather than failing
    // the whole query.
    let status = ToolStatus::parse(&status_str).unwrap_or(ToolStatus::Error);

    let blob: String = row.get(4)?;
    let config_data =
        serde_json::from_str(&blob).unwrap_or_else(|_| serde_json::Value::Object(Default::default()));

    Ok(Tool {
        name: row.get(0)?,
        status,
        version: row.get(2)?,
        current_stage: row.get(3)?,
        config_data,
        last_updated: row.get(5)?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;

    fn store() -> ToolStore {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        ToolStore::new(conn)
    }

    #[test]
    fn get_or_create_defaults_to_not_installed() {
        let store = store();
        let tool = store.get_or_create("ollama", Some("1.0.0")).unwrap();
        assert_eq!(tool.name, "ollama");
        assert_eq!(tool.status, ToolStatus::NotInstalled);
        assert_eq!(tool.version.as_deref(), Some("1.0.0"));
        assert!(tool.config_data.is_object());
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let store = store();
        store.get_or_create("docker", None).unwrap();
        store.update_status("docker", ToolStatus::Installed).unwrap();

        // A second create must not reset the existing row.
        let tool = store.get_or_create("docker", None).unwrap();
        assert_eq!(tool.status, ToolStatus::Installed);
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn status_updates_persist() {
        let store = store();
        store.get_or_create("k8s", None).unwrap();
        store.update_status("k8s", ToolStatus::Installing).unwrap();
        store.set_stage("k8s", Some("pulling images")).unwrap();

        let tool = store.get("k8s").unwrap().unwrap();
        assert_eq!(tool.status, ToolStatus::Installing);
        assert_eq!(tool.current_stage.as_deref(), Some("pulling images"));
    }

    #[test]
    fn config_blob_round_trips() {
        let store = store();
        store.get_or_create("docker", None).unwrap();
        let config = serde_json::json!({ "registry": "ghcr.io", "insecure": false });
        store.set_config("docker", &config).unwrap();

        let tool = store.get("docker").unwrap().unwrap();
        assert_eq!(tool.config_data, config);
    }

    #[test]
    fn update_on_missing_row_is_not_found() {
        let store = store();
        let err = store.update_status("ghost", ToolStatus::Installed);
        assert!(matches!(err, Err(ToolStoreError::NotFound { .. })));
    }

    #[test]
    fn missing_tool_is_none() {
        assert!(store().get("nope").unwrap().is_none());
    }
}
