use rusqlite::Connection;

use crate::error::Result;

/// Initialise the tools table.
///
/// Safe to call on every startup -- uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS tools (
            name          TEXT PRIMARY KEY,
            status        TEXT NOT NULL DEFAULT 'not_installed',
            version       TEXT,
            current_stage TEXT,
            config_data   TEXT NOT NULL DEFAULT '{}',
            last_updated  TEXT NOT NULL
        );",
    )?;
    Ok(())
}
