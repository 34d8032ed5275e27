use rusqlite::Connection;

use crate::error::Result;

/// Initialise the memory stores table and its index.
///
/// Safe to call on every startup — uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS stores (
            store_id    TEXT PRIMARY KEY,
            store_type  TEXT NOT NULL,
            doc_count   INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL,
            is_active   INTEGER NOT NULL DEFAULT 1
        );
        CREATE INDEX IF NOT EXISTS idx_stores_type_active
            ON stores(store_type, is_active);",
    )?;
    Ok(())
}
