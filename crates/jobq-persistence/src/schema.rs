use crate::Result;
use rusqlite::{Connection, TransactionBehavior};
use tracing::info;

const CREATE_JOBS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    command TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'pending',
    attempts INTEGER NOT NULL DEFAULT 0,
    max_retries INTEGER NOT NULL DEFAULT 3,
    priority INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

// Serves the claim scan: pending rows by priority, then age.
const CREATE_CLAIM_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_jobs_claim ON jobs (state, priority DESC, created_at);
"#;

/// Create the `jobs` table and claim index, upgrading tables that predate
/// the `priority` column.
pub(crate) fn ensure_schema(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    tx.execute_batch(CREATE_JOBS_TABLE)?;
    if !has_column(&tx, "jobs", "priority")? {
        tx.execute_batch("ALTER TABLE jobs ADD COLUMN priority INTEGER NOT NULL DEFAULT 1;")?;
        info!("Added priority column to existing jobs table");
    }
    tx.execute_batch(CREATE_CLAIM_INDEX)?;

    tx.commit()?;
    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}
