use crate::model::{Dataset, ExamConfig, StudentRecord, SubjectSchema};
use anyhow::Context;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

pub const DB_FILE: &str = "cohortd.sqlite3";

/// Stored body of a dataset; id, name and import time live in their own columns.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasetPayload {
    subject_schema: SubjectSchema,
    config: ExamConfig,
    records: Vec<StudentRecord>,
}

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS datasets(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            imported_at TEXT NOT NULL,
            payload TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_datasets_imported ON datasets(imported_at)",
        [],
    )?;
    Ok(conn)
}

pub fn dataset_put(conn: &Connection, dataset: &Dataset) -> anyhow::Result<()> {
    let payload = serde_json::to_string(&DatasetPayload {
        subject_schema: dataset.subject_schema.clone(),
        config: dataset.config.clone(),
        records: dataset.records.clone(),
    })?;
    conn.execute(
        "INSERT INTO datasets(id, name, imported_at, payload) VALUES(?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            imported_at = excluded.imported_at,
            payload = excluded.payload",
        (&dataset.id, &dataset.name, &dataset.imported_at, &payload),
    )?;
    Ok(())
}

fn decode(id: String, name: String, imported_at: String, payload: &str) -> anyhow::Result<Dataset> {
    let body: DatasetPayload =
        serde_json::from_str(payload).with_context(|| format!("corrupt payload for dataset {}", id))?;
    body.subject_schema
        .validate()
        .and_then(|_| body.config.validate(&body.subject_schema))
        .with_context(|| format!("invalid stored dataset {}", id))?;
    Ok(Dataset {
        id,
        name,
        imported_at,
        subject_schema: body.subject_schema,
        config: body.config,
        records: body.records,
    })
}

pub fn dataset_list(conn: &Connection) -> anyhow::Result<Vec<Dataset>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, imported_at, payload
         FROM datasets
         ORDER BY imported_at, id",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    // A corrupt row only costs that dataset.
    let mut out = Vec::with_capacity(rows.len());
    for (id, name, imported_at, payload) in rows {
        let row_id = id.clone();
        match decode(id, name, imported_at, &payload) {
            Ok(d) => out.push(d),
            Err(e) => warn!(error = ?e, dataset = %row_id, "skipping unreadable stored dataset"),
        }
    }
    Ok(out)
}

pub fn dataset_delete(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    let n = conn.execute("DELETE FROM datasets WHERE id = ?", [id])?;
    Ok(n > 0)
}
