//! Append-only audit trail (§3 AuditRecord). `insert` is called from inside
//! the same transaction as the mutation it records (§4.2: "every multi-row
//! mutation ... is one transaction").

use crate::store::schema::{AuditAction, AuditRecord, AuditSource};
use rusqlite::{params, Connection, Row};

pub fn insert(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
    action: AuditAction,
    prior_value: Option<&serde_json::Value>,
    new_value: Option<&serde_json::Value>,
    source: AuditSource,
    timestamp: i64,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO config_audit (entity_type, entity_id, action, prior_value, new_value, source, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            entity_type,
            entity_id,
            action.as_str(),
            prior_value.map(|v| v.to_string()),
            new_value.map(|v| v.to_string()),
            source.as_str(),
            timestamp,
        ],
    )?;
    Ok(())
}

fn row_to_record(row: &Row) -> rusqlite::Result<AuditRecord> {
    let action: String = row.get(3)?;
    let prior: Option<String> = row.get(4)?;
    let new: Option<String> = row.get(5)?;
    let source: String = row.get(6)?;
    Ok(AuditRecord {
        id: row.get(0)?,
        entity_type: row.get(1)?,
        entity_id: row.get(2)?,
        action: action.parse().unwrap_or(AuditAction::Update),
        prior_value: prior.and_then(|s| serde_json::from_str(&s).ok()),
        new_value: new.and_then(|s| serde_json::from_str(&s).ok()),
        source: source.parse().unwrap_or(AuditSource::Local),
        timestamp: row.get(7)?,
    })
}

pub fn for_entity(conn: &Connection, entity_id: &str, limit: i64) -> rusqlite::Result<Vec<AuditRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, entity_type, entity_id, action, prior_value, new_value, source, timestamp
         FROM config_audit WHERE entity_id = ?1 ORDER BY id DESC LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![entity_id, limit], row_to_record)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}
