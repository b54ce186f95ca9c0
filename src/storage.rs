use anyhow::{anyhow, Result};
use rand::distributions::Alphanumeric;
use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;

use crate::alert::{AlertRecord, StoredAlert};
use crate::{now_s, open_db_connection};

const DOCUMENT_ID_LEN: usize = 20;
const CHECK_DOCUMENT_ID: &str = "test";
const CHECK_MESSAGE: &str = "Connection successful";

/// Durable store for alert documents.
///
/// Implementations generate the document id on insert. Callers treat every
/// error as transient: a failed save is logged and skipped.
pub trait AlertSink: Send {
    /// Sink identifier for logs.
    fn name(&self) -> &'static str;

    /// Persist an alert and return its generated document id.
    fn save_alert(&mut self, record: &AlertRecord) -> Result<String>;

    fn read_alert(&mut self, id: &str) -> Result<Option<StoredAlert>>;

    /// Most recent alerts first.
    fn list_alerts(&mut self, limit: usize, include_resolved: bool) -> Result<Vec<StoredAlert>>;

    /// Mark an alert resolved. Returns false when the id is unknown.
    fn resolve_alert(&mut self, id: &str) -> Result<bool>;

    /// Write a connection-check document and read it back.
    fn check_connection(&mut self) -> Result<()>;
}

pub(crate) fn generate_document_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(DOCUMENT_ID_LEN)
        .map(char::from)
        .collect()
}

fn check_payload() -> Result<String> {
    Ok(serde_json::json!({
        "message": CHECK_MESSAGE,
        "timestamp": now_s()?,
    })
    .to_string())
}

fn check_matches(payload: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(payload)?;
    match value.get("message").and_then(|m| m.as_str()) {
        Some(CHECK_MESSAGE) => Ok(()),
        other => Err(anyhow!("connection-check document mismatch: {:?}", other)),
    }
}

pub struct SqliteAlertSink {
    conn: Connection,
}

impl SqliteAlertSink {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = open_db_connection(db_path)?;
        let mut sink = Self { conn };
        sink.ensure_schema()?;
        Ok(sink)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS alerts (
              id TEXT PRIMARY KEY,
              created_at INTEGER NOT NULL,
              payload_json TEXT NOT NULL,
              resolved INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS system (
              id TEXT PRIMARY KEY,
              updated_at INTEGER NOT NULL,
              payload_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_alerts_created ON alerts(created_at);
            "#,
        )?;
        Ok(())
    }

    fn row_to_alert(id: String, payload: String, resolved: bool) -> Result<StoredAlert> {
        let mut record: AlertRecord = serde_json::from_str(&payload)
            .map_err(|e| anyhow!("corrupt alert document {}: {}", id, e))?;
        record.resolved = resolved;
        Ok(StoredAlert { id, record })
    }
}

impl AlertSink for SqliteAlertSink {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn save_alert(&mut self, record: &AlertRecord) -> Result<String> {
        let id = generate_document_id();
        let created_at = i64::try_from(record.timestamp)
            .map_err(|_| anyhow!("alert timestamp exceeds i64 range"))?;
        let payload_json = serde_json::to_string(record)?;
        self.conn.execute(
            "INSERT INTO alerts(id, created_at, payload_json, resolved) VALUES (?1, ?2, ?3, ?4)",
            params![id, created_at, payload_json, record.resolved],
        )?;
        Ok(id)
    }

    fn read_alert(&mut self, id: &str) -> Result<Option<StoredAlert>> {
        let row = self
            .conn
            .query_row(
                "SELECT payload_json, resolved FROM alerts WHERE id = ?1",
                params![id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?)),
            )
            .optional()?;
        row.map(|(payload, resolved)| Self::row_to_alert(id.to_string(), payload, resolved))
            .transpose()
    }

    fn list_alerts(&mut self, limit: usize, include_resolved: bool) -> Result<Vec<StoredAlert>> {
        let rows = {
            let mut stmt = self.conn.prepare(
                r#"
                SELECT id, payload_json, resolved FROM alerts
                WHERE ?1 OR resolved = 0
                ORDER BY created_at DESC, rowid DESC
                LIMIT ?2
                "#,
            )?;
            let mut rows = stmt.query(params![include_resolved, limit as i64])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, bool>(2)?,
                ));
            }
            out
        };

        rows.into_iter()
            .map(|(id, payload, resolved)| Self::row_to_alert(id, payload, resolved))
            .collect()
    }

    fn resolve_alert(&mut self, id: &str) -> Result<bool> {
        let changed = self
            .conn
            .execute("UPDATE alerts SET resolved = 1 WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    fn check_connection(&mut self) -> Result<()> {
        let updated_at = now_s()? as i64;
        self.conn.execute(
            r#"
            INSERT INTO system(id, updated_at, payload_json) VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET updated_at = excluded.updated_at,
                                          payload_json = excluded.payload_json
            "#,
            params![CHECK_DOCUMENT_ID, updated_at, check_payload()?],
        )?;
        let payload: String = self.conn.query_row(
            "SELECT payload_json FROM system WHERE id = ?1",
            params![CHECK_DOCUMENT_ID],
            |row| row.get(0),
        )?;
        check_matches(&payload)
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryAlertSink {
    alerts: Vec<StoredAlert>,
    system: BTreeMap<String, String>,
}

impl InMemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }
}

impl AlertSink for InMemoryAlertSink {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn save_alert(&mut self, record: &AlertRecord) -> Result<String> {
        let id = generate_document_id();
        self.alerts.push(StoredAlert {
            id: id.clone(),
            record: record.clone(),
        });
        Ok(id)
    }

    fn read_alert(&mut self, id: &str) -> Result<Option<StoredAlert>> {
        Ok(self.alerts.iter().find(|alert| alert.id == id).cloned())
    }

    fn list_alerts(&mut self, limit: usize, include_resolved: bool) -> Result<Vec<StoredAlert>> {
        Ok(self
            .alerts
            .iter()
            .rev()
            .filter(|alert| include_resolved || !alert.record.resolved)
            .take(limit)
            .cloned()
            .collect())
    }

    fn resolve_alert(&mut self, id: &str) -> Result<bool> {
        match self.alerts.iter_mut().find(|alert| alert.id == id) {
            Some(alert) => {
                alert.record.resolved = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn check_connection(&mut self) -> Result<()> {
        self.system
            .insert(CHECK_DOCUMENT_ID.to_string(), check_payload()?);
        let payload = self
            .system
            .get(CHECK_DOCUMENT_ID)
            .ok_or_else(|| anyhow!("connection-check document missing"))?;
        check_matches(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared_memory_uri;

    fn record(count: usize, id: Option<u64>) -> AlertRecord {
        AlertRecord {
            timestamp: 1_700_000_000,
            cattle_count: count,
            cattle_id: id,
            boundary_crossed: true,
            camera: "Camera 1".to_string(),
            resolved: false,
        }
    }

    #[test]
    fn document_ids_are_twenty_alphanumerics() {
        let id = generate_document_id();
        assert_eq!(id.len(), 20);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(id, generate_document_id());
    }

    #[test]
    fn sqlite_alerts_survive_reopen() -> Result<()> {
        let uri = shared_memory_uri();
        let mut sink = SqliteAlertSink::open(&uri)?;
        let id = sink.save_alert(&record(3, Some(7)))?;

        let mut reader = SqliteAlertSink::open(&uri)?;
        let stored = reader.read_alert(&id)?.expect("alert readable");
        assert_eq!(stored.record, record(3, Some(7)));
        assert!(reader.read_alert("missing")?.is_none());
        Ok(())
    }

    #[test]
    fn sqlite_resolve_hides_alert_from_open_list() -> Result<()> {
        let mut sink = SqliteAlertSink::open(":memory:")?;
        let first = sink.save_alert(&record(1, Some(1)))?;
        let second = sink.save_alert(&record(2, None))?;

        assert!(sink.resolve_alert(&first)?);
        assert!(!sink.resolve_alert("missing")?);

        let open = sink.list_alerts(10, false)?;
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, second);

        let all = sink.list_alerts(10, true)?;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, second);
        assert!(all[1].record.resolved);
        Ok(())
    }

    #[test]
    fn connection_check_round_trips() -> Result<()> {
        SqliteAlertSink::open(":memory:")?.check_connection()?;
        InMemoryAlertSink::new().check_connection()?;
        Ok(())
    }

    #[test]
    fn in_memory_sink_lists_newest_first() -> Result<()> {
        let mut sink = InMemoryAlertSink::new();
        let a = sink.save_alert(&record(1, Some(1)))?;
        let b = sink.save_alert(&record(1, Some(2)))?;
        assert_eq!(sink.len(), 2);
        let listed = sink.list_alerts(1, true)?;
        assert_eq!(listed[0].id, b);
        assert!(sink.resolve_alert(&a)?);
        assert_eq!(sink.list_alerts(10, false)?.len(), 1);
        Ok(())
    }
}
