//! SQLite-backed distribution store.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::domain::{Lead, LeadEvent, LeadId, LeadStatus, QueueEntry, QueueId};
use super::queue::RealtorQueue;
use super::store::{DistributionStore, DistributionTx, StoreError};

// Timestamp columns hold microseconds since the Unix epoch.
const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS queue_entries (
        queue_id TEXT NOT NULL,
        realtor_id TEXT NOT NULL,
        position INTEGER NOT NULL,
        score INTEGER NOT NULL,
        status TEXT NOT NULL,
        body TEXT NOT NULL,
        PRIMARY KEY (queue_id, realtor_id)
    );
    CREATE TABLE IF NOT EXISTS leads (
        id TEXT PRIMARY KEY,
        queue_id TEXT NOT NULL,
        status TEXT NOT NULL,
        stage TEXT NOT NULL,
        reserved_for TEXT,
        expires_at INTEGER,
        created_at INTEGER NOT NULL,
        body TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS lead_events (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        lead_id TEXT NOT NULL,
        at INTEGER NOT NULL,
        body TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_queue_entries_position ON queue_entries(queue_id, position);
    CREATE INDEX IF NOT EXISTS idx_leads_status ON leads(status, queue_id, created_at);
    CREATE INDEX IF NOT EXISTS idx_leads_expiry ON leads(status, expires_at);
    CREATE INDEX IF NOT EXISTS idx_lead_events_lead ON lead_events(lead_id, seq);
"#;

/// Single-connection store. Every transaction starts with `BEGIN IMMEDIATE` so the write
/// lock is taken before the queue is read.
pub struct SqliteDistributionStore {
    conn: Mutex<Connection>,
}

impl SqliteDistributionStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|err| StoreError::Unavailable(format!("create {parent:?}: {err}")))?;
        }
        let conn = Connection::open(path).map_err(sql_error("sqlite open"))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .map_err(sql_error("sqlite journal mode"))?;
        Self::bootstrap(conn)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(sql_error("sqlite open"))?;
        Self::bootstrap(conn)
    }

    fn bootstrap(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(sql_error("sqlite busy timeout"))?;
        conn.execute_batch(SCHEMA)
            .map_err(sql_error("sqlite init"))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl DistributionStore for SqliteDistributionStore {
    fn transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn DistributionTx) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| StoreError::Unavailable("sqlite connection mutex poisoned".to_string()))?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(sql_error("sqlite begin"))?;

        // Dropping `tx` on the error path rolls back.
        let value = {
            let mut scoped = SqliteTx { conn: &tx };
            work(&mut scoped)?
        };

        tx.commit().map_err(sql_error("sqlite commit"))?;
        Ok(value)
    }
}

struct SqliteTx<'a> {
    conn: &'a Connection,
}

impl SqliteTx<'_> {
    fn query_leads(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<Lead>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(sql_error("sqlite prepare leads"))?;
        let rows = stmt
            .query_map(params, |row| row.get::<_, String>(0))
            .map_err(sql_error("sqlite query leads"))?;

        let mut leads = Vec::new();
        for row in rows {
            let body = row.map_err(sql_error("sqlite read lead"))?;
            leads.push(decode(&body)?);
        }
        Ok(leads)
    }

    fn write_lead(&self, sql: &str, lead: &Lead) -> Result<usize, rusqlite::Error> {
        let body =
            encode(lead).map_err(|err| rusqlite::Error::ToSqlConversionFailure(Box::new(err)))?;
        let reservation = lead.reservation.as_ref();
        self.conn.execute(
            sql,
            params![
                lead.id.as_str(),
                lead.queue_id.as_str(),
                lead.status.label(),
                lead.stage.label(),
                reservation.map(|reservation| reservation.realtor_id.as_str()),
                reservation.map(|reservation| reservation.expires_at.timestamp_micros()),
                lead.created_at.timestamp_micros(),
                body,
            ],
        )
    }
}

impl DistributionTx for SqliteTx<'_> {
    fn queue(&self, queue_id: &QueueId) -> Result<RealtorQueue, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT body FROM queue_entries WHERE queue_id = ?1 ORDER BY position")
            .map_err(sql_error("sqlite prepare queue"))?;
        let rows = stmt
            .query_map(params![queue_id.as_str()], |row| row.get::<_, String>(0))
            .map_err(sql_error("sqlite query queue"))?;

        let mut entries: Vec<QueueEntry> = Vec::new();
        for row in rows {
            let body = row.map_err(sql_error("sqlite read queue entry"))?;
            entries.push(decode(&body)?);
        }
        Ok(RealtorQueue::new(queue_id.clone(), entries))
    }

    fn save_queue(&mut self, queue: &RealtorQueue) -> Result<(), StoreError> {
        self.conn
            .execute(
                "DELETE FROM queue_entries WHERE queue_id = ?1",
                params![queue.queue_id().as_str()],
            )
            .map_err(sql_error("sqlite clear queue"))?;

        let mut stmt = self
            .conn
            .prepare(
                "INSERT INTO queue_entries (queue_id, realtor_id, position, score, status, body) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .map_err(sql_error("sqlite prepare queue entry"))?;
        for entry in queue.entries() {
            stmt.execute(params![
                entry.queue_id.as_str(),
                entry.realtor_id.as_str(),
                entry.position,
                entry.score,
                entry.status.label(),
                encode(entry)?,
            ])
            .map_err(sql_error("sqlite insert queue entry"))?;
        }
        Ok(())
    }

    fn lead(&self, id: &LeadId) -> Result<Option<Lead>, StoreError> {
        let body: Option<String> = self
            .conn
            .query_row(
                "SELECT body FROM leads WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(sql_error("sqlite fetch lead"))?;
        body.map(|body| decode(&body)).transpose()
    }

    fn insert_lead(&mut self, lead: &Lead) -> Result<(), StoreError> {
        match self.write_lead(
            "INSERT INTO leads (id, queue_id, status, stage, reserved_for, expires_at, created_at, body) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            lead,
        ) {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::Conflict)
            }
            Err(err) => Err(sql_error("sqlite insert lead")(err)),
        }
    }

    fn save_lead(&mut self, lead: &Lead) -> Result<(), StoreError> {
        let updated = self
            .write_lead(
                "UPDATE leads SET queue_id = ?2, status = ?3, stage = ?4, reserved_for = ?5, \
                 expires_at = ?6, created_at = ?7, body = ?8 WHERE id = ?1",
                lead,
            )
            .map_err(sql_error("sqlite update lead"))?;
        if updated == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    fn leads_with_status(
        &self,
        queue_id: Option<&QueueId>,
        status: LeadStatus,
        limit: usize,
    ) -> Result<Vec<Lead>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        match queue_id {
            Some(queue_id) => self.query_leads(
                "SELECT body FROM leads WHERE status = ?1 AND queue_id = ?2 \
                 ORDER BY created_at, id LIMIT ?3",
                params![status.label(), queue_id.as_str(), limit],
            ),
            None => self.query_leads(
                "SELECT body FROM leads WHERE status = ?1 ORDER BY created_at, id LIMIT ?2",
                params![status.label(), limit],
            ),
        }
    }

    fn expired_reservations(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Lead>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.query_leads(
            "SELECT body FROM leads WHERE status = ?1 AND expires_at <= ?2 \
             ORDER BY expires_at, id LIMIT ?3",
            params![LeadStatus::Reserved.label(), now.timestamp_micros(), limit],
        )
    }

    fn append_event(&mut self, event: &LeadEvent) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO lead_events (lead_id, at, body) VALUES (?1, ?2, ?3)",
                params![
                    event.lead_id.as_str(),
                    event.at.timestamp_micros(),
                    encode(event)?
                ],
            )
            .map_err(sql_error("sqlite insert event"))?;
        Ok(())
    }

    fn events(&self, lead_id: &LeadId) -> Result<Vec<LeadEvent>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT body FROM lead_events WHERE lead_id = ?1 ORDER BY seq")
            .map_err(sql_error("sqlite prepare events"))?;
        let rows = stmt
            .query_map(params![lead_id.as_str()], |row| row.get::<_, String>(0))
            .map_err(sql_error("sqlite query events"))?;

        let mut events = Vec::new();
        for row in rows {
            let body = row.map_err(sql_error("sqlite read event"))?;
            events.push(decode(&body)?);
        }
        Ok(events)
    }
}

fn sql_error(context: &'static str) -> impl Fn(rusqlite::Error) -> StoreError {
    move |err| StoreError::Unavailable(format!("{context}: {err}"))
}

fn encode<T: Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|err| StoreError::Corrupt(err.to_string()))
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T, StoreError> {
    serde_json::from_str(body).map_err(|err| StoreError::Corrupt(err.to_string()))
}
