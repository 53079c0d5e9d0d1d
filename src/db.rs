use crate::config::Config;
use crate::declaration::Declaration;
use crate::store::DeclarationStore;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Layout version of the snapshot JSON; bump when Declaration changes shape
pub const SNAPSHOT_SCHEMA_VERSION: i64 = 1;

/// Event for audit trail ("Every change is an event")
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

/// Persisted state of a store: the collection plus the current pointer
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub declarations: Vec<Declaration>,
    pub current_id: Option<String>,
}

/// Metadata of a stored snapshot (without the data itself)
#[derive(Debug, Clone)]
pub struct SnapshotInfo {
    pub key: String,
    pub schema_version: i64,
    pub declaration_count: i64,
    pub digest: String,
    pub saved_at: DateTime<Utc>,
}

/// Open the configured database file, or a private in-memory one when no path is set
pub fn open_database(config: &Config) -> Result<Connection> {
    let conn = match &config.database_path {
        Some(path) => Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?,
        None => Connection::open_in_memory().context("Failed to open in-memory database")?,
    };

    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Snapshots Table (whole declaration collection per key)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS snapshots (
            key TEXT PRIMARY KEY,
            schema_version INTEGER NOT NULL,
            declaration_count INTEGER NOT NULL,
            data TEXT NOT NULL,
            current_id TEXT,
            digest TEXT NOT NULL,
            saved_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp)",
        [],
    )?;

    Ok(())
}

fn digest_of(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Write the whole collection under `key`, replacing any previous snapshot
pub fn save_snapshot(
    conn: &Connection,
    key: &str,
    declarations: &[Declaration],
    current_id: Option<&str>,
) -> Result<SnapshotInfo> {
    let data = serde_json::to_string(declarations).context("Failed to serialize declarations")?;
    let digest = digest_of(&data);
    let saved_at = Utc::now();

    conn.execute(
        "INSERT INTO snapshots (key, schema_version, declaration_count, data, current_id, digest, saved_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(key) DO UPDATE SET
            schema_version = excluded.schema_version,
            declaration_count = excluded.declaration_count,
            data = excluded.data,
            current_id = excluded.current_id,
            digest = excluded.digest,
            saved_at = excluded.saved_at",
        params![
            key,
            SNAPSHOT_SCHEMA_VERSION,
            declarations.len() as i64,
            data,
            current_id,
            digest,
            saved_at.to_rfc3339(),
        ],
    )
    .with_context(|| format!("Failed to save snapshot '{}'", key))?;

    tracing::debug!("Saved {} declarations under '{}'", declarations.len(), key);

    Ok(SnapshotInfo {
        key: key.to_string(),
        schema_version: SNAPSHOT_SCHEMA_VERSION,
        declaration_count: declarations.len() as i64,
        digest,
        saved_at,
    })
}

/// Read the collection stored under `key`
///
/// None when nothing was saved yet. Snapshots written with another schema
/// version or whose digest no longer matches are refused, not migrated.
pub fn load_snapshot(conn: &Connection, key: &str) -> Result<Option<Snapshot>> {
    let row: Option<(i64, String, Option<String>, String)> = conn
        .query_row(
            "SELECT schema_version, data, current_id, digest FROM snapshots WHERE key = ?1",
            params![key],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .optional()?;

    let Some((schema_version, data, current_id, digest)) = row else {
        return Ok(None);
    };

    if schema_version != SNAPSHOT_SCHEMA_VERSION {
        bail!(
            "Snapshot '{}' has schema version {}, expected {}",
            key,
            schema_version,
            SNAPSHOT_SCHEMA_VERSION
        );
    }

    if digest_of(&data) != digest {
        bail!("Snapshot '{}' is corrupted: digest mismatch", key);
    }

    let declarations: Vec<Declaration> =
        serde_json::from_str(&data).with_context(|| format!("Failed to parse snapshot '{}'", key))?;

    tracing::debug!("Loaded {} declarations from '{}'", declarations.len(), key);
    Ok(Some(Snapshot {
        declarations,
        current_id,
    }))
}

/// Snapshot the store and flush its pending events in one transaction
///
/// Events leave the store's journal only once the transaction commits.
pub fn save_store(conn: &mut Connection, key: &str, store: &mut DeclarationStore) -> Result<SnapshotInfo> {
    let tx = conn.transaction()?;
    let info = save_snapshot(&tx, key, store.declarations(), store.current_id())?;
    for event in store.pending_events() {
        insert_event(&tx, event)?;
    }
    tx.commit()?;

    let flushed = store.take_events().len();
    tracing::info!(
        "Persisted {} declarations and {} events under '{}'",
        info.declaration_count,
        flushed,
        key
    );
    Ok(info)
}

/// Build a store from `config` and rehydrate it from the snapshot under `config.storage_key`
pub fn load_store(conn: &Connection, config: &Config) -> Result<DeclarationStore> {
    let store = DeclarationStore::from_config(config);

    match load_snapshot(conn, &config.storage_key)? {
        Some(snapshot) => Ok(store.with_snapshot(snapshot)),
        None => Ok(store),
    }
}

pub fn get_snapshot_info(conn: &Connection, key: &str) -> Result<Option<SnapshotInfo>> {
    let info = conn
        .query_row(
            "SELECT key, schema_version, declaration_count, digest, saved_at
             FROM snapshots WHERE key = ?1",
            params![key],
            |row| {
                let saved_at_str: String = row.get(4)?;
                Ok(SnapshotInfo {
                    key: row.get(0)?,
                    schema_version: row.get(1)?,
                    declaration_count: row.get(2)?,
                    digest: row.get(3)?,
                    saved_at: DateTime::parse_from_rfc3339(&saved_at_str)
                        .map_err(|_| rusqlite::Error::InvalidQuery)?
                        .with_timezone(&Utc),
                })
            },
        )
        .optional()?;

    Ok(info)
}

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Insert a batch of events in one transaction
pub fn insert_events(conn: &mut Connection, events: &[Event]) -> Result<usize> {
    let tx = conn.transaction()?;
    for event in events {
        insert_event(&tx, event)?;
    }
    tx.commit()?;

    Ok(events.len())
}

/// Get events for a specific entity (oldest first)
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY id ASC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                    .map_err(|_| rusqlite::Error::InvalidQuery)?
                    .with_timezone(&Utc),
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json)
                    .map_err(|_| rusqlite::Error::InvalidQuery)?,
                actor: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}
