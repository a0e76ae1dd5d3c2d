// 🗄️ SQLite store - leaderboards, entries, watermarks + audit events
//
// One save = one SQL transaction that replaces every entry and watermark row
// of the key. Saves whose content fingerprint matches the stored one skip the
// rewrite and the audit event.

use chrono::{DateTime, Utc};
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::entry::Entry;
use crate::error::{LeaderboardError, Result};
use crate::leaderboard::{LeaderboardKey, LeaderboardState};
use crate::store::LeaderboardStore;
use crate::temporal::{format_last_updated, format_timestamp, parse_timestamp, Watermarks};

/// Audit trail row
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(event_type: &str, entity_id: &str, data: serde_json::Value, actor: &str) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
    actor: String,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        setup_database(&conn)?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
            actor: "sra-leaderboard".to_string(),
        })
    }

    /// Name recorded as the actor of audit events
    pub fn with_actor(mut self, actor: &str) -> Self {
        self.actor = actor.to_string();
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| LeaderboardError::Storage("connection lock poisoned".to_string()))
    }

    /// Audit events for one key, newest first
    pub fn events_for(&self, key: &LeaderboardKey) -> Result<Vec<Event>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT event_id, timestamp, event_type, entity_id, data, actor
             FROM events
             WHERE entity_id = ?1
             ORDER BY id DESC",
        )?;

        let rows = stmt
            .query_map(params![key.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(event_id, timestamp, event_type, entity_id, data, actor)| {
                Ok(Event {
                    event_id,
                    timestamp: parse_timestamp(&timestamp)?,
                    event_type,
                    entity_id,
                    data: serde_json::from_str(&data)?,
                    actor,
                })
            })
            .collect()
    }
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL for crash recovery; in-memory databases answer "memory"
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS leaderboards (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            track TEXT NOT NULL,
            condition TEXT NOT NULL,
            season INTEGER NOT NULL,
            last_updated TEXT,
            fingerprint TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (track, condition, season)
        );

        CREATE TABLE IF NOT EXISTS entries (
            leaderboard_id INTEGER NOT NULL REFERENCES leaderboards(id),
            position INTEGER NOT NULL,
            driver_id TEXT NOT NULL,
            car_id INTEGER NOT NULL,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            short_name TEXT NOT NULL,
            best_time INTEGER NOT NULL,
            sector_1 INTEGER NOT NULL,
            sector_2 INTEGER NOT NULL,
            sector_3 INTEGER NOT NULL,
            is_wet INTEGER NOT NULL,
            PRIMARY KEY (leaderboard_id, driver_id, car_id)
        );

        CREATE TABLE IF NOT EXISTS watermarks (
            leaderboard_id INTEGER NOT NULL REFERENCES leaderboards(id),
            host TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            PRIMARY KEY (leaderboard_id, host)
        );

        CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );

        CREATE INDEX IF NOT EXISTS idx_entries_position ON entries(leaderboard_id, position);
        CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_id);",
    )?;

    Ok(())
}

fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    conn.execute(
        "INSERT INTO events (event_id, timestamp, event_type, entity_id, data, actor)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_id,
            serde_json::to_string(&event.data)?,
            event.actor,
        ],
    )?;
    Ok(())
}

fn key_params(key: &LeaderboardKey) -> (&'static str, &'static str, u32) {
    (key.track.key(), key.condition.label(), key.season)
}

impl LeaderboardStore for SqliteStore {
    fn load(&self, key: &LeaderboardKey) -> Result<LeaderboardState> {
        let conn = self.lock()?;
        let (track, condition, season) = key_params(key);

        let row: Option<(i64, Option<String>)> = conn
            .query_row(
                "SELECT id, last_updated FROM leaderboards
                 WHERE track = ?1 AND condition = ?2 AND season = ?3",
                params![track, condition, season],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((id, last_updated)) = row else {
            return Err(LeaderboardError::NotFound(key.to_string()));
        };

        let mut stmt = conn.prepare(
            "SELECT driver_id, car_id, first_name, last_name, short_name,
                    best_time, sector_1, sector_2, sector_3, is_wet
             FROM entries
             WHERE leaderboard_id = ?1
             ORDER BY position",
        )?;
        let entries = stmt
            .query_map(params![id], |row| {
                Ok(Entry {
                    driver_id: row.get(0)?,
                    car_id: row.get(1)?,
                    first_name: row.get(2)?,
                    last_name: row.get(3)?,
                    short_name: row.get(4)?,
                    best_time: row.get(5)?,
                    sector_1: row.get(6)?,
                    sector_2: row.get(7)?,
                    sector_3: row.get(8)?,
                    is_wet: row.get(9)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare("SELECT host, timestamp FROM watermarks WHERE leaderboard_id = ?1")?;
        let marks = stmt
            .query_map(params![id], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut watermarks = Watermarks::new();
        for (host, ts) in marks {
            watermarks.set(host, parse_timestamp(&ts)?);
        }

        let last_updated = last_updated.as_deref().map(parse_timestamp).transpose()?;
        debug!("loaded {} ({} entries) from sqlite", key, entries.len());

        Ok(LeaderboardState {
            key: *key,
            entries,
            watermarks,
            last_updated,
        })
    }

    fn save(&self, state: &LeaderboardState) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let (track, condition, season) = key_params(&state.key);
        let fingerprint = state.fingerprint();
        let last_updated = state.last_updated.as_ref().map(format_last_updated);

        let existing: Option<(i64, String)> = tx
            .query_row(
                "SELECT id, fingerprint FROM leaderboards
                 WHERE track = ?1 AND condition = ?2 AND season = ?3",
                params![track, condition, season],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let id = match existing {
            Some((id, stored)) if stored == fingerprint => {
                tx.execute(
                    "UPDATE leaderboards SET last_updated = ?1 WHERE id = ?2",
                    params![last_updated, id],
                )?;
                tx.commit()?;
                debug!("{} unchanged, only last_updated written", state.key);
                return Ok(());
            }
            Some((id, _)) => {
                tx.execute(
                    "UPDATE leaderboards SET last_updated = ?1, fingerprint = ?2 WHERE id = ?3",
                    params![last_updated, fingerprint, id],
                )?;
                tx.execute("DELETE FROM entries WHERE leaderboard_id = ?1", params![id])?;
                tx.execute("DELETE FROM watermarks WHERE leaderboard_id = ?1", params![id])?;
                id
            }
            None => {
                tx.execute(
                    "INSERT INTO leaderboards (track, condition, season, last_updated, fingerprint)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![track, condition, season, last_updated, fingerprint],
                )?;
                tx.last_insert_rowid()
            }
        };

        {
            let mut insert = tx.prepare(
                "INSERT INTO entries (
                    leaderboard_id, position, driver_id, car_id, first_name, last_name,
                    short_name, best_time, sector_1, sector_2, sector_3, is_wet
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )?;
            for (position, e) in state.entries.iter().enumerate() {
                insert.execute(params![
                    id,
                    position as i64,
                    e.driver_id,
                    e.car_id,
                    e.first_name,
                    e.last_name,
                    e.short_name,
                    e.best_time,
                    e.sector_1,
                    e.sector_2,
                    e.sector_3,
                    e.is_wet,
                ])?;
            }

            let mut insert = tx.prepare(
                "INSERT INTO watermarks (leaderboard_id, host, timestamp) VALUES (?1, ?2, ?3)",
            )?;
            for (host, ts) in state.watermarks.iter() {
                insert.execute(params![id, host, format_timestamp(ts)])?;
            }
        }

        let event = Event::new(
            "leaderboard_saved",
            &state.key.to_string(),
            serde_json::json!({
                "entries": state.entries.len(),
                "fingerprint": fingerprint,
                "watermarks": state.watermarks.to_string_map(),
            }),
            &self.actor,
        );
        insert_event(&tx, &event)?;

        tx.commit()?;
        info!("saved {} ({} entries) to sqlite", state.key, state.entries.len());
        Ok(())
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Condition, Track};
    use crate::entry::tests::create_test_entry;
    use tempfile::TempDir;

    fn key() -> LeaderboardKey {
        LeaderboardKey {
            track: Track::Spa,
            condition: Condition::All,
            season: 4,
        }
    }

    fn create_test_state() -> LeaderboardState {
        let mut watermarks = Watermarks::new();
        watermarks.set("a.example", parse_timestamp("2022-10-02T10:00:00Z").unwrap());
        LeaderboardState {
            key: key(),
            entries: vec![
                create_test_entry("S1", 22, 137_000),
                create_test_entry("S2", 999, 138_500),
            ],
            watermarks,
            last_updated: Some(parse_timestamp("2022-10-03T00:00:00Z").unwrap()),
        }
    }

    #[test]
    fn test_missing_key_is_not_found() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(matches!(store.load(&key()), Err(LeaderboardError::NotFound(_))));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let state = create_test_state();

        store.save(&state).unwrap();
        assert_eq!(store.load(&key()).unwrap(), state);
    }

    #[test]
    fn test_save_replaces_whole_state() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut state = create_test_state();
        store.save(&state).unwrap();

        state.entries.remove(0);
        state.watermarks.set("b.example", parse_timestamp("2022-10-05T00:00:00Z").unwrap());
        store.save(&state).unwrap();

        let loaded = store.load(&key()).unwrap();
        assert_eq!(loaded.entries.len(), 1);
        assert_eq!(loaded.entries[0].driver_id, "S2");
        assert_eq!(loaded.watermarks.len(), 2);
    }

    #[test]
    fn test_unchanged_save_skips_event() {
        let store = SqliteStore::open_in_memory().unwrap().with_actor("test");
        let mut state = create_test_state();
        store.save(&state).unwrap();

        state.last_updated = Some(parse_timestamp("2022-10-04T00:00:00Z").unwrap());
        store.save(&state).unwrap();

        let events = store.events_for(&key()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "leaderboard_saved");
        assert_eq!(events[0].actor, "test");
        assert_eq!(events[0].data["entries"], 2);
        assert_eq!(store.load(&key()).unwrap().last_updated, state.last_updated);
    }

    #[test]
    fn test_changed_save_records_event() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut state = create_test_state();
        store.save(&state).unwrap();
        state.entries[0].best_time = 136_000;
        store.save(&state).unwrap();

        assert_eq!(store.events_for(&key()).unwrap().len(), 2);
    }

    #[test]
    fn test_file_backed_store_persists_across_opens() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("leaderboards.db");
        let state = create_test_state();

        SqliteStore::open(&path).unwrap().save(&state).unwrap();
        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.load(&key()).unwrap(), state);
    }
}
