use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use log::{info, warn};
use rusqlite::{Connection, params};

use crate::{error::StoreError, schema::MarketSnapshot, util};

/// Persistence contract used by the market scheduler.
///
/// GUARANTEES required from implementations:
/// - (provider, item_id, region_id, timestamp) is unique
/// - Inserting an already stored point is a silent no-op
/// - Pruning is all-or-nothing per call
///
pub trait SnapshotStore: Send + Sync {
    /// Creates the snapshot table and its indexes if absent.
    fn migrate(&self) -> Result<(), StoreError>;

    /// Inserts snapshots, ignoring duplicates.
    ///
    /// Returns the number of rows actually added.
    fn insert_snapshots(&self, snapshots: &[MarketSnapshot]) -> Result<usize, StoreError>;

    /// Deletes rows strictly older than `cutoff`.
    ///
    /// Returns the number of rows removed.
    fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Points for one item and region at or after `since`, oldest first.
    fn history(
        &self,
        item_id: i64,
        region_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<MarketSnapshot>, StoreError>;

    fn count(&self) -> Result<usize, StoreError>;
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS market_snapshots (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        provider TEXT NOT NULL,
        item_id INTEGER NOT NULL,
        region_id INTEGER NOT NULL,
        ts INTEGER NOT NULL,
        price REAL,
        volume REAL,
        spread REAL,
        payload_json TEXT,
        ingested_from_sde INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL,
        CONSTRAINT uq_market_snapshots_provider_item_region_ts
            UNIQUE (provider, item_id, region_id, ts)
    );
    CREATE INDEX IF NOT EXISTS ix_market_snapshots_item_ts
        ON market_snapshots (item_id, ts);
";

/// SQLite-backed `market_snapshots` table.
///
/// STORAGE:
/// - `ts` is UTC epoch milliseconds
/// - `payload_json` is the raw provider entry as JSON text
///
/// The connection is owned here and passed around explicitly as
/// `Arc<dyn SnapshotStore>`; there is no global connection.
pub struct SqliteSnapshotStore {
    conn: Mutex<Connection>,
}

impl SqliteSnapshotStore {
    /// Opens (or creates) the database file and applies the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path.as_ref())?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        let store = Self::from_connection(conn)?;
        info!("snapshot store ready path={}", path.as_ref().display());
        Ok(store)
    }

    /// Private in-memory database, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            warn!("snapshot store mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

impl SnapshotStore for SqliteSnapshotStore {
    fn migrate(&self) -> Result<(), StoreError> {
        self.lock().execute_batch(SCHEMA)?;
        Ok(())
    }

    fn insert_snapshots(&self, snapshots: &[MarketSnapshot]) -> Result<usize, StoreError> {
        if snapshots.is_empty() {
            return Ok(0);
        }

        let created_at = util::now_utc().timestamp_millis();
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let mut inserted = 0;

        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO market_snapshots
                    (provider, item_id, region_id, ts, price, volume, spread,
                     payload_json, ingested_from_sde, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT (provider, item_id, region_id, ts) DO NOTHING",
            )?;

            for s in snapshots {
                inserted += stmt.execute(params![
                    s.provider,
                    s.item_id,
                    s.region_id,
                    s.timestamp.timestamp_millis(),
                    s.price,
                    s.volume,
                    s.spread,
                    serde_json::to_string(&s.payload)?,
                    s.from_sde,
                    created_at,
                ])?;
            }
        }

        tx.commit()?;
        Ok(inserted)
    }

    fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM market_snapshots WHERE ts < ?1",
            params![cutoff.timestamp_millis()],
        )?;
        tx.commit()?;
        Ok(removed)
    }

    fn history(
        &self,
        item_id: i64,
        region_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<MarketSnapshot>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT provider, ts, price, volume, spread, payload_json, ingested_from_sde
             FROM market_snapshots
             WHERE item_id = ?1 AND region_id = ?2 AND ts >= ?3
             ORDER BY ts, provider",
        )?;

        let rows = stmt.query_map(params![item_id, region_id, since.timestamp_millis()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Option<f64>>(2)?,
                row.get::<_, Option<f64>>(3)?,
                row.get::<_, Option<f64>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, bool>(6)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (provider, ts, price, volume, spread, payload, from_sde) = row?;
            let Some(timestamp) = DateTime::from_timestamp_millis(ts) else {
                warn!("skipping row with out-of-range ts={} item={}", ts, item_id);
                continue;
            };
            let payload = match payload {
                Some(raw) => serde_json::from_str(&raw)?,
                None => serde_json::Value::Null,
            };

            out.push(MarketSnapshot {
                provider,
                item_id,
                region_id,
                timestamp,
                price,
                volume,
                spread,
                payload,
                from_sde,
            });
        }

        Ok(out)
    }

    fn count(&self) -> Result<usize, StoreError> {
        let conn = self.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM market_snapshots", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn snapshot(provider: &str, item_id: i64, timestamp: DateTime<Utc>) -> MarketSnapshot {
        MarketSnapshot {
            provider: provider.to_string(),
            item_id,
            region_id: 10000002,
            timestamp,
            price: Some(50.0),
            volume: Some(1000.0),
            spread: None,
            payload: json!({ "stub": true }),
            from_sde: false,
        }
    }

    #[test]
    fn duplicate_points_are_ignored() {
        let store = SqliteSnapshotStore::open_in_memory().unwrap();
        let now = util::now_utc();
        let point = snapshot("adam4eve", 603, now);

        assert_eq!(store.insert_snapshots(&[point.clone()]).unwrap(), 1);
        assert_eq!(store.insert_snapshots(&[point.clone()]).unwrap(), 0);
        assert_eq!(store.insert_snapshots(&[point.clone(), point]).unwrap(), 0);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn identity_includes_provider_and_region() {
        let store = SqliteSnapshotStore::open_in_memory().unwrap();
        let now = util::now_utc();
        let mut other_region = snapshot("esi", 34, now);
        other_region.region_id = 10000043;

        let inserted = store
            .insert_snapshots(&[snapshot("esi", 34, now), snapshot("adam4eve", 34, now), other_region])
            .unwrap();
        assert_eq!(inserted, 3);
    }

    #[test]
    fn prune_respects_retention_window() {
        let store = SqliteSnapshotStore::open_in_memory().unwrap();
        let now = util::now_utc();
        store
            .insert_snapshots(&[
                snapshot("adam4eve", 603, now),
                snapshot("adam4eve", 603, now - Duration::days(100)),
            ])
            .unwrap();

        let cutoff = now - Duration::days(1);
        assert_eq!(store.prune_older_than(cutoff).unwrap(), 1);
        assert_eq!(store.prune_older_than(cutoff).unwrap(), 0);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn prune_keeps_row_exactly_at_cutoff() {
        let store = SqliteSnapshotStore::open_in_memory().unwrap();
        let cutoff = util::now_utc() - Duration::days(1);
        store.insert_snapshots(&[snapshot("esi", 1, cutoff)]).unwrap();

        assert_eq!(store.prune_older_than(cutoff).unwrap(), 0);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn history_round_trips_fields_in_order() {
        let store = SqliteSnapshotStore::open_in_memory().unwrap();
        let now = util::now_utc();
        let mut older = snapshot("esi", 34, now - Duration::days(2));
        older.spread = Some(1.5);
        older.from_sde = true;

        store
            .insert_snapshots(&[snapshot("esi", 34, now), older.clone(), snapshot("esi", 35, now)])
            .unwrap();

        let rows = store.history(34, 10000002, now - Duration::days(7)).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].timestamp, older.timestamp);
        assert_eq!(rows[0].spread, Some(1.5));
        assert!(rows[0].from_sde);
        assert_eq!(rows[0].payload, json!({ "stub": true }));
    }

    #[test]
    fn migrate_is_repeatable() {
        let store = SqliteSnapshotStore::open_in_memory().unwrap();
        store.insert_snapshots(&[snapshot("esi", 1, util::now_utc())]).unwrap();
        store.migrate().unwrap();
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("market.sqlite");

        {
            let store = SqliteSnapshotStore::open(&path).unwrap();
            store.insert_snapshots(&[snapshot("stub", 1, util::now_utc())]).unwrap();
        }

        let store = SqliteSnapshotStore::open(&path).unwrap();
        assert_eq!(store.count().unwrap(), 1);
    }
}
