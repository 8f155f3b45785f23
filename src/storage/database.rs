//! SQLite graph store with migrations
//!
//! Nodes and relationships of the communication graph, plus a ledger of
//! capture runs, in a single SQLite file behind an r2d2 pool.

use crate::config::{parse_duration, StoreConfig};
use crate::error::{PciError, Result};
use crate::graph::{Edge, GraphStats, GraphStore, NewNode, Node, PacketWrite, RunRecord};
use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

const DEFAULT_POOL_SIZE: u32 = 8;
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const NODE_COLUMNS: &str =
    "id, label, key_property, key, properties, count, creation_date, last_update";

/// Graph database with migration support
pub struct Database {
    pool: DbPool,
    closed: AtomicBool,
}

impl Database {
    /// Create a database with default pool settings
    pub fn new(db_path: &Path) -> Result<Self> {
        Self::with_pool(db_path, DEFAULT_POOL_SIZE, DEFAULT_CONNECT_TIMEOUT)
    }

    /// Create a database from the `[store]` configuration section
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let timeout = parse_duration(&config.connect_timeout).ok_or_else(|| {
            PciError::InvalidConfigValue {
                path: "store.connect_timeout".to_string(),
                message: format!("Invalid duration: {}", config.connect_timeout),
            }
        })?;
        Self::with_pool(&config.path, config.pool_size, timeout)
    }

    /// Create a database with an explicit pool size and acquisition timeout
    pub fn with_pool(db_path: &Path, max_size: u32, connect_timeout: Duration) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| PciError::Io {
                    source: e,
                    context: format!("Failed to create database directory: {:?}", parent),
                })?;
            }
        }

        // Per-connection settings
        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA foreign_keys = ON;
                PRAGMA busy_timeout = 5000;
                ",
            )
        });

        let pool = Pool::builder()
            .max_size(max_size)
            .connection_timeout(connect_timeout)
            .build(manager)
            .map_err(|e| {
                PciError::StoreUnavailable(format!("Failed to create connection pool: {}", e))
            })?;

        {
            let conn = pool
                .get()
                .map_err(|e| PciError::StoreUnavailable(format!("Failed to get connection: {}", e)))?;

            // WAL is persistent, set once per file
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                ",
            )?;
        }

        let db = Self {
            pool,
            closed: AtomicBool::new(false),
        };

        db.migrate()?;

        Ok(db)
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PciError::StoreUnavailable("Graph store is closed".to_string()));
        }
        self.pool
            .get()
            .map_err(|e| PciError::StoreUnavailable(format!("Failed to get connection: {}", e)))
    }

    /// Run one operation on a pooled connection
    fn with_conn<T>(&self, op: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let conn = self.get_conn()?;
        op(&*conn).map_err(classify_error)
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM _migrations",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::info!("Applying migration {}", version);

                conn.execute_batch(migration)?;

                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Get database statistics
    pub fn db_stats(&self) -> Result<GraphStats> {
        self.with_conn(|conn| {
            let mut stats = GraphStats::default();

            let mut stmt = conn.prepare("SELECT label, COUNT(*) FROM nodes GROUP BY label")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (label, count) = row?;
                let count = count as usize;
                match label.as_str() {
                    "local_machine" => stats.local_machines = count,
                    "machine" => stats.machines = count,
                    "network" => stats.networks = count,
                    "machine_ipv6" => stats.ipv6_machines = count,
                    other => tracing::warn!("Unexpected node label in store: {}", other),
                }
            }

            let relationships: i64 =
                conn.query_row("SELECT COUNT(*) FROM relationships", [], |row| row.get(0))?;
            let runs: i64 = conn.query_row("SELECT COUNT(*) FROM runs", [], |row| row.get(0))?;

            stats.relationships = relationships as usize;
            stats.runs = runs as usize;
            Ok(stats)
        })
    }

    /// Load a run ledger entry
    pub fn get_run(&self, id: &uuid::Uuid) -> Result<Option<RunRecord>> {
        let row = self.with_conn(|conn| {
            conn.query_row(
                "SELECT mode, source, started_at, stopped_at, status,
                        packets_seen, packets_dropped, stop_reason
                 FROM runs WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        parse_timestamp(row, 2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, i64>(6)?,
                        row.get::<_, Option<String>>(7)?,
                    ))
                },
            )
            .optional()
        })?;

        let Some((mode, source, started_at, stopped_at, status, seen, dropped, reason)) = row
        else {
            return Ok(None);
        };

        let stopped_at = stopped_at
            .map(|ts| {
                DateTime::parse_from_rfc3339(&ts)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| PciError::Config(format!("Corrupt run timestamp {}: {}", ts, e)))
            })
            .transpose()?;

        let status = serde_json::from_value(serde_json::Value::String(status)).map_err(|e| {
            PciError::Json {
                source: e,
                context: "Failed to decode run status".to_string(),
            }
        })?;

        Ok(Some(RunRecord {
            id: *id,
            mode,
            source,
            started_at,
            stopped_at,
            status,
            packets_seen: seen as u64,
            packets_dropped: dropped as u64,
            stop_reason: reason,
        }))
    }
}

impl GraphStore for Database {
    fn find_node(&self, label: &str, key_property: &str, key: &str) -> Result<Option<Node>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM nodes WHERE label = ?1 AND key_property = ?2 AND key = ?3",
                    NODE_COLUMNS
                ),
                params![label, key_property, key],
                node_from_row,
            )
            .optional()
        })
    }

    fn create_node(&self, node: NewNode) -> Result<Node> {
        let properties = encode_properties(&node)?;
        let created_at = format_timestamp(&node.created_at);

        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "INSERT INTO nodes (label, key_property, key, properties, count, creation_date, last_update)
                     VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5)
                     RETURNING {}",
                    NODE_COLUMNS
                ),
                params![node.label, node.key_property, node.key, properties, created_at],
                node_from_row,
            )
        })
    }

    fn touch_node(&self, id: i64, now: DateTime<Utc>) -> Result<Node> {
        let now = format_timestamp(&now);
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "UPDATE nodes SET count = count + 1, last_update = ?2 WHERE id = ?1 RETURNING {}",
                    NODE_COLUMNS
                ),
                params![id, now],
                node_from_row,
            )
        })
    }

    fn merge_edge(&self, source_id: i64, target_id: i64, rel_type: &str) -> Result<bool> {
        let now = format_timestamp(&Utc::now());
        self.with_conn(|conn| insert_edge(conn, source_id, target_id, rel_type, &now))
    }

    fn apply_packet(
        &self,
        source: &NewNode,
        destination: &NewNode,
        rel_type: &str,
    ) -> Result<PacketWrite> {
        let source_props = encode_properties(source)?;
        let destination_props = encode_properties(destination)?;

        let mut conn = self.get_conn()?;
        apply_in_transaction(
            &mut conn,
            (source, &source_props),
            (destination, &destination_props),
            rel_type,
        )
        .map_err(classify_error)
    }

    fn find_edges(&self, source_id: i64, target_id: i64) -> Result<Vec<Edge>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, source_id, target_id, rel_type, created_at
                 FROM relationships WHERE source_id = ?1 AND target_id = ?2
                 ORDER BY id",
            )?;
            let edges = stmt.query_map(params![source_id, target_id], |row| {
                Ok(Edge {
                    id: row.get(0)?,
                    source_id: row.get(1)?,
                    target_id: row.get(2)?,
                    rel_type: row.get(3)?,
                    created_at: parse_timestamp(row, 4)?,
                })
            })?;
            let edges = edges.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(edges)
        })
    }

    fn record_run(&self, run: &RunRecord) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO runs (id, mode, source, started_at, stopped_at, status,
                                   packets_seen, packets_dropped, stop_reason)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(id) DO UPDATE SET
                    stopped_at = excluded.stopped_at,
                    status = excluded.status,
                    packets_seen = excluded.packets_seen,
                    packets_dropped = excluded.packets_dropped,
                    stop_reason = excluded.stop_reason",
                params![
                    run.id.to_string(),
                    run.mode,
                    run.source,
                    format_timestamp(&run.started_at),
                    run.stopped_at.as_ref().map(format_timestamp),
                    run.status.as_str(),
                    run.packets_seen as i64,
                    run.packets_dropped as i64,
                    run.stop_reason,
                ],
            )
        })?;
        Ok(())
    }

    fn stats(&self) -> Result<GraphStats> {
        self.db_stats()
    }

    fn close(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }

        // Fold the WAL back into the main file before letting go
        let checkpoint = self.with_conn(|conn| {
            conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
        });
        self.closed.store(true, Ordering::Release);

        if let Err(e) = checkpoint {
            tracing::warn!("WAL checkpoint on close failed: {}", e);
        }
        tracing::info!("Graph store connection released");
        Ok(())
    }
}

/// Map SQLite failures that mean "backend not reachable right now" onto
/// `StoreUnavailable`; everything else stays a database error.
fn classify_error(e: rusqlite::Error) -> PciError {
    match e.sqlite_error_code() {
        Some(
            ErrorCode::DatabaseBusy
            | ErrorCode::DatabaseLocked
            | ErrorCode::CannotOpen
            | ErrorCode::SystemIoFailure
            | ErrorCode::ReadOnly,
        ) => PciError::StoreUnavailable(e.to_string()),
        _ => PciError::Database(e),
    }
}

fn encode_properties(node: &NewNode) -> Result<String> {
    serde_json::to_string(&node.properties).map_err(|e| PciError::Json {
        source: e,
        context: format!("Failed to encode properties of {}", node.key),
    })
}

/// Source upsert, destination upsert and edge merge in one transaction.
/// Dropping the transaction on error rolls all three back.
fn apply_in_transaction(
    conn: &mut Connection,
    source: (&NewNode, &str),
    destination: (&NewNode, &str),
    rel_type: &str,
) -> rusqlite::Result<PacketWrite> {
    let observed = format_timestamp(&destination.0.created_at);
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let source = upsert_node(&tx, source.0, source.1)?;
    let destination = upsert_node(&tx, destination.0, destination.1)?;
    let edge_created = insert_edge(&tx, source.id, destination.id, rel_type, &observed)?;

    tx.commit()?;

    Ok(PacketWrite {
        source,
        destination,
        edge_created,
    })
}

/// Insert with `count = 1`, or bump `count` and `last_update` of the existing row
fn upsert_node(conn: &Connection, node: &NewNode, properties: &str) -> rusqlite::Result<Node> {
    let observed = format_timestamp(&node.created_at);
    conn.query_row(
        &format!(
            "INSERT INTO nodes (label, key_property, key, properties, count, creation_date, last_update)
             VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5)
             ON CONFLICT(label, key) DO UPDATE
                 SET count = count + 1, last_update = excluded.last_update
             RETURNING {}",
            NODE_COLUMNS
        ),
        params![node.label, node.key_property, node.key, properties, observed],
        node_from_row,
    )
}

/// Returns true when the edge did not exist yet
fn insert_edge(
    conn: &Connection,
    source_id: i64,
    target_id: i64,
    rel_type: &str,
    created_at: &str,
) -> rusqlite::Result<bool> {
    let inserted = conn.execute(
        "INSERT INTO relationships (source_id, target_id, rel_type, created_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(source_id, target_id, rel_type) DO NOTHING",
        params![source_id, target_id, rel_type, created_at],
    )?;
    Ok(inserted == 1)
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn node_from_row(row: &Row<'_>) -> rusqlite::Result<Node> {
    let raw_props: String = row.get(4)?;
    let properties = serde_json::from_str(&raw_props)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;
    let count: i64 = row.get(5)?;

    Ok(Node {
        id: row.get(0)?,
        label: row.get(1)?,
        key_property: row.get(2)?,
        key: row.get(3)?,
        properties,
        count: count as u64,
        created_at: parse_timestamp(row, 6)?,
        last_update: parse_timestamp(row, 7)?,
    })
}

/// Database migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: Initial graph schema
    r#"
    -- Entities, one row per (label, key)
    CREATE TABLE nodes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        label TEXT NOT NULL,
        key_property TEXT NOT NULL,
        key TEXT NOT NULL,
        properties TEXT NOT NULL DEFAULT '{}',  -- JSON
        count INTEGER NOT NULL DEFAULT 1,
        creation_date TEXT NOT NULL,
        last_update TEXT NOT NULL
    );

    CREATE UNIQUE INDEX idx_nodes_label_key ON nodes(label, key);

    -- Protocol-typed relationships
    CREATE TABLE relationships (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source_id INTEGER NOT NULL,
        target_id INTEGER NOT NULL,
        rel_type TEXT NOT NULL,
        created_at TEXT NOT NULL,
        FOREIGN KEY (source_id) REFERENCES nodes(id),
        FOREIGN KEY (target_id) REFERENCES nodes(id),
        UNIQUE (source_id, target_id, rel_type)
    );

    CREATE INDEX idx_relationships_target ON relationships(target_id);
    CREATE INDEX idx_relationships_type ON relationships(rel_type);

    -- Capture runs
    CREATE TABLE runs (
        id TEXT PRIMARY KEY,
        mode TEXT NOT NULL,
        source TEXT NOT NULL,
        started_at TEXT NOT NULL,
        stopped_at TEXT,
        status TEXT NOT NULL,
        packets_seen INTEGER NOT NULL DEFAULT 0,
        packets_dropped INTEGER NOT NULL DEFAULT 0,
        stop_reason TEXT
    );

    CREATE INDEX idx_runs_started_at ON runs(started_at);
    "#,
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::RunStatus;
    use serde_json::{Map, Value};
    use tempfile::TempDir;

    fn new_node(label: &str, key: &str) -> NewNode {
        NewNode {
            label: label.to_string(),
            key_property: "ipv4".to_string(),
            key: key.to_string(),
            properties: Map::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_database_creation() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("graph.sqlite");

        let _db = Database::new(&db_path).unwrap();
        assert!(db_path.exists());
    }

    #[test]
    fn test_migrations() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("graph.sqlite");

        let db = Database::new(&db_path).unwrap();
        let conn = db.get_conn().unwrap();
        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM _migrations", [], |row| row.get(0))
            .unwrap();

        assert_eq!(version, MIGRATIONS.len() as i32);
        drop(conn);

        // Reopening does not re-apply
        drop(db);
        let db = Database::new(&db_path).unwrap();
        let conn = db.get_conn().unwrap();
        let applied: i32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(applied, MIGRATIONS.len() as i32);
    }

    #[test]
    fn test_schema_exists() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("graph.sqlite")).unwrap();
        let conn = db.get_conn().unwrap();

        for table in ["nodes", "relationships", "runs"] {
            let count: i32 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    params![table],
                    |row| row.get(0),
                )
                .unwrap();

            assert_eq!(count, 1, "Table {} should exist", table);
        }
    }

    #[test]
    fn test_foreign_keys_enabled_on_every_connection() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("graph.sqlite")).unwrap();

        let first = db.get_conn().unwrap();
        let second = db.get_conn().unwrap();
        for conn in [&first, &second] {
            let fk_enabled: i32 = conn
                .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
                .unwrap();
            assert_eq!(fk_enabled, 1);
        }
    }

    #[test]
    fn test_create_find_touch() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("graph.sqlite")).unwrap();

        assert!(db.find_node("machine", "ipv4", "8.8.8.8").unwrap().is_none());

        let mut props = Map::new();
        props.insert("domain".to_string(), Value::from("dns.google"));
        let created = db
            .create_node(NewNode {
                properties: props,
                ..new_node("machine", "8.8.8.8")
            })
            .unwrap();
        assert_eq!(created.count, 1);
        assert_eq!(created.created_at, created.last_update);

        let found = db.find_node("machine", "ipv4", "8.8.8.8").unwrap().unwrap();
        assert_eq!(found, created);
        assert_eq!(found.properties.get("domain"), Some(&Value::from("dns.google")));

        let touched = db.touch_node(created.id, Utc::now()).unwrap();
        assert_eq!(touched.count, 2);
        assert_eq!(touched.created_at, created.created_at);
        assert!(touched.last_update >= created.last_update);
    }

    #[test]
    fn test_same_key_different_label() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("graph.sqlite")).unwrap();

        db.create_node(new_node("machine", "1.2.3.4")).unwrap();
        db.create_node(new_node("local_machine", "1.2.3.4")).unwrap();

        let stats = db.stats().unwrap();
        assert_eq!(stats.machines, 1);
        assert_eq!(stats.local_machines, 1);
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("graph.sqlite")).unwrap();

        db.create_node(new_node("machine", "1.2.3.4")).unwrap();
        assert!(db.create_node(new_node("machine", "1.2.3.4")).is_err());
    }

    #[test]
    fn test_touch_missing_node() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("graph.sqlite")).unwrap();
        assert!(db.touch_node(42, Utc::now()).is_err());
    }

    #[test]
    fn test_merge_edge() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("graph.sqlite")).unwrap();

        let a = db.create_node(new_node("local_machine", "192.168.1.2")).unwrap();
        let b = db.create_node(new_node("machine", "8.8.8.8")).unwrap();

        assert!(db.merge_edge(a.id, b.id, "DNS").unwrap());
        assert!(!db.merge_edge(a.id, b.id, "DNS").unwrap());
        assert!(db.merge_edge(a.id, b.id, "UDP").unwrap());
        // direction matters
        assert!(db.merge_edge(b.id, a.id, "DNS").unwrap());

        let edges = db.find_edges(a.id, b.id).unwrap();
        let types: Vec<&str> = edges.iter().map(|e| e.rel_type.as_str()).collect();
        assert_eq!(types, vec!["DNS", "UDP"]);
        assert_eq!(db.stats().unwrap().relationships, 3);
    }

    #[test]
    fn test_edge_requires_nodes() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("graph.sqlite")).unwrap();
        assert!(db.merge_edge(1, 2, "TCP").is_err());
    }

    #[test]
    fn test_apply_packet() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("graph.sqlite")).unwrap();

        let src = new_node("local_machine", "192.168.1.2");
        let dst = new_node("machine", "8.8.8.8");

        let first = db.apply_packet(&src, &dst, "DNS").unwrap();
        assert_eq!(first.source.count, 1);
        assert_eq!(first.destination.count, 1);
        assert!(first.edge_created);

        let second = db.apply_packet(&src, &dst, "DNS").unwrap();
        assert_eq!(second.source.id, first.source.id);
        assert_eq!(second.source.count, 2);
        assert_eq!(second.destination.count, 2);
        assert_eq!(second.source.created_at, first.source.created_at);
        assert!(!second.edge_created);

        // Self traffic bumps the one node twice
        let same = db.apply_packet(&src, &src, "ARP").unwrap();
        assert_eq!(same.source.id, same.destination.id);
        assert_eq!(same.destination.count, 4);
        assert_eq!(db.find_edges(same.source.id, same.source.id).unwrap().len(), 1);
    }

    #[test]
    fn test_apply_packet_rolls_back_on_destination_failure() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("graph.sqlite")).unwrap();

        db.get_conn()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER refuse_blocked BEFORE INSERT ON nodes
                 WHEN NEW.key = '10.0.0.3'
                 BEGIN SELECT RAISE(ABORT, 'blocked'); END;",
            )
            .unwrap();

        let src = new_node("local_machine", "192.168.1.1");
        db.apply_packet(&src, &new_node("local_machine", "10.0.0.2"), "TCP")
            .unwrap();

        let result = db.apply_packet(&src, &new_node("local_machine", "10.0.0.3"), "TCP");
        assert!(result.is_err());

        let stored = db
            .find_node("local_machine", "ipv4", "192.168.1.1")
            .unwrap()
            .unwrap();
        assert_eq!(stored.count, 1);
        assert!(db.find_node("local_machine", "ipv4", "10.0.0.3").unwrap().is_none());
        assert_eq!(db.stats().unwrap().relationships, 1);

        // The connection is usable again afterwards
        let next = db
            .apply_packet(&src, &new_node("local_machine", "10.0.0.4"), "TCP")
            .unwrap();
        assert_eq!(next.source.count, 2);
    }

    #[test]
    fn test_run_ledger() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("graph.sqlite")).unwrap();

        let mut run = RunRecord::start("file", "/tmp/capture.pcapng");
        db.record_run(&run).unwrap();

        let stored = db.get_run(&run.id).unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Running);
        assert!(stored.stopped_at.is_none());

        run.status = RunStatus::Stopped;
        run.stopped_at = Some(Utc::now());
        run.packets_seen = 5;
        run.packets_dropped = 1;
        run.stop_reason = Some("end of stream".to_string());
        db.record_run(&run).unwrap();

        let stored = db.get_run(&run.id).unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Stopped);
        assert_eq!(stored.packets_seen, 5);
        assert_eq!(stored.packets_dropped, 1);
        assert_eq!(stored.stop_reason.as_deref(), Some("end of stream"));
        assert_eq!(db.stats().unwrap().runs, 1);
    }

    #[test]
    fn test_closed_store_unavailable() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("graph.sqlite")).unwrap();

        db.close().unwrap();
        db.close().unwrap();

        let result = db.find_node("machine", "ipv4", "8.8.8.8");
        assert!(matches!(result, Err(PciError::StoreUnavailable(_))));
    }
}
