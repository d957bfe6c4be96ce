pub mod models;
pub mod queries;

use rusqlite::Connection;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Corrupt stored value: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// The historical store: durable keyed storage of chart snapshots plus
/// window queries over them. One snapshot row exists per
/// `(territory, period, iso_year, iso_week)`; re-ingestion replaces it.
pub struct Database {
    pub conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        // WAL mode for better concurrent read performance
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        self.migrate()?;
        Ok(())
    }

    fn migrate(&self) -> Result<()> {
        let version: i32 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        if version < 1 {
            self.migrate_v1()?;
        }

        self.conn.pragma_update(None, "user_version", 1)?;
        Ok(())
    }

    /// V1: snapshots keyed by (territory, period, iso_year, iso_week)
    /// with aggregate columns, plus per-track detail rows.
    fn migrate_v1(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS snapshots (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                territory       TEXT NOT NULL,
                period          TEXT NOT NULL,
                iso_year        INTEGER NOT NULL,
                iso_week        INTEGER NOT NULL,
                chart_date      TEXT NOT NULL,
                source          TEXT NOT NULL DEFAULT 'observed',

                -- Snapshot-level aggregates
                top10_streams   INTEGER NOT NULL,
                top50_streams   INTEGER NOT NULL,
                top200_streams  INTEGER NOT NULL,
                track_count     INTEGER NOT NULL,
                debut_count     INTEGER NOT NULL,
                reentry_count   INTEGER NOT NULL,

                created_at      TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE(territory, period, iso_year, iso_week)
            );

            CREATE INDEX IF NOT EXISTS idx_snapshots_key
                ON snapshots(territory, period, iso_year, iso_week);

            CREATE TABLE IF NOT EXISTS snapshot_tracks (
                id                    INTEGER PRIMARY KEY AUTOINCREMENT,
                snapshot_id           INTEGER NOT NULL
                                      REFERENCES snapshots(id) ON DELETE CASCADE,

                -- Chart observation
                position              INTEGER NOT NULL,
                title                 TEXT NOT NULL,
                artist                TEXT NOT NULL,
                streams               INTEGER NOT NULL,
                previous_position     INTEGER,
                peak_position         INTEGER NOT NULL,
                weeks_on_chart        INTEGER NOT NULL,
                is_new_entry          INTEGER NOT NULL,
                is_re_entry           INTEGER NOT NULL,
                catalog_id            TEXT,

                -- Enrichment (best-effort, nullable)
                genres                TEXT,  -- JSON array
                label                 TEXT,
                distributor           TEXT,
                release_date          TEXT,
                origin_country        TEXT,
                origin_city           TEXT,
                social_followers      TEXT,  -- JSON object
                social_metrics_as_of  TEXT,

                -- Derived features
                delta_position        INTEGER NOT NULL DEFAULT 0,
                delta_streams_pct     REAL NOT NULL DEFAULT 0,
                speed_4w              REAL NOT NULL DEFAULT 0,
                acceleration          REAL NOT NULL DEFAULT 0,
                baseline_position_12w REAL,
                baseline_streams_12w  REAL,
                momentum_score        REAL NOT NULL DEFAULT 50,

                UNIQUE(snapshot_id, position)
            );

            CREATE INDEX IF NOT EXISTS idx_snapshot_tracks_snapshot
                ON snapshot_tracks(snapshot_id);
            CREATE INDEX IF NOT EXISTS idx_snapshot_tracks_catalog
                ON snapshot_tracks(catalog_id);
            CREATE INDEX IF NOT EXISTS idx_snapshot_tracks_title_artist
                ON snapshot_tracks(title, artist);
            ",
        )?;
        Ok(())
    }
}
