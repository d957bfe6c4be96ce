use crate::model::{SnapshotAggregates, SnapshotKey, SnapshotSource};
use chrono::NaiveDate;

/// A snapshot's header row, without its track list. Used by listings
/// (`history`, `stats`) that don't need per-track detail.
#[derive(Debug, Clone)]
pub struct SnapshotSummary {
    pub key: SnapshotKey,
    pub chart_date: NaiveDate,
    pub source: SnapshotSource,
    pub aggregates: SnapshotAggregates,
}

/// Store-wide statistics.
#[derive(Debug, Default)]
pub struct StoreStats {
    pub total_snapshots: i64,
    pub observed_snapshots: i64,
    pub simulated_snapshots: i64,
    /// `(territory code, period, snapshot count, earliest date, latest date)`
    pub series: Vec<(String, String, i64, String, String)>,
}
