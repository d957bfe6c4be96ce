use chrono::{Datelike, NaiveDate};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// A chart territory. Codes match the source's country URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Territory {
    Argentina,
    Mexico,
    Spain,
    Global,
}

impl Territory {
    /// Short code used in source URLs and storage keys.
    pub fn code(&self) -> &'static str {
        match self {
            Territory::Argentina => "ar",
            Territory::Mexico => "mx",
            Territory::Spain => "es",
            Territory::Global => "global",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "ar" => Some(Territory::Argentina),
            "mx" => Some(Territory::Mexico),
            "es" => Some(Territory::Spain),
            "global" => Some(Territory::Global),
            _ => None,
        }
    }
}

impl std::fmt::Display for Territory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Chart cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Daily,
    Weekly,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Daily => "daily",
            Period::Weekly => "weekly",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s {
            "daily" => Some(Period::Daily),
            "weekly" => Some(Period::Weekly),
            _ => None,
        }
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ranked chart observation, immutable after normalization except for
/// `catalog_id`, which the resolver may fill in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartEntry {
    pub territory: Territory,
    pub period: Period,
    pub observed_at: NaiveDate,
    /// 1-based rank, unique within a snapshot.
    pub position: u32,
    pub title: String,
    pub artist: String,
    pub streams: u64,
    pub previous_position: Option<u32>,
    /// Best rank ever reached; defaults to `position` when unknown.
    pub peak_position: u32,
    pub weeks_on_chart: u32,
    pub is_new_entry: bool,
    pub is_re_entry: bool,
    /// Stable catalog identifier, if known or resolved.
    pub catalog_id: Option<String>,
}

/// Per-platform follower counts from the enrichment provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SocialFollowers {
    pub spotify: Option<u64>,
    pub instagram: Option<u64>,
    pub tiktok: Option<u64>,
    pub youtube: Option<u64>,
}

impl SocialFollowers {
    pub fn is_empty(&self) -> bool {
        self.spotify.is_none()
            && self.instagram.is_none()
            && self.tiktok.is_none()
            && self.youtube.is_none()
    }
}

/// Best-effort enrichment fields. Absence of any field is valid and never
/// blocks downstream computation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackMetadata {
    pub genres: Vec<String>,
    pub label: Option<String>,
    pub distributor: Option<String>,
    pub release_date: Option<NaiveDate>,
    pub origin_country: Option<String>,
    pub origin_city: Option<String>,
    pub social_followers: Option<SocialFollowers>,
    pub social_metrics_as_of: Option<NaiveDate>,
}

/// A chart entry plus whatever enrichment succeeded.
#[derive(Debug, Clone)]
pub struct EnrichedTrack {
    pub entry: ChartEntry,
    pub meta: TrackMetadata,
}

/// Derived time-series features for one track.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackFeatures {
    /// `previous_position - position`; positive = climbed. 0 with no previous.
    pub delta_position: i32,
    /// Streams growth vs the prior observation, in percent. 0 with no history.
    pub delta_streams_pct: f64,
    /// Mean position delta over the most recent <=4 transitions.
    pub speed_4w: f64,
    /// `speed_4w` minus the same over the window shifted back one step.
    pub acceleration: f64,
    pub baseline_position_12w: Option<f64>,
    pub baseline_streams_12w: Option<f64>,
    /// Composite 0-100 score; 50 is the no-signal neutral baseline.
    pub momentum_score: f64,
}

/// Fully analyzed track: entry + enrichment + features.
#[derive(Debug, Clone)]
pub struct TrackAnalysis {
    pub entry: ChartEntry,
    pub meta: TrackMetadata,
    pub features: TrackFeatures,
}

/// Where a stored snapshot's numbers came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotSource {
    /// Fetched from the chart source as real data.
    Observed,
    /// Synthesized from a later week to fill a gap. Excluded from
    /// momentum history and growth comparisons.
    Simulated,
}

impl SnapshotSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotSource::Observed => "observed",
            SnapshotSource::Simulated => "simulated",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s {
            "observed" => Some(SnapshotSource::Observed),
            "simulated" => Some(SnapshotSource::Simulated),
            _ => None,
        }
    }
}

/// Identity of one stored snapshot: `(territory, period, ISO year, ISO week)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SnapshotKey {
    pub territory: Territory,
    pub period: Period,
    pub iso_year: i32,
    pub iso_week: u32,
}

impl SnapshotKey {
    /// Key for the ISO week containing `date`.
    pub fn for_date(territory: Territory, period: Period, date: NaiveDate) -> Self {
        let iso = date.iso_week();
        Self {
            territory,
            period,
            iso_year: iso.year(),
            iso_week: iso.week(),
        }
    }

    /// Storage id, e.g. `ar-weekly-2026W31`.
    pub fn storage_id(&self) -> String {
        format!(
            "{}-{}-{}W{}",
            self.territory.code(),
            self.period,
            self.iso_year,
            self.iso_week
        )
    }
}

impl std::fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.storage_id())
    }
}

/// Snapshot-level stream and turnover aggregates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotAggregates {
    pub top10_streams: u64,
    pub top50_streams: u64,
    pub top200_streams: u64,
    pub track_count: u32,
    pub debut_count: u32,
    pub reentry_count: u32,
}

impl SnapshotAggregates {
    /// Compute aggregates from entries ordered by position.
    pub fn from_entries(entries: &[ChartEntry]) -> Self {
        let tier_sum = |n: usize| {
            entries
                .iter()
                .filter(|e| e.position as usize <= n)
                .map(|e| e.streams)
                .sum()
        };
        Self {
            top10_streams: tier_sum(10),
            top50_streams: tier_sum(50),
            top200_streams: entries.iter().map(|e| e.streams).sum(),
            track_count: entries.len() as u32,
            debut_count: entries.iter().filter(|e| e.is_new_entry).count() as u32,
            reentry_count: entries.iter().filter(|e| e.is_re_entry).count() as u32,
        }
    }
}

/// One full ranked chart observation, as stored and retrieved.
#[derive(Debug, Clone)]
pub struct ChartSnapshot {
    pub key: SnapshotKey,
    pub chart_date: NaiveDate,
    pub source: SnapshotSource,
    /// Ordered by position ascending; no component may reorder.
    pub tracks: Vec<TrackAnalysis>,
    pub aggregates: SnapshotAggregates,
}

/// Per-label rollup for one snapshot.
#[derive(Debug, Clone)]
pub struct LabelMarketShare {
    pub label: String,
    pub track_count: u32,
    pub market_share_pct: f64,
    pub average_position: f64,
    pub top10_track_count: u32,
    pub total_streams: u64,
    pub label_type: LabelType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelType {
    Major,
    Independent,
}

impl LabelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LabelType::Major => "major",
            LabelType::Independent => "independent",
        }
    }
}

/// Snapshot-level concentration indices.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MarketConcentration {
    pub top3_labels_share_pct: f64,
    pub top5_labels_share_pct: f64,
    /// Herfindahl-Hirschman Index: sum of squared market-share percentages
    /// over all labels. Range 0..=10000; 10000 is a monopoly.
    pub hhi_index: f64,
}

/// Week-over-week growth rates per stream tier, in percent.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GrowthRates {
    pub top10: f64,
    pub top50: f64,
    pub top200: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(position: u32, streams: u64, new_entry: bool, re_entry: bool) -> ChartEntry {
        ChartEntry {
            territory: Territory::Argentina,
            period: Period::Weekly,
            observed_at: NaiveDate::from_ymd_opt(2026, 7, 31).unwrap(),
            position,
            title: format!("Track {position}"),
            artist: "Artist".into(),
            streams,
            previous_position: None,
            peak_position: position,
            weeks_on_chart: 1,
            is_new_entry: new_entry,
            is_re_entry: re_entry,
            catalog_id: None,
        }
    }

    #[test]
    fn test_storage_id_format() {
        let key = SnapshotKey {
            territory: Territory::Argentina,
            period: Period::Weekly,
            iso_year: 2026,
            iso_week: 31,
        };
        assert_eq!(key.storage_id(), "ar-weekly-2026W31");
    }

    #[test]
    fn test_key_for_date_uses_iso_week() {
        // 2026-01-01 is a Thursday, ISO week 1 of 2026
        let d = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let key = SnapshotKey::for_date(Territory::Global, Period::Weekly, d);
        assert_eq!(key.iso_year, 2026);
        assert_eq!(key.iso_week, 1);

        // 2027-01-01 is a Friday and still belongs to ISO week 53 of 2026
        let d = NaiveDate::from_ymd_opt(2027, 1, 1).unwrap();
        let key = SnapshotKey::for_date(Territory::Global, Period::Weekly, d);
        assert_eq!(key.iso_year, 2026);
        assert_eq!(key.iso_week, 53);
    }

    #[test]
    fn test_aggregates_from_entries() {
        let mut entries: Vec<ChartEntry> = (1..=60).map(|p| entry(p, 1000, false, false)).collect();
        entries[0].is_new_entry = true;
        entries[1].is_re_entry = true;

        let agg = SnapshotAggregates::from_entries(&entries);
        assert_eq!(agg.top10_streams, 10_000);
        assert_eq!(agg.top50_streams, 50_000);
        assert_eq!(agg.top200_streams, 60_000);
        assert_eq!(agg.track_count, 60);
        assert_eq!(agg.debut_count, 1);
        assert_eq!(agg.reentry_count, 1);
    }

    #[test]
    fn test_territory_codes_roundtrip() {
        for t in [
            Territory::Argentina,
            Territory::Mexico,
            Territory::Spain,
            Territory::Global,
        ] {
            assert_eq!(Territory::from_code(t.code()), Some(t));
        }
        assert_eq!(Territory::from_code("xx"), None);
    }
}
