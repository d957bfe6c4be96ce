use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Days, NaiveDate};
use thiserror::Error;

use crate::db::models::SnapshotSummary;
use crate::db::{Database, DbError};
use crate::enrich::client::ProviderClient;
use crate::enrich::{EnrichStats, Enricher};
use crate::features::{FeatureEngine, MomentumWeights};
use crate::model::{
    ChartEntry, ChartSnapshot, EnrichedTrack, GrowthRates, Period, SnapshotAggregates,
    SnapshotKey, SnapshotSource, Territory, TrackAnalysis, TrackMetadata,
};
use crate::resolver::{Resolution, Resolver};
use crate::similarity::TokenSetSimilarity;
use crate::source::{normalize_rows, ChartSource, SourceError};
use crate::EXPECTED_CHART_SIZE;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// The chart source could not be reached or returned nothing parseable.
    /// Fatal for the run; nothing is persisted.
    #[error("Chart source unavailable: {0}")]
    SourceUnavailable(#[from] SourceError),
    #[error("Storage error: {0}")]
    Db(#[from] DbError),
}

/// Advisory data-quality report. Never blocks persistence; surfaced to the
/// caller alongside the result.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub issues: Vec<String>,
    pub completeness_pct: f64,
}

/// Flag data-quality problems in an assembled snapshot: incompleteness
/// below 90% of the expected size, missing catalog ids, duplicate
/// positions, and more than 10% of tracks without stream counts.
pub fn validate(tracks: &[TrackAnalysis]) -> ValidationReport {
    let mut issues = Vec::new();
    let actual = tracks.len();
    let expected = EXPECTED_CHART_SIZE;
    let completeness_pct = actual as f64 / expected as f64 * 100.0;

    if (actual as f64) < expected as f64 * 0.9 {
        issues.push(format!("Incomplete snapshot: {actual}/{expected} tracks"));
    }

    let missing_ids = tracks.iter().filter(|t| t.entry.catalog_id.is_none()).count();
    if missing_ids > 0 {
        issues.push(format!("{missing_ids} tracks missing a catalog id"));
    }

    let mut seen = std::collections::HashSet::new();
    let duplicates = tracks
        .iter()
        .filter(|t| !seen.insert(t.entry.position))
        .count();
    if duplicates > 0 {
        issues.push(format!("{duplicates} duplicate chart positions"));
    }

    let missing_streams = tracks.iter().filter(|t| t.entry.streams == 0).count();
    if missing_streams as f64 > actual as f64 * 0.1 {
        issues.push(format!("{missing_streams} tracks missing streams data"));
    }

    ValidationReport {
        is_valid: issues.is_empty(),
        issues,
        completeness_pct,
    }
}

/// Result of one ingestion run.
#[derive(Debug)]
pub struct IngestOutcome {
    pub snapshot: ChartSnapshot,
    pub validation: ValidationReport,
    pub enrich_stats: EnrichStats,
    /// Catalog ids filled in by fuzzy resolution this run.
    pub resolved: usize,
}

/// Week-over-week comparison for a series.
#[derive(Debug)]
pub struct WeekComparison {
    pub current: ChartSnapshot,
    pub previous: Option<SnapshotSummary>,
    pub growth: GrowthRates,
}

/// Enrichment batching knobs, from config.
#[derive(Debug, Clone, Copy)]
pub struct EnrichOptions {
    pub batch_size: usize,
    pub batch_pause_ms: u64,
}

/// Sequences one ingestion run: load snapshot, resolve identifiers,
/// enrich, compute features, validate, persist. Also drives multi-week
/// history collection and week-over-week comparison.
pub struct Pipeline<'a> {
    db: &'a Database,
    source: &'a dyn ChartSource,
    provider: Option<&'a ProviderClient>,
    engine: FeatureEngine,
    enrich_options: EnrichOptions,
    /// Delay between sequential backfill requests.
    history_delay: Duration,
    /// Per-key run locks: the store's upsert is last-write-wins, so two
    /// runs for the same key must not interleave. Distinct keys proceed
    /// independently.
    run_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        db: &'a Database,
        source: &'a dyn ChartSource,
        provider: Option<&'a ProviderClient>,
        weights: MomentumWeights,
        enrich_options: EnrichOptions,
        history_delay_ms: u64,
    ) -> Self {
        Self {
            db,
            source,
            provider,
            engine: FeatureEngine::new(weights),
            enrich_options,
            history_delay: Duration::from_millis(history_delay_ms),
            run_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Run one full ingestion for the week containing `date`.
    pub fn ingest(
        &self,
        territory: Territory,
        period: Period,
        date: NaiveDate,
    ) -> Result<IngestOutcome, PipelineError> {
        let key = SnapshotKey::for_date(territory, period, date);
        let lock = self.run_lock(&key);
        let _held = lock.lock().unwrap_or_else(|e| e.into_inner());

        log::info!("Ingesting {territory} {period} for {date} ({key})");

        // Source failure aborts the run before anything is persisted
        let rows = self.source.fetch(territory, period)?;
        let mut entries = normalize_rows(rows, territory, period, date)?;
        log::info!("Loaded {} chart entries", entries.len());

        let resolved = self.resolve_missing_ids(&mut entries);

        let (enriched, enrich_stats) = match self.provider {
            Some(client) => {
                let enricher = Enricher::new(
                    client,
                    self.enrich_options.batch_size,
                    self.enrich_options.batch_pause_ms,
                );
                enricher.enrich_all(entries)
            }
            None => {
                log::warn!("Enrichment provider not configured, skipping enrichment");
                let skipped = entries.len();
                let unenriched = entries
                    .into_iter()
                    .map(|entry| EnrichedTrack {
                        entry,
                        meta: TrackMetadata::default(),
                    })
                    .collect();
                (
                    unenriched,
                    EnrichStats {
                        skipped_unresolved: skipped,
                        ..EnrichStats::default()
                    },
                )
            }
        };

        let tracks = self.compute_features(&key, enriched)?;
        let entries_only: Vec<ChartEntry> = tracks.iter().map(|t| t.entry.clone()).collect();
        let aggregates = SnapshotAggregates::from_entries(&entries_only);

        let validation = validate(&tracks);
        for issue in &validation.issues {
            log::warn!("Validation: {issue}");
        }

        // Single upsert at the end: no partial persisted state
        let snapshot = ChartSnapshot {
            key,
            chart_date: date,
            source: SnapshotSource::Observed,
            tracks,
            aggregates,
        };
        self.db.put_snapshot(&snapshot)?;

        Ok(IngestOutcome {
            snapshot,
            validation,
            enrich_stats,
            resolved,
        })
    }

    /// Collect up to `weeks` weekly snapshots ending at `today`, oldest
    /// first. Weeks already stored are reused; the current week is fetched
    /// live; missing past weeks are synthesized (the source only exposes
    /// the current week) and stored with `simulated` provenance so they
    /// never feed momentum or growth analytics.
    ///
    /// Explicitly sequential with a fixed delay between source requests.
    pub fn collect_history(
        &self,
        territory: Territory,
        period: Period,
        weeks: u32,
        today: NaiveDate,
    ) -> Result<Vec<ChartSnapshot>, PipelineError> {
        let mut collected: Vec<ChartSnapshot> = Vec::with_capacity(weeks as usize);
        let mut current_entries: Option<Vec<ChartEntry>> = None;

        for offset in 0..weeks {
            let target_date = today
                .checked_sub_days(Days::new(7 * offset as u64))
                .unwrap_or(today);
            let key = SnapshotKey::for_date(territory, period, target_date);

            if let Some(existing) = self.db.get_snapshot(&key)? {
                log::debug!("Reusing stored snapshot {key}");
                collected.push(existing);
                continue;
            }

            // Fetch the live chart once; it seeds both the current week
            // and the simulated past weeks.
            if current_entries.is_none() {
                let rows = self.source.fetch(territory, period)?;
                current_entries = Some(normalize_rows(rows, territory, period, today)?);
                std::thread::sleep(self.history_delay);
            }
            let baseline = current_entries.as_ref().expect("entries fetched above");

            let snapshot = if offset == 0 {
                assemble_snapshot(key, target_date, SnapshotSource::Observed, baseline.clone())
            } else {
                log::info!("Week {key} unavailable from source, synthesizing from current week");
                let simulated = simulate_entries(baseline, target_date, offset);
                assemble_snapshot(key, target_date, SnapshotSource::Simulated, simulated)
            };

            self.db.put_snapshot(&snapshot)?;
            collected.push(snapshot);
        }

        // Walked newest-to-oldest; callers get chronological order
        collected.reverse();
        Ok(collected)
    }

    /// Compare the latest stored snapshot with its preceding ISO week.
    /// Returns `None` when nothing is stored for the series yet.
    pub fn compare_week(
        &self,
        territory: Territory,
        period: Period,
    ) -> Result<Option<WeekComparison>, PipelineError> {
        let Some(current) = self.db.latest_snapshot(territory, period)? else {
            return Ok(None);
        };

        let previous_date = current
            .chart_date
            .checked_sub_days(Days::new(7))
            .unwrap_or(current.chart_date);
        let previous_key = SnapshotKey::for_date(territory, period, previous_date);

        let (previous, growth) = self.db.compare(&current, &previous_key)?;
        Ok(Some(WeekComparison {
            current,
            previous,
            growth,
        }))
    }

    /// Fill in missing catalog ids via fuzzy search resolution. Misses are
    /// not errors; the entry proceeds unresolved.
    fn resolve_missing_ids(&self, entries: &mut [ChartEntry]) -> usize {
        let Some(client) = self.provider else {
            return 0;
        };
        let resolver = Resolver::new(client, Box::new(TokenSetSimilarity));
        let mut resolved = 0;

        for entry in entries.iter_mut().filter(|e| e.catalog_id.is_none()) {
            match resolver.resolve(&entry.title, &entry.artist) {
                Resolution::Matched { catalog_id, score } => {
                    log::info!(
                        "Resolved \"{}\" by \"{}\" (score {score:.2})",
                        entry.title,
                        entry.artist
                    );
                    entry.catalog_id = Some(catalog_id);
                    resolved += 1;
                }
                Resolution::Miss => {}
            }
        }

        if resolved > 0 {
            log::info!("Filled {resolved} catalog ids via fuzzy matching");
        }
        resolved
    }

    /// Attach derived features to each enriched track, consulting the
    /// store for the track's prior observations within the same series.
    fn compute_features(
        &self,
        key: &SnapshotKey,
        enriched: Vec<EnrichedTrack>,
    ) -> Result<Vec<TrackAnalysis>, DbError> {
        let mut tracks = Vec::with_capacity(enriched.len());
        for t in enriched {
            let history = self.db.track_history(
                key,
                t.entry.catalog_id.as_deref(),
                &t.entry.title,
                &t.entry.artist,
                11, // plus the current observation makes the 12-week window
            )?;
            let features = self.engine.compute(&t.entry, &history);
            tracks.push(TrackAnalysis {
                entry: t.entry,
                meta: t.meta,
                features,
            });
        }
        Ok(tracks)
    }

    fn run_lock(&self, key: &SnapshotKey) -> Arc<Mutex<()>> {
        let mut locks = self.run_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(key.storage_id())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Build a snapshot with default (empty) enrichment and features. Used by
/// history collection, where per-track analytics are not computed.
fn assemble_snapshot(
    key: SnapshotKey,
    chart_date: NaiveDate,
    source: SnapshotSource,
    entries: Vec<ChartEntry>,
) -> ChartSnapshot {
    let aggregates = SnapshotAggregates::from_entries(&entries);
    ChartSnapshot {
        key,
        chart_date,
        source,
        tracks: entries
            .into_iter()
            .map(|entry| TrackAnalysis {
                entry,
                meta: TrackMetadata::default(),
                features: crate::model::TrackFeatures::default(),
            })
            .collect(),
        aggregates,
    }
}

/// Synthesize a past week from the current chart. Streams are perturbed by
/// a deterministic function of `(position, week offset)`, so repeated
/// collection runs reproduce identical synthetic weeks.
fn simulate_entries(
    baseline: &[ChartEntry],
    target_date: NaiveDate,
    week_offset: u32,
) -> Vec<ChartEntry> {
    baseline
        .iter()
        .map(|entry| {
            let factor = simulation_factor(entry.position, week_offset);
            let mut simulated = entry.clone();
            simulated.observed_at = target_date;
            simulated.streams = (entry.streams as f64 * factor).round().max(0.0) as u64;
            simulated
        })
        .collect()
}

/// Multiplicative perturbation in roughly [0.88, 1.35]: a 2% drift per
/// week back plus a position-dependent wobble in [0.9, 1.1].
fn simulation_factor(position: u32, week_offset: u32) -> f64 {
    let drift = 1.0 + week_offset as f64 * 0.02;
    let wobble_seed = (position * 31 + week_offset * 17) % 97;
    let wobble = 0.9 + 0.2 * (wobble_seed as f64 / 96.0);
    drift * wobble
}
