pub mod client;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::NaiveDate;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;

use client::{ArtistDto, ArtistStatsDto, EnrichError, ProviderClient, TrackDto};

use crate::model::{ChartEntry, EnrichedTrack, SocialFollowers, TrackMetadata};

/// Result of an enrichment pass over one snapshot.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnrichStats {
    /// Tracks with at least the track-metadata call succeeding.
    pub enriched: usize,
    /// Tracks skipped for lack of a catalog id (not an error).
    pub skipped_unresolved: usize,
    /// Tracks where one or more provider calls failed; fields left unset.
    pub degraded: usize,
}

/// Per-track outcome, folded into `EnrichStats`.
enum Outcome {
    Enriched,
    Skipped,
    Degraded,
}

/// Best-effort metadata enricher.
///
/// Independent tracks are enriched in bounded batches (a rayon pool of
/// `batch_size` threads, fixed pause between batches) to respect provider
/// rate limits. Within one track the three calls (track, artist, artist
/// stats) run sequentially because the artist lookups need the track
/// response's artist reference. Any call failing degrades that track's
/// fields; the batch always completes.
///
/// The metadata cache is owned by this value and keyed by catalog id:
/// unbounded for the run, dropped with the enricher, so repeated charting
/// of the same track costs one provider round-trip per run and no state
/// leaks across runs.
pub struct Enricher<'a> {
    client: &'a ProviderClient,
    batch_size: usize,
    batch_pause: Duration,
    cache: Mutex<HashMap<String, TrackMetadata>>,
}

impl<'a> Enricher<'a> {
    pub fn new(client: &'a ProviderClient, batch_size: usize, batch_pause_ms: u64) -> Self {
        Self {
            client,
            batch_size: batch_size.max(1),
            batch_pause: Duration::from_millis(batch_pause_ms),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Enrich every entry, preserving input (position) order.
    pub fn enrich_all(&self, entries: Vec<ChartEntry>) -> (Vec<EnrichedTrack>, EnrichStats) {
        let total = entries.len();
        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} tracks ({eta}) {msg}",
            )
            .unwrap()
            .progress_chars("#>-"),
        );
        pb.set_message("Enriching...");

        let pool = match rayon::ThreadPoolBuilder::new()
            .num_threads(self.batch_size)
            .build()
        {
            Ok(p) => p,
            Err(e) => {
                // Degenerate but survivable: fall back to the global pool
                log::warn!("Failed to build enrichment pool ({e}), using default");
                rayon::ThreadPoolBuilder::new().build().unwrap()
            }
        };

        let mut enriched = Vec::with_capacity(total);
        let mut stats = EnrichStats::default();
        let batch_count = total.div_ceil(self.batch_size);

        for (i, batch) in entries.chunks(self.batch_size).enumerate() {
            let results: Vec<(EnrichedTrack, Outcome)> = pool.install(|| {
                batch
                    .par_iter()
                    .map(|entry| {
                        let out = self.enrich_one(entry.clone());
                        pb.inc(1);
                        out
                    })
                    .collect()
            });

            for (track, outcome) in results {
                match outcome {
                    Outcome::Enriched => stats.enriched += 1,
                    Outcome::Skipped => stats.skipped_unresolved += 1,
                    Outcome::Degraded => stats.degraded += 1,
                }
                enriched.push(track);
            }

            // Fixed pause between batches to stay under provider rate limits
            if i + 1 < batch_count {
                std::thread::sleep(self.batch_pause);
            }
        }

        pb.finish_with_message(format!(
            "{} enriched, {} skipped, {} degraded",
            stats.enriched, stats.skipped_unresolved, stats.degraded
        ));
        (enriched, stats)
    }

    /// Enrich a single entry. Never fails: provider errors degrade to
    /// missing fields and are logged.
    fn enrich_one(&self, entry: ChartEntry) -> (EnrichedTrack, Outcome) {
        let Some(catalog_id) = entry.catalog_id.clone() else {
            return (
                EnrichedTrack {
                    entry,
                    meta: TrackMetadata::default(),
                },
                Outcome::Skipped,
            );
        };

        if let Some(meta) = self.cached(&catalog_id) {
            return (EnrichedTrack { entry, meta }, Outcome::Enriched);
        }

        let mut meta = TrackMetadata::default();
        let outcome = match self.client.get_track(&catalog_id) {
            Ok(track) => {
                let artist_id = track.artists.first().and_then(|a| a.id);
                apply_track(&mut meta, track);

                if let Some(artist_id) = artist_id {
                    match self.client.get_artist(artist_id) {
                        Ok(artist) => apply_artist(&mut meta, artist),
                        Err(e) => log_call_failure("artist", &entry, &e),
                    }
                    match self.client.get_artist_stats(artist_id) {
                        Ok(stats) => apply_artist_stats(&mut meta, stats),
                        Err(e) => log_call_failure("artist stats", &entry, &e),
                    }
                }

                self.store(&catalog_id, &meta);
                Outcome::Enriched
            }
            Err(EnrichError::NotFound(_)) => {
                log::debug!("No provider record for {catalog_id}");
                self.store(&catalog_id, &meta);
                Outcome::Enriched
            }
            Err(e) => {
                log_call_failure("track", &entry, &e);
                Outcome::Degraded
            }
        };

        (EnrichedTrack { entry, meta }, outcome)
    }

    fn cached(&self, catalog_id: &str) -> Option<TrackMetadata> {
        self.cache
            .lock()
            .ok()
            .and_then(|c| c.get(catalog_id).cloned())
    }

    fn store(&self, catalog_id: &str, meta: &TrackMetadata) {
        if let Ok(mut c) = self.cache.lock() {
            c.insert(catalog_id.to_string(), meta.clone());
        }
    }
}

fn log_call_failure(what: &str, entry: &ChartEntry, err: &EnrichError) {
    log::warn!(
        "Enrichment {what} call failed for \"{}\" by \"{}\": {err}",
        entry.title,
        entry.artist
    );
}

// ── Provider adapters ─────────────────────────────────────────────────
// The only place provider field names meet the canonical model. Anything
// missing or unparseable in a DTO leaves the corresponding field unset.

fn apply_track(meta: &mut TrackMetadata, dto: TrackDto) {
    meta.genres = dto.genres.into_iter().filter_map(|g| g.name).collect();
    meta.label = dto.label.and_then(|l| l.name);
    meta.distributor = dto.distributor.and_then(|d| d.name);
    meta.release_date = dto.release_date.as_deref().and_then(parse_date);
}

fn apply_artist(meta: &mut TrackMetadata, dto: ArtistDto) {
    meta.origin_country = dto.country;
    meta.origin_city = dto.city;
}

fn apply_artist_stats(meta: &mut TrackMetadata, dto: ArtistStatsDto) {
    let followers = SocialFollowers {
        spotify: dto.spotify_followers,
        instagram: dto.instagram_followers,
        tiktok: dto.tiktok_followers,
        youtube: dto.youtube_subscribers,
    };
    if !followers.is_empty() {
        meta.social_followers = Some(followers);
    }
    meta.social_metrics_as_of = dto.as_of.as_deref().and_then(parse_date);
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    // Providers send either bare dates or timestamps; the date prefix is
    // all the model keeps.
    let prefix = s.get(..10).unwrap_or(s);
    NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()
}
