use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension};

use super::models::{SnapshotSummary, StoreStats};
use super::{Database, DbError, Result};
use crate::features::Observation;
use crate::model::{
    ChartEntry, ChartSnapshot, GrowthRates, Period, SnapshotAggregates, SnapshotKey,
    SnapshotSource, SocialFollowers, Territory, TrackAnalysis, TrackFeatures, TrackMetadata,
};

/// Growth rates between two aggregate sets, in percent per tier.
///
/// A missing previous snapshot, or one with zero top-200 streams, yields
/// all-zero growth rather than division blowups; each tier additionally
/// guards its own zero denominator.
pub fn compare_aggregates(
    current: &SnapshotAggregates,
    previous: Option<&SnapshotAggregates>,
) -> GrowthRates {
    let Some(prev) = previous else {
        return GrowthRates::default();
    };
    if prev.top200_streams == 0 {
        return GrowthRates::default();
    }

    let growth = |cur: u64, prev: u64| {
        if prev == 0 {
            0.0
        } else {
            (cur as f64 - prev as f64) / prev as f64 * 100.0
        }
    };

    GrowthRates {
        top10: growth(current.top10_streams, prev.top10_streams),
        top50: growth(current.top50_streams, prev.top50_streams),
        top200: growth(current.top200_streams, prev.top200_streams),
    }
}

impl Database {
    /// Upsert a snapshot by its `(territory, period, iso_year, iso_week)`
    /// key. Idempotent, last-write-wins: an existing snapshot and its
    /// track rows are replaced in the same transaction.
    pub fn put_snapshot(&self, snapshot: &ChartSnapshot) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        let key = &snapshot.key;

        // Replace, not append: the cascade clears old track rows
        tx.execute(
            "DELETE FROM snapshots
             WHERE territory = ?1 AND period = ?2 AND iso_year = ?3 AND iso_week = ?4",
            params![
                key.territory.code(),
                key.period.as_str(),
                key.iso_year,
                key.iso_week
            ],
        )?;

        let agg = &snapshot.aggregates;
        tx.execute(
            "INSERT INTO snapshots (
                territory, period, iso_year, iso_week, chart_date, source,
                top10_streams, top50_streams, top200_streams,
                track_count, debut_count, reentry_count
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                key.territory.code(),
                key.period.as_str(),
                key.iso_year,
                key.iso_week,
                snapshot.chart_date.to_string(),
                snapshot.source.as_str(),
                agg.top10_streams as i64,
                agg.top50_streams as i64,
                agg.top200_streams as i64,
                agg.track_count,
                agg.debut_count,
                agg.reentry_count,
            ],
        )?;
        let snapshot_id = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO snapshot_tracks (
                    snapshot_id, position, title, artist, streams,
                    previous_position, peak_position, weeks_on_chart,
                    is_new_entry, is_re_entry, catalog_id,
                    genres, label, distributor, release_date,
                    origin_country, origin_city, social_followers, social_metrics_as_of,
                    delta_position, delta_streams_pct, speed_4w, acceleration,
                    baseline_position_12w, baseline_streams_12w, momentum_score
                ) VALUES (
                    ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                    ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26
                )",
            )?;

            for track in &snapshot.tracks {
                let e = &track.entry;
                let m = &track.meta;
                let f = &track.features;

                let genres_json = if m.genres.is_empty() {
                    None
                } else {
                    Some(serde_json::to_string(&m.genres).map_err(|err| {
                        DbError::Corrupt(format!("genres for position {}: {err}", e.position))
                    })?)
                };
                let social_json = match &m.social_followers {
                    Some(s) => Some(serde_json::to_string(s).map_err(|err| {
                        DbError::Corrupt(format!("followers for position {}: {err}", e.position))
                    })?),
                    None => None,
                };

                stmt.execute(params![
                    snapshot_id,
                    e.position,
                    e.title,
                    e.artist,
                    e.streams as i64,
                    e.previous_position,
                    e.peak_position,
                    e.weeks_on_chart,
                    e.is_new_entry,
                    e.is_re_entry,
                    e.catalog_id,
                    genres_json,
                    m.label,
                    m.distributor,
                    m.release_date.map(|d| d.to_string()),
                    m.origin_country,
                    m.origin_city,
                    social_json,
                    m.social_metrics_as_of.map(|d| d.to_string()),
                    f.delta_position,
                    f.delta_streams_pct,
                    f.speed_4w,
                    f.acceleration,
                    f.baseline_position_12w,
                    f.baseline_streams_12w,
                    f.momentum_score,
                ])?;
            }
        }

        tx.commit()?;
        log::debug!(
            "Stored snapshot {} ({} tracks, {})",
            key.storage_id(),
            snapshot.tracks.len(),
            snapshot.source.as_str()
        );
        Ok(())
    }

    /// Exact lookup by key. Returns `None` when absent.
    pub fn get_snapshot(&self, key: &SnapshotKey) -> Result<Option<ChartSnapshot>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, chart_date, source,
                        top10_streams, top50_streams, top200_streams,
                        track_count, debut_count, reentry_count
                 FROM snapshots
                 WHERE territory = ?1 AND period = ?2 AND iso_year = ?3 AND iso_week = ?4",
                params![
                    key.territory.code(),
                    key.period.as_str(),
                    key.iso_year,
                    key.iso_week
                ],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, u32>(6)?,
                        row.get::<_, u32>(7)?,
                        row.get::<_, u32>(8)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, date_str, source_str, t10, t50, t200, tracks_n, debuts, reentries)) = row
        else {
            return Ok(None);
        };

        let chart_date = parse_date(&date_str)?;
        let source = SnapshotSource::from_str_loose(&source_str)
            .ok_or_else(|| DbError::Corrupt(format!("snapshot source {source_str:?}")))?;
        let tracks = self.read_tracks(id, key.territory, key.period, chart_date)?;

        Ok(Some(ChartSnapshot {
            key: *key,
            chart_date,
            source,
            tracks,
            aggregates: SnapshotAggregates {
                top10_streams: t10 as u64,
                top50_streams: t50 as u64,
                top200_streams: t200 as u64,
                track_count: tracks_n,
                debut_count: debuts,
                reentry_count: reentries,
            },
        }))
    }

    /// Up to `weeks` snapshots at or before the ISO week of `from_date`,
    /// oldest to newest, skipping missing weeks.
    pub fn window(
        &self,
        territory: Territory,
        period: Period,
        from_date: NaiveDate,
        weeks: u32,
    ) -> Result<Vec<ChartSnapshot>> {
        let from = SnapshotKey::for_date(territory, period, from_date);

        let mut stmt = self.conn.prepare(
            "SELECT iso_year, iso_week FROM snapshots
             WHERE territory = ?1 AND period = ?2
               AND (iso_year < ?3 OR (iso_year = ?3 AND iso_week <= ?4))
             ORDER BY iso_year DESC, iso_week DESC
             LIMIT ?5",
        )?;
        let keys: Vec<(i32, u32)> = stmt
            .query_map(
                params![territory.code(), period.as_str(), from.iso_year, from.iso_week, weeks],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut snapshots = Vec::with_capacity(keys.len());
        // Newest-first from the query; reverse into chronological order
        for (iso_year, iso_week) in keys.into_iter().rev() {
            let key = SnapshotKey {
                territory,
                period,
                iso_year,
                iso_week,
            };
            if let Some(snapshot) = self.get_snapshot(&key)? {
                snapshots.push(snapshot);
            }
        }
        Ok(snapshots)
    }

    /// The most recent stored snapshot for a series, if any.
    pub fn latest_snapshot(
        &self,
        territory: Territory,
        period: Period,
    ) -> Result<Option<ChartSnapshot>> {
        let key = self
            .conn
            .query_row(
                "SELECT iso_year, iso_week FROM snapshots
                 WHERE territory = ?1 AND period = ?2
                 ORDER BY iso_year DESC, iso_week DESC
                 LIMIT 1",
                params![territory.code(), period.as_str()],
                |row| Ok((row.get::<_, i32>(0)?, row.get::<_, u32>(1)?)),
            )
            .optional()?;

        match key {
            Some((iso_year, iso_week)) => self.get_snapshot(&SnapshotKey {
                territory,
                period,
                iso_year,
                iso_week,
            }),
            None => Ok(None),
        }
    }

    /// Week-over-week growth for `current` against the snapshot stored at
    /// `previous_key`. Simulated previous weeks are treated as absent so
    /// fabricated numbers never masquerade as real growth baselines.
    pub fn compare(
        &self,
        current: &ChartSnapshot,
        previous_key: &SnapshotKey,
    ) -> Result<(Option<SnapshotSummary>, GrowthRates)> {
        let previous = self.get_snapshot(previous_key)?;
        let previous = previous.filter(|p| p.source == SnapshotSource::Observed);

        let summary = previous.as_ref().map(|p| SnapshotSummary {
            key: p.key,
            chart_date: p.chart_date,
            source: p.source,
            aggregates: p.aggregates,
        });
        let rates = compare_aggregates(
            &current.aggregates,
            previous.as_ref().map(|p| &p.aggregates),
        );
        Ok((summary, rates))
    }

    /// Prior observations of one track within a series, strictly before
    /// `before`, oldest first, capped at `limit`. Only observed snapshots
    /// participate; simulated fill-ins are excluded from feature history.
    ///
    /// Matches by catalog id when available, else by case-insensitive
    /// `(title, artist)`.
    pub fn track_history(
        &self,
        before: &SnapshotKey,
        catalog_id: Option<&str>,
        title: &str,
        artist: &str,
        limit: u32,
    ) -> Result<Vec<Observation>> {
        let mut rows: Vec<Observation> = match catalog_id {
            Some(id) => {
                let mut stmt = self.conn.prepare_cached(
                    "SELECT st.position, st.streams
                     FROM snapshot_tracks st
                     JOIN snapshots s ON s.id = st.snapshot_id
                     WHERE s.territory = ?1 AND s.period = ?2 AND s.source = 'observed'
                       AND (s.iso_year < ?3 OR (s.iso_year = ?3 AND s.iso_week < ?4))
                       AND st.catalog_id = ?5
                     ORDER BY s.iso_year DESC, s.iso_week DESC
                     LIMIT ?6",
                )?;
                let mapped = stmt.query_map(
                    params![
                        before.territory.code(),
                        before.period.as_str(),
                        before.iso_year,
                        before.iso_week,
                        id,
                        limit
                    ],
                    |row| {
                        Ok(Observation {
                            position: row.get(0)?,
                            streams: row.get::<_, i64>(1)? as u64,
                        })
                    },
                )?;
                mapped.collect::<std::result::Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = self.conn.prepare_cached(
                    "SELECT st.position, st.streams
                     FROM snapshot_tracks st
                     JOIN snapshots s ON s.id = st.snapshot_id
                     WHERE s.territory = ?1 AND s.period = ?2 AND s.source = 'observed'
                       AND (s.iso_year < ?3 OR (s.iso_year = ?3 AND s.iso_week < ?4))
                       AND lower(st.title) = lower(?5) AND lower(st.artist) = lower(?6)
                     ORDER BY s.iso_year DESC, s.iso_week DESC
                     LIMIT ?7",
                )?;
                let mapped = stmt.query_map(
                    params![
                        before.territory.code(),
                        before.period.as_str(),
                        before.iso_year,
                        before.iso_week,
                        title,
                        artist,
                        limit
                    ],
                    |row| {
                        Ok(Observation {
                            position: row.get(0)?,
                            streams: row.get::<_, i64>(1)? as u64,
                        })
                    },
                )?;
                mapped.collect::<std::result::Result<Vec<_>, _>>()?
            }
        };

        rows.reverse();
        Ok(rows)
    }

    /// Store-wide statistics for the `stats` command.
    pub fn stats(&self) -> Result<StoreStats> {
        let total_snapshots =
            self.conn
                .query_row("SELECT COUNT(*) FROM snapshots", [], |row| row.get(0))?;
        let observed_snapshots = self.conn.query_row(
            "SELECT COUNT(*) FROM snapshots WHERE source = 'observed'",
            [],
            |row| row.get(0),
        )?;
        let simulated_snapshots = self.conn.query_row(
            "SELECT COUNT(*) FROM snapshots WHERE source = 'simulated'",
            [],
            |row| row.get(0),
        )?;

        let mut stmt = self.conn.prepare(
            "SELECT territory, period, COUNT(*), MIN(chart_date), MAX(chart_date)
             FROM snapshots
             GROUP BY territory, period
             ORDER BY territory, period",
        )?;
        let series = stmt
            .query_map([], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(StoreStats {
            total_snapshots,
            observed_snapshots,
            simulated_snapshots,
            series,
        })
    }

    /// Load a snapshot's track rows, ordered by position.
    fn read_tracks(
        &self,
        snapshot_id: i64,
        territory: Territory,
        period: Period,
        chart_date: NaiveDate,
    ) -> Result<Vec<TrackAnalysis>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT position, title, artist, streams,
                    previous_position, peak_position, weeks_on_chart,
                    is_new_entry, is_re_entry, catalog_id,
                    genres, label, distributor, release_date,
                    origin_country, origin_city, social_followers, social_metrics_as_of,
                    delta_position, delta_streams_pct, speed_4w, acceleration,
                    baseline_position_12w, baseline_streams_12w, momentum_score
             FROM snapshot_tracks
             WHERE snapshot_id = ?1
             ORDER BY position",
        )?;

        let rows = stmt.query_map(params![snapshot_id], |row| {
            Ok(RawTrackRow {
                position: row.get(0)?,
                title: row.get(1)?,
                artist: row.get(2)?,
                streams: row.get::<_, i64>(3)?,
                previous_position: row.get(4)?,
                peak_position: row.get(5)?,
                weeks_on_chart: row.get(6)?,
                is_new_entry: row.get(7)?,
                is_re_entry: row.get(8)?,
                catalog_id: row.get(9)?,
                genres: row.get(10)?,
                label: row.get(11)?,
                distributor: row.get(12)?,
                release_date: row.get(13)?,
                origin_country: row.get(14)?,
                origin_city: row.get(15)?,
                social_followers: row.get(16)?,
                social_metrics_as_of: row.get(17)?,
                delta_position: row.get(18)?,
                delta_streams_pct: row.get(19)?,
                speed_4w: row.get(20)?,
                acceleration: row.get(21)?,
                baseline_position_12w: row.get(22)?,
                baseline_streams_12w: row.get(23)?,
                momentum_score: row.get(24)?,
            })
        })?;

        let mut tracks = Vec::new();
        for raw in rows {
            tracks.push(raw?.into_analysis(territory, period, chart_date)?);
        }
        Ok(tracks)
    }
}

/// Flat row image of `snapshot_tracks`, decoded into the domain model
/// after the statement finishes.
struct RawTrackRow {
    position: u32,
    title: String,
    artist: String,
    streams: i64,
    previous_position: Option<u32>,
    peak_position: u32,
    weeks_on_chart: u32,
    is_new_entry: bool,
    is_re_entry: bool,
    catalog_id: Option<String>,
    genres: Option<String>,
    label: Option<String>,
    distributor: Option<String>,
    release_date: Option<String>,
    origin_country: Option<String>,
    origin_city: Option<String>,
    social_followers: Option<String>,
    social_metrics_as_of: Option<String>,
    delta_position: i32,
    delta_streams_pct: f64,
    speed_4w: f64,
    acceleration: f64,
    baseline_position_12w: Option<f64>,
    baseline_streams_12w: Option<f64>,
    momentum_score: f64,
}

impl RawTrackRow {
    fn into_analysis(
        self,
        territory: Territory,
        period: Period,
        chart_date: NaiveDate,
    ) -> Result<TrackAnalysis> {
        let genres: Vec<String> = match &self.genres {
            Some(json) => serde_json::from_str(json)
                .map_err(|e| DbError::Corrupt(format!("genres JSON: {e}")))?,
            None => Vec::new(),
        };
        let social_followers: Option<SocialFollowers> = match &self.social_followers {
            Some(json) => Some(
                serde_json::from_str(json)
                    .map_err(|e| DbError::Corrupt(format!("followers JSON: {e}")))?,
            ),
            None => None,
        };

        Ok(TrackAnalysis {
            entry: ChartEntry {
                territory,
                period,
                observed_at: chart_date,
                position: self.position,
                title: self.title,
                artist: self.artist,
                streams: self.streams as u64,
                previous_position: self.previous_position,
                peak_position: self.peak_position,
                weeks_on_chart: self.weeks_on_chart,
                is_new_entry: self.is_new_entry,
                is_re_entry: self.is_re_entry,
                catalog_id: self.catalog_id,
            },
            meta: TrackMetadata {
                genres,
                label: self.label,
                distributor: self.distributor,
                release_date: self.release_date.as_deref().map(parse_date).transpose()?,
                origin_country: self.origin_country,
                origin_city: self.origin_city,
                social_followers,
                social_metrics_as_of: self
                    .social_metrics_as_of
                    .as_deref()
                    .map(parse_date)
                    .transpose()?,
            },
            features: TrackFeatures {
                delta_position: self.delta_position,
                delta_streams_pct: self.delta_streams_pct,
                speed_4w: self.speed_4w,
                acceleration: self.acceleration,
                baseline_position_12w: self.baseline_position_12w,
                baseline_streams_12w: self.baseline_streams_12w,
                momentum_score: self.momentum_score,
            },
        })
    }
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| DbError::Corrupt(format!("date {s:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(
        territory: Territory,
        position: u32,
        streams: u64,
        catalog_id: Option<&str>,
    ) -> ChartEntry {
        ChartEntry {
            territory,
            period: Period::Weekly,
            observed_at: NaiveDate::from_ymd_opt(2026, 7, 31).unwrap(),
            position,
            title: format!("Track {position}"),
            artist: "Artist".into(),
            streams,
            previous_position: None,
            peak_position: position,
            weeks_on_chart: 1,
            is_new_entry: false,
            is_re_entry: false,
            catalog_id: catalog_id.map(str::to_string),
        }
    }

    fn snapshot(
        territory: Territory,
        iso_year: i32,
        iso_week: u32,
        source: SnapshotSource,
        entries: Vec<ChartEntry>,
    ) -> ChartSnapshot {
        let aggregates = SnapshotAggregates::from_entries(&entries);
        ChartSnapshot {
            key: SnapshotKey {
                territory,
                period: Period::Weekly,
                iso_year,
                iso_week,
            },
            chart_date: NaiveDate::from_isoywd_opt(iso_year, iso_week, chrono::Weekday::Fri)
                .unwrap(),
            source,
            tracks: entries
                .into_iter()
                .map(|e| TrackAnalysis {
                    entry: e,
                    meta: TrackMetadata::default(),
                    features: TrackFeatures::default(),
                })
                .collect(),
            aggregates,
        }
    }

    #[test]
    fn test_put_then_get_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        let mut snap = snapshot(
            Territory::Argentina,
            2026,
            30,
            SnapshotSource::Observed,
            vec![
                entry(Territory::Argentina, 1, 50_000, Some("cat-1")),
                entry(Territory::Argentina, 2, 40_000, None),
            ],
        );
        snap.tracks[0].meta.label = Some("Dale Play Records".into());
        snap.tracks[0].meta.genres = vec!["trap".into(), "urbano".into()];
        snap.tracks[0].meta.social_followers = Some(SocialFollowers {
            spotify: Some(1_000),
            ..SocialFollowers::default()
        });
        snap.tracks[0].features.momentum_score = 73.5;

        db.put_snapshot(&snap).unwrap();

        let loaded = db.get_snapshot(&snap.key).unwrap().unwrap();
        assert_eq!(loaded.tracks.len(), 2);
        assert_eq!(loaded.source, SnapshotSource::Observed);
        assert_eq!(loaded.aggregates.top200_streams, 90_000);
        assert_eq!(loaded.tracks[0].meta.label.as_deref(), Some("Dale Play Records"));
        assert_eq!(loaded.tracks[0].meta.genres, vec!["trap", "urbano"]);
        assert_eq!(
            loaded.tracks[0].meta.social_followers.as_ref().unwrap().spotify,
            Some(1_000)
        );
        assert_eq!(loaded.tracks[0].features.momentum_score, 73.5);
        assert_eq!(loaded.tracks[1].entry.catalog_id, None);
    }

    #[test]
    fn test_get_absent_returns_none() {
        let db = Database::open_in_memory().unwrap();
        let key = SnapshotKey {
            territory: Territory::Global,
            period: Period::Weekly,
            iso_year: 2026,
            iso_week: 1,
        };
        assert!(db.get_snapshot(&key).unwrap().is_none());
    }

    #[test]
    fn test_reingestion_is_last_write_wins() {
        let db = Database::open_in_memory().unwrap();
        let first = snapshot(
            Territory::Mexico,
            2026,
            30,
            SnapshotSource::Observed,
            vec![
                entry(Territory::Mexico, 1, 10_000, None),
                entry(Territory::Mexico, 2, 9_000, None),
                entry(Territory::Mexico, 3, 8_000, None),
            ],
        );
        db.put_snapshot(&first).unwrap();

        let second = snapshot(
            Territory::Mexico,
            2026,
            30,
            SnapshotSource::Observed,
            vec![entry(Territory::Mexico, 1, 99_000, None)],
        );
        db.put_snapshot(&second).unwrap();

        let loaded = db.get_snapshot(&first.key).unwrap().unwrap();
        assert_eq!(loaded.tracks.len(), 1);
        assert_eq!(loaded.tracks[0].entry.streams, 99_000);

        // window never returns duplicates for the same key
        let window = db
            .window(
                Territory::Mexico,
                Period::Weekly,
                NaiveDate::from_ymd_opt(2026, 12, 31).unwrap(),
                10,
            )
            .unwrap();
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn test_window_orders_oldest_first_and_skips_gaps() {
        let db = Database::open_in_memory().unwrap();
        // Weeks 28, 29, 31 stored; 30 missing
        for week in [29, 31, 28] {
            db.put_snapshot(&snapshot(
                Territory::Spain,
                2026,
                week,
                SnapshotSource::Observed,
                vec![entry(Territory::Spain, 1, 1_000 * week as u64, None)],
            ))
            .unwrap();
        }

        let window = db
            .window(
                Territory::Spain,
                Period::Weekly,
                NaiveDate::from_ymd_opt(2026, 8, 2).unwrap(), // ISO week 31
                12,
            )
            .unwrap();
        let weeks: Vec<u32> = window.iter().map(|s| s.key.iso_week).collect();
        assert_eq!(weeks, vec![28, 29, 31]);
    }

    #[test]
    fn test_window_respects_limit() {
        let db = Database::open_in_memory().unwrap();
        for week in 20..=30 {
            db.put_snapshot(&snapshot(
                Territory::Global,
                2026,
                week,
                SnapshotSource::Observed,
                vec![entry(Territory::Global, 1, 1_000, None)],
            ))
            .unwrap();
        }

        let window = db
            .window(
                Territory::Global,
                Period::Weekly,
                NaiveDate::from_ymd_opt(2026, 8, 2).unwrap(), // ISO week 31
                4,
            )
            .unwrap();
        let weeks: Vec<u32> = window.iter().map(|s| s.key.iso_week).collect();
        // The 4 most recent at or before week 31, oldest first
        assert_eq!(weeks, vec![27, 28, 29, 30]);
    }

    #[test]
    fn test_compare_aggregates_zero_policies() {
        let current = SnapshotAggregates {
            top10_streams: 110,
            top50_streams: 550,
            top200_streams: 2_200,
            ..SnapshotAggregates::default()
        };

        // No previous: all zero
        assert_eq!(compare_aggregates(&current, None), GrowthRates::default());

        // Previous with zero top-200: all zero, no NaN
        let empty_prev = SnapshotAggregates::default();
        assert_eq!(
            compare_aggregates(&current, Some(&empty_prev)),
            GrowthRates::default()
        );

        // Real previous: 10% growth per tier
        let prev = SnapshotAggregates {
            top10_streams: 100,
            top50_streams: 500,
            top200_streams: 2_000,
            ..SnapshotAggregates::default()
        };
        let rates = compare_aggregates(&current, Some(&prev));
        assert!((rates.top10 - 10.0).abs() < 1e-9);
        assert!((rates.top50 - 10.0).abs() < 1e-9);
        assert!((rates.top200 - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_compare_ignores_simulated_previous() {
        let db = Database::open_in_memory().unwrap();
        let previous = snapshot(
            Territory::Argentina,
            2026,
            30,
            SnapshotSource::Simulated,
            vec![entry(Territory::Argentina, 1, 50_000, None)],
        );
        db.put_snapshot(&previous).unwrap();

        let current = snapshot(
            Territory::Argentina,
            2026,
            31,
            SnapshotSource::Observed,
            vec![entry(Territory::Argentina, 1, 60_000, None)],
        );
        let (prev_summary, rates) = db.compare(&current, &previous.key).unwrap();
        assert!(prev_summary.is_none());
        assert_eq!(rates, GrowthRates::default());
    }

    #[test]
    fn test_track_history_matches_and_orders() {
        let db = Database::open_in_memory().unwrap();
        for (week, position, streams) in [(28u32, 20u32, 1_000u64), (29, 15, 2_000), (30, 10, 3_000)] {
            let mut e = entry(Territory::Argentina, position, streams, Some("cat-9"));
            e.title = "Song".into();
            e.artist = "Someone".into();
            db.put_snapshot(&snapshot(
                Territory::Argentina,
                2026,
                week,
                SnapshotSource::Observed,
                vec![e],
            ))
            .unwrap();
        }

        let before = SnapshotKey {
            territory: Territory::Argentina,
            period: Period::Weekly,
            iso_year: 2026,
            iso_week: 31,
        };
        let history = db
            .track_history(&before, Some("cat-9"), "Song", "Someone", 12)
            .unwrap();
        let positions: Vec<u32> = history.iter().map(|o| o.position).collect();
        assert_eq!(positions, vec![20, 15, 10]);

        // Strictly-before excludes the boundary week
        let before_week_30 = SnapshotKey {
            iso_week: 30,
            ..before
        };
        let history = db
            .track_history(&before_week_30, Some("cat-9"), "Song", "Someone", 12)
            .unwrap();
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_track_history_title_artist_fallback_and_simulated_exclusion() {
        let db = Database::open_in_memory().unwrap();

        let mut observed = entry(Territory::Global, 5, 1_000, None);
        observed.title = "Song".into();
        observed.artist = "Someone".into();
        db.put_snapshot(&snapshot(
            Territory::Global,
            2026,
            29,
            SnapshotSource::Observed,
            vec![observed],
        ))
        .unwrap();

        let mut simulated = entry(Territory::Global, 3, 9_999, None);
        simulated.title = "Song".into();
        simulated.artist = "Someone".into();
        db.put_snapshot(&snapshot(
            Territory::Global,
            2026,
            30,
            SnapshotSource::Simulated,
            vec![simulated],
        ))
        .unwrap();

        let before = SnapshotKey {
            territory: Territory::Global,
            period: Period::Weekly,
            iso_year: 2026,
            iso_week: 31,
        };
        // Case-insensitive title/artist match; the simulated week is invisible
        let history = db
            .track_history(&before, None, "SONG", "someone", 12)
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].position, 5);
    }

    #[test]
    fn test_latest_snapshot_and_stats() {
        let db = Database::open_in_memory().unwrap();
        assert!(db
            .latest_snapshot(Territory::Argentina, Period::Weekly)
            .unwrap()
            .is_none());

        for (week, source) in [
            (29, SnapshotSource::Simulated),
            (30, SnapshotSource::Observed),
        ] {
            db.put_snapshot(&snapshot(
                Territory::Argentina,
                2026,
                week,
                source,
                vec![entry(Territory::Argentina, 1, 1_000, None)],
            ))
            .unwrap();
        }

        let latest = db
            .latest_snapshot(Territory::Argentina, Period::Weekly)
            .unwrap()
            .unwrap();
        assert_eq!(latest.key.iso_week, 30);

        let stats = db.stats().unwrap();
        assert_eq!(stats.total_snapshots, 2);
        assert_eq!(stats.observed_snapshots, 1);
        assert_eq!(stats.simulated_snapshots, 1);
        assert_eq!(stats.series.len(), 1);
        assert_eq!(stats.series[0].2, 2);
    }
}
