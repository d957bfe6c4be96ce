use chrono::NaiveDate;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::model::{ChartEntry, Period, Territory};

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Http(String),
    #[error("Failed to parse source response: {0}")]
    Parse(String),
    #[error("Source returned no entries for {territory} {period}")]
    Empty { territory: Territory, period: Period },
}

/// One raw ranked row as the source provides it, before normalization.
///
/// `change` carries the source's position-change vocabulary: `=` (held),
/// `+N`/`-N` (moved up/down N places), `NEW` (debut), `RE-ENTRY` (returned
/// after an absence). Absent or unrecognized markers mean "unknown".
#[derive(Debug, Clone, Deserialize)]
pub struct RawChartRow {
    pub position: u32,
    pub title: String,
    pub artist: String,
    #[serde(default)]
    pub streams: u64,
    #[serde(default)]
    pub change: Option<String>,
    #[serde(default)]
    pub weeks_on_chart: Option<u32>,
    #[serde(default)]
    pub peak_position: Option<u32>,
    #[serde(default)]
    pub catalog_id: Option<String>,
}

/// Supplies a raw ranked list for `(territory, period)`. Implemented by the
/// HTTP source below and by fixtures in tests; the pipeline never cares
/// where rows come from.
pub trait ChartSource {
    fn fetch(&self, territory: Territory, period: Period) -> Result<Vec<RawChartRow>, SourceError>;
}

/// Normalize raw rows into chart entries for `observed_at`.
///
/// Rows are sorted by position and the change-indicator vocabulary is
/// folded into `previous_position` / `is_new_entry` / `is_re_entry`.
/// Returns `SourceError::Empty` when nothing parseable remains, which is
/// fatal for the run.
pub fn normalize_rows(
    rows: Vec<RawChartRow>,
    territory: Territory,
    period: Period,
    observed_at: NaiveDate,
) -> Result<Vec<ChartEntry>, SourceError> {
    let mut entries: Vec<ChartEntry> = rows
        .into_iter()
        .filter(|r| r.position >= 1 && !r.title.is_empty() && !r.artist.is_empty())
        .map(|r| {
            let change = parse_change(r.change.as_deref(), r.position);
            ChartEntry {
                territory,
                period,
                observed_at,
                position: r.position,
                title: r.title,
                artist: r.artist,
                streams: r.streams,
                previous_position: change.previous_position,
                peak_position: r.peak_position.unwrap_or(r.position),
                weeks_on_chart: r.weeks_on_chart.unwrap_or(1).max(1),
                is_new_entry: change.is_new_entry,
                is_re_entry: change.is_re_entry,
                catalog_id: r.catalog_id,
            }
        })
        .collect();

    if entries.is_empty() {
        return Err(SourceError::Empty { territory, period });
    }

    entries.sort_by_key(|e| e.position);
    Ok(entries)
}

struct ChangeInfo {
    previous_position: Option<u32>,
    is_new_entry: bool,
    is_re_entry: bool,
}

static SIGNED_CHANGE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();

/// Fold a change indicator into previous-position/debut/re-entry flags.
/// A track can never be both a debut and a re-entry.
fn parse_change(change: Option<&str>, position: u32) -> ChangeInfo {
    let signed =
        SIGNED_CHANGE.get_or_init(|| Regex::new(r"^([+-])(\d+)$").expect("valid regex"));

    let marker = change.map(str::trim).unwrap_or("");
    match marker {
        "" => ChangeInfo {
            previous_position: None,
            is_new_entry: true,
            is_re_entry: false,
        },
        "=" => ChangeInfo {
            previous_position: Some(position),
            is_new_entry: false,
            is_re_entry: false,
        },
        "NEW" => ChangeInfo {
            previous_position: None,
            is_new_entry: true,
            is_re_entry: false,
        },
        "RE-ENTRY" | "RE" => ChangeInfo {
            previous_position: None,
            is_new_entry: false,
            is_re_entry: true,
        },
        other => {
            if let Some(caps) = signed.captures(other) {
                let delta: i64 = caps[2].parse().unwrap_or(0);
                // "+3" means the track climbed 3 places, so it previously
                // sat 3 places lower (higher position number).
                let prev = if &caps[1] == "+" {
                    position as i64 + delta
                } else {
                    position as i64 - delta
                };
                if prev >= 1 {
                    return ChangeInfo {
                        previous_position: Some(prev as u32),
                        is_new_entry: false,
                        is_re_entry: false,
                    };
                }
            }
            log::debug!("Unrecognized change indicator {other:?} at position {position}");
            ChangeInfo {
                previous_position: None,
                is_new_entry: true,
                is_re_entry: false,
            }
        }
    }
}

/// JSON response wrapper from the HTTP chart endpoint.
#[derive(Debug, Deserialize)]
struct ChartResponse {
    #[serde(default)]
    entries: Vec<RawChartRow>,
}

/// HTTP chart source. Fetches `{base_url}/{code}_{period}.json` and
/// deserializes the row list. Page-scraping specifics live behind whatever
/// serves this endpoint, not here.
pub struct HttpChartSource {
    base_url: String,
}

impl HttpChartSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    fn url_for(&self, territory: Territory, period: Period) -> String {
        format!(
            "{}/{}_{}.json",
            self.base_url.trim_end_matches('/'),
            territory.code(),
            period
        )
    }
}

impl ChartSource for HttpChartSource {
    fn fetch(&self, territory: Territory, period: Period) -> Result<Vec<RawChartRow>, SourceError> {
        let url = self.url_for(territory, period);
        log::debug!("Fetching chart from {url}");

        let response: ChartResponse = ureq::get(&url)
            .call()
            .map_err(|e| SourceError::Http(e.to_string()))?
            .body_mut()
            .read_json()
            .map_err(|e| SourceError::Parse(e.to_string()))?;

        if response.entries.is_empty() {
            return Err(SourceError::Empty { territory, period });
        }
        Ok(response.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(position: u32, change: Option<&str>) -> RawChartRow {
        RawChartRow {
            position,
            title: format!("Track {position}"),
            artist: "Artist".into(),
            streams: 1000,
            change: change.map(str::to_string),
            weeks_on_chart: Some(2),
            peak_position: None,
            catalog_id: None,
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 7, 31).unwrap()
    }

    #[test]
    fn test_held_position() {
        let entries =
            normalize_rows(vec![row(5, Some("="))], Territory::Global, Period::Weekly, date())
                .unwrap();
        assert_eq!(entries[0].previous_position, Some(5));
        assert!(!entries[0].is_new_entry);
        assert!(!entries[0].is_re_entry);
    }

    #[test]
    fn test_climb_and_drop() {
        let entries = normalize_rows(
            vec![row(2, Some("+3")), row(8, Some("-4"))],
            Territory::Global,
            Period::Weekly,
            date(),
        )
        .unwrap();
        // Climbed 3 places into position 2: was at 5
        assert_eq!(entries[0].previous_position, Some(5));
        // Dropped 4 places to position 8: was at 4
        assert_eq!(entries[1].previous_position, Some(4));
    }

    #[test]
    fn test_new_and_reentry_markers() {
        let entries = normalize_rows(
            vec![row(1, Some("NEW")), row(2, Some("RE-ENTRY"))],
            Territory::Global,
            Period::Weekly,
            date(),
        )
        .unwrap();
        assert!(entries[0].is_new_entry);
        assert!(!entries[0].is_re_entry);
        assert_eq!(entries[0].previous_position, None);

        assert!(entries[1].is_re_entry);
        assert!(!entries[1].is_new_entry);
    }

    #[test]
    fn test_entries_sorted_by_position() {
        let entries = normalize_rows(
            vec![row(3, None), row(1, None), row(2, None)],
            Territory::Global,
            Period::Weekly,
            date(),
        )
        .unwrap();
        let positions: Vec<u32> = entries.iter().map(|e| e.position).collect();
        assert_eq!(positions, vec![1, 2, 3]);
    }

    #[test]
    fn test_peak_defaults_to_position() {
        let mut r = row(7, Some("="));
        r.peak_position = None;
        let entries =
            normalize_rows(vec![r], Territory::Global, Period::Weekly, date()).unwrap();
        assert_eq!(entries[0].peak_position, 7);
    }

    #[test]
    fn test_empty_rows_is_an_error() {
        let err = normalize_rows(vec![], Territory::Argentina, Period::Daily, date());
        assert!(matches!(err, Err(SourceError::Empty { .. })));
    }

    #[test]
    fn test_drop_beyond_chart_top_is_unknown() {
        // "-5" at position 3 would imply a previous position of -2;
        // treated as an unrecognized marker rather than invented data.
        let entries =
            normalize_rows(vec![row(3, Some("-5"))], Territory::Global, Period::Weekly, date())
                .unwrap();
        assert_eq!(entries[0].previous_position, None);
        assert!(entries[0].is_new_entry);
    }

    #[test]
    fn test_raw_row_deserializes_with_optional_fields() {
        let json = r#"{"position": 1, "title": "Song", "artist": "Someone", "streams": 123}"#;
        let r: RawChartRow = serde_json::from_str(json).unwrap();
        assert_eq!(r.position, 1);
        assert_eq!(r.streams, 123);
        assert!(r.change.is_none());
        assert!(r.catalog_id.is_none());
    }
}
