use crate::model::TrackAnalysis;

/// One row in a movers table.
#[derive(Debug, Clone)]
pub struct MoverRow {
    pub position: u32,
    pub title: String,
    pub artist: String,
    pub delta_position: i32,
    pub delta_streams_pct: f64,
    pub momentum_score: f64,
}

/// Week-over-week movement summary for one snapshot.
#[derive(Debug, Clone, Default)]
pub struct MoversSummary {
    /// Biggest climbs by position delta, descending.
    pub top_gainers: Vec<MoverRow>,
    /// Biggest drops by position delta, worst first.
    pub top_losers: Vec<MoverRow>,
    /// Biggest streams growth, descending percent.
    pub top_gainers_streams: Vec<MoverRow>,
    /// Biggest streams decline, worst first.
    pub top_losers_streams: Vec<MoverRow>,
    pub mean_delta_position: f64,
    pub median_delta_position: f64,
    /// Standard deviation of position deltas across the snapshot;
    /// higher means a more turbulent chart.
    pub volatility_index: f64,
}

/// Summarize movement across a snapshot. Only tracks with a previous
/// observation participate (debuts and re-entries have no delta).
pub fn summarize(tracks: &[TrackAnalysis], top_n: usize) -> MoversSummary {
    let carried: Vec<&TrackAnalysis> = tracks
        .iter()
        .filter(|t| t.entry.previous_position.is_some())
        .collect();

    if carried.is_empty() {
        return MoversSummary::default();
    }

    let row = |t: &TrackAnalysis| MoverRow {
        position: t.entry.position,
        title: t.entry.title.clone(),
        artist: t.entry.artist.clone(),
        delta_position: t.features.delta_position,
        delta_streams_pct: t.features.delta_streams_pct,
        momentum_score: t.features.momentum_score,
    };

    let mut by_delta: Vec<&TrackAnalysis> = carried.clone();
    by_delta.sort_by_key(|t| std::cmp::Reverse(t.features.delta_position));

    let top_gainers = by_delta
        .iter()
        .filter(|t| t.features.delta_position > 0)
        .take(top_n)
        .map(|t| row(t))
        .collect();
    let top_losers = by_delta
        .iter()
        .rev()
        .filter(|t| t.features.delta_position < 0)
        .take(top_n)
        .map(|t| row(t))
        .collect();

    let mut by_streams: Vec<&TrackAnalysis> = carried.clone();
    by_streams.sort_by(|a, b| {
        b.features
            .delta_streams_pct
            .partial_cmp(&a.features.delta_streams_pct)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let top_gainers_streams = by_streams
        .iter()
        .filter(|t| t.features.delta_streams_pct > 0.0)
        .take(top_n)
        .map(|t| row(t))
        .collect();
    let top_losers_streams = by_streams
        .iter()
        .rev()
        .filter(|t| t.features.delta_streams_pct < 0.0)
        .take(top_n)
        .map(|t| row(t))
        .collect();

    let deltas: Vec<f64> = carried
        .iter()
        .map(|t| t.features.delta_position as f64)
        .collect();
    let mean = deltas.iter().sum::<f64>() / deltas.len() as f64;
    let variance =
        deltas.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / deltas.len() as f64;

    MoversSummary {
        top_gainers,
        top_losers,
        top_gainers_streams,
        top_losers_streams,
        mean_delta_position: mean,
        median_delta_position: median(&deltas),
        volatility_index: variance.sqrt(),
    }
}

/// Median of a sample; 0 when empty.
fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
