use serde::Deserialize;

use crate::model::{ChartEntry, TrackFeatures};

/// Observations feeding the speed/acceleration/momentum window.
const SPEED_WINDOW: usize = 4;
/// Observations feeding the baseline means.
const BASELINE_WINDOW: usize = 12;

/// Momentum-score component weights. The four z-scores are combined as
/// `w_p*z_pos + w_s*z_streams + w_social*z_social + w_x*z_xterritory`;
/// the defaults sum to 1.0 so one combined standard deviation moves the
/// score by the 20-point scaling factor.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct MomentumWeights {
    pub position: f64,
    pub streams: f64,
    pub social: f64,
    pub cross_territory: f64,
}

impl Default for MomentumWeights {
    fn default() -> Self {
        Self {
            position: 0.4,
            streams: 0.3,
            social: 0.2,
            cross_territory: 0.1,
        }
    }
}

impl MomentumWeights {
    pub fn sum(&self) -> f64 {
        self.position + self.streams + self.social + self.cross_territory
    }
}

/// One prior observation of a track within the same `(territory, period)`,
/// as returned by the historical store (oldest first, observed weeks only).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub position: u32,
    pub streams: u64,
}

/// Computes per-track time-series features from a trailing history window.
///
/// All computations tolerate short histories: with a single observation
/// every derivative is zero and the momentum score sits at the neutral 50.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureEngine {
    weights: MomentumWeights,
}

impl FeatureEngine {
    pub fn new(weights: MomentumWeights) -> Self {
        Self { weights }
    }

    /// Compute features for `entry` given its prior observations
    /// (oldest first, current NOT included).
    pub fn compute(&self, entry: &ChartEntry, history: &[Observation]) -> TrackFeatures {
        // Full observation series, current last
        let mut series: Vec<Observation> = history.to_vec();
        series.push(Observation {
            position: entry.position,
            streams: entry.streams,
        });

        let delta_position = match entry.previous_position {
            Some(prev) => prev as i32 - entry.position as i32,
            None => 0,
        };

        let delta_streams_pct = match history.last() {
            Some(prev) if prev.streams > 0 => {
                (entry.streams as f64 / prev.streams as f64 - 1.0) * 100.0
            }
            _ => 0.0,
        };

        let baseline = series.iter().rev().take(BASELINE_WINDOW);
        let baseline_len = baseline.clone().count() as f64;
        let baseline_position_12w = Some(
            baseline.clone().map(|o| o.position as f64).sum::<f64>() / baseline_len,
        );
        let baseline_streams_12w =
            Some(baseline.map(|o| o.streams as f64).sum::<f64>() / baseline_len);

        let deltas = transition_deltas(&series);
        let speed_4w = mean_tail(&deltas, SPEED_WINDOW);

        // Prior window: the same computation shifted back one transition.
        // Needs at least 3 observations (2 transitions) to mean anything.
        let acceleration = if series.len() >= 3 {
            let prior = &deltas[..deltas.len() - 1];
            speed_4w - mean_tail(prior, SPEED_WINDOW)
        } else {
            0.0
        };

        let momentum_score =
            self.momentum_score(delta_position, delta_streams_pct, &series);

        TrackFeatures {
            delta_position,
            delta_streams_pct,
            speed_4w,
            acceleration,
            baseline_position_12w,
            baseline_streams_12w,
            momentum_score,
        }
    }

    /// Composite momentum score.
    ///
    /// Z-scores of the track's position delta and streams growth against
    /// the recent-window sample distribution, weighted and mapped onto
    /// 0-100 as `clamp(50 + 20 * weightedSum)`. 50 is the neutral baseline
    /// for tracks with no signal; 20 scales sensitivity. Social and
    /// cross-territory z-scores are placeholders at 0 until those signals
    /// are wired in.
    fn momentum_score(
        &self,
        delta_position: i32,
        delta_streams_pct: f64,
        series: &[Observation],
    ) -> f64 {
        let recent: Vec<Observation> = series
            .iter()
            .rev()
            .take(SPEED_WINDOW)
            .rev()
            .copied()
            .collect();
        if recent.len() < 2 {
            return 50.0;
        }

        let position_changes = transition_deltas(&recent);
        let streams_changes: Vec<f64> = recent
            .windows(2)
            .map(|w| {
                if w[0].streams > 0 {
                    (w[1].streams as f64 / w[0].streams as f64 - 1.0) * 100.0
                } else {
                    0.0
                }
            })
            .collect();

        let z_pos = z_score(delta_position as f64, &position_changes);
        let z_streams = z_score(delta_streams_pct, &streams_changes);
        let z_social = 0.0;
        let z_xterritory = 0.0;

        let weighted = self.weights.position * z_pos
            + self.weights.streams * z_streams
            + self.weights.social * z_social
            + self.weights.cross_territory * z_xterritory;

        (50.0 + 20.0 * weighted).clamp(0.0, 100.0)
    }
}

/// Position deltas between consecutive observations, climbing-positive:
/// a move from rank 8 to rank 5 is +3.
fn transition_deltas(series: &[Observation]) -> Vec<f64> {
    series
        .windows(2)
        .map(|w| w[0].position as f64 - w[1].position as f64)
        .collect()
}

/// Mean of the trailing `window` values; 0 when empty.
fn mean_tail(values: &[f64], window: usize) -> f64 {
    let tail: Vec<f64> = values.iter().rev().take(window).copied().collect();
    if tail.is_empty() {
        return 0.0;
    }
    tail.iter().sum::<f64>() / tail.len() as f64
}

/// Z-score of `value` against a sample; 0 for empty samples or zero
/// standard deviation.
fn z_score(value: f64, sample: &[f64]) -> f64 {
    if sample.is_empty() {
        return 0.0;
    }
    let n = sample.len() as f64;
    let mean = sample.iter().sum::<f64>() / n;
    let variance = sample.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();
    if std_dev > 0.0 {
        (value - mean) / std_dev
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Period, Territory};
    use chrono::NaiveDate;

    fn entry(position: u32, streams: u64, previous: Option<u32>) -> ChartEntry {
        ChartEntry {
            territory: Territory::Argentina,
            period: Period::Weekly,
            observed_at: NaiveDate::from_ymd_opt(2026, 7, 31).unwrap(),
            position,
            title: "Song".into(),
            artist: "Artist".into(),
            streams,
            previous_position: previous,
            peak_position: position,
            weeks_on_chart: 1,
            is_new_entry: previous.is_none(),
            is_re_entry: false,
            catalog_id: None,
        }
    }

    fn obs(position: u32, streams: u64) -> Observation {
        Observation { position, streams }
    }

    #[test]
    fn test_no_history_scores_exactly_neutral() {
        let engine = FeatureEngine::default();
        let f = engine.compute(&entry(42, 10_000, None), &[]);
        assert_eq!(f.momentum_score, 50.0);
        assert_eq!(f.delta_position, 0);
        assert_eq!(f.delta_streams_pct, 0.0);
        assert_eq!(f.speed_4w, 0.0);
        assert_eq!(f.acceleration, 0.0);
        assert_eq!(f.baseline_position_12w, Some(42.0));
        assert_eq!(f.baseline_streams_12w, Some(10_000.0));
    }

    #[test]
    fn test_delta_position_climbing_positive() {
        let engine = FeatureEngine::default();
        // Was 5, now 2: improved 3 spots
        let f = engine.compute(&entry(2, 10_000, Some(5)), &[obs(5, 9_000)]);
        assert_eq!(f.delta_position, 3);
    }

    #[test]
    fn test_delta_streams_pct() {
        let engine = FeatureEngine::default();
        let f = engine.compute(&entry(1, 1_500, Some(1)), &[obs(1, 1_000)]);
        assert!((f.delta_streams_pct - 50.0).abs() < 1e-9);

        // Zero previous streams: defined as 0, not infinity
        let f = engine.compute(&entry(1, 1_500, Some(1)), &[obs(1, 0)]);
        assert_eq!(f.delta_streams_pct, 0.0);
    }

    #[test]
    fn test_baselines_average_available_history() {
        let engine = FeatureEngine::default();
        let history = vec![obs(10, 1_000), obs(8, 2_000), obs(6, 3_000)];
        let f = engine.compute(&entry(4, 4_000, Some(6)), &history);
        // Positions 10, 8, 6, 4 -> mean 7; streams mean 2500
        assert_eq!(f.baseline_position_12w, Some(7.0));
        assert_eq!(f.baseline_streams_12w, Some(2_500.0));
    }

    #[test]
    fn test_baseline_caps_at_twelve_observations() {
        let engine = FeatureEngine::default();
        // 15 prior weeks pinned at position 100, then 11 recent at 1
        let mut history = vec![obs(100, 1_000); 4];
        history.extend(vec![obs(1, 1_000); 11]);
        let f = engine.compute(&entry(1, 1_000, Some(1)), &history);
        // Window = last 12 observations, all at position 1
        assert_eq!(f.baseline_position_12w, Some(1.0));
    }

    #[test]
    fn test_speed_is_mean_of_recent_transitions() {
        let engine = FeatureEngine::default();
        // Positions 20 -> 14 -> 10 -> 8: deltas +6, +4, +2, mean +4
        let history = vec![obs(20, 1_000), obs(14, 1_000), obs(10, 1_000)];
        let f = engine.compute(&entry(8, 1_000, Some(10)), &history);
        assert!((f.speed_4w - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_acceleration_compares_shifted_windows() {
        let engine = FeatureEngine::default();
        // Deltas: +6, +4, +2 -> speed = 4; prior window (+6, +4) -> 5
        let history = vec![obs(20, 1_000), obs(14, 1_000), obs(10, 1_000)];
        let f = engine.compute(&entry(8, 1_000, Some(10)), &history);
        assert!((f.acceleration - (4.0 - 5.0)).abs() < 1e-9);
    }

    #[test]
    fn test_acceleration_needs_three_observations() {
        let engine = FeatureEngine::default();
        let f = engine.compute(&entry(8, 1_000, Some(10)), &[obs(10, 1_000)]);
        assert_eq!(f.acceleration, 0.0);
    }

    #[test]
    fn test_momentum_score_stays_in_bounds() {
        let engine = FeatureEngine::default();
        // A violent climb against a quiet history pushes the z-scores far
        // out; the clamp must hold the score inside [0, 100].
        let history = vec![
            obs(150, 1_000),
            obs(149, 1_001),
            obs(148, 1_002),
            obs(147, 1_003),
        ];
        let up = engine.compute(&entry(1, 900_000, Some(147)), &history);
        assert!(up.momentum_score >= 0.0 && up.momentum_score <= 100.0);

        let down = engine.compute(&entry(200, 1, Some(1)), &history);
        assert!(down.momentum_score >= 0.0 && down.momentum_score <= 100.0);
    }

    #[test]
    fn test_flat_history_zero_stddev_scores_neutral() {
        let engine = FeatureEngine::default();
        // Identical observations: every sample distribution has stddev 0,
        // all z-scores are 0, score is exactly 50.
        let history = vec![obs(5, 1_000), obs(5, 1_000), obs(5, 1_000)];
        let f = engine.compute(&entry(5, 1_000, Some(5)), &history);
        assert_eq!(f.momentum_score, 50.0);
    }

    #[test]
    fn test_z_score_edge_cases() {
        assert_eq!(z_score(1.0, &[]), 0.0);
        assert_eq!(z_score(5.0, &[2.0, 2.0, 2.0]), 0.0);
        let z = z_score(2.0, &[1.0, 3.0]);
        assert_eq!(z, 0.0); // value equals the mean
    }

    #[test]
    fn test_default_weights_sum_to_one() {
        assert!((MomentumWeights::default().sum() - 1.0).abs() < 1e-12);
    }
}
