use std::collections::HashMap;

use crate::model::{LabelMarketShare, LabelType, MarketConcentration, TrackAnalysis};

/// Bucket for tracks whose label enrichment failed or returned nothing.
pub const UNKNOWN_LABEL: &str = "Independent/Unknown";

/// Known major-label name variants. Classification is a case-insensitive
/// substring match, so "Sony Music Latin" and "UMG Recordings" both land
/// on the major side. Everything else defaults to independent.
const MAJOR_LABEL_VARIANTS: &[&str] = &[
    "universal music group",
    "universal music",
    "universal",
    "umg",
    "sony music entertainment",
    "sony music",
    "sony",
    "warner music group",
    "warner music",
    "warner bros",
    "warner",
    "emi",
    "capitol music group",
    "capitol records",
    "atlantic records",
    "columbia records",
    "rca records",
    "def jam recordings",
    "republic records",
    "interscope records",
    "geffen records",
    "island records",
    "virgin records",
    "bmg rights management",
    "bmg",
];

/// Per-snapshot label market-share and concentration report.
#[derive(Debug, Clone)]
pub struct ConcentrationReport {
    /// All label rollups, sorted by market share descending.
    pub labels: Vec<LabelMarketShare>,
    pub concentration: MarketConcentration,
}

/// Groups a snapshot's tracks by label and computes market-share metrics.
/// Pure computation; no external calls.
pub struct ConcentrationAnalyzer {
    major_variants: Vec<String>,
}

impl ConcentrationAnalyzer {
    /// Build with the built-in major-label list plus any custom variants
    /// from config (additive merge, matched case-insensitively).
    pub fn new(extra_major_variants: &[String]) -> Self {
        let mut major_variants: Vec<String> =
            MAJOR_LABEL_VARIANTS.iter().map(|v| v.to_string()).collect();
        for extra in extra_major_variants {
            let lower = extra.to_lowercase();
            if !lower.is_empty() && !major_variants.contains(&lower) {
                major_variants.push(lower);
            }
        }
        Self { major_variants }
    }

    /// Classify a label name as major or independent.
    pub fn classify(&self, label: &str) -> LabelType {
        let lower = label.to_lowercase();
        if self.major_variants.iter().any(|m| lower.contains(m.as_str())) {
            LabelType::Major
        } else {
            LabelType::Independent
        }
    }

    /// Compute the full report for one snapshot's tracks. An empty track
    /// list yields an empty label list and zeroed concentration metrics.
    pub fn analyze(&self, tracks: &[TrackAnalysis]) -> ConcentrationReport {
        if tracks.is_empty() {
            return ConcentrationReport {
                labels: Vec::new(),
                concentration: MarketConcentration::default(),
            };
        }

        let mut groups: HashMap<&str, Vec<&TrackAnalysis>> = HashMap::new();
        for track in tracks {
            let label = track.meta.label.as_deref().unwrap_or(UNKNOWN_LABEL);
            groups.entry(label).or_default().push(track);
        }

        let total_tracks = tracks.len() as f64;
        let mut labels: Vec<LabelMarketShare> = groups
            .into_iter()
            .map(|(label, members)| {
                let count = members.len();
                let total_streams: u64 = members.iter().map(|t| t.entry.streams).sum();
                let average_position = members
                    .iter()
                    .map(|t| t.entry.position as f64)
                    .sum::<f64>()
                    / count as f64;
                let top10_track_count =
                    members.iter().filter(|t| t.entry.position <= 10).count() as u32;
                let label_type = if label == UNKNOWN_LABEL {
                    LabelType::Independent
                } else {
                    self.classify(label)
                };

                LabelMarketShare {
                    label: label.to_string(),
                    track_count: count as u32,
                    market_share_pct: count as f64 / total_tracks * 100.0,
                    average_position,
                    top10_track_count,
                    total_streams,
                    label_type,
                }
            })
            .collect();

        // Share descending, label name as a deterministic tie-break
        labels.sort_by(|a, b| {
            b.market_share_pct
                .partial_cmp(&a.market_share_pct)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.label.cmp(&b.label))
        });

        let top_n_share =
            |n: usize| labels.iter().take(n).map(|l| l.market_share_pct).sum::<f64>();
        let top3_labels_share_pct = top_n_share(3);
        let top5_labels_share_pct = top_n_share(5);
        // HHI sums squared shares over ALL labels, not just a displayed top-N
        let hhi_index = labels
            .iter()
            .map(|l| l.market_share_pct * l.market_share_pct)
            .sum();

        ConcentrationReport {
            labels,
            concentration: MarketConcentration {
                top3_labels_share_pct,
                top5_labels_share_pct,
                hhi_index,
            },
        }
    }
}
