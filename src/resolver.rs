use crate::enrich::client::EnrichError;
use crate::similarity::TextSimilarity;

/// Weight of title similarity in the combined score.
const TITLE_WEIGHT: f64 = 0.6;
/// Weight of artist similarity in the combined score.
const ARTIST_WEIGHT: f64 = 0.4;
/// Minimum combined score (exclusive) to accept a candidate. Tuned for
/// precision over recall: a miss leaves the entry unenriched, while a
/// wrong match would poison enrichment and momentum history.
const ACCEPT_THRESHOLD: f64 = 0.70;

/// A ranked candidate returned by the search capability.
#[derive(Debug, Clone)]
pub struct SearchCandidate {
    pub catalog_id: String,
    pub title: String,
    pub artist: String,
}

/// Free-text track search, implemented by the enrichment provider client
/// (and by fixtures in tests).
pub trait TrackSearch {
    fn search_tracks(
        &self,
        title: &str,
        artist: &str,
        limit: usize,
    ) -> Result<Vec<SearchCandidate>, EnrichError>;
}

/// Outcome of a resolution attempt. A miss is a value, not an error: the
/// entry proceeds through the pipeline without a catalog id.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Matched { catalog_id: String, score: f64 },
    Miss,
}

/// Resolves `(title, artist)` pairs to catalog ids via fuzzy matching
/// against search results.
pub struct Resolver<'a> {
    search: &'a dyn TrackSearch,
    similarity: Box<dyn TextSimilarity>,
    search_limit: usize,
}

impl<'a> Resolver<'a> {
    pub fn new(search: &'a dyn TrackSearch, similarity: Box<dyn TextSimilarity>) -> Self {
        Self {
            search,
            similarity,
            search_limit: 3,
        }
    }

    /// Resolve one `(title, artist)` pair. Search failures degrade to a
    /// miss; they are logged, never fatal.
    pub fn resolve(&self, title: &str, artist: &str) -> Resolution {
        let candidates = match self.search.search_tracks(title, artist, self.search_limit) {
            Ok(c) => c,
            Err(e) => {
                log::warn!("Search failed for \"{title}\" by \"{artist}\": {e}");
                return Resolution::Miss;
            }
        };
        self.pick_best(title, artist, &candidates)
    }

    /// Score candidates and accept the best one only above the threshold.
    fn pick_best(&self, title: &str, artist: &str, candidates: &[SearchCandidate]) -> Resolution {
        let mut best: Option<(&SearchCandidate, f64)> = None;

        for cand in candidates {
            let score = self.combined_score(title, artist, &cand.title, &cand.artist);
            if best.is_none_or(|(_, s)| score > s) {
                best = Some((cand, score));
            }
        }

        match best {
            Some((cand, score)) if score > ACCEPT_THRESHOLD => {
                log::debug!(
                    "Resolved \"{title}\" by \"{artist}\" to {} (score {score:.3})",
                    cand.catalog_id
                );
                Resolution::Matched {
                    catalog_id: cand.catalog_id.clone(),
                    score,
                }
            }
            Some((_, score)) => {
                log::debug!("Best candidate for \"{title}\" scored {score:.3}, below threshold");
                Resolution::Miss
            }
            None => Resolution::Miss,
        }
    }

    /// Combined similarity: title and artist scored independently, then
    /// weighted 0.6/0.4.
    fn combined_score(&self, title: &str, artist: &str, cand_title: &str, cand_artist: &str) -> f64 {
        let title_sim = self.similarity.similarity(title, cand_title);
        let artist_sim = self.similarity.similarity(artist, cand_artist);
        TITLE_WEIGHT * title_sim + ARTIST_WEIGHT * artist_sim
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::TokenSetSimilarity;

    struct FixedSearch(Vec<SearchCandidate>);

    impl TrackSearch for FixedSearch {
        fn search_tracks(
            &self,
            _title: &str,
            _artist: &str,
            _limit: usize,
        ) -> Result<Vec<SearchCandidate>, EnrichError> {
            Ok(self.0.clone())
        }
    }

    struct FailingSearch;

    impl TrackSearch for FailingSearch {
        fn search_tracks(
            &self,
            _title: &str,
            _artist: &str,
            _limit: usize,
        ) -> Result<Vec<SearchCandidate>, EnrichError> {
            Err(EnrichError::Unavailable("search down".into()))
        }
    }

    fn candidate(id: &str, title: &str, artist: &str) -> SearchCandidate {
        SearchCandidate {
            catalog_id: id.into(),
            title: title.into(),
            artist: artist.into(),
        }
    }

    #[test]
    fn test_exact_match_scores_one_and_resolves() {
        let search = FixedSearch(vec![candidate("cat-1", "Blinding Lights", "The Weeknd")]);
        let resolver = Resolver::new(&search, Box::new(TokenSetSimilarity));

        match resolver.resolve("Blinding Lights", "The Weeknd") {
            Resolution::Matched { catalog_id, score } => {
                assert_eq!(catalog_id, "cat-1");
                assert!((score - 1.0).abs() < 1e-12);
            }
            Resolution::Miss => panic!("expected a match"),
        }
    }

    #[test]
    fn test_wrong_artist_falls_below_threshold() {
        // Title matches perfectly (0.6) but artist is disjoint (0.0):
        // combined 0.6, below the 0.70 threshold.
        let search = FixedSearch(vec![candidate("cat-2", "Blinding Lights", "Unrelated Artist")]);
        let resolver = Resolver::new(&search, Box::new(TokenSetSimilarity));

        assert_eq!(
            resolver.resolve("Blinding Lights", "The Weeknd"),
            Resolution::Miss
        );
    }

    #[test]
    fn test_best_of_multiple_candidates_wins() {
        let search = FixedSearch(vec![
            candidate("cat-a", "Blinding Lights Remix", "The Weeknd"),
            candidate("cat-b", "Blinding Lights", "The Weeknd"),
        ]);
        let resolver = Resolver::new(&search, Box::new(TokenSetSimilarity));

        match resolver.resolve("Blinding Lights", "The Weeknd") {
            Resolution::Matched { catalog_id, .. } => assert_eq!(catalog_id, "cat-b"),
            Resolution::Miss => panic!("expected a match"),
        }
    }

    #[test]
    fn test_empty_candidates_is_a_miss() {
        let search = FixedSearch(vec![]);
        let resolver = Resolver::new(&search, Box::new(TokenSetSimilarity));
        assert_eq!(resolver.resolve("Anything", "Anyone"), Resolution::Miss);
    }

    #[test]
    fn test_search_failure_degrades_to_miss() {
        let resolver = Resolver::new(&FailingSearch, Box::new(TokenSetSimilarity));
        assert_eq!(
            resolver.resolve("Blinding Lights", "The Weeknd"),
            Resolution::Miss
        );
    }
}
