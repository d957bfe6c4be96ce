use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use ureq::Agent;

use crate::resolver::{SearchCandidate, TrackSearch};

#[derive(Error, Debug)]
pub enum EnrichError {
    #[error("Provider not configured (missing refresh token)")]
    NotConfigured,
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Provider unavailable: {0}")]
    Unavailable(String),
    #[error("Failed to parse provider response: {0}")]
    Parse(String),
}

/// Exponential backoff parameters for transient provider failures
/// (429 rate limits and 5xx responses).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Cap for exponential growth, in milliseconds.
    pub max_delay_ms: u64,
    /// Multiplier applied per retry.
    pub multiplier: f64,
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (0-based):
    /// `base * multiplier^retry`, capped at `max_delay_ms`.
    pub fn backoff_ms(&self, retry: u32) -> u64 {
        let delay = self.base_delay_ms as f64 * self.multiplier.powi(retry as i32);
        delay.min(self.max_delay_ms as f64) as u64
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            multiplier: 2.0,
        }
    }
}

/// Access token plus its expiry deadline.
struct TokenState {
    access_token: String,
    expires_at: Instant,
}

/// Refresh margin: treat a token as expired this long before its deadline
/// so in-flight calls don't race the cutoff.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
    /// Lifetime in seconds (typically 3600).
    expires_in: u64,
}

/// Authenticated client for the enrichment provider.
///
/// Auth flow: a long-lived refresh credential buys short-lived access
/// tokens; a 401 mid-call triggers exactly one transparent refresh-and-retry
/// before the call degrades. 429/5xx responses and transport errors retry
/// with exponential backoff up to `RetryPolicy::max_attempts`; exhaustion
/// surfaces as `EnrichError::Unavailable`, which the enricher treats as
/// "fields unavailable", never as a fatal pipeline error.
pub struct ProviderClient {
    agent: Agent,
    base_url: String,
    refresh_token: String,
    retry: RetryPolicy,
    token: Mutex<Option<TokenState>>,
}

impl ProviderClient {
    pub fn new(
        base_url: impl Into<String>,
        refresh_token: impl Into<String>,
        timeout_secs: u64,
        retry: RetryPolicy,
    ) -> Result<Self, EnrichError> {
        let refresh_token = refresh_token.into();
        if refresh_token.is_empty() {
            return Err(EnrichError::NotConfigured);
        }

        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(timeout_secs)))
            .http_status_as_error(false)
            .build()
            .into();

        Ok(Self {
            agent,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            refresh_token,
            retry,
            token: Mutex::new(None),
        })
    }

    /// Look up track metadata by catalog id.
    pub fn get_track(&self, catalog_id: &str) -> Result<TrackDto, EnrichError> {
        let path = format!("/track/{catalog_id}");
        self.request_json::<Envelope<TrackDto>>(&path).map(|e| e.obj)
    }

    /// Look up artist metadata by provider artist id.
    pub fn get_artist(&self, artist_id: i64) -> Result<ArtistDto, EnrichError> {
        let path = format!("/artist/{artist_id}");
        self.request_json::<Envelope<ArtistDto>>(&path).map(|e| e.obj)
    }

    /// Look up artist social-reach metrics by provider artist id.
    pub fn get_artist_stats(&self, artist_id: i64) -> Result<ArtistStatsDto, EnrichError> {
        let path = format!("/artist/{artist_id}/stat");
        self.request_json::<Envelope<ArtistStatsDto>>(&path)
            .map(|e| e.obj)
    }

    /// GET a JSON payload with auth, one 401 refresh-retry, and backoff on
    /// transient failures. Every provider call funnels through here so all
    /// call sites share identical failure semantics.
    fn request_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, EnrichError> {
        let url = format!("{}{path}", self.base_url);
        let mut refreshed_once = false;
        let mut retries = 0u32;

        loop {
            let token = self.access_token()?;
            let result = self
                .agent
                .get(&url)
                .header("Authorization", &format!("Bearer {token}"))
                .call();

            match result {
                Ok(mut resp) => {
                    let status = resp.status().as_u16();
                    match status {
                        200..=299 => {
                            return resp
                                .body_mut()
                                .read_json::<T>()
                                .map_err(|e| EnrichError::Parse(e.to_string()));
                        }
                        401 if !refreshed_once => {
                            log::info!("Access token rejected, refreshing and retrying once");
                            self.invalidate_token();
                            refreshed_once = true;
                        }
                        401 => {
                            return Err(EnrichError::Auth(format!(
                                "401 after token refresh for {path}"
                            )));
                        }
                        404 => return Err(EnrichError::NotFound(path.to_string())),
                        429 | 500..=599 => {
                            if retries + 1 >= self.retry.max_attempts {
                                return Err(EnrichError::Unavailable(format!(
                                    "{status} from {path} after {} attempts",
                                    retries + 1
                                )));
                            }
                            let delay = self.retry.backoff_ms(retries);
                            log::debug!("{status} from {path}, backing off {delay}ms");
                            std::thread::sleep(Duration::from_millis(delay));
                            retries += 1;
                        }
                        other => {
                            return Err(EnrichError::Unavailable(format!(
                                "unexpected status {other} from {path}"
                            )));
                        }
                    }
                }
                Err(e) => {
                    // Transport error (timeout, connect failure): transient
                    if retries + 1 >= self.retry.max_attempts {
                        return Err(EnrichError::Unavailable(e.to_string()));
                    }
                    let delay = self.retry.backoff_ms(retries);
                    log::debug!("Transport error for {path} ({e}), backing off {delay}ms");
                    std::thread::sleep(Duration::from_millis(delay));
                    retries += 1;
                }
            }
        }
    }

    /// Return a valid access token, refreshing through the provider's token
    /// endpoint when missing or near expiry.
    fn access_token(&self) -> Result<String, EnrichError> {
        let mut guard = self
            .token
            .lock()
            .map_err(|_| EnrichError::Auth("token lock poisoned".into()))?;

        if let Some(state) = guard.as_ref() {
            if state.expires_at > Instant::now() + TOKEN_EXPIRY_MARGIN {
                return Ok(state.access_token.clone());
            }
        }

        log::debug!("Refreshing provider access token");
        let url = format!("{}/token", self.base_url);
        let mut resp = self
            .agent
            .post(&url)
            .send_json(serde_json::json!({ "refreshtoken": self.refresh_token }))
            .map_err(|e| EnrichError::Auth(format!("token refresh failed: {e}")))?;

        let status = resp.status().as_u16();
        if !(200..=299).contains(&status) {
            return Err(EnrichError::Auth(format!("token refresh failed: {status}")));
        }

        let token: TokenResponse = resp
            .body_mut()
            .read_json()
            .map_err(|e| EnrichError::Auth(format!("token response unparseable: {e}")))?;

        let access = token.token.clone();
        *guard = Some(TokenState {
            access_token: token.token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });
        Ok(access)
    }

    fn invalidate_token(&self) {
        if let Ok(mut guard) = self.token.lock() {
            *guard = None;
        }
    }
}

impl TrackSearch for ProviderClient {
    fn search_tracks(
        &self,
        title: &str,
        artist: &str,
        limit: usize,
    ) -> Result<Vec<SearchCandidate>, EnrichError> {
        let query = format!("{artist} {title}");
        let path = format!("/search/tracks?q={}&limit={limit}", encode_query(&query));

        let resp: Envelope<SearchResultsDto> = self.request_json(&path)?;
        Ok(resp
            .obj
            .tracks
            .into_iter()
            .filter_map(|t| {
                Some(SearchCandidate {
                    catalog_id: t.id?,
                    title: t.name.unwrap_or_default(),
                    artist: t.artist_names.first().cloned().unwrap_or_default(),
                })
            })
            .collect())
    }
}

/// Percent-encode a free-text search query for a URL query parameter.
fn encode_query(q: &str) -> String {
    let mut out = String::with_capacity(q.len());
    for c in q.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if c == ' ' {
            out.push('+');
        } else {
            let mut buf = [0u8; 4];
            for b in c.encode_utf8(&mut buf).bytes() {
                out.push_str(&format!("%{b:02X}"));
            }
        }
    }
    out
}

// ── Provider response shapes ──────────────────────────────────────────
// Every payload is wrapped in an `obj` envelope and nullable at the field
// level. These DTOs exist only at this boundary; the adapter in the
// enricher maps them onto the canonical TrackMetadata.

#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub obj: T,
}

#[derive(Debug, Deserialize)]
pub struct NamedRef {
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ArtistRef {
    pub id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct TrackDto {
    #[serde(default)]
    pub genres: Vec<NamedRef>,
    pub label: Option<NamedRef>,
    pub distributor: Option<NamedRef>,
    pub release_date: Option<String>,
    #[serde(default)]
    pub artists: Vec<ArtistRef>,
}

#[derive(Debug, Deserialize)]
pub struct ArtistDto {
    pub country: Option<String>,
    pub city: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ArtistStatsDto {
    pub spotify_followers: Option<u64>,
    pub instagram_followers: Option<u64>,
    pub tiktok_followers: Option<u64>,
    pub youtube_subscribers: Option<u64>,
    pub as_of: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResultsDto {
    #[serde(default)]
    tracks: Vec<SearchTrackDto>,
}

#[derive(Debug, Deserialize)]
struct SearchTrackDto {
    id: Option<String>,
    name: Option<String>,
    #[serde(default)]
    artist_names: Vec<String>,
}
