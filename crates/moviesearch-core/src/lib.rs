use std::time::Duration;
use thiserror::Error;

pub mod config_file;
pub mod coordinator;
pub mod mock;
pub mod poster;
pub mod queue;
pub mod search;
pub mod session;

// Re-export for convenience
pub use coordinator::{FetchCompletion, FetchOutcome, PendingFetches, PosterCoordinator, Reconciliation};
pub use poster::{HttpPosterSource, PosterError, PosterImage, PosterSource};
pub use queue::{FetchQueue, TaskHandle};
pub use search::{Movie, SearchBackend, SearchError, SearchPage, TmdbSearch};
pub use session::MovieList;

/// Default TMDB movie search endpoint.
pub const DEFAULT_SEARCH_URL: &str = "https://api.themoviedb.org/3/search/movie";

/// Default CDN prefix for poster images; the per-movie poster path is appended.
pub const DEFAULT_IMAGE_BASE_URL: &str = "https://image.tmdb.org/t/p/w600_and_h900_bestv2";

/// Lifecycle of a record's poster. `Downloaded` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PosterState {
    #[default]
    New,
    Downloaded,
    Failed,
}

impl PosterState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Downloaded | Self::Failed)
    }
}

/// The image shown for a record once its fetch has settled.
#[derive(Debug, Clone)]
pub enum Poster {
    Image(PosterImage),
    /// Stand-in shown for records whose poster could not be fetched.
    Placeholder,
}

/// One row of the result list.
#[derive(Debug, Clone)]
pub struct MovieRecord {
    pub id: i64,
    pub title: String,
    pub overview: Option<String>,
    pub release_date: Option<String>,
    pub poster_url: Option<String>,
    pub poster: Option<Poster>,
    pub poster_state: PosterState,
}

impl MovieRecord {
    /// Build a fresh record from a search result, resolving the poster path
    /// against `image_base_url`.
    pub fn from_movie(movie: Movie, image_base_url: &str) -> Self {
        let poster_url = movie
            .poster_path
            .as_deref()
            .and_then(|path| poster::poster_url(image_base_url, path));
        Self {
            id: movie.id,
            title: movie.title,
            overview: movie.overview,
            release_date: movie.release_date,
            poster_url,
            poster: None,
            poster_state: PosterState::New,
        }
    }

    /// Apply a fetch outcome. Only a `New` record changes; returns whether
    /// the record was updated.
    pub(crate) fn apply_outcome(&mut self, outcome: FetchOutcome) -> bool {
        if self.poster_state != PosterState::New {
            return false;
        }
        match outcome {
            FetchOutcome::Downloaded(image) => {
                self.poster = Some(Poster::Image(image));
                self.poster_state = PosterState::Downloaded;
            }
            FetchOutcome::Failed => {
                self.poster = Some(Poster::Placeholder);
                self.poster_state = PosterState::Failed;
            }
        }
        true
    }
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("configuration error: {0}")]
    Config(String),
}

/// Runtime configuration for search and poster fetching.
#[derive(Clone)]
pub struct Config {
    pub api_key: Option<String>,
    pub search_url: String,
    pub image_base_url: String,
    /// Number of posters fetched at once. Clamped to at least 1.
    pub max_concurrent_fetches: usize,
    /// Per-poster transfer timeout. `None` lets a transfer run indefinitely.
    pub fetch_timeout_secs: Option<u64>,
    pub search_timeout_secs: u64,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("search_url", &self.search_url)
            .field("image_base_url", &self.image_base_url)
            .field("max_concurrent_fetches", &self.max_concurrent_fetches)
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .field("search_timeout_secs", &self.search_timeout_secs)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            search_url: DEFAULT_SEARCH_URL.to_string(),
            image_base_url: DEFAULT_IMAGE_BASE_URL.to_string(),
            max_concurrent_fetches: 1,
            fetch_timeout_secs: None,
            search_timeout_secs: 10,
        }
    }
}

impl Config {
    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_secs.map(Duration::from_secs)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search_timeout_secs)
    }

    /// Reject configurations that cannot produce a working client.
    pub fn validate(&self) -> Result<(), CoreError> {
        for (name, url) in [
            ("search_url", &self.search_url),
            ("image_base_url", &self.image_base_url),
        ] {
            reqwest::Url::parse(url)
                .map_err(|e| CoreError::Config(format!("{name} {url:?}: {e}")))?;
        }
        if self.fetch_timeout_secs == Some(0) {
            return Err(CoreError::Config(
                "fetch_timeout_secs must be positive".into(),
            ));
        }
        if self.search_timeout_secs == 0 {
            return Err(CoreError::Config(
                "search_timeout_secs must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Build the shared HTTP client used for search and poster requests.
pub fn build_http_client() -> Result<reqwest::Client, CoreError> {
    let client = reqwest::Client::builder()
        .pool_max_idle_per_host(2)
        .pool_idle_timeout(Duration::from_secs(30))
        .user_agent(concat!("moviesearch/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}
