//! Movie search against the TMDB `search/movie` endpoint.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Error kinds observed at the search network boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SearchError {
    #[error("not a valid URL: {0}")]
    InvalidUrl(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid response from server (HTTP {status})")]
    InvalidResponse { status: u16 },
    #[error("unexpected empty payload in response")]
    NilResult,
    #[error("malformed JSON: {0}")]
    MalformedJson(String),
    #[error("unexpected JSON shape: {0}")]
    UnexpectedShape(String),
    #[error("unknown error: {0}")]
    Unknown(String),
}

impl SearchError {
    fn from_transport(e: reqwest::Error) -> Self {
        if e.is_builder() {
            SearchError::InvalidUrl(e.to_string())
        } else if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
            SearchError::Network(e.to_string())
        } else if e.is_decode() {
            SearchError::MalformedJson(e.to_string())
        } else {
            SearchError::Unknown(e.to_string())
        }
    }
}

/// A movie as returned by the search endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Movie {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
}

/// One page of search results.
#[derive(Debug, Clone)]
pub struct SearchPage {
    pub page: u32,
    pub total_pages: u32,
    pub total_results: u64,
    pub movies: Vec<Movie>,
}

#[derive(Debug, Deserialize)]
struct RawSearchResponse {
    #[serde(default)]
    page: u32,
    #[serde(default)]
    total_pages: u32,
    total_results: u64,
    results: Vec<Movie>,
}

/// A movie search backend.
pub trait SearchBackend: Send + Sync {
    /// Fetch one page (1-based) of results for `keyword`.
    fn search<'a>(
        &'a self,
        keyword: &'a str,
        page: u32,
    ) -> Pin<Box<dyn Future<Output = Result<SearchPage, SearchError>> + Send + 'a>>;
}

/// TMDB search client.
pub struct TmdbSearch {
    client: reqwest::Client,
    search_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl TmdbSearch {
    pub fn new(
        client: reqwest::Client,
        search_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            search_url: search_url.into(),
            api_key,
            timeout,
        }
    }

    pub fn from_config(client: reqwest::Client, config: &crate::Config) -> Self {
        Self::new(
            client,
            config.search_url.clone(),
            config.api_key.clone(),
            config.search_timeout(),
        )
    }
}

impl SearchBackend for TmdbSearch {
    fn search<'a>(
        &'a self,
        keyword: &'a str,
        page: u32,
    ) -> Pin<Box<dyn Future<Output = Result<SearchPage, SearchError>> + Send + 'a>> {
        Box::pin(async move {
            let url = build_search_url(&self.search_url, self.api_key.as_deref(), keyword, page)?;
            tracing::debug!(keyword, page, "searching movies");

            let resp = self
                .client
                .get(url)
                .timeout(self.timeout)
                .send()
                .await
                .map_err(SearchError::from_transport)?;

            let status = resp.status();
            if !status.is_success() {
                return Err(SearchError::InvalidResponse {
                    status: status.as_u16(),
                });
            }

            let body = resp.text().await.map_err(SearchError::from_transport)?;
            parse_search_response(&body)
        })
    }
}

/// Build the search request URL with `api_key`, `query` and `page` parameters.
pub fn build_search_url(
    base: &str,
    api_key: Option<&str>,
    keyword: &str,
    page: u32,
) -> Result<reqwest::Url, SearchError> {
    let page = page.max(1).to_string();
    let mut params = Vec::with_capacity(3);
    if let Some(key) = api_key {
        params.push(("api_key", key));
    }
    params.push(("query", keyword));
    params.push(("page", page.as_str()));

    reqwest::Url::parse_with_params(base, &params).map_err(|e| SearchError::InvalidUrl(e.to_string()))
}

/// Parse a search response body.
///
/// An empty or `null` body is [`SearchError::NilResult`]; invalid JSON is
/// [`SearchError::MalformedJson`]; valid JSON without the expected fields is
/// [`SearchError::UnexpectedShape`].
pub fn parse_search_response(body: &str) -> Result<SearchPage, SearchError> {
    if body.trim().is_empty() {
        return Err(SearchError::NilResult);
    }
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| SearchError::MalformedJson(e.to_string()))?;
    if value.is_null() {
        return Err(SearchError::NilResult);
    }
    let raw: RawSearchResponse =
        serde_json::from_value(value).map_err(|e| SearchError::UnexpectedShape(e.to_string()))?;

    Ok(SearchPage {
        page: raw.page,
        total_pages: raw.total_pages,
        total_results: raw.total_results,
        movies: raw.results,
    })
}
