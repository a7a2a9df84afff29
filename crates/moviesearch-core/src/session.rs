//! The result list: records for the current keyword, paging, and the poster
//! coordinator that fills them in.

use std::sync::Arc;

use crate::coordinator::{FetchCompletion, PosterCoordinator, Reconciliation};
use crate::search::{SearchBackend, SearchError};
use crate::{MovieRecord, PosterSource};

/// Owner of the search results and their poster fetches.
///
/// Everything here is meant to be driven from one task; poster results
/// arrive through [`MovieList::next_refresh`].
pub struct MovieList {
    search: Arc<dyn SearchBackend>,
    image_base_url: String,
    keyword: Option<String>,
    next_page: u32,
    total_pages: u32,
    total_results: u64,
    records: Vec<MovieRecord>,
    posters: PosterCoordinator,
}

impl MovieList {
    pub fn new(
        search: Arc<dyn SearchBackend>,
        posters: Arc<dyn PosterSource>,
        config: &crate::Config,
    ) -> Self {
        Self {
            search,
            image_base_url: config.image_base_url.clone(),
            keyword: None,
            next_page: 1,
            total_pages: 0,
            total_results: 0,
            records: Vec::new(),
            posters: PosterCoordinator::new(posters, config.max_concurrent_fetches),
        }
    }

    pub fn records(&self) -> &[MovieRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn keyword(&self) -> Option<&str> {
        self.keyword.as_deref()
    }

    /// Total matches reported by the server for the current keyword.
    pub fn total_results(&self) -> u64 {
        self.total_results
    }

    /// Whether more pages remain for the current keyword.
    ///
    /// False once the records reach the reported total or the next page is
    /// past the last page the server will serve.
    pub fn has_more(&self) -> bool {
        self.keyword.is_some()
            && (self.records.len() as u64) < self.total_results
            && self.next_page <= self.total_pages
    }

    pub fn posters(&self) -> &PosterCoordinator {
        &self.posters
    }

    /// Start a new result list for `keyword` and load its first page.
    ///
    /// Returns the number of rows added. Errors are logged and yield 0.
    pub async fn search(&mut self, keyword: &str) -> usize {
        let keyword = keyword.trim();
        self.clear();
        if keyword.is_empty() {
            return 0;
        }
        self.keyword = Some(keyword.to_string());
        self.fetch_next_page().await
    }

    /// Load the next page for the current keyword, if any.
    pub async fn load_more(&mut self) -> usize {
        if !self.has_more() {
            return 0;
        }
        self.fetch_next_page().await
    }

    /// Drop all records and cancel their fetches.
    pub fn clear(&mut self) {
        self.posters.cancel_all();
        self.records.clear();
        self.keyword = None;
        self.next_page = 1;
        self.total_pages = 0;
        self.total_results = 0;
    }

    async fn fetch_next_page(&mut self) -> usize {
        let Some(keyword) = self.keyword.clone() else {
            return 0;
        };
        let page = self.next_page;

        match self.search.search(&keyword, page).await {
            Ok(results) => {
                self.next_page = page + 1;
                self.total_results = results.total_results;
                let added = results.movies.len();
                // An empty page ends the list whatever the totals claim. A
                // response without a page count is bounded by the totals only.
                self.total_pages = match (added, results.total_pages) {
                    (0, _) => page,
                    (_, 0) => u32::MAX,
                    (_, pages) => pages,
                };
                self.records.extend(
                    results
                        .movies
                        .into_iter()
                        .map(|movie| MovieRecord::from_movie(movie, &self.image_base_url)),
                );
                tracing::info!(
                    keyword = %keyword,
                    page,
                    added,
                    total = self.total_results,
                    "search page loaded"
                );
                added
            }
            Err(e) => {
                report_search_error(&keyword, page, &e);
                0
            }
        }
    }

    /// See [`PosterCoordinator::reconcile`].
    pub fn reconcile(&mut self, visible: impl IntoIterator<Item = usize>) -> Reconciliation {
        self.posters.reconcile(visible, &self.records)
    }

    /// See [`PosterCoordinator::row_shown`].
    pub fn row_shown(&mut self, row: usize) -> bool {
        self.posters.row_shown(row, &self.records)
    }

    pub fn begin_drag(&mut self) {
        self.posters.begin_drag();
    }

    pub fn end_drag(
        &mut self,
        will_decelerate: bool,
        visible: impl IntoIterator<Item = usize>,
    ) -> Option<Reconciliation> {
        self.posters.end_drag(will_decelerate, visible, &self.records)
    }

    pub fn end_deceleration(&mut self, visible: impl IntoIterator<Item = usize>) -> Reconciliation {
        self.posters.end_deceleration(visible, &self.records)
    }

    /// Wait for the next poster result and apply it.
    ///
    /// Returns `Some(Some(row))` when `row` needs a refresh, `Some(None)` for
    /// a stale result, and `None` if no more results can arrive.
    pub async fn next_refresh(&mut self) -> Option<Option<usize>> {
        let completion = self.posters.next_completion().await?;
        Some(self.apply(completion))
    }

    /// Apply every ready poster result. Returns the rows to refresh.
    pub fn drain_refreshes(&mut self) -> Vec<usize> {
        self.posters.drain_completions(&mut self.records)
    }

    fn apply(&mut self, completion: FetchCompletion) -> Option<usize> {
        self.posters.apply_completion(completion, &mut self.records)
    }

    /// Cancel outstanding fetches and stop the worker pool.
    pub async fn shutdown(self) {
        self.posters.shutdown().await;
    }
}

/// Log a search failure. Nothing is retried or surfaced further.
fn report_search_error(keyword: &str, page: u32, error: &SearchError) {
    match error {
        SearchError::InvalidUrl(detail) => {
            tracing::warn!(keyword, page, detail = %detail, "not a valid URL")
        }
        SearchError::Network(detail) => {
            tracing::warn!(keyword, page, detail = %detail, "network error")
        }
        SearchError::InvalidResponse { status } => {
            tracing::warn!(keyword, page, status, "invalid response from server")
        }
        SearchError::NilResult => tracing::warn!(keyword, page, "unexpected nil in response"),
        SearchError::MalformedJson(detail) => {
            tracing::warn!(keyword, page, detail = %detail, "malformed JSON in response")
        }
        SearchError::UnexpectedShape(detail) => {
            tracing::warn!(keyword, page, detail = %detail, "unexpected data in response")
        }
        SearchError::Unknown(detail) => {
            tracing::warn!(keyword, page, detail = %detail, "unknown error occurred")
        }
    }
}
