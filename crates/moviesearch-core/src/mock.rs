//! Mock search backend and poster source for testing.

use std::collections::HashMap;
use std::future::Future;
use std::io::Cursor;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::watch;

use crate::poster::{PosterError, PosterSource};
use crate::search::{Movie, SearchBackend, SearchError, SearchPage};

/// A configurable response for [`MockPosterSource`].
#[derive(Clone, Debug)]
pub enum MockPoster {
    /// Return these bytes.
    Bytes(Vec<u8>),
    /// Succeed with an empty body.
    Empty,
    /// Fail the transfer.
    Error(String),
    /// Panic inside the transfer.
    Panic,
}

/// A hand-rolled [`PosterSource`] for tests.
///
/// Supports:
/// - Per-URL responses with a fallback for everything else.
/// - Optional per-call latency.
/// - A gate that holds every transfer until [`open_gate()`](MockPosterSource::open_gate).
/// - A log of requested URLs via [`calls()`](MockPosterSource::calls).
pub struct MockPosterSource {
    responses: HashMap<String, MockPoster>,
    fallback: MockPoster,
    delay: Option<Duration>,
    gate: Option<watch::Sender<bool>>,
    calls: Mutex<Vec<String>>,
}

impl MockPosterSource {
    /// Create a source that answers every URL with `response`.
    pub fn new(response: MockPoster) -> Self {
        Self {
            responses: HashMap::new(),
            fallback: response,
            delay: None,
            gate: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Answer `url` with `response` instead of the fallback.
    pub fn with_response(mut self, url: impl Into<String>, response: MockPoster) -> Self {
        self.responses.insert(url.into(), response);
        self
    }

    /// Set simulated network latency per call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Hold every transfer until the gate is opened.
    pub fn with_gate(mut self) -> Self {
        self.gate = Some(watch::channel(false).0);
        self
    }

    pub fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.send_replace(true);
        }
    }

    /// URLs requested so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl PosterSource for MockPosterSource {
    fn fetch<'a>(
        &'a self,
        url: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, PosterError>> + Send + 'a>> {
        self.calls.lock().unwrap().push(url.to_string());
        let response = self
            .responses
            .get(url)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone());
        let delay = self.delay;
        let gate = self.gate.as_ref().map(|g| g.subscribe());

        Box::pin(async move {
            if let Some(mut gate) = gate {
                let _ = gate.wait_for(|open| *open).await;
            }
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }

            match response {
                MockPoster::Bytes(bytes) => Ok(bytes),
                MockPoster::Empty => Ok(Vec::new()),
                MockPoster::Error(msg) => Err(PosterError::Transfer(msg)),
                MockPoster::Panic => panic!("mock poster source panicked"),
            }
        })
    }
}

/// A hand-rolled [`SearchBackend`] serving canned pages per (keyword, page).
///
/// Unconfigured requests fail with [`SearchError::Unknown`].
#[derive(Default)]
pub struct MockSearch {
    pages: HashMap<(String, u32), Result<SearchPage, SearchError>>,
    calls: Mutex<Vec<(String, u32)>>,
}

impl MockSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, keyword: &str, page: SearchPage) -> Self {
        self.pages.insert((keyword.to_string(), page.page), Ok(page));
        self
    }

    pub fn with_error(mut self, keyword: &str, page: u32, error: SearchError) -> Self {
        self.pages.insert((keyword.to_string(), page), Err(error));
        self
    }

    /// (keyword, page) pairs requested so far, in call order.
    pub fn calls(&self) -> Vec<(String, u32)> {
        self.calls.lock().unwrap().clone()
    }
}

impl SearchBackend for MockSearch {
    fn search<'a>(
        &'a self,
        keyword: &'a str,
        page: u32,
    ) -> Pin<Box<dyn Future<Output = Result<SearchPage, SearchError>> + Send + 'a>> {
        self.calls.lock().unwrap().push((keyword.to_string(), page));
        let result = self
            .pages
            .get(&(keyword.to_string(), page))
            .cloned()
            .unwrap_or_else(|| Err(SearchError::Unknown(format!("no mock page {page} for {keyword:?}"))));
        Box::pin(async move { result })
    }
}

/// Build a search result movie.
pub fn movie(id: i64, title: &str, poster_path: Option<&str>) -> Movie {
    Movie {
        id,
        title: title.to_string(),
        poster_path: poster_path.map(str::to_string),
        overview: None,
        release_date: None,
    }
}

/// Build a results page.
pub fn page(page: u32, total_pages: u32, total_results: u64, movies: Vec<Movie>) -> SearchPage {
    SearchPage {
        page,
        total_pages,
        total_results,
        movies,
    }
}

/// Encode a blank PNG of the given size.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::DynamicImage::ImageRgb8(image::RgbImage::new(width, height));
    let mut cursor = Cursor::new(Vec::new());
    let _ = img.write_to(&mut cursor, image::ImageFormat::Png);
    cursor.into_inner()
}
