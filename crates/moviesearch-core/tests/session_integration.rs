//! Integration tests for [`MovieList`]: paging, keyword changes, and error
//! handling, with canned search pages and posters.

use std::sync::Arc;
use std::time::Duration;

use moviesearch_core::mock::{self, MockPoster, MockPosterSource, MockSearch};
use moviesearch_core::{Config, MovieList, PosterState, SearchError};

fn config() -> Config {
    Config {
        image_base_url: "https://img.test/p".into(),
        ..Config::default()
    }
}

fn posters() -> Arc<MockPosterSource> {
    Arc::new(MockPosterSource::new(MockPoster::Bytes(mock::png_bytes(1, 1))))
}

fn harry_potter() -> MockSearch {
    MockSearch::new()
        .with_page(
            "harry",
            mock::page(
                1,
                2,
                3,
                vec![
                    mock::movie(671, "Harry Potter and the Philosopher's Stone", Some("/a.jpg")),
                    mock::movie(672, "Harry Potter and the Chamber of Secrets", Some("/b.jpg")),
                ],
            ),
        )
        .with_page(
            "harry",
            mock::page(
                2,
                2,
                3,
                vec![mock::movie(673, "Harry Potter and the Prisoner of Azkaban", None)],
            ),
        )
}

#[tokio::test(start_paused = true)]
async fn search_loads_first_page() {
    let search = Arc::new(harry_potter());
    let mut list = MovieList::new(search.clone(), posters(), &config());

    assert_eq!(list.search("  harry ").await, 2);
    assert_eq!(list.keyword(), Some("harry"));
    assert_eq!(list.len(), 2);
    assert_eq!(list.total_results(), 3);
    assert!(list.has_more());

    let first = &list.records()[0];
    assert_eq!(first.id, 671);
    assert_eq!(first.poster_url.as_deref(), Some("https://img.test/p/a.jpg"));
    assert_eq!(first.poster_state, PosterState::New);
    assert_eq!(search.calls(), vec![("harry".to_string(), 1)]);
    list.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn load_more_appends_until_exhausted() {
    let search = Arc::new(harry_potter());
    let mut list = MovieList::new(search.clone(), posters(), &config());

    list.search("harry").await;
    assert_eq!(list.load_more().await, 1);
    assert_eq!(list.len(), 3);
    assert!(!list.has_more());
    assert!(list.records()[2].poster_url.is_none());

    assert_eq!(list.load_more().await, 0);
    assert_eq!(search.calls().len(), 2);
    list.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failed_page_is_retried_on_next_load() {
    let search = Arc::new(
        MockSearch::new()
            .with_page("alien", mock::page(1, 2, 2, vec![mock::movie(348, "Alien", None)]))
            .with_error("alien", 2, SearchError::Network("timed out".into())),
    );
    let mut list = MovieList::new(search.clone(), posters(), &config());

    list.search("alien").await;
    assert_eq!(list.load_more().await, 0);
    assert_eq!(list.len(), 1);
    assert!(list.has_more());

    // The page counter did not advance, so the same page is asked for again.
    list.load_more().await;
    assert_eq!(
        search.calls(),
        vec![
            ("alien".to_string(), 1),
            ("alien".to_string(), 2),
            ("alien".to_string(), 2),
        ]
    );
    list.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn search_error_leaves_an_empty_list() {
    let search = Arc::new(MockSearch::new().with_error(
        "nothing",
        1,
        SearchError::InvalidResponse { status: 401 },
    ));
    let mut list = MovieList::new(search, posters(), &config());

    assert_eq!(list.search("nothing").await, 0);
    assert!(list.is_empty());
    assert_eq!(list.total_results(), 0);
    assert!(!list.has_more());
    list.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn blank_keyword_clears_without_searching() {
    let search = Arc::new(harry_potter());
    let mut list = MovieList::new(search.clone(), posters(), &config());

    list.search("harry").await;
    assert_eq!(list.search("   ").await, 0);
    assert!(list.is_empty());
    assert_eq!(list.keyword(), None);
    assert_eq!(search.calls().len(), 1);
    list.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn new_keyword_replaces_results_and_cancels_fetches() {
    let search = Arc::new(harry_potter().with_page(
        "alien",
        mock::page(1, 1, 1, vec![mock::movie(348, "Alien", Some("/alien.jpg"))]),
    ));
    let source = Arc::new(MockPosterSource::new(MockPoster::Bytes(mock::png_bytes(1, 1))).with_gate());
    let mut list = MovieList::new(search, source.clone(), &config());

    list.search("harry").await;
    assert_eq!(list.reconcile([0, 1]).started, vec![0, 1]);
    tokio::time::sleep(Duration::from_millis(10)).await;

    list.search("alien").await;
    assert!(list.posters().pending().is_empty());
    assert_eq!(list.len(), 1);
    assert_eq!(list.records()[0].title, "Alien");

    source.open_gate();
    assert_eq!(list.reconcile([0]).started, vec![0]);
    let refreshed = tokio::time::timeout(Duration::from_secs(5), list.next_refresh())
        .await
        .expect("refresh");
    assert_eq!(refreshed, Some(Some(0)));
    assert_eq!(list.records()[0].poster_state, PosterState::Downloaded);

    // Nothing from the old keyword arrives afterwards.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(list.drain_refreshes().is_empty());
    list.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn empty_page_ends_paging() {
    let search = Arc::new(
        MockSearch::new()
            .with_page("x", mock::page(1, 5, 100, vec![mock::movie(1, "X", None)]))
            .with_page("x", mock::page(2, 5, 100, Vec::new())),
    );
    let mut list = MovieList::new(search.clone(), posters(), &config());

    list.search("x").await;
    assert!(list.has_more());
    assert_eq!(list.load_more().await, 0);
    assert!(!list.has_more());

    assert_eq!(list.load_more().await, 0);
    assert_eq!(
        search.calls(),
        vec![("x".to_string(), 1), ("x".to_string(), 2)]
    );
    list.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn paging_stops_at_the_last_served_page() {
    // The server reports more results than it will page through.
    let search = Arc::new(
        MockSearch::new().with_page("y", mock::page(1, 1, 50, vec![mock::movie(2, "Y", None)])),
    );
    let mut list = MovieList::new(search.clone(), posters(), &config());

    list.search("y").await;
    assert_eq!(list.total_results(), 50);
    assert!(!list.has_more());
    assert_eq!(list.load_more().await, 0);
    assert_eq!(search.calls().len(), 1);
    list.shutdown().await;
}
