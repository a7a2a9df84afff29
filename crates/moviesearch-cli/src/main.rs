use std::io::Write;
use std::ops::Range;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use moviesearch_core::{Config, HttpPosterSource, MovieList, TmdbSearch, config_file};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod output;

use output::ColorMode;

/// Movie search with lazily loaded posters, backed by TMDB
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// TMDB API key (overrides TMDB_API_KEY and the config file)
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Search for movies and list titles with their poster URLs
    Search {
        /// Search keyword
        keyword: String,

        /// Number of result pages to load
        #[arg(long, default_value_t = 1)]
        pages: u32,
    },

    /// Search, then scroll through the results while posters load
    Posters {
        /// Search keyword
        keyword: String,

        /// Number of rows visible at once
        #[arg(long, default_value_t = 5)]
        window: usize,

        /// Number of times to scroll down by one window
        #[arg(long, default_value_t = 3)]
        steps: usize,

        /// Posters fetched at the same time
        #[arg(long)]
        workers: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let color = ColorMode(!cli.no_color);

    match cli.command {
        Command::Search { keyword, pages } => {
            let config = resolve_config(cli.api_key, None)?;
            search(&config, &keyword, pages, color).await
        }
        Command::Posters {
            keyword,
            window,
            steps,
            workers,
        } => {
            if window == 0 {
                anyhow::bail!("--window must be at least 1");
            }
            let config = resolve_config(cli.api_key, workers)?;
            posters(&config, &keyword, window, steps, color).await
        }
    }
}

/// Resolve configuration: CLI flags > env vars > config file > defaults.
fn resolve_config(api_key: Option<String>, workers: Option<usize>) -> anyhow::Result<Config> {
    let mut config = Config::default();
    config_file::load_config().apply_to(&mut config);

    if let Ok(key) = std::env::var("TMDB_API_KEY")
        && !key.trim().is_empty()
    {
        config.api_key = Some(key);
    }
    if let Some(key) = api_key {
        config.api_key = Some(key);
    }
    if let Some(n) = workers {
        config.max_concurrent_fetches = n.max(1);
    }

    if config.api_key.is_none() {
        let path = config_file::config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| ".moviesearch.toml".to_string());
        anyhow::bail!(
            "No TMDB API key. Pass --api-key, set TMDB_API_KEY, or add api_key under [api] in {}",
            path
        );
    }
    config.validate()?;
    tracing::debug!(?config, "configuration resolved");
    Ok(config)
}

fn build_list(config: &Config) -> anyhow::Result<MovieList> {
    let client = moviesearch_core::build_http_client()?;
    let search = Arc::new(TmdbSearch::from_config(client.clone(), config));
    let posters = Arc::new(HttpPosterSource::new(client, config.fetch_timeout()));
    Ok(MovieList::new(search, posters, config))
}

async fn search(config: &Config, keyword: &str, pages: u32, color: ColorMode) -> anyhow::Result<()> {
    let mut list = build_list(config)?;
    let mut out = std::io::stdout();

    list.search(keyword).await;
    let mut loaded_pages = 1;
    while loaded_pages < pages && list.has_more() {
        if list.load_more().await == 0 {
            break;
        }
        loaded_pages += 1;
    }

    output::print_search_summary(&mut out, keyword, list.len(), list.total_results(), color)?;
    output::print_results(&mut out, list.records(), color)?;
    out.flush()?;

    list.shutdown().await;
    Ok(())
}

async fn posters(
    config: &Config,
    keyword: &str,
    window: usize,
    steps: usize,
    color: ColorMode,
) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_for_signal.cancel();
        }
    });

    let mut list = build_list(config)?;
    let mut out = std::io::stdout();

    list.search(keyword).await;
    output::print_search_summary(&mut out, keyword, list.len(), list.total_results(), color)?;
    if list.is_empty() {
        list.shutdown().await;
        return Ok(());
    }

    // First layout: rows appear one by one while the list is idle.
    let mut visible = 0..window.min(list.len());
    for row in visible.clone() {
        list.row_shown(row);
    }
    wait_for_rows(&mut list, &visible, &cancel, &mut out, color).await?;

    for step in 1..=steps {
        if cancel.is_cancelled() {
            break;
        }
        let top = visible.end;
        if top + window > list.len() && list.has_more() {
            list.load_more().await;
        }
        if top >= list.len() {
            break;
        }
        visible = top..(top + window).min(list.len());

        list.begin_drag();
        for row in visible.clone() {
            // Ignored while dragging; the settle step picks these rows up.
            list.row_shown(row);
        }
        let decelerate = step % 2 == 0;
        let report = match list.end_drag(decelerate, visible.clone()) {
            Some(report) => report,
            None => list.end_deceleration(visible.clone()),
        };

        output::print_scroll(&mut out, step, &visible, &report, color)?;
        wait_for_rows(&mut list, &visible, &cancel, &mut out, color).await?;
    }

    output::print_poster_summary(&mut out, list.records(), color)?;
    out.flush()?;
    list.shutdown().await;
    Ok(())
}

/// Apply poster results until no row in `rows` has a fetch in flight.
async fn wait_for_rows(
    list: &mut MovieList,
    rows: &Range<usize>,
    cancel: &CancellationToken,
    out: &mut dyn Write,
    color: ColorMode,
) -> anyhow::Result<()> {
    while rows.clone().any(|row| list.posters().pending().contains(row)) {
        tokio::select! {
            _ = cancel.cancelled() => break,
            refresh = list.next_refresh() => match refresh {
                Some(Some(row)) => {
                    if let Some(record) = list.records().get(row) {
                        output::print_poster(out, row, record, color)?;
                    }
                }
                Some(None) => {}
                None => break,
            },
        }
    }
    Ok(())
}
