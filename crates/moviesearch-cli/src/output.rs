use std::io::Write;
use std::ops::Range;

use moviesearch_core::{MovieRecord, Poster, PosterState, Reconciliation};
use owo_colors::OwoColorize;

/// Whether to use colored output.
#[derive(Debug, Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

fn year(record: &MovieRecord) -> &str {
    record
        .release_date
        .as_deref()
        .and_then(|d| d.get(..4))
        .unwrap_or("????")
}

/// Print the header line after a search.
pub fn print_search_summary(
    w: &mut dyn Write,
    keyword: &str,
    loaded: usize,
    total: u64,
    color: ColorMode,
) -> std::io::Result<()> {
    if loaded == 0 {
        if color.enabled() {
            writeln!(w, "{}", format!("No results for \"{}\"", keyword).yellow())?;
        } else {
            writeln!(w, "No results for \"{}\"", keyword)?;
        }
        return Ok(());
    }
    writeln!(w, "Found {} movies for \"{}\" ({} loaded)", total, keyword, loaded)?;
    writeln!(w)?;
    Ok(())
}

/// Print every record with its poster URL.
pub fn print_results(
    w: &mut dyn Write,
    records: &[MovieRecord],
    color: ColorMode,
) -> std::io::Result<()> {
    for (row, record) in records.iter().enumerate() {
        if color.enabled() {
            writeln!(w, "{:>4}. {} ({})", row + 1, record.title.bold(), year(record))?;
        } else {
            writeln!(w, "{:>4}. {} ({})", row + 1, record.title, year(record))?;
        }
        match &record.poster_url {
            Some(url) if color.enabled() => writeln!(w, "      {}", url.dimmed())?,
            Some(url) => writeln!(w, "      {}", url)?,
            None if color.enabled() => writeln!(w, "      {}", "(no poster)".dimmed())?,
            None => writeln!(w, "      (no poster)")?,
        }
    }
    Ok(())
}

/// Print one step of the simulated scroll.
pub fn print_scroll(
    w: &mut dyn Write,
    step: usize,
    rows: &Range<usize>,
    report: &Reconciliation,
    color: ColorMode,
) -> std::io::Result<()> {
    let header = format!("Scroll {}: rows {}-{}", step, rows.start + 1, rows.end);
    if color.enabled() {
        writeln!(w, "{}", header.cyan())?;
    } else {
        writeln!(w, "{}", header)?;
    }
    if !report.cancelled.is_empty() {
        writeln!(w, "  cancelled {} off-screen fetches", report.cancelled.len())?;
    }
    if !report.started.is_empty() {
        writeln!(w, "  started {} fetches", report.started.len())?;
    }
    Ok(())
}

/// Print a row whose poster just settled.
pub fn print_poster(
    w: &mut dyn Write,
    row: usize,
    record: &MovieRecord,
    color: ColorMode,
) -> std::io::Result<()> {
    let idx = row + 1;
    match (&record.poster_state, &record.poster) {
        (PosterState::Downloaded, Some(Poster::Image(image))) => {
            let detail = match (image.dimensions(), image.format()) {
                (Some((width, height)), Some(format)) => {
                    format!("{}x{} {:?}", width, height, format)
                }
                _ => format!("{} bytes, not decodable", image.byte_len()),
            };
            if color.enabled() {
                writeln!(w, "  [{}] {} -> {} ({})", idx, record.title, "POSTER".green(), detail)?;
            } else {
                writeln!(w, "  [{}] {} -> POSTER ({})", idx, record.title, detail)?;
            }
        }
        (PosterState::Failed, _) => {
            if color.enabled() {
                writeln!(w, "  [{}] {} -> {}", idx, record.title, "PLACEHOLDER".red())?;
            } else {
                writeln!(w, "  [{}] {} -> PLACEHOLDER", idx, record.title)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Print the tally of poster states.
pub fn print_poster_summary(
    w: &mut dyn Write,
    records: &[MovieRecord],
    color: ColorMode,
) -> std::io::Result<()> {
    let count = |state: PosterState| records.iter().filter(|r| r.poster_state == state).count();
    let downloaded = count(PosterState::Downloaded);
    let failed = count(PosterState::Failed);
    let untouched = count(PosterState::New);

    writeln!(w)?;
    if color.enabled() {
        writeln!(
            w,
            "{} downloaded, {} placeholders, {} never shown",
            downloaded.to_string().green(),
            failed.to_string().red(),
            untouched.to_string().dimmed()
        )?;
    } else {
        writeln!(
            w,
            "{} downloaded, {} placeholders, {} never shown",
            downloaded, failed, untouched
        )?;
    }
    Ok(())
}
