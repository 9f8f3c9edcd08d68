use crate::cli::{SearchArgs, Source};
use anyhow::{bail, Result};
use colored::Colorize;
use csv::StringRecord;
use polyscan_util::{latest_run, list_runs};
use polyscan_warehouse::dataset::{Dataset, Filter, Page, CURRENCY, EXCHANGE, MARKET, TYPE};
use polyscan_warehouse::export::FILE_PREFIX;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

// widest a cell may print before it is cut short
const MAX_CELL: usize = 32;
const BAR_WIDTH: usize = 40;
const SAMPLE_ROWS: usize = 10;

/// The file named on the command line, else the newest run in `--dir`.
pub fn resolve(source: &Source) -> Result<PathBuf> {
    if let Some(file) = &source.file {
        return Ok(file.clone());
    }
    match latest_run(&source.dir, FILE_PREFIX)? {
        Some(path) => {
            debug!("using newest run file {}", path.display());
            Ok(path)
        }
        None => bail!(
            "no CSV files found in {}; run `polyscan fetch` to generate one first",
            source.dir.display()
        ),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//
// > polyscan ls
//
////////////////////////////////////////////////////////////////////////////////////////////////////

pub fn list(dir: &Path) -> Result<()> {
    let runs = list_runs(dir, FILE_PREFIX)?;
    if runs.is_empty() {
        println!("{}", "No CSV files found in the directory.".yellow());
        println!("Run `polyscan fetch` to generate stock data CSV files first.");
        return Ok(());
    }

    println!(
        "{}",
        format!(
            "{:<40} {:>10} {:>20} {:>10}",
            "FILE", "SIZE (MB)", "LAST MODIFIED", "ROWS"
        )
        .bold()
    );
    for run in runs {
        let rows = match Dataset::load(&run.path) {
            Ok(data) => data.len().to_string(),
            Err(e) => {
                warn!("{e:#}");
                "?".to_string()
            }
        };
        println!(
            "{:<40} {:>10.2} {:>20} {:>10}",
            run.file_name(),
            run.size_mb(),
            run.modified.format("%Y-%m-%d %H:%M:%S").to_string(),
            rows
        );
    }
    Ok(())
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//
// > polyscan summary
//
////////////////////////////////////////////////////////////////////////////////////////////////////

pub fn summary(path: &Path, top: usize) -> Result<()> {
    let data = Dataset::load(path)?;

    heading(&format!("Stock Data Analyzer: {}", path.display()));
    metric("Total Tickers", data.len());
    for (label, column) in [
        ("Unique Exchanges", EXCHANGE),
        ("Security Types", TYPE),
        ("Currencies", CURRENCY),
    ] {
        match data.unique(column) {
            Some(n) => metric(label, n),
            None => metric(label, "N/A"),
        }
    }
    metric("Total Columns", data.headers().len());

    heading("Columns");
    for (name, filled) in data.fill_counts() {
        println!("{:<32} {:>8} filled", clip(name, 32), filled);
    }

    heading(&format!("Sample Data (First {SAMPLE_ROWS} Rows)"));
    table(data.headers(), &data.head(SAMPLE_ROWS));

    if let Some(counts) = data.value_counts(MARKET) {
        distribution("Market Distribution", &counts, data.len());
    }
    if let Some(counts) = data.value_counts(EXCHANGE) {
        let counts: Vec<_> = counts.into_iter().take(top).collect();
        distribution(
            &format!("Top {top} Exchanges by Ticker Count"),
            &counts,
            data.len(),
        );
    }
    if let Some(counts) = data.value_counts(TYPE) {
        distribution("Security Type Distribution", &counts, data.len());
    }
    Ok(())
}

fn heading(text: &str) {
    println!();
    println!("{}", text.bold().cyan());
    println!("{}", "-".repeat(text.chars().count()).cyan());
}

fn metric(label: &str, value: impl std::fmt::Display) {
    println!("{:<20} {}", format!("{label}:"), value.to_string().bold());
}

// value counts as a horizontal bar chart, scaled to the largest count
fn distribution(title: &str, counts: &[(String, usize)], total: usize) {
    heading(title);
    let widest = counts.iter().map(|(_, n)| *n).max().unwrap_or(0).max(1);
    for (value, n) in counts {
        let share = if total == 0 { 0.0 } else { *n as f64 * 100.0 / total as f64 };
        let bar = "#".repeat(n * BAR_WIDTH / widest);
        println!(
            "{:<12} {:>8} {:>6.1}%  {}",
            clip(value, 12),
            n,
            share,
            bar.green()
        );
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//
// > polyscan search
//
////////////////////////////////////////////////////////////////////////////////////////////////////

pub fn search(args: &SearchArgs) -> Result<()> {
    let path = resolve(&args.source)?;
    let data = Dataset::load(&path)?;

    for (column, wanted) in [
        (EXCHANGE, &args.exchange),
        (TYPE, &args.kind),
        (MARKET, &args.market),
    ] {
        let Some(wanted) = wanted else { continue };
        match data.choices(column) {
            None => warn!("{} has no {column} column; ignoring that filter", path.display()),
            Some(choices) if !choices.contains(wanted) => {
                warn!("no rows with {column} = {wanted}; choices are: {}", choices.join(", "))
            }
            Some(_) => {}
        }
    }
    if args.query.is_some() && !data.searchable() {
        warn!("searching needs both ticker & name columns; ignoring the query");
    }

    let filter = Filter {
        exchange: args.exchange.clone(),
        kind: args.kind.clone(),
        market: args.market.clone(),
        query: args.query.clone(),
    };
    let rows = data.filter(&filter);

    heading(&format!("Data Explorer: {}", path.display()));
    println!("Filtered Results: {} tickers", rows.len().to_string().bold());
    if rows.is_empty() {
        println!("{}", "No data matches the selected filters.".yellow());
        return Ok(());
    }

    let page = Page::of(rows.len(), args.page, args.page_size);
    println!();
    table(data.headers(), &rows[page.start..page.end]);
    println!();
    println!(
        "Showing rows {} to {} of {} (page {}/{})",
        page.start + 1,
        page.end,
        page.total,
        page.number,
        page.pages
    );
    Ok(())
}

fn table(headers: &[String], rows: &[&StringRecord]) {
    let widths: Vec<usize> = headers
        .iter()
        .enumerate()
        .map(|(i, header)| {
            rows.iter()
                .map(|row| row.get(i).unwrap_or("").chars().count())
                .chain(std::iter::once(header.chars().count()))
                .max()
                .unwrap_or(0)
                .min(MAX_CELL)
        })
        .collect();

    let line = |cells: Vec<&str>| -> String {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{:<width$}", clip(cell, *width), width = *width))
            .collect::<Vec<_>>()
            .join("  ")
    };

    println!("{}", line(headers.iter().map(String::as_str).collect()).bold());
    for row in rows {
        println!(
            "{}",
            line((0..headers.len()).map(|i| row.get(i).unwrap_or("")).collect())
        );
    }
}

fn clip(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(width.saturating_sub(1)).collect();
        cut.push('~');
        cut
    }
}
