use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Spinner shown while paging through an endpoint; the caller keeps the
/// message up to date with page & record counts.
pub fn page_spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .template("{spinner} [{elapsed_precise}] {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(style);
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}
