use anyhow::Result;
use chrono::{DateTime, Local, NaiveDateTime};
use std::io;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, trace};

/// A run file found on disk, e.g., `./stock_tickers_20240801_093000.csv`.
#[derive(Clone, Debug)]
pub struct RunFile {
    pub path: PathBuf,
    pub size: u64,
    pub modified: DateTime<Local>,
}

impl RunFile {
    pub fn size_mb(&self) -> f64 {
        (self.size as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// When the run was taken, read from a `<prefix>_<YYYYMMDD>_<HHMMSS>.csv` name.
    pub fn stamp(&self, prefix: &str) -> Option<NaiveDateTime> {
        let name = self.file_name();
        let stamp = name
            .strip_prefix(prefix)?
            .strip_prefix('_')?
            .strip_suffix(".csv")?;
        NaiveDateTime::parse_from_str(stamp, "%Y%m%d_%H%M%S").ok()
    }

    // name stamp if there is one, else the modification time
    fn taken(&self, prefix: &str) -> NaiveDateTime {
        self.stamp(prefix)
            .unwrap_or_else(|| self.modified.naive_local())
    }
}

/// Build a file name stamped with `at`, down to the second.
///
/// ```rust
/// let name = polyscan_util::timestamped_name("stock_tickers", "csv", &chrono::Local::now());
/// // stock_tickers_20240801_093000.csv
/// ```
pub fn timestamped_name(prefix: &str, ext: &str, at: &DateTime<Local>) -> String {
    format!("{prefix}_{}.{ext}", at.format("%Y%m%d_%H%M%S"))
}

/// List every `.csv` file directly under `dir`, most recent first.
///
/// Files named `<prefix>_<YYYYMMDD>_<HHMMSS>.csv` are dated by their name;
/// any other `.csv` by its modification time.
pub fn list_runs(dir: &Path, prefix: &str) -> Result<Vec<RunFile>> {
    trace!("scanning {} for run files", dir.display());
    let mut runs = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() || path.extension().map_or(true, |ext| ext != "csv") {
            continue;
        }
        let meta = entry.metadata()?;
        runs.push(RunFile {
            path,
            size: meta.len(),
            modified: DateTime::<Local>::from(meta.modified()?),
        });
    }
    runs.sort_by(|a, b| {
        b.taken(prefix)
            .cmp(&a.taken(prefix))
            .then_with(|| b.file_name().cmp(&a.file_name()))
    });
    debug!("found {} run files in {}", runs.len(), dir.display());
    Ok(runs)
}

/// The most recent run file in `dir`, if there is one.
///
/// Only files following the `<prefix>_<YYYYMMDD>_<HHMMSS>.csv` naming count,
/// unless there are none; then the most recently modified `.csv` is used.
pub fn latest_run(dir: &Path, prefix: &str) -> Result<Option<PathBuf>> {
    let runs = list_runs(dir, prefix)?;
    let latest = runs
        .iter()
        .find(|run| run.stamp(prefix).is_some())
        .or_else(|| runs.first());
    Ok(latest.map(|run| run.path.clone()))
}

/// Write `path` all at once: `write` fills a temporary file in the same
/// directory, which is then renamed over `path`.
///
/// If `write` (or the rename) fails, the temporary file is removed and `path`
/// is left untouched.
pub fn write_atomic<F, E>(path: &Path, write: F) -> std::result::Result<(), E>
where
    F: FnOnce(&mut NamedTempFile) -> std::result::Result<(), E>,
    E: From<io::Error>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut builder = tempfile::Builder::new();
    builder.prefix(".polyscan-").suffix(".tmp");
    // temp files are owner-only; a new target gets a plain file's mode
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(std::fs::Permissions::from_mode(0o666));
    }
    let mut tmp = builder.tempfile_in(dir)?;
    if let Ok(meta) = std::fs::metadata(path) {
        tmp.as_file().set_permissions(meta.permissions())?;
    }
    write(&mut tmp)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;

    trace!("{} written", path.display());
    Ok(())
}
