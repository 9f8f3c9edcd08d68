use crate::api::Http;
use crate::error::Result;
use crate::export::{self, Export, SchemaMode};
use crate::schema::stock::tickers::{Polygon, ResultSet};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Where a run is written to.
#[derive(Clone, Debug)]
pub struct Output {
    /// Directory for the default, timestamped file name.
    pub dir: PathBuf,
    /// Explicit file path; overrides `dir`.
    pub path: Option<PathBuf>,
    pub schema: SchemaMode,
}

impl Default for Output {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            path: None,
            schema: SchemaMode::default(),
        }
    }
}

impl Output {
    pub fn resolve(&self) -> PathBuf {
        match &self.path {
            Some(path) => path.clone(),
            None => export::default_path(&self.dir),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunReport {
    pub pages: u32,
    pub export: Export,
}

/// Fetch every page & save the lot; either a complete file or an error.
pub async fn run<H>(
    http: &H,
    polygon: &Polygon,
    output: &Output,
    cancel: &CancellationToken,
) -> Result<RunReport>
where
    H: Http + ?Sized,
{
    let ResultSet { records, pages } = polygon.fetch_all(http, cancel).await?;
    let path = output.resolve();
    let export = export::write_csv(&records, &path, output.schema)?;
    info!(
        "Run complete: {} records across {pages} pages saved to {}",
        export.rows,
        export.path.display()
    );
    Ok(RunReport { pages, export })
}
