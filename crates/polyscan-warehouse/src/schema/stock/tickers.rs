use crate::api::{redact, Http, HttpResponse};
use crate::config::{Credential, FetchConfig};
use crate::error::{IngestError, Result};
use indicatif::ProgressBar;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

////////////////////////////////////////////////////////////////////////////////////////////////////
//
// API Documentation: https://polygon.io/docs/stocks/get_v3_reference_tickers
//
////////////////////////////////////////////////////////////////////////////////////////////////////

pub static TICKERS_PATH: &str = "v3/reference/tickers";

/// Name of the query parameter carrying the credential.
pub static API_KEY_PARAM: &str = "apiKey";

////////////////////////////////////////////////////////////////////////////////////////////////////
//
// Polygon API
//
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Pages through the Polygon ticker listing.
///
/// Pagination is strictly sequential; every request after the first is
/// built from the previous response's `next_url`.
pub struct Polygon {
    credential: Credential,
    config: FetchConfig,
    progress: ProgressBar,
}

impl Polygon {
    pub fn new(credential: Credential, config: FetchConfig) -> Self {
        Self {
            credential,
            config,
            progress: ProgressBar::hidden(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// The fully parameterised first request, e.g.,
    /// `/v3/reference/tickers?market=stocks&active=true&order=asc&limit=1000&sort=ticker&apiKey=...`
    pub fn first_page(&self) -> Result<Url> {
        let mut url = self
            .config
            .base_url
            .join(TICKERS_PATH)
            .map_err(|e| IngestError::Config(format!("invalid base url: {e}")))?;
        url.query_pairs_mut()
            .append_pair("market", &self.config.market)
            .append_pair("active", &self.config.active.to_string())
            .append_pair("order", &self.config.order)
            .append_pair("limit", &self.config.page_size.to_string())
            .append_pair("sort", &self.config.sort)
            .append_pair(API_KEY_PARAM, self.credential.expose());
        Ok(url)
    }

    /// Turn a `next_url` into the next request.
    ///
    /// Relative tokens resolve against the base URL. Polygon leaves the key
    /// off its continuation URLs, so it is appended unless already there.
    pub fn continuation(&self, next_url: &str, page: u32) -> Result<Url> {
        let mut url = self
            .config
            .base_url
            .join(next_url)
            .map_err(|e| IngestError::BadContinuation {
                page,
                next_url: next_url.to_string(),
                message: e.to_string(),
            })?;
        if !url.query_pairs().any(|(k, _)| k == API_KEY_PARAM) {
            url.query_pairs_mut()
                .append_pair(API_KEY_PARAM, self.credential.expose());
        }
        Ok(url)
    }

    /// Fetch every page, all or nothing.
    ///
    /// Any failure other than rate limiting drops whatever was accumulated;
    /// the caller gets either the whole result set or the error.
    pub async fn fetch_all<H>(&self, http: &H, cancel: &CancellationToken) -> Result<ResultSet>
    where
        H: Http + ?Sized,
    {
        info!("Fetching stock data from Polygon API");
        let time = std::time::Instant::now();

        let set = match self.walk(http, cancel).await {
            Ok(set) => set,
            Err(e) => {
                error!("Failed to fetch tickers: {e}");
                match e.page() {
                    Some(page) => self
                        .progress
                        .abandon_with_message(format!("failed on page {page}")),
                    None => self.progress.abandon_with_message("failed"),
                }
                return Err(e);
            }
        };

        info!(
            "Fetched {} total stock tickers across {} pages. Elapsed time: {} ms",
            set.len(),
            set.pages,
            time.elapsed().as_millis()
        );
        self.progress
            .finish_with_message(format!("{} tickers across {} pages", set.len(), set.pages));

        Ok(set)
    }

    // the pagination loop proper; failures are reported by `fetch_all`
    async fn walk<H>(&self, http: &H, cancel: &CancellationToken) -> Result<ResultSet>
    where
        H: Http + ?Sized,
    {
        let mut url = self.first_page()?;
        let mut records: Vec<Record> = Vec::new();
        let mut pages: u32 = 0;

        loop {
            let page_no = pages + 1;
            info!("Fetching page {page_no}");

            let page = self.fetch_page(http, &url, page_no, cancel).await?;
            let added = page.results.len();
            records.extend(page.results);
            pages = page_no;
            if added > 0 {
                info!(
                    "Added {added} tickers from page {page_no} ({} so far)",
                    records.len()
                );
            }
            self.progress
                .set_message(format!("page {pages} | {} tickers", records.len()));

            match page.next_url.filter(|next| !next.is_empty()) {
                Some(next) => {
                    url = self.continuation(&next, page_no)?;
                    debug!("Next page available: {}", redact(&url));
                    self.pause(self.config.page_delay, cancel, page_no + 1).await?;
                }
                None => {
                    info!("No more pages available");
                    break;
                }
            }
        }

        Ok(ResultSet { records, pages })
    }

    /// Fetch a single page, waiting out any rate limiting on the same URL.
    async fn fetch_page<H>(
        &self,
        http: &H,
        url: &Url,
        page: u32,
        cancel: &CancellationToken,
    ) -> Result<TickerPage>
    where
        H: Http + ?Sized,
    {
        let mut backoff = self.config.retry.backoff();
        loop {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(IngestError::Cancelled { page }),
                outcome = http.get(url) => outcome,
            };

            match outcome {
                Ok(response) if response.status == StatusCode::TOO_MANY_REQUESTS => {}
                Ok(response) => return decode(response, page),
                Err(e) if is_throttled(&e) => {}
                Err(e) => {
                    return Err(IngestError::Transport {
                        page,
                        message: format!("{e:#}"),
                    })
                }
            }

            let Some(delay) = backoff.next_delay() else {
                return Err(IngestError::RetriesExhausted {
                    page,
                    attempts: backoff.attempts(),
                    waited: backoff.waited(),
                });
            };
            warn!(
                "Rate limit hit on page {page}. Waiting {} seconds before retrying",
                delay.as_secs_f32()
            );
            self.progress
                .set_message(format!("page {page} | rate limited, retry #{}", backoff.attempts()));
            self.pause(delay, cancel, page).await?;
        }
    }

    async fn pause(&self, delay: Duration, cancel: &CancellationToken, page: u32) -> Result<()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(IngestError::Cancelled { page }),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

// -------------------------------------------------------------------------------------------------

fn decode(response: HttpResponse, page: u32) -> Result<TickerPage> {
    if !response.status.is_success() {
        return Err(IngestError::Status {
            page,
            status: response.status.as_u16(),
        });
    }
    serde_json::from_slice::<TickerPage>(&response.body).map_err(|source| {
        error!("page {page}: error parsing JSON response");
        IngestError::Parse { page, source }
    })
}

/// Transport errors that still mean "slow down".
fn is_throttled(e: &anyhow::Error) -> bool {
    format!("{e:#}").contains("429")
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//
// Deserialization
//
////////////////////////////////////////////////////////////////////////////////////////////////////

/// One ticker, with whatever fields the server sends, in the order it sends them.
///
/// ```json
/// {
///     "ticker": "AAPL",
///     "name": "Apple Inc.",
///     "market": "stocks",
///     "locale": "us",
///     "primary_exchange": "XNAS",
///     "type": "CS",
///     "active": true,
///     "currency_name": "usd",
///     "cik": "0000320193",
///     "last_updated_utc": "2024-08-01T00:00:00Z"
/// }
/// ```
pub type Record = serde_json::Map<String, serde_json::Value>;

/// One page of `v3/reference/tickers`; `status`, `count` & `request_id` are
/// not needed and so ignored.
#[derive(Debug, Default, Deserialize)]
pub struct TickerPage {
    #[serde(default, deserialize_with = "de_results")]
    pub results: Vec<Record>,
    #[serde(default)]
    pub next_url: Option<String>,
}

// `results` may be missing, null, or an array; the first two are an empty page
fn de_results<'de, D>(deserializer: D) -> std::result::Result<Vec<Record>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let results: Option<Vec<Record>> = Deserialize::deserialize(deserializer)?;
    Ok(results.unwrap_or_default())
}

/// Every record of one run, in page-arrival order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResultSet {
    pub records: Vec<Record>,
    pub pages: u32,
}

impl ResultSet {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
