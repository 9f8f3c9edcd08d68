use anyhow::Result;
use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{error, trace};
use url::Url;

pub type HttpClient = reqwest::Client;

/// Status & raw body of a GET; interpreting either is left to the caller.
#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// The HTTP seam of the pipeline.
///
/// Only transport failures are errors here: a 429 or a 500 is still a
/// response, so that flow control stays with the fetcher. [`reqwest::Client`]
/// is the real implementation; tests swap in scripted ones.
#[async_trait]
pub trait Http: Send + Sync {
    async fn get(&self, url: &Url) -> Result<HttpResponse>;
}

#[async_trait]
impl Http for HttpClient {
    async fn get(&self, url: &Url) -> Result<HttpResponse> {
        trace!("GET {}", redact(url));
        let response = HttpClient::get(self, url.clone()).send().await.map_err(|e| {
            error!("failed fetching response from {}", redact(url));
            e.without_url()
        })?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| {
            error!("failed reading response body from {}", redact(url));
            e.without_url()
        })?;

        Ok(HttpResponse::new(status, body.to_vec()))
    }
}

/// Copy of `url` that is safe to log: any `apiKey` value is masked.
pub fn redact(url: &Url) -> Url {
    let mut safe = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == "apiKey" { "***".to_string() } else { v.into_owned() };
            (k.into_owned(), v)
        })
        .collect();
    if !pairs.is_empty() {
        safe.query_pairs_mut().clear().extend_pairs(pairs);
    }
    safe
}
