use crate::error::{IngestError, Result};
use std::time::Duration;
use tracing::{debug, error, info};
use url::Url;

pub const API_KEY_VAR: &str = "POLYGON_API_KEY";
pub const BASE_URL_VAR: &str = "POLYGON_BASE_URL";
pub const DEFAULT_BASE_URL: &str = "https://api.polygon.io";

////////////////////////////////////////////////////////////////////////////////////////////////////
//
// Credential
//
////////////////////////////////////////////////////////////////////////////////////////////////////

/// API key sent as the `apiKey` query parameter on every request.
///
/// Never printed: `Debug` masks the value.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Read the key from `POLYGON_API_KEY`.
    ///
    /// Call `dotenv::dotenv()` beforehand for a local `.env` file to count.
    pub fn from_env() -> Result<Self> {
        Self::from_var(API_KEY_VAR)
    }

    pub fn from_var(name: &str) -> Result<Self> {
        match std::env::var(name) {
            Ok(key) if !key.trim().is_empty() => {
                info!("API key loaded successfully");
                Ok(Self(key))
            }
            _ => {
                error!("{name} not found in the environment (or .env file)");
                Err(IngestError::MissingCredential(name.to_string()))
            }
        }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(***)")
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//
// Retry policy
//
////////////////////////////////////////////////////////////////////////////////////////////////////

/// How long to wait on a 429, and for how long to keep at it.
///
/// The defaults wait 60 seconds between attempts and never give up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delay: Duration,
    /// Retries allowed per page; `None` is unlimited.
    pub max_attempts: Option<u32>,
    /// Total back-off allowed per page; `None` is unlimited.
    pub max_elapsed: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(60),
            max_attempts: None,
            max_elapsed: None,
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self) -> Backoff<'_> {
        Backoff {
            policy: self,
            attempts: 0,
            waited: Duration::ZERO,
        }
    }
}

/// Retry bookkeeping for a single page.
#[derive(Debug)]
pub struct Backoff<'a> {
    policy: &'a RetryPolicy,
    attempts: u32,
    waited: Duration,
}

impl Backoff<'_> {
    /// Delay before the next retry, or `None` once the policy is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max) = self.policy.max_attempts {
            if self.attempts >= max {
                return None;
            }
        }
        if let Some(max) = self.policy.max_elapsed {
            if self.waited + self.policy.delay > max {
                return None;
            }
        }
        self.attempts += 1;
        self.waited += self.policy.delay;
        Some(self.policy.delay)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn waited(&self) -> Duration {
        self.waited
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//
// Fetch configuration
//
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Query & pacing for one run over `v3/reference/tickers`.
#[derive(Clone, Debug)]
pub struct FetchConfig {
    pub base_url: Url,
    pub market: String,
    pub active: bool,
    pub order: String,
    pub sort: String,
    pub page_size: u32,
    /// Pause between successful pages, to stay clear of the rate limit.
    pub page_delay: Duration,
    pub retry: RetryPolicy,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse(DEFAULT_BASE_URL).expect("default base url is valid"),
            market: "stocks".to_string(),
            active: true,
            order: "asc".to_string(),
            sort: "ticker".to_string(),
            page_size: 1000,
            page_delay: Duration::from_millis(500),
            retry: RetryPolicy::default(),
        }
    }
}

impl FetchConfig {
    /// Defaults, with the base URL overridden by `POLYGON_BASE_URL` when set.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(base) = std::env::var(BASE_URL_VAR) {
            debug!("using {BASE_URL_VAR}={base}");
            config.base_url = Self::parse_base(&base)?;
        }
        Ok(config)
    }

    pub fn with_base_url(mut self, base: &str) -> Result<Self> {
        self.base_url = Self::parse_base(base)?;
        Ok(self)
    }

    // trailing slash, so that joining keeps any path prefix
    fn parse_base(base: &str) -> Result<Url> {
        let mut url = Url::parse(base)
            .map_err(|e| IngestError::Config(format!("invalid base url {base:?}: {e}")))?;
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }
}
