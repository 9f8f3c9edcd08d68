pub mod api;
pub mod config;
pub mod dataset;
pub mod error;
pub mod export;
pub mod pipeline;
pub mod schema;

pub use crate::api::{Http, HttpClient, HttpResponse};
pub use crate::config::{Credential, FetchConfig, RetryPolicy};
pub use crate::error::{IngestError, Result};
pub use crate::export::{Export, SchemaMode};
pub use crate::schema::stock::tickers::{Polygon, Record, ResultSet};
