//! Service clients and the interfaces the sync engine sees them through.
//!
//! The engine never touches a concrete client: it talks to `SourceClient`
//! and `DestinationClient`, so tests can substitute scripted fakes. Every
//! client error carries a transient-or-permanent classification that
//! drives the retry policy.

use async_trait::async_trait;
use thiserror::Error;

pub mod grocy;
pub mod ourgroceries;

pub use grocy::GrocyClient;
pub use ourgroceries::OurGroceriesClient;

pub type ClientResult<T> = Result<T, ClientError>;

/// Which side of the sync a call or failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListSide {
    Source,
    Destination,
}

impl std::fmt::Display for ListSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListSide::Source => write!(f, "grocy"),
            ListSide::Destination => write!(f, "ourgroceries"),
        }
    }
}

/// Errors from either service client.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("service unreachable: {0}")]
    Unreachable(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited by the service")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("api error (status {status}): {detail}")]
    Api { status: u16, detail: String },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("invalid client configuration: {0}")]
    InvalidConfig(String),

    #[error("{message}")]
    RetriesExhausted { attempts: u32, message: String },
}

impl ClientError {
    /// Maps an HTTP status to the matching error class.
    pub fn from_status(status: u16, detail: String, retry_after_secs: Option<u64>) -> Self {
        match status {
            401 | 403 => ClientError::Auth(detail),
            404 => ClientError::NotFound(detail),
            429 => ClientError::RateLimited { retry_after_secs },
            _ => ClientError::Api { status, detail },
        }
    }

    /// True for failures a retry can plausibly fix: connection loss,
    /// timeouts, rate limits and server-side 5xx responses.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Unreachable(_)
            | ClientError::Timeout(_)
            | ClientError::RateLimited { .. } => true,
            ClientError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Server-suggested wait, when the service sent one.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            ClientError::RateLimited { retry_after_secs } => *retry_after_secs,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout(err.to_string())
        } else if err.is_connect() {
            ClientError::Unreachable(err.to_string())
        } else if err.is_decode() {
            ClientError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            ClientError::from_status(status.as_u16(), err.to_string(), None)
        } else {
            ClientError::Unreachable(err.to_string())
        }
    }
}

/// One resolved row from a source shopping list: display name,
/// purchase-unit amount and unit/category labels.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceItem {
    pub name: String,
    pub amount: Option<f64>,
    pub unit: Option<String>,
    pub unit_plural: Option<String>,
    pub category: Option<String>,
}

/// One raw entry on a destination list, value string still unparsed.
#[derive(Debug, Clone, PartialEq)]
pub struct DestinationItem {
    pub id: String,
    pub value: String,
    pub category: Option<String>,
    pub crossed_off: bool,
}

/// An item to insert into a destination list.
#[derive(Debug, Clone, PartialEq)]
pub struct NewItem {
    pub value: String,
    pub category: Option<String>,
}

/// Read access to the source service's shopping lists.
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Fetches the open items of one shopping list.
    async fn fetch_list_items(&self, list_id: u32) -> ClientResult<Vec<SourceItem>>;

    /// Cheap reachability and auth check, run once per sync pass.
    async fn check_connection(&self) -> ClientResult<()>;
}

/// Read/write access to the destination service's lists.
#[async_trait]
pub trait DestinationClient: Send + Sync {
    /// Fetches every entry on the named list, crossed-off ones included.
    async fn fetch_list_items(&self, list_name: &str) -> ClientResult<Vec<DestinationItem>>;

    async fn add_item(&self, list_name: &str, item: &NewItem) -> ClientResult<()>;

    async fn remove_item(&self, list_name: &str, item_id: &str) -> ClientResult<()>;

    /// Verifies the session by signing in and loading the list overview.
    async fn check_connection(&self) -> ClientResult<()>;
}
