//! Registry client module
//!
//! Access to the upstream PNCP registry: the paginated update feed and the
//! per-record items endpoint. The engine only talks to the
//! [`RegistryClient`] trait, so it can be driven by [`HttpRegistryClient`]
//! or by an in-process double.

mod http;
mod retry;

pub use http::{build_http_client, HttpRegistryClient};
pub use retry::{with_retry, RetryPolicy};

use crate::model::{ControlNumber, PageRequest, PageResult, RawItem};
use async_trait::async_trait;
use thiserror::Error;

/// Failure of a single registry call
///
/// Carries strings rather than the underlying `reqwest::Error` so it can be
/// cloned into per-page diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Request to {url} timed out")]
    Timeout { url: String },

    #[error("Server error {status} from {url}")]
    Server { url: String, status: u16 },

    #[error("Rate limited by {url}")]
    RateLimited { url: String },

    #[error("Request to {url} rejected with status {status}")]
    Rejected { url: String, status: u16 },

    #[error("Transport error for {url}: {message}")]
    Transport { url: String, message: String },

    #[error("Malformed response from {url}: {message}")]
    Malformed { url: String, message: String },
}

impl RegistryError {
    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::Server { .. }
                | Self::RateLimited { .. }
                | Self::Transport { .. }
        )
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

/// Result type alias for registry calls
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

/// The two calls the ingestion engine needs from the registry
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Fetches one page of the update feed
    ///
    /// A page with no content yields `PageResult::empty`, not an error.
    async fn fetch_page(&self, request: &PageRequest) -> RegistryResult<PageResult>;

    /// Fetches all items of one procurement record
    ///
    /// A record without items yields an empty vec, not an error.
    async fn fetch_items(&self, control_number: &ControlNumber) -> RegistryResult<Vec<RawItem>>;
}
