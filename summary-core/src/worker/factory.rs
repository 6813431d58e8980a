//! Summarizer creation
//!
//! The factory boundary hands the coordinator a running-ready summarizer.
//! [`LoaderSummarizerFactory`] resolves one through a loader route and
//! validates what comes back.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::summarizer::SummarizerHandle;
use crate::coordinator::quorum::{ClientDetails, ClientId};
use crate::error::{Result, SpawnError};

/// Route serving summarizer objects
pub const SUMMARIZER_ROUTE: &str = "/_summarizer";

/// Object types a summarizer route may answer with
pub const SUMMARIZER_MIME_TYPES: [&str; 2] = ["fluid/object", "fluid/component"];

/// Parameters for creating a summarizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummarizerRequest {
    /// Route to request
    pub url: String,
    /// Client the summarizer will act for
    pub on_behalf_of: ClientId,
    /// Load the document at least up to this sequence number
    pub sequence_number: u64,
    /// Details the summarizer client announces when it joins
    pub client_details: ClientDetails,
    /// Reuse a cached container
    pub cache: bool,
    /// Reconnect automatically after a disconnect
    pub reconnect: bool,
    /// Connect as a summarizing client
    pub summarizing_client: bool,
}

impl SummarizerRequest {
    /// Standard request for a fresh, non-reconnecting summarizer client
    pub fn new(on_behalf_of: ClientId, sequence_number: u64) -> Self {
        Self {
            url: SUMMARIZER_ROUTE.into(),
            on_behalf_of,
            sequence_number,
            client_details: ClientDetails::summarizer(),
            cache: false,
            reconnect: false,
            summarizing_client: true,
        }
    }
}

/// Creates summarizers for the coordinator
#[async_trait]
pub trait SummarizerFactory: Send + Sync {
    /// Spawn a summarizer; fails with [`SpawnError`] when none can be produced
    async fn spawn(&self, request: SummarizerRequest) -> Result<Arc<dyn SummarizerHandle>>;
}

/// Answer from a loader route
pub struct LoaderResponse {
    /// Status code of the route
    pub status: u16,
    /// Type of the returned object
    pub mime_type: String,
    /// The object, if it is a summarizer
    pub value: Option<Arc<dyn SummarizerHandle>>,
}

/// Resolves requests against a document's routes
#[async_trait]
pub trait Loader: Send + Sync {
    async fn request(&self, request: &SummarizerRequest) -> Result<LoaderResponse>;
}

/// Factory that loads summarizers through a [`Loader`]
pub struct LoaderSummarizerFactory<L> {
    loader: L,
}

impl<L: Loader> LoaderSummarizerFactory<L> {
    pub fn new(loader: L) -> Self {
        Self { loader }
    }
}

#[async_trait]
impl<L: Loader> SummarizerFactory for LoaderSummarizerFactory<L> {
    async fn spawn(&self, request: SummarizerRequest) -> Result<Arc<dyn SummarizerHandle>> {
        debug!(
            "Requesting summarizer at {} for {} (seq {})",
            request.url, request.on_behalf_of, request.sequence_number
        );
        let response = self.loader.request(&request).await?;

        if response.status != 200 || !SUMMARIZER_MIME_TYPES.contains(&response.mime_type.as_str()) {
            return Err(SpawnError::InvalidRoute {
                status: response.status,
                mime_type: response.mime_type,
            }
            .into());
        }

        response
            .value
            .ok_or_else(|| SpawnError::NotASummarizer.into())
    }
}
