//! Error types surfaced by the crawl engine.

use thiserror::Error;

/// Errors produced while configuring, starting, or running a crawl.
///
/// Per-URL failures never escape through engine entry points; they reach the
/// caller on [`Response::err`](crate::Response) after the page handler has
/// been given a chance to observe them.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// `start` was called on an engine whose dispatch loop is still alive.
    #[error("crawler is already running")]
    AlreadyRunning,

    /// The engine configuration failed validation at `start`.
    #[error("invalid configuration: {0}")]
    Config(&'static str),

    /// The HTTP client factory could not build a client.
    #[error("http client construction failed: {0}")]
    Client(#[from] reqwest::Error),

    /// The request failed before a response arrived. Terminal state: Done.
    #[error("fetch failed for {url}: {source}")]
    FetchFailed {
        /// URL whose fetch failed.
        url: String,
        /// Transport-level cause.
        #[source]
        source: reqwest::Error,
    },

    /// Sentinel: the header admission hook declined the response. The body
    /// is never read and the page handler is not invoked. Terminal state:
    /// Rejected.
    #[error("header check rejected {0}")]
    HeaderRejected(String),

    /// Headers arrived but the body could not be read to completion.
    /// Terminal state: Done.
    #[error("body read failed for {url}: {source}")]
    ReadFailed {
        /// URL whose body read failed.
        url: String,
        /// Transport-level cause.
        #[source]
        source: reqwest::Error,
    },

    /// The body was read but no document could be built from it. Not fatal
    /// to the page: the handler still runs, with `doc` absent. Terminal
    /// state: Done.
    #[error("could not parse document from {url}: {reason}")]
    ParseFailed {
        /// URL whose body failed to parse.
        url: String,
        /// Parser diagnostic.
        reason: String,
    },

    /// A user callback panicked while processing the URL. The worker traps
    /// the panic so its result is still published and the engine continues.
    /// Terminal state: Done.
    #[error("user callback panicked while processing {url}: {reason}")]
    CallbackPanic {
        /// URL being processed when the callback panicked.
        url: String,
        /// Panic payload, stringified.
        reason: String,
    },

    /// A state transition was requested for a URL the registry has never
    /// seen. Callers treat this as a programmer error.
    #[error("unknown url: {0}")]
    UnknownUrl(String),
}

impl CrawlError {
    /// True when this error is the header-rejection sentinel.
    pub fn is_header_rejected(&self) -> bool {
        matches!(self, Self::HeaderRejected(_))
    }
}
