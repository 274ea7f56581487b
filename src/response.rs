//! The per-page record handed to user callbacks.

use std::borrow::Cow;

use mime::Mime;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::StatusCode;
use scraper::Html;

use crate::engine::CrawlerHandle;
use crate::error::CrawlError;

/// Everything known about one fetched page, passed by reference to the page
/// handler and the link extractor.
///
/// Which fields are populated depends on how far processing got: a transport
/// failure leaves only `url` and `err` set, while a fully processed HTML page
/// carries status, headers, body bytes, and a parsed document. The body is
/// exposed as plain bytes rather than a one-shot stream, so callbacks may
/// read it as often as they like.
pub struct Response {
    /// The URL that was fetched.
    pub url: String,
    /// HTTP status code, absent if the fetch failed before a response arrived.
    pub status: Option<StatusCode>,
    /// Response headers, absent if the fetch failed before a response arrived.
    pub headers: Option<HeaderMap>,
    /// The fully-read response body; empty if the body was never read.
    pub body: Vec<u8>,
    /// Parsed document, present when the Content-Type indicated HTML or XML
    /// and the body decoded cleanly. Lives only for the duration of the
    /// worker's processing; it never outlives the callback invocations.
    pub doc: Option<Html>,
    /// The terminal error for this URL's processing, if any.
    pub err: Option<CrawlError>,
    /// Back-reference to the engine, letting a handler enqueue more URLs or
    /// stop the crawl. A handler must never wait for the crawl to finish.
    pub crawler: CrawlerHandle,
}

impl Response {
    pub(crate) fn new(url: String, crawler: CrawlerHandle) -> Self {
        Self {
            url,
            status: None,
            headers: None,
            body: Vec::new(),
            doc: None,
            err: None,
            crawler,
        }
    }

    /// The body as text, with invalid UTF-8 replaced.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Whether the Content-Type calls for building a document handle: `text/html`,
/// `text/xml`, `application/xml`, or any `*+xml` type.
pub(crate) fn should_parse(headers: &HeaderMap) -> bool {
    let Some(raw) = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let Ok(media) = raw.parse::<Mime>() else {
        return false;
    };
    (media.type_() == mime::TEXT && media.subtype() == mime::HTML)
        || media.subtype() == mime::XML
        || media.suffix() == Some(mime::XML)
}
