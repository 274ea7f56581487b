//! Worker slots and the per-URL fetch pipeline.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use reqwest::Client;
use scraper::Html;
use tokio::sync::mpsc;

use crate::engine::CrawlerHandle;
use crate::error::CrawlError;
use crate::policy::Hooks;
use crate::response::{self, Response};

/// One fetch outcome, published on the shared results channel. Exactly one
/// report is sent per processed URL, whatever path the pipeline took.
pub(crate) struct WorkerReport {
    pub worker_id: usize,
    pub url: String,
    pub err: Option<CrawlError>,
    pub links: Vec<String>,
}

/// A pool slot bound to at most one in-flight fetch at a time.
///
/// The dispatcher owns every worker exclusively: it flips `busy` via
/// `setup`/`teardown` and launches the fetch with `process`. The fetch itself
/// runs on its own task and reports back over the channel.
pub(crate) struct Worker {
    id: usize,
    busy: bool,
    url: Option<String>,
    client: Client,
    results: mpsc::Sender<WorkerReport>,
    handle: CrawlerHandle,
    hooks: Arc<Hooks>,
}

impl Worker {
    pub fn new(
        id: usize,
        client: Client,
        results: mpsc::Sender<WorkerReport>,
        handle: CrawlerHandle,
        hooks: Arc<Hooks>,
    ) -> Self {
        Self {
            id,
            busy: false,
            url: None,
            client,
            results,
            handle,
            hooks,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Marks the slot busy with the given target.
    pub fn setup(&mut self, url: String) {
        self.busy = true;
        self.url = Some(url);
    }

    /// Clears the slot once its result has been drained.
    pub fn teardown(&mut self) {
        self.busy = false;
        self.url = None;
    }

    /// Launches the fetch pipeline for the URL installed by `setup`.
    ///
    /// The pipeline runs under `catch_unwind` so that a panicking user
    /// callback still produces exactly one published result.
    pub fn process(&self) {
        let Some(url) = self.url.clone() else {
            panic!("worker {} asked to process without a target url", self.id);
        };
        let id = self.id;
        let client = self.client.clone();
        let results = self.results.clone();
        let handle = self.handle.clone();
        let hooks = Arc::clone(&self.hooks);

        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(crawl_url(&client, &url, &handle, &hooks))
                .catch_unwind()
                .await;

            let report = match outcome {
                Ok((err, links)) => WorkerReport {
                    worker_id: id,
                    url,
                    err,
                    links,
                },
                Err(payload) => {
                    let reason = panic_reason(payload.as_ref());
                    tracing::warn!(url = %url, reason = %reason, "user callback panicked; recovering worker");
                    WorkerReport {
                        worker_id: id,
                        url: url.clone(),
                        err: Some(CrawlError::CallbackPanic { url, reason }),
                        links: Vec::new(),
                    }
                }
            };

            if results.send(report).await.is_err() {
                tracing::warn!("crawl loop gone before result delivery");
            }
        });
    }
}

/// Fetches and processes one URL: GET, header gate, body read, optional
/// parse, handler, link extraction. Returns the terminal error (if any) and
/// the raw links for the dispatcher to filter.
async fn crawl_url(
    client: &Client,
    url: &str,
    handle: &CrawlerHandle,
    hooks: &Hooks,
) -> (Option<CrawlError>, Vec<String>) {
    let http = match client.get(url).send().await {
        Ok(http) => http,
        Err(source) => {
            tracing::debug!(url, error = %source, "fetch failed");
            let mut page = Response::new(url.to_string(), handle.clone());
            page.err = Some(CrawlError::FetchFailed {
                url: url.to_string(),
                source,
            });
            (hooks.handler)(&page);
            return (page.err.take(), Vec::new());
        }
    };

    let status = http.status();
    let headers = http.headers().clone();

    // The handler is not consulted for header-rejected URLs; they go
    // straight to the rejected state.
    if !(hooks.check_header)(handle, url, status, &headers) {
        tracing::debug!(url, status = %status, "rejected by header check");
        return (Some(CrawlError::HeaderRejected(url.to_string())), Vec::new());
    }

    let body = match http.bytes().await {
        Ok(bytes) => bytes.to_vec(),
        Err(source) => {
            let mut page = Response::new(url.to_string(), handle.clone());
            page.status = Some(status);
            page.headers = Some(headers);
            page.err = Some(CrawlError::ReadFailed {
                url: url.to_string(),
                source,
            });
            (hooks.handler)(&page);
            return (page.err.take(), Vec::new());
        }
    };

    // No suspension points from here on: the parsed document must be gone
    // again before this task next yields.
    let mut page = Response::new(url.to_string(), handle.clone());
    page.status = Some(status);
    page.headers = Some(headers);
    page.body = body;

    if page.headers.as_ref().is_some_and(response::should_parse) {
        match std::str::from_utf8(&page.body) {
            Ok(text) => page.doc = Some(Html::parse_document(text)),
            Err(err) => {
                page.err = Some(CrawlError::ParseFailed {
                    url: url.to_string(),
                    reason: err.to_string(),
                });
            }
        }
    }

    (hooks.handler)(&page);

    let links = if page.err.is_none() {
        (hooks.link_finder)(&page)
    } else {
        Vec::new()
    };
    tracing::debug!(url, links = links.len(), "page processed");

    (page.err.take(), links)
}

fn panic_reason(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "opaque panic payload".to_string()
    }
}
