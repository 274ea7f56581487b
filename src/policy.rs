//! Pluggable crawl policies and their default implementations.
//!
//! Every hook is an `Arc`'d closure so a policy can be shared across the
//! dispatcher and all workers. Unset hooks fall back to the defaults in this
//! module: stay on the seed hosts, read only `200 OK` HTML, follow every
//! `<a href>`.

use std::sync::Arc;
use std::time::Duration;

use mime::Mime;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use url::Url;

use crate::engine::CrawlerHandle;
use crate::html;
use crate::response::Response;

const USER_AGENT: &str = "crawlkit/0.1";

/// Total request timeout applied by the default client factory.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Per-page callback invoked once per fetched URL. Business logic lives
/// here. The handler runs on the worker's task and must not wait for the
/// crawl to finish; doing so deadlocks the engine.
pub type PageHandler = Arc<dyn Fn(&Response) + Send + Sync>;

/// Decides whether a discovered URL joins the frontier.
pub type UrlCheck = Arc<dyn Fn(&CrawlerHandle, &str) -> bool + Send + Sync>;

/// Decides, from the status line and headers, whether a response body is
/// worth reading.
pub type HeaderCheck = Arc<dyn Fn(&CrawlerHandle, &str, StatusCode, &HeaderMap) -> bool + Send + Sync>;

/// Produces candidate URLs from a fetched page. Duplicates, relative forms,
/// and already-seen URLs are all fine; the dispatcher filters them.
pub type LinkFinder = Arc<dyn Fn(&Response) -> Vec<String> + Send + Sync>;

/// Builds the HTTP client handed to each worker. Called once per worker, so
/// rate limiting or custom transports can be installed per slot.
pub type ClientFactory = Arc<dyn Fn() -> reqwest::Result<Client> + Send + Sync>;

/// Fully-resolved policy set shared by the dispatcher and the workers.
pub(crate) struct Hooks {
    pub handler: PageHandler,
    pub check_url: UrlCheck,
    pub check_header: HeaderCheck,
    pub link_finder: LinkFinder,
}

/// Default URL admission: accept a URL iff its host and effective port match
/// those of at least one seed. Unparseable URLs are rejected.
pub fn default_check_url(crawler: &CrawlerHandle, candidate: &str) -> bool {
    let Ok(parsed) = Url::parse(candidate) else {
        return false;
    };
    crawler
        .seeds()
        .iter()
        .any(|seed| Url::parse(seed).is_ok_and(|seed| same_authority(&seed, &parsed)))
}

fn same_authority(a: &Url, b: &Url) -> bool {
    a.host_str().is_some()
        && a.host_str() == b.host_str()
        && a.port_or_known_default() == b.port_or_known_default()
}

/// Default header admission: accept iff the status is exactly `200 OK` and
/// the media type is `text/html` or `application/xhtml+xml`. A missing or
/// malformed Content-Type is rejected.
pub fn default_check_header(
    _crawler: &CrawlerHandle,
    _url: &str,
    status: StatusCode,
    headers: &HeaderMap,
) -> bool {
    if status != StatusCode::OK {
        return false;
    }
    let Some(raw) = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let Ok(media) = raw.parse::<Mime>() else {
        return false;
    };
    media.essence_str() == "text/html" || media.essence_str() == "application/xhtml+xml"
}

/// Controls for the built-in link finder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkFinderOptions {
    /// Drop `#fragment` parts from resolved links.
    pub strip_fragments: bool,
    /// Skip anchors whose `rel` contains `nofollow`.
    pub skip_nofollow: bool,
}

impl Default for LinkFinderOptions {
    fn default() -> Self {
        Self {
            strip_fragments: true,
            skip_nofollow: true,
        }
    }
}

/// Builds a link finder with the given options.
pub fn link_finder(options: LinkFinderOptions) -> LinkFinder {
    Arc::new(move |page: &Response| find_links(page, options))
}

/// Default link extraction: every `<a href>` in the body, resolved against
/// the page URL, with fragments stripped and `rel="nofollow"` anchors
/// excluded. Unresolvable hrefs are skipped, not errors.
pub fn default_link_finder(page: &Response) -> Vec<String> {
    find_links(page, LinkFinderOptions::default())
}

fn find_links(page: &Response, options: LinkFinderOptions) -> Vec<String> {
    let Ok(base) = Url::parse(&page.url) else {
        return Vec::new();
    };
    let anchors = match html::scan_anchors(&page.body) {
        Ok(anchors) => anchors,
        Err(err) => {
            tracing::debug!(url = %page.url, error = %err, "anchor scan failed");
            return Vec::new();
        }
    };

    let mut links = Vec::with_capacity(anchors.len());
    for anchor in anchors {
        if options.skip_nofollow && is_nofollow(anchor.rel.as_deref()) {
            continue;
        }
        let Ok(mut resolved) = base.join(&anchor.href) else {
            continue;
        };
        if options.strip_fragments {
            resolved.set_fragment(None);
        }
        links.push(resolved.into());
    }
    links
}

fn is_nofollow(rel: Option<&str>) -> bool {
    rel.is_some_and(|rel| {
        rel.split_whitespace()
            .any(|token| token.eq_ignore_ascii_case("nofollow"))
    })
}

/// Default client factory: a client with a 15-second total request timeout.
pub fn default_client() -> reqwest::Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(DEFAULT_TIMEOUT)
        .build()
}
