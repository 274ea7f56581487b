#![warn(missing_docs)]
//! Embeddable concurrent web crawler.
//!
//! `crawlkit` fetches pages with a fixed pool of workers, hands every fetched
//! page to your handler, extracts outbound links, and keeps going until the
//! reachable frontier is exhausted. Which URLs to follow, which responses to
//! read, how links are extracted, and how HTTP clients are built are all
//! pluggable; the defaults keep the crawl on the seed hosts and only read
//! `200 OK` HTML.
//!
//! ```no_run
//! use std::sync::Arc;
//! use crawlkit::{Crawler, Response};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), crawlkit::CrawlError> {
//! let mut crawler = Crawler::new(
//!     "http://example.com/",
//!     Arc::new(|page: &Response| {
//!         if page.err.is_none() {
//!             println!("fetched {}", page.url);
//!         }
//!     }),
//!     4,
//! );
//! crawler.start()?;
//! crawler.wait().await;
//! # Ok(())
//! # }
//! ```
//!
//! For anything beyond one seed and the defaults, populate the engine fields
//! directly:
//!
//! ```no_run
//! use std::sync::Arc;
//! use crawlkit::{Crawler, Response};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), crawlkit::CrawlError> {
//! let mut crawler = Crawler::default();
//! crawler.urls = vec![
//!     "http://example.com/".to_string(),
//!     "http://example.org/".to_string(),
//! ];
//! crawler.num_workers = 12;
//! crawler.handler = Some(Arc::new(|page: &Response| {
//!     if let Some(doc) = &page.doc {
//!         let selector = scraper::Selector::parse("title").unwrap();
//!         if let Some(title) = doc.select(&selector).next() {
//!             println!("{}: {}", page.url, title.text().collect::<String>());
//!         }
//!     }
//! }));
//! let follow_everything: crawlkit::UrlCheck = Arc::new(|_, _| true);
//! crawler.check_url = Some(follow_everything);
//! crawler.start()?;
//! crawler.wait().await;
//! # Ok(())
//! # }
//! ```
//!
//! Handlers run on the worker that fetched the page; a handler must never
//! wait for the crawl to finish, but it may add URLs or stop the engine
//! through [`Response::crawler`].

pub mod html;

mod engine;
mod error;
mod policy;
mod registry;
mod response;
mod worker;

pub use engine::{Crawler, CrawlerHandle};
pub use error::CrawlError;
pub use policy::{
    default_check_header, default_check_url, default_client, default_link_finder, link_finder,
    ClientFactory, HeaderCheck, LinkFinder, LinkFinderOptions, PageHandler, UrlCheck,
};
pub use registry::{CrawlStats, UrlState};
pub use response::Response;
