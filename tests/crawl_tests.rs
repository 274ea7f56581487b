//! End-to-end crawl tests against mock HTTP servers.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crawlkit::{Crawler, PageHandler, Response, UrlState};
use tokio::time::{sleep, timeout};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CRAWL_DEADLINE: Duration = Duration::from_secs(10);

fn html_page(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.to_string(), "text/html")
}

/// Handler recording `(url, had_error)` per invocation.
fn recording_handler() -> (PageHandler, Arc<Mutex<Vec<(String, bool)>>>) {
    let seen: Arc<Mutex<Vec<(String, bool)>>> = Arc::default();
    let sink = Arc::clone(&seen);
    let handler: PageHandler = Arc::new(move |page: &Response| {
        sink.lock()
            .unwrap()
            .push((page.url.clone(), page.err.is_some()));
    });
    (handler, seen)
}

async fn finish(crawler: &Crawler) {
    timeout(CRAWL_DEADLINE, crawler.wait())
        .await
        .expect("crawl finished in time");
}

#[tokio::test]
async fn single_seed_without_links() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_page("<html><body>leaf</body></html>"))
        .mount(&server)
        .await;

    let seed = format!("{}/", server.uri());
    let (handler, seen) = recording_handler();
    let mut crawler = Crawler::new(seed.clone(), handler, 1);
    crawler.start().expect("start");
    finish(&crawler).await;

    assert_eq!(crawler.url_state(&seed), UrlState::Done);
    let seen = seen.lock().unwrap();
    assert_eq!(*seen, [(seed, false)]);

    let stats = crawler.stats();
    assert_eq!(stats.done, 1);
    assert_eq!(stats.pending + stats.running + stats.rejected, 0);
    assert!(!crawler.is_running());
}

#[tokio::test]
async fn follows_in_domain_links_without_refetching() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_page(r#"<a href="/b">next</a>"#))
        .mount(&server)
        .await;
    // /b links back to the seed; the cycle must not cause a second fetch.
    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(html_page(r#"<a href="/">back</a>"#))
        .expect(1)
        .mount(&server)
        .await;

    let seed = format!("{}/", server.uri());
    let linked = format!("{}/b", server.uri());
    let (handler, seen) = recording_handler();
    let mut crawler = Crawler::new(seed.clone(), handler, 2);
    crawler.start().expect("start");
    finish(&crawler).await;

    assert_eq!(crawler.url_state(&seed), UrlState::Done);
    assert_eq!(crawler.url_state(&linked), UrlState::Done);
    assert_eq!(seen.lock().unwrap().len(), 2);
    assert_eq!(crawler.stats().done, 2);
}

#[tokio::test]
async fn cross_domain_links_are_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_page(r#"<a href="http://other.test/x">away</a>"#))
        .mount(&server)
        .await;

    let seed = format!("{}/", server.uri());
    let (handler, seen) = recording_handler();
    let mut crawler = Crawler::new(seed.clone(), handler, 2);
    crawler.start().expect("start");
    finish(&crawler).await;

    assert_eq!(crawler.url_state("http://other.test/x"), UrlState::Rejected);
    let seen = seen.lock().unwrap();
    assert_eq!(*seen, [(seed, false)]);
}

#[tokio::test]
async fn non_html_responses_are_header_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/png")
                .set_body_bytes(vec![0x89, 0x50, 0x4e, 0x47]),
        )
        .mount(&server)
        .await;

    let seed = format!("{}/", server.uri());
    let (handler, seen) = recording_handler();
    let mut crawler = Crawler::new(seed.clone(), handler, 1);
    crawler.start().expect("start");
    finish(&crawler).await;

    assert_eq!(crawler.url_state(&seed), UrlState::Rejected);
    // Header-rejected URLs never reach the handler.
    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(crawler.stats().rejected, 1);
}

#[tokio::test]
async fn network_failure_reaches_the_handler() {
    // Bind then drop a listener so the port is known to refuse connections.
    let closed_port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let seed = format!("http://127.0.0.1:{closed_port}/");

    let (handler, seen) = recording_handler();
    let mut crawler = Crawler::new(seed.clone(), handler, 1);
    crawler.start().expect("start");
    finish(&crawler).await;

    assert_eq!(crawler.url_state(&seed), UrlState::Done);
    let seen = seen.lock().unwrap();
    assert_eq!(*seen, [(seed, true)]);
}

#[tokio::test]
async fn pool_size_bounds_concurrent_fetches() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(html_page("<html>slow</html>").set_delay(Duration::from_millis(150)))
        .mount(&server)
        .await;

    let (handler, _) = recording_handler();
    let mut crawler = Crawler::default();
    crawler.urls = vec![
        format!("{}/one", server.uri()),
        format!("{}/two", server.uri()),
    ];
    crawler.num_workers = 1;
    crawler.handler = Some(handler);
    crawler.start().expect("start");

    let handle = crawler.handle().expect("handle after start");
    let mut max_running = 0;
    timeout(CRAWL_DEADLINE, async {
        while handle.is_running() {
            max_running = max_running.max(handle.count(UrlState::Running));
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("crawl finished in time");

    assert!(max_running <= 1, "observed {max_running} concurrent fetches");
    assert_eq!(crawler.stats().done, 2);
}

#[tokio::test]
async fn stop_mid_crawl_leaves_the_rest_pending() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(html_page("<html>page</html>").set_delay(Duration::from_millis(100)))
        .mount(&server)
        .await;

    let mut crawler = Crawler::default();
    crawler.urls = (0..30).map(|i| format!("{}/p{i}", server.uri())).collect();
    crawler.num_workers = 4;
    // Stop as soon as the first page comes back.
    crawler.handler = Some(Arc::new(|page: &Response| {
        page.crawler.stop();
    }));
    crawler.start().expect("start");
    finish(&crawler).await;

    let stats = crawler.stats();
    assert!(!crawler.is_running());
    assert_eq!(stats.running, 0);
    assert!(stats.done >= 1);
    // The stop trigger plus whatever was already in flight, nothing more.
    assert!(stats.done <= 5, "stopped too late: {} done", stats.done);
    assert_eq!(stats.pending, 30 - stats.done);
}

#[tokio::test]
async fn persistent_engine_accepts_late_urls() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_page("<html>first</html>"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/later"))
        .respond_with(html_page("<html>second</html>"))
        .mount(&server)
        .await;

    let (handler, seen) = recording_handler();
    let mut crawler = Crawler::default();
    crawler.urls = vec![format!("{}/", server.uri())];
    crawler.num_workers = 1;
    crawler.persistent = true;
    crawler.handler = Some(handler);
    crawler.start().expect("start");

    let handle = crawler.handle().expect("handle after start");
    timeout(CRAWL_DEADLINE, async {
        while handle.count(UrlState::Done) < 1 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("seed drained");

    // Quiescent but persistent: the engine keeps idling.
    sleep(Duration::from_millis(300)).await;
    assert!(handle.is_running());

    let later = format!("{}/later", server.uri());
    assert!(handle.add(&later));
    assert!(!handle.add(&later));

    timeout(CRAWL_DEADLINE, async {
        while handle.url_state(&later) != UrlState::Done {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("late url drained");

    handle.stop();
    finish(&crawler).await;
    assert!(!crawler.is_running());
    assert_eq!(crawler.count(UrlState::Running), 0);
    assert_eq!(seen.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn handler_can_inject_urls() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_page("<html>root</html>"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/injected"))
        .respond_with(html_page("<html>injected</html>"))
        .mount(&server)
        .await;

    let seed = format!("{}/", server.uri());
    let injected = format!("{}/injected", server.uri());
    let inject_target = injected.clone();
    let calls: Arc<Mutex<Vec<String>>> = Arc::default();
    let sink = Arc::clone(&calls);
    let handler: PageHandler = Arc::new(move |page: &Response| {
        sink.lock().unwrap().push(page.url.clone());
        if page.url.ends_with('/') {
            page.crawler.add(&inject_target);
        }
    });

    let mut crawler = Crawler::new(seed, handler, 1);
    crawler.start().expect("start");
    finish(&crawler).await;

    assert_eq!(crawler.url_state(&injected), UrlState::Done);
    assert_eq!(calls.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn panicking_handler_does_not_wedge_the_engine() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_page("<html>boom</html>"))
        .mount(&server)
        .await;

    let seed = format!("{}/", server.uri());
    let handler: PageHandler = Arc::new(|_page: &Response| {
        panic!("handler exploded");
    });
    let mut crawler = Crawler::new(seed.clone(), handler, 1);
    crawler.start().expect("start");
    finish(&crawler).await;

    assert_eq!(crawler.url_state(&seed), UrlState::Done);
    assert!(!crawler.is_running());
}

#[tokio::test]
async fn undecodable_body_surfaces_a_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_bytes(vec![0xff, 0xfe, 0xfd]),
        )
        .mount(&server)
        .await;

    let seed = format!("{}/", server.uri());
    let (handler, seen) = recording_handler();
    let mut crawler = Crawler::new(seed.clone(), handler, 1);
    crawler.start().expect("start");
    finish(&crawler).await;

    assert_eq!(crawler.url_state(&seed), UrlState::Done);
    let seen = seen.lock().unwrap();
    assert_eq!(*seen, [(seed, true)]);
}

#[tokio::test]
async fn start_twice_fails_while_running() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(html_page("<html>slow</html>").set_delay(Duration::from_millis(300)))
        .mount(&server)
        .await;

    let (handler, _) = recording_handler();
    let mut crawler = Crawler::new(format!("{}/", server.uri()), handler, 1);
    crawler.start().expect("first start");
    assert!(matches!(
        crawler.start(),
        Err(crawlkit::CrawlError::AlreadyRunning)
    ));
    finish(&crawler).await;
}
