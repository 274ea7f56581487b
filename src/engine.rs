//! The crawl engine: public `Crawler` API and the dispatch loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::error::CrawlError;
use crate::policy::{self, ClientFactory, HeaderCheck, Hooks, LinkFinder, PageHandler, UrlCheck};
use crate::registry::{CrawlStats, UrlRegistry, UrlState};
use crate::worker::{Worker, WorkerReport};

/// Dispatcher sleep when no result is pending and no work can be assigned.
const IDLE_SLEEP: Duration = Duration::from_millis(100);

/// Poll interval used by [`Crawler::wait`].
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// State shared between the engine front-end, the dispatch loop, and every
/// callback-visible handle.
pub(crate) struct Shared {
    registry: UrlRegistry,
    running: AtomicBool,
    stop_requested: AtomicBool,
    persistent: bool,
    seeds: Vec<String>,
}

impl Shared {
    fn new(seeds: Vec<String>, persistent: bool) -> Self {
        let registry = UrlRegistry::new();
        registry.add(&seeds);
        Self {
            registry,
            running: AtomicBool::new(true),
            stop_requested: AtomicBool::new(false),
            persistent,
            seeds,
        }
    }
}

/// Cloneable reference to a live engine.
///
/// Every [`Response`](crate::Response) carries one, so page handlers can
/// enqueue more URLs, inspect crawl state, or stop the run. A handler must
/// never block on the crawl finishing.
#[derive(Clone)]
pub struct CrawlerHandle {
    shared: Arc<Shared>,
}

impl CrawlerHandle {
    fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Handle for a registry-only engine with no dispatch loop behind it.
    #[cfg(test)]
    pub(crate) fn detached(seeds: Vec<String>) -> Self {
        Self::new(Arc::new(Shared::new(seeds, false)))
    }

    /// Registers a URL as pending unless it is already known. Returns true
    /// if the URL was new. Known URLs are never re-queued.
    pub fn add(&self, url: &str) -> bool {
        self.shared.registry.insert(url, UrlState::Pending)
    }

    /// Signals the engine to stop. In-flight fetches run to completion; no
    /// new work is assigned.
    pub fn stop(&self) {
        self.shared.stop_requested.store(true, Ordering::Release);
    }

    /// Current lifecycle state of a URL.
    pub fn url_state(&self, url: &str) -> UrlState {
        self.shared.registry.state(url)
    }

    /// Number of URLs currently in `state`.
    pub fn count(&self, state: UrlState) -> usize {
        self.shared.registry.count(state)
    }

    /// Snapshot of per-state totals.
    pub fn stats(&self) -> CrawlStats {
        self.shared.registry.stats()
    }

    /// Whether the dispatch loop is still alive.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// The seed URLs this engine was started with.
    pub fn seeds(&self) -> &[String] {
        &self.shared.seeds
    }
}

/// A concurrent crawl engine.
///
/// Populate the public fields (or use [`Crawler::new`] for the common case),
/// then [`start`](Crawler::start) the engine and [`wait`](Crawler::wait) for
/// it to drain. The engine is one-shot by default: it terminates once no URL
/// is pending or running. With [`persistent`](Crawler::persistent) set it
/// idles instead, waking on [`add`](Crawler::add), until an explicit
/// [`stop`](Crawler::stop).
pub struct Crawler {
    /// Seed URLs (required, non-empty). Under the default URL admission
    /// these also define the set of hosts the crawl may visit.
    pub urls: Vec<String>,
    /// Worker pool size (required, non-zero). At most this many fetches are
    /// in flight at any time.
    pub num_workers: usize,
    /// Keep the engine alive when the frontier empties.
    pub persistent: bool,
    /// Per-page callback (required).
    pub handler: Option<PageHandler>,
    /// URL admission hook; defaults to same-host-as-seeds.
    pub check_url: Option<UrlCheck>,
    /// Header admission hook; defaults to `200 OK` HTML only.
    pub check_header: Option<HeaderCheck>,
    /// Link extraction hook; defaults to every `<a href>`.
    pub link_finder: Option<LinkFinder>,
    /// HTTP client factory; defaults to a 15-second-timeout client.
    pub client: Option<ClientFactory>,
    handle: Option<CrawlerHandle>,
}

impl Default for Crawler {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            num_workers: 0,
            persistent: false,
            handler: None,
            check_url: None,
            check_header: None,
            link_finder: None,
            client: None,
            handle: None,
        }
    }
}

impl Crawler {
    /// A ready-to-start engine with one seed and default policies.
    pub fn new(seed: impl Into<String>, handler: PageHandler, num_workers: usize) -> Self {
        Self {
            urls: vec![seed.into()],
            num_workers,
            handler: Some(handler),
            ..Self::default()
        }
    }

    /// Validates the configuration, installs defaults for unset hooks, and
    /// launches the dispatch loop. Returns immediately; use
    /// [`wait`](Crawler::wait) to block until the crawl drains.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// [`CrawlError::AlreadyRunning`] if the previous run has not finished,
    /// [`CrawlError::Config`] for missing seeds, a zero worker count, or a
    /// missing handler, and [`CrawlError::Client`] if the client factory
    /// fails.
    pub fn start(&mut self) -> Result<(), CrawlError> {
        if self.handle.as_ref().is_some_and(CrawlerHandle::is_running) {
            return Err(CrawlError::AlreadyRunning);
        }
        if self.urls.is_empty() {
            return Err(CrawlError::Config("at least one seed URL is required"));
        }
        if self.num_workers == 0 {
            return Err(CrawlError::Config("worker pool size must be non-zero"));
        }
        let Some(handler) = self.handler.clone() else {
            return Err(CrawlError::Config("a page handler is required"));
        };

        let hooks = Arc::new(Hooks {
            handler,
            check_url: self
                .check_url
                .clone()
                .unwrap_or_else(|| Arc::new(policy::default_check_url)),
            check_header: self
                .check_header
                .clone()
                .unwrap_or_else(|| Arc::new(policy::default_check_header)),
            link_finder: self
                .link_finder
                .clone()
                .unwrap_or_else(|| Arc::new(policy::default_link_finder)),
        });
        let client_factory = self
            .client
            .clone()
            .unwrap_or_else(|| Arc::new(policy::default_client));

        let mut clients = Vec::with_capacity(self.num_workers);
        for _ in 0..self.num_workers {
            clients.push(client_factory()?);
        }

        let shared = Arc::new(Shared::new(self.urls.clone(), self.persistent));
        let handle = CrawlerHandle::new(Arc::clone(&shared));

        let (results_tx, results_rx) = mpsc::channel(self.num_workers);
        let workers: Vec<Worker> = clients
            .into_iter()
            .enumerate()
            .map(|(id, client)| {
                Worker::new(
                    id,
                    client,
                    results_tx.clone(),
                    handle.clone(),
                    Arc::clone(&hooks),
                )
            })
            .collect();
        drop(results_tx);

        tracing::info!(
            seeds = self.urls.len(),
            workers = self.num_workers,
            persistent = self.persistent,
            "starting crawl"
        );
        tokio::spawn(dispatch_loop(shared, handle.clone(), hooks, workers, results_rx));
        self.handle = Some(handle);
        Ok(())
    }

    /// Signals the engine to stop without waiting. A no-op before `start`.
    pub fn stop(&self) {
        if let Some(handle) = &self.handle {
            handle.stop();
        }
    }

    /// Blocks until the engine is fully quiescent and stopped. Returns
    /// immediately if the engine was never started.
    ///
    /// Must not be called from inside a page handler: handlers run on worker
    /// tasks the engine is waiting on.
    pub async fn wait(&self) {
        let Some(handle) = &self.handle else {
            return;
        };
        while handle.is_running() || handle.count(UrlState::Running) > 0 {
            sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    /// Whether the engine is currently running.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(CrawlerHandle::is_running)
    }

    /// Enqueues a URL. Before `start` it joins the seed list; afterwards it
    /// is registered as pending unless already known.
    pub fn add(&mut self, url: &str) {
        match &self.handle {
            Some(handle) => {
                handle.add(url);
            }
            None => {
                if !self.urls.iter().any(|existing| existing == url) {
                    self.urls.push(url.to_string());
                }
            }
        }
    }

    /// Current lifecycle state of a URL; `NotFound` before `start`.
    pub fn url_state(&self, url: &str) -> UrlState {
        self.handle
            .as_ref()
            .map_or(UrlState::NotFound, |handle| handle.url_state(url))
    }

    /// Number of URLs currently in `state`.
    pub fn count(&self, state: UrlState) -> usize {
        self.handle.as_ref().map_or(0, |handle| handle.count(state))
    }

    /// Snapshot of per-state totals.
    pub fn stats(&self) -> CrawlStats {
        self.handle
            .as_ref()
            .map_or_else(CrawlStats::default, CrawlerHandle::stats)
    }

    /// Handle for driving the engine from elsewhere; `None` before `start`.
    pub fn handle(&self) -> Option<CrawlerHandle> {
        self.handle.clone()
    }
}

/// The single control loop: drains worker results, admits discovered links,
/// hands pending URLs to idle workers, and detects termination.
async fn dispatch_loop(
    shared: Arc<Shared>,
    handle: CrawlerHandle,
    hooks: Arc<Hooks>,
    mut workers: Vec<Worker>,
    mut results: mpsc::Receiver<WorkerReport>,
) {
    use tokio::sync::mpsc::error::TryRecvError;

    loop {
        match results.try_recv() {
            Ok(report) => finish_result(&shared, &handle, &hooks, &mut workers, report),
            Err(TryRecvError::Empty) => {
                let stopping = shared.stop_requested.load(Ordering::Acquire);
                let (pending, running) = shared.registry.frontier_counts();

                if stopping && running == 0 {
                    break;
                }
                if !stopping && pending == 0 && running == 0 && !shared.persistent {
                    break;
                }
                if !stopping && pending > 0 {
                    if let Some(idle) = workers.iter().position(|worker| !worker.is_busy()) {
                        assign(&shared, &mut workers[idle]);
                        continue;
                    }
                }
                sleep(IDLE_SLEEP).await;
            }
            Err(TryRecvError::Disconnected) => break,
        }
    }

    shared.running.store(false, Ordering::Release);
    let totals = shared.registry.stats();
    tracing::info!(
        done = totals.done,
        rejected = totals.rejected,
        pending = totals.pending,
        "crawl loop stopped"
    );
}

/// Settles one worker result: frees the slot, records the terminal state,
/// admits any discovered links, and puts the freed worker back to work.
fn finish_result(
    shared: &Shared,
    handle: &CrawlerHandle,
    hooks: &Hooks,
    workers: &mut [Worker],
    report: WorkerReport,
) {
    let WorkerReport {
        worker_id,
        url,
        err,
        links,
    } = report;
    workers[worker_id].teardown();

    let terminal = match &err {
        Some(err) if err.is_header_rejected() => UrlState::Rejected,
        _ => UrlState::Done,
    };
    if let Err(missing) = shared.registry.change_state(&url, terminal) {
        panic!("result for untracked url: {missing}");
    }
    tracing::debug!(url = %url, state = %terminal, "url finished");

    if err.is_none() {
        admit_links(shared, handle, hooks, links);
    }

    if !shared.stop_requested.load(Ordering::Acquire)
        && shared.registry.count(UrlState::Pending) > 0
    {
        assign(shared, &mut workers[worker_id]);
    }
}

/// Runs previously-unknown links through the URL admission hook and records
/// each as pending or rejected.
///
/// The hook runs with no registry lock held, since it is user code and may
/// itself query the engine; the insert re-checks presence, so a URL the
/// handler raced in concurrently stays untouched.
fn admit_links(shared: &Shared, handle: &CrawlerHandle, hooks: &Hooks, links: Vec<String>) {
    for link in links {
        if shared.registry.state(&link) != UrlState::NotFound {
            continue;
        }
        let admitted = (hooks.check_url)(handle, &link);
        let state = if admitted {
            UrlState::Pending
        } else {
            UrlState::Rejected
        };
        if shared.registry.insert(&link, state) {
            tracing::trace!(url = %link, admitted, "link recorded");
        }
    }
}

/// Moves one pending URL to running and launches it on the given worker.
/// Callers check the pending count first; a mismatch between that count and
/// what selection finds means the index is corrupt, which is fatal.
fn assign(shared: &Shared, worker: &mut Worker) {
    let Some(url) = shared.registry.select_pending() else {
        panic!("pending index reported work but selection returned none");
    };
    worker.setup(url);
    worker.process();
}
