//! Shared URL registry: lifecycle states and the state-indexed URL store.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::CrawlError;

/// Lifecycle state of a URL known to the engine.
///
/// Legal transitions are `Pending → Running` and `Running → Done | Rejected`;
/// newly discovered URLs enter as `Pending` (admitted) or `Rejected`
/// (declined). `Rejected` and `Done` are final: a known URL is never
/// re-admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UrlState {
    /// Query sentinel for URLs the registry has never seen. Never stored.
    NotFound,
    /// Known and admitted, awaiting a worker.
    Pending,
    /// Assigned to a worker; fetch in progress.
    Running,
    /// Known but will not be fetched.
    Rejected,
    /// Fetch and handler completed, successfully or not.
    Done,
}

impl UrlState {
    /// True for states that end a URL's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Done)
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Rejected => "rejected",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for UrlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-state URL totals at a moment in time.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CrawlStats {
    /// URLs admitted and waiting for a worker.
    pub pending: usize,
    /// URLs currently being fetched.
    pub running: usize,
    /// URLs recorded but never fetched.
    pub rejected: usize,
    /// URLs fully processed.
    pub done: usize,
}

/// Thread-safe store mapping each known URL to its state, with a reverse
/// index from state to the set of URLs currently in it.
///
/// A single readers-writer lock guards both structures so that every
/// operation observes them mutually consistent: a URL always sits in exactly
/// the one index set matching its recorded state.
pub(crate) struct UrlRegistry {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    states: HashMap<String, UrlState>,
    pending: HashSet<String>,
    running: HashSet<String>,
    rejected: HashSet<String>,
    done: HashSet<String>,
}

impl Inner {
    fn bucket(&self, state: UrlState) -> &HashSet<String> {
        match state {
            UrlState::Pending => &self.pending,
            UrlState::Running => &self.running,
            UrlState::Rejected => &self.rejected,
            UrlState::Done => &self.done,
            UrlState::NotFound => panic!("NotFound is a query sentinel and is never indexed"),
        }
    }

    fn bucket_mut(&mut self, state: UrlState) -> &mut HashSet<String> {
        match state {
            UrlState::Pending => &mut self.pending,
            UrlState::Running => &mut self.running,
            UrlState::Rejected => &mut self.rejected,
            UrlState::Done => &mut self.done,
            UrlState::NotFound => panic!("NotFound is a query sentinel and is never indexed"),
        }
    }

    fn insert(&mut self, url: &str, state: UrlState) -> bool {
        if self.states.contains_key(url) {
            return false;
        }
        self.states.insert(url.to_string(), state);
        self.bucket_mut(state).insert(url.to_string());
        true
    }
}

impl UrlRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner
            .read()
            .unwrap_or_else(|_| panic!("url registry lock poisoned"))
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner
            .write()
            .unwrap_or_else(|_| panic!("url registry lock poisoned"))
    }

    /// Registers each URL as `Pending`; URLs already known are left alone.
    pub fn add<I, S>(&self, urls: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut inner = self.write();
        for url in urls {
            inner.insert(url.as_ref(), UrlState::Pending);
        }
    }

    /// Registers a single URL in the given state. Returns false (and changes
    /// nothing) if the URL is already known.
    pub fn insert(&self, url: &str, state: UrlState) -> bool {
        self.write().insert(url, state)
    }

    /// Moves a known URL to a new state, keeping the index in step.
    pub fn change_state(&self, url: &str, to: UrlState) -> Result<(), CrawlError> {
        let mut inner = self.write();
        let from = match inner.states.get(url) {
            Some(state) => *state,
            None => return Err(CrawlError::UnknownUrl(url.to_string())),
        };
        inner.states.insert(url.to_string(), to);
        inner.bucket_mut(from).remove(url);
        inner.bucket_mut(to).insert(url.to_string());
        Ok(())
    }

    /// Current state of a URL, or `NotFound` if it was never registered.
    pub fn state(&self, url: &str) -> UrlState {
        self.read()
            .states
            .get(url)
            .copied()
            .unwrap_or(UrlState::NotFound)
    }

    /// Number of URLs currently in `state`.
    pub fn count(&self, state: UrlState) -> usize {
        if matches!(state, UrlState::NotFound) {
            return 0;
        }
        self.read().bucket(state).len()
    }

    /// Pending and running totals observed under one lock acquisition.
    pub fn frontier_counts(&self) -> (usize, usize) {
        let inner = self.read();
        (inner.pending.len(), inner.running.len())
    }

    /// Snapshot of all per-state totals.
    pub fn stats(&self) -> CrawlStats {
        let inner = self.read();
        CrawlStats {
            pending: inner.pending.len(),
            running: inner.running.len(),
            rejected: inner.rejected.len(),
            done: inner.done.len(),
        }
    }

    /// Picks one pending URL, marks it `Running`, and returns it, all in a
    /// single critical section so two callers can never claim the same URL.
    /// Selection order is unspecified.
    pub fn select_pending(&self) -> Option<String> {
        let mut inner = self.write();
        let url = inner.pending.iter().next().cloned()?;
        inner.pending.remove(&url);
        inner.running.insert(url.clone());
        inner.states.insert(url.clone(), UrlState::Running);
        Some(url)
    }
}
