use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::data::ImageService;
use crate::models::ImageRecord;
use crate::notify::Notification;
use crate::query::{build_query, FilterState, QueryConfig, QueryDescriptor};

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("failed to load images: {0}")]
    Remote(String),
}

/// What to do with a response whose filter session was superseded by a newer
/// reset before it arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StalePolicy {
    /// Merge it anyway. Late responses can overwrite or interleave with newer ones.
    #[default]
    Apply,
    /// Drop responses older than the latest reset.
    Discard,
}

pub trait LoadingIndicator: Send + Sync {
    fn set_loading(&self, loading: bool);
}

#[derive(Debug, Default)]
pub struct LoadingFlag(AtomicBool);

impl LoadingFlag {
    pub fn is_loading(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl LoadingIndicator for LoadingFlag {
    fn set_loading(&self, loading: bool) {
        self.0.store(loading, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedState {
    records: Vec<ImageRecord>,
    page: u32,
    has_more: bool,
}

impl FeedState {
    pub fn records(&self) -> &[ImageRecord] {
        &self.records
    }

    /// Last page successfully merged, 0 before the first fetch.
    pub fn page(&self) -> u32 {
        self.page
    }

    /// Set when the last merged page came back full.
    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug)]
pub struct FetchTicket {
    seq: u64,
    descriptor: QueryDescriptor,
    reset: bool,
}

impl FetchTicket {
    pub fn descriptor(&self) -> &QueryDescriptor {
        &self.descriptor
    }

    pub fn is_reset(&self) -> bool {
        self.reset
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Applied { received: usize, has_more: bool },
    Discarded,
}

pub struct Fetcher {
    service: Arc<dyn ImageService>,
    indicator: Arc<dyn LoadingIndicator>,
    policy: StalePolicy,
    state: FeedState,
    // Last-known-good state, owned by the reset ticket that cleared it.
    stash: Option<(u64, FeedState)>,
    in_flight: usize,
    next_seq: u64,
    session_seq: u64,
}

impl Fetcher {
    pub fn new(
        service: Arc<dyn ImageService>,
        indicator: Arc<dyn LoadingIndicator>,
        policy: StalePolicy,
    ) -> Self {
        Self {
            service,
            indicator,
            policy,
            state: FeedState::default(),
            stash: None,
            in_flight: 0,
            next_seq: 0,
            session_seq: 0,
        }
    }

    pub fn state(&self) -> &FeedState {
        &self.state
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Starts a fetch. A reset clears the visible sequence immediately.
    pub fn begin(&mut self, descriptor: QueryDescriptor, reset: bool) -> FetchTicket {
        self.next_seq += 1;
        let seq = self.next_seq;
        if reset {
            let cleared = mem::take(&mut self.state);
            let good = match self.stash.take() {
                Some((_, earlier)) => earlier,
                None => cleared,
            };
            self.stash = Some((seq, good));
            self.session_seq = seq;
        }
        self.in_flight += 1;
        if self.in_flight == 1 {
            self.indicator.set_loading(true);
        }
        debug!(seq, page = descriptor.page, reset, "fetch started");
        FetchTicket {
            seq,
            descriptor,
            reset,
        }
    }

    /// Merges the response for `ticket` into the feed state.
    pub fn finish(
        &mut self,
        ticket: FetchTicket,
        result: anyhow::Result<Vec<ImageRecord>>,
    ) -> Result<FetchOutcome, FetchError> {
        self.in_flight = self.in_flight.saturating_sub(1);
        if self.in_flight == 0 {
            self.indicator.set_loading(false);
        }
        let stale = ticket.seq < self.session_seq;
        if stale && self.policy == StalePolicy::Discard {
            debug!(seq = ticket.seq, ok = result.is_ok(), "discarding superseded response");
            return Ok(FetchOutcome::Discarded);
        }
        let owns_stash = matches!(&self.stash, Some((owner, _)) if *owner == ticket.seq);

        let records = match result {
            Ok(records) => records,
            Err(err) => {
                warn!(seq = ticket.seq, error = %format!("{err:#}"), "fetch failed");
                if owns_stash {
                    if let Some((_, good)) = self.stash.take() {
                        self.state = good;
                    }
                }
                return Err(FetchError::Remote(format!("{err:#}")));
            }
        };

        if stale {
            warn!(seq = ticket.seq, "applying response from a superseded query");
        }

        let received = records.len();
        let has_more = received == ticket.descriptor.page_size as usize;
        if ticket.reset {
            self.state.records = records;
            if owns_stash {
                self.stash = None;
            }
        } else {
            self.state.records.extend(records);
        }
        self.state.page = ticket.descriptor.page;
        self.state.has_more = has_more;
        debug!(
            seq = ticket.seq,
            received,
            total = self.state.records.len(),
            has_more,
            "fetch merged"
        );
        Ok(FetchOutcome::Applied { received, has_more })
    }

    pub fn fetch(
        &mut self,
        descriptor: &QueryDescriptor,
        reset: bool,
    ) -> Result<&[ImageRecord], FetchError> {
        let ticket = self.begin(descriptor.clone(), reset);
        let result = self.service.query_images(ticket.descriptor());
        self.finish(ticket, result)?;
        Ok(self.state.records())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedOutcome {
    Loaded { received: usize, has_more: bool },
    Discarded,
    Failed { message: String },
}

impl FeedOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, FeedOutcome::Failed { .. })
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            FeedOutcome::Failed { message } => Some(message),
            _ => None,
        }
    }

    pub fn notification(&self) -> Option<Notification> {
        self.message().map(Notification::error)
    }

    fn from_result(result: Result<FetchOutcome, FetchError>) -> Self {
        match result {
            Ok(FetchOutcome::Applied { received, has_more }) => {
                FeedOutcome::Loaded { received, has_more }
            }
            Ok(FetchOutcome::Discarded) => FeedOutcome::Discarded,
            Err(err) => FeedOutcome::Failed {
                message: err.to_string(),
            },
        }
    }
}

/// Feed browsing context: the current filters plus the accumulated results.
pub struct Feed {
    fetcher: Fetcher,
    config: QueryConfig,
    filters: FilterState,
    current: QueryDescriptor,
    // Filters behind the last-known-good records, owned by the pending reset.
    prior: Option<(u64, FilterState, QueryDescriptor)>,
}

impl Feed {
    pub fn new(fetcher: Fetcher, config: QueryConfig) -> Self {
        let filters = FilterState::default();
        let current = build_query(&filters, 1, &config);
        Self {
            fetcher,
            config,
            filters,
            current,
            prior: None,
        }
    }

    pub fn state(&self) -> &FeedState {
        self.fetcher.state()
    }

    pub fn filters(&self) -> &FilterState {
        &self.filters
    }

    pub fn descriptor(&self) -> &QueryDescriptor {
        &self.current
    }

    pub fn fetcher_mut(&mut self) -> &mut Fetcher {
        &mut self.fetcher
    }

    /// Rebuilds the query from `filters` and reloads from page 1.
    pub fn apply_filters(&mut self, filters: FilterState) -> FeedOutcome {
        let ticket = self.begin_filters(filters);
        self.run(ticket)
    }

    pub fn refresh(&mut self) -> FeedOutcome {
        self.apply_filters(self.filters.clone())
    }

    pub fn load_more(&mut self) -> FeedOutcome {
        let ticket = self.begin_load_more();
        self.run(ticket)
    }

    pub fn begin_filters(&mut self, filters: FilterState) -> FetchTicket {
        let descriptor = build_query(&filters, 1, &self.config);
        if !descriptor.same_filter(&self.current) {
            debug!(?descriptor, "filters changed");
        }
        let previous = mem::replace(&mut self.filters, filters);
        let previous_descriptor = mem::replace(&mut self.current, descriptor.clone());
        let ticket = self.fetcher.begin(descriptor, true);
        let (good_filters, good_descriptor) = match self.prior.take() {
            Some((_, filters, descriptor)) => (filters, descriptor),
            None => (previous, previous_descriptor),
        };
        self.prior = Some((ticket.seq, good_filters, good_descriptor));
        ticket
    }

    pub fn begin_load_more(&mut self) -> FetchTicket {
        let descriptor = self.current.with_page(self.fetcher.state().page() + 1);
        self.current = descriptor.clone();
        self.fetcher.begin(descriptor, false)
    }

    pub fn finish(
        &mut self,
        ticket: FetchTicket,
        result: anyhow::Result<Vec<ImageRecord>>,
    ) -> FeedOutcome {
        let seq = ticket.seq;
        let outcome = FeedOutcome::from_result(self.fetcher.finish(ticket, result));
        if matches!(&self.prior, Some((owner, _, _)) if *owner == seq) {
            match outcome {
                FeedOutcome::Failed { .. } => {
                    if let Some((_, filters, descriptor)) = self.prior.take() {
                        debug!(?descriptor, "reset failed, filters restored");
                        self.filters = filters;
                        self.current = descriptor;
                    }
                }
                FeedOutcome::Loaded { .. } => self.prior = None,
                FeedOutcome::Discarded => {}
            }
        }
        outcome
    }

    fn run(&mut self, ticket: FetchTicket) -> FeedOutcome {
        let service = self.fetcher.service.clone();
        let result = service.query_images(ticket.descriptor());
        self.finish(ticket, result)
    }
}
