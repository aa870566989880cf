//! Cursor-based pagination over a kind/author feed.
//!
//! Pages are requested newest first. The cursor for the next page is the
//! `created_at` of the oldest event on the current page minus one second,
//! so pagination always moves strictly backwards. Events sharing that
//! boundary second but not returned on the current page are skipped.
//! An empty page ends the feed, as does a page reaching `created_at == 0`
//! since nothing older can exist. Call [`FeedPaginator::refresh`] to start over.

use std::collections::HashSet;
use std::time::Duration;

use nostr::{Event, FEED_KINDS, sort_events};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::DEFAULT_FEED_PAGE_SIZE;
use crate::error::Result;
use crate::filter::Filter;
use crate::pool::{EventSource, QueryOptions};

pub const GLOBAL_FEED_TIMEOUT: Duration = Duration::from_secs(3);
pub const FOLLOWING_FEED_TIMEOUT: Duration = Duration::from_secs(5);
pub const FEED_STALE_TIME: Duration = Duration::from_secs(30);

/// The fixed part of a feed's filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedQuery {
    pub kinds: Vec<u16>,
    pub authors: Option<Vec<String>>,
    pub limit: u64,
    pub timeout: Duration,
    pub stale_time: Option<Duration>,
}

impl FeedQuery {
    /// Text notes and pictures from everyone on the selected relay.
    pub fn global() -> Self {
        Self {
            kinds: FEED_KINDS.to_vec(),
            authors: None,
            limit: DEFAULT_FEED_PAGE_SIZE,
            timeout: GLOBAL_FEED_TIMEOUT,
            stale_time: Some(FEED_STALE_TIME),
        }
    }

    /// Text notes and pictures from `authors`.
    pub fn following(authors: Vec<String>) -> Self {
        Self {
            authors: Some(authors),
            timeout: FOLLOWING_FEED_TIMEOUT,
            ..Self::global()
        }
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = limit.max(1);
        self
    }

    /// Filter for the page ending at `cursor`. `None` asks for the newest page.
    pub fn filter(&self, cursor: Option<u64>) -> Filter {
        let mut filter = Filter::new().kinds(self.kinds.iter().copied()).limit(self.limit);
        if let Some(authors) = &self.authors {
            filter = filter.authors(authors.iter().cloned());
        }
        if let Some(until) = cursor {
            filter = filter.until(until);
        }
        filter
    }

    fn options(&self, signal: &CancellationToken, use_cache: bool) -> QueryOptions {
        let options = QueryOptions::with_timeout(self.timeout).signal(signal.clone());
        match self.stale_time {
            Some(stale_time) if use_cache => options.stale_time(stale_time),
            _ => options,
        }
    }
}

/// One page of a feed, newest first. `next_cursor` is `None` when no older
/// page can exist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedPage {
    pub events: Vec<Event>,
    pub next_cursor: Option<u64>,
}

impl FeedPage {
    fn from_events(mut events: Vec<Event>) -> Self {
        let mut seen = HashSet::new();
        events.retain(|event| seen.insert(event.id.clone()));
        sort_events(&mut events);
        let next_cursor = events
            .last()
            .and_then(|oldest| oldest.created_at.checked_sub(1));
        Self {
            events,
            next_cursor,
        }
    }

    pub fn has_more(&self) -> bool {
        self.next_cursor.is_some()
    }
}

/// Fetch the page ending at `cursor`.
pub async fn fetch_page(
    source: &dyn EventSource,
    query: &FeedQuery,
    cursor: Option<u64>,
    signal: &CancellationToken,
) -> Result<FeedPage> {
    fetch(source, query, cursor, signal, true).await
}

async fn fetch(
    source: &dyn EventSource,
    query: &FeedQuery,
    cursor: Option<u64>,
    signal: &CancellationToken,
    use_cache: bool,
) -> Result<FeedPage> {
    let events = source
        .query(vec![query.filter(cursor)], query.options(signal, use_cache))
        .await?;
    let page = FeedPage::from_events(events);
    debug!(
        ?cursor,
        count = page.events.len(),
        next_cursor = ?page.next_cursor,
        "fetched feed page"
    );
    Ok(page)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Idle,
    Fetching,
    Exhausted,
}

/// A feed being scrolled: the accumulated events and where to continue.
///
/// `fetch_next` borrows the paginator mutably, so one feed never has two
/// page requests in flight.
#[derive(Debug, Clone)]
pub struct FeedPaginator {
    query: FeedQuery,
    cursor: Option<u64>,
    state: FeedState,
    events: Vec<Event>,
    seen: HashSet<String>,
    pages: usize,
}

impl FeedPaginator {
    pub fn new(query: FeedQuery) -> Self {
        Self {
            query,
            cursor: None,
            state: FeedState::Idle,
            events: Vec::new(),
            seen: HashSet::new(),
            pages: 0,
        }
    }

    pub fn query(&self) -> &FeedQuery {
        &self.query
    }

    pub fn state(&self) -> FeedState {
        self.state
    }

    pub fn has_more(&self) -> bool {
        self.state != FeedState::Exhausted
    }

    pub fn cursor(&self) -> Option<u64> {
        self.cursor
    }

    /// Every event loaded so far, newest first.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Number of non-empty pages loaded.
    pub fn pages(&self) -> usize {
        self.pages
    }

    /// Load the next older page. Once exhausted this returns an empty page
    /// without querying. On error the cursor is left unchanged.
    pub async fn fetch_next(
        &mut self,
        source: &dyn EventSource,
        signal: &CancellationToken,
    ) -> Result<FeedPage> {
        self.advance(source, signal, true).await
    }

    /// Drop everything and load the newest page, bypassing cached results.
    pub async fn refresh(
        &mut self,
        source: &dyn EventSource,
        signal: &CancellationToken,
    ) -> Result<FeedPage> {
        self.cursor = None;
        self.events.clear();
        self.seen.clear();
        self.pages = 0;
        self.state = FeedState::Idle;
        self.advance(source, signal, false).await
    }

    async fn advance(
        &mut self,
        source: &dyn EventSource,
        signal: &CancellationToken,
        use_cache: bool,
    ) -> Result<FeedPage> {
        if self.state == FeedState::Exhausted {
            return Ok(FeedPage::default());
        }

        self.state = FeedState::Fetching;
        let page = match fetch(source, &self.query, self.cursor, signal, use_cache).await {
            Ok(page) => page,
            Err(error) => {
                self.state = FeedState::Idle;
                return Err(error);
            }
        };

        if !page.events.is_empty() {
            self.pages += 1;
            for event in &page.events {
                if self.seen.insert(event.id.clone()) {
                    self.events.push(event.clone());
                }
            }
        }
        match page.next_cursor {
            Some(next_cursor) => {
                self.cursor = Some(next_cursor);
                self.state = FeedState::Idle;
            }
            None => self.state = FeedState::Exhausted,
        }
        Ok(page)
    }
}
