//! In-memory event source for unit tests.

use std::sync::Mutex;

use async_trait::async_trait;
use nostr::Event;

use crate::error::{ClientError, Result};
use crate::filter::Filter;
use crate::pool::{EventSource, QueryOptions};

pub(crate) fn event(id: &str, pubkey: &str, kind: u16, created_at: u64) -> Event {
    Event {
        id: id.to_string(),
        pubkey: pubkey.to_string(),
        created_at,
        kind,
        tags: vec![],
        content: format!("content of {id}"),
        sig: "sig".to_string(),
    }
}

/// Answers like a relay would: matching events, newest first, capped at
/// `limit`, but handed back oldest first so callers must sort.
#[derive(Default)]
pub(crate) struct StaticSource {
    events: Vec<Event>,
    failure: Option<String>,
    ignore_limit: bool,
    pub(crate) requests: Mutex<Vec<Vec<Filter>>>,
}

impl StaticSource {
    pub(crate) fn new(events: Vec<Event>) -> Self {
        Self {
            events,
            ..Self::default()
        }
    }

    /// A relay that returns every match regardless of `limit`.
    pub(crate) fn ignoring_limit(events: Vec<Event>) -> Self {
        Self {
            events,
            ignore_limit: true,
            ..Self::default()
        }
    }

    pub(crate) fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub(crate) fn requests(&self) -> Vec<Vec<Filter>> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EventSource for StaticSource {
    async fn query(&self, filters: Vec<Filter>, _options: QueryOptions) -> Result<Vec<Event>> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(filters.clone());
        }
        if let Some(message) = &self.failure {
            return Err(ClientError::Connection(message.clone()));
        }

        let mut out = Vec::new();
        for filter in &filters {
            let mut matched: Vec<Event> = self
                .events
                .iter()
                .filter(|event| filter.matches(event))
                .cloned()
                .collect();
            nostr::sort_events(&mut matched);
            if let Some(limit) = filter.limit.filter(|_| !self.ignore_limit) {
                matched.truncate(limit as usize);
            }
            matched.reverse();
            out.extend(matched);
        }
        Ok(out)
    }
}
