//! Typed REQ filters.

use serde::{Deserialize, Serialize};

/// Query descriptor sent in a REQ. Absent fields are left off the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u16>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn authors(mut self, authors: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.authors = Some(authors.into_iter().map(Into::into).collect());
        self
    }

    pub fn kinds(mut self, kinds: impl IntoIterator<Item = u16>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    pub fn since(mut self, since: u64) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: u64) -> Self {
        self.until = Some(until);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// True when no ids, authors or kinds constrain the filter. Relays treat
    /// such a filter as "everything", so callers should not send one.
    pub fn is_match_all(&self) -> bool {
        self.ids.is_none() && self.authors.is_none() && self.kinds.is_none()
    }

    /// Local evaluation of the filter against an event.
    pub fn matches(&self, event: &nostr::Event) -> bool {
        fn contains<T: PartialEq>(set: Option<&Vec<T>>, value: &T) -> bool {
            set.is_none_or(|set| set.contains(value))
        }

        contains(self.ids.as_ref(), &event.id)
            && contains(self.authors.as_ref(), &event.pubkey)
            && contains(self.kinds.as_ref(), &event.kind)
            && self.since.is_none_or(|since| event.created_at >= since)
            && self.until.is_none_or(|until| event.created_at <= until)
    }
}
