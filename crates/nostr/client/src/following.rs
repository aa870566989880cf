//! Who the current user follows, from their latest contact list.

use std::time::Duration;

use nostr::{Event, KIND_CONTACT_LIST, followed_pubkeys};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ClientError, Result};
use crate::feed::FeedQuery;
use crate::filter::Filter;
use crate::pool::{EventSource, QueryOptions};

pub const FOLLOWING_TIMEOUT: Duration = Duration::from_secs(5);

/// Followed pubkeys in tag order. No contact list means an empty list;
/// a failed lookup is a `Resolution` error.
pub async fn resolve_following(
    source: &dyn EventSource,
    pubkey: &str,
    signal: &CancellationToken,
) -> Result<Vec<String>> {
    let filter = Filter::new()
        .kinds([KIND_CONTACT_LIST])
        .authors([pubkey])
        .limit(1);
    let options = QueryOptions::with_timeout(FOLLOWING_TIMEOUT).signal(signal.clone());

    let events = source
        .query(vec![filter], options)
        .await
        .map_err(|error| ClientError::Resolution(error.to_string()))?;

    // Relays may ignore the limit; take the newest list.
    let Some(contact_list) = events
        .into_iter()
        .filter(|event| event.pubkey == pubkey)
        .max_by(|a: &Event, b: &Event| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| b.id.cmp(&a.id))
        })
    else {
        debug!(%pubkey, "no contact list found");
        return Ok(Vec::new());
    };

    followed_pubkeys(&contact_list).map_err(|error| ClientError::Resolution(error.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowingState {
    Idle,
    Loading,
    Loaded(Vec<String>),
    Failed(String),
}

/// Following list of the current identity and the feed gated on it.
#[derive(Debug, Clone)]
pub struct FollowingResolver {
    pubkey: Option<String>,
    state: FollowingState,
}

impl FollowingResolver {
    pub fn new(pubkey: Option<String>) -> Self {
        Self {
            pubkey,
            state: FollowingState::Idle,
        }
    }

    pub fn pubkey(&self) -> Option<&str> {
        self.pubkey.as_deref()
    }

    /// Forget the current list when the identity changes.
    pub fn set_pubkey(&mut self, pubkey: Option<String>) {
        if self.pubkey != pubkey {
            self.pubkey = pubkey;
            self.state = FollowingState::Idle;
        }
    }

    pub fn state(&self) -> &FollowingState {
        &self.state
    }

    /// The resolved list, empty unless loaded.
    pub fn following(&self) -> &[String] {
        match &self.state {
            FollowingState::Loaded(list) => list,
            _ => &[],
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.state {
            FollowingState::Failed(message) => Some(message),
            _ => None,
        }
    }

    /// Look the list up again. Without an identity this stays idle.
    pub async fn resolve(
        &mut self,
        source: &dyn EventSource,
        signal: &CancellationToken,
    ) -> &FollowingState {
        let Some(pubkey) = self.pubkey.clone() else {
            self.state = FollowingState::Idle;
            return &self.state;
        };

        self.state = FollowingState::Loading;
        self.state = match resolve_following(source, &pubkey, signal).await {
            Ok(list) => {
                debug!(%pubkey, count = list.len(), "resolved following list");
                FollowingState::Loaded(list)
            }
            Err(error) => {
                warn!(%pubkey, "following list lookup failed: {}", error);
                FollowingState::Failed(error.to_string())
            }
        };
        &self.state
    }

    /// Feed of followed authors, only when there is someone to ask for.
    pub fn feed_query(&self) -> Option<FeedQuery> {
        self.pubkey.as_ref()?;
        let following = self.following();
        if following.is_empty() {
            return None;
        }
        Some(FeedQuery::following(following.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{StaticSource, event};

    fn contact_list(id: &str, created_at: u64, follows: &[&str]) -> Event {
        let mut list = event(id, "me", KIND_CONTACT_LIST, created_at);
        list.tags = follows
            .iter()
            .map(|pubkey| vec!["p".to_string(), (*pubkey).to_string()])
            .collect();
        list
    }

    #[tokio::test]
    async fn resolves_p_tags_and_builds_feed_query() -> Result<()> {
        let mut list = contact_list("c1", 100, &["A", "B"]);
        list.tags.push(vec!["e".to_string(), "ignored".to_string()]);
        let source = StaticSource::new(vec![list]);
        let signal = CancellationToken::new();

        assert_eq!(
            resolve_following(&source, "me", &signal).await?,
            vec!["A".to_string(), "B".to_string()]
        );

        let request = &source.requests()[0][0];
        assert_eq!(request.kinds, Some(vec![3]));
        assert_eq!(request.authors, Some(vec!["me".to_string()]));
        assert_eq!(request.limit, Some(1));

        let mut resolver = FollowingResolver::new(Some("me".to_string()));
        resolver.resolve(&source, &signal).await;
        let query = resolver.feed_query().expect("feed should be enabled");
        assert_eq!(query.authors, Some(vec!["A".to_string(), "B".to_string()]));
        assert_eq!(query.kinds, vec![1, 20]);
        Ok(())
    }

    #[tokio::test]
    async fn newest_contact_list_wins() -> Result<()> {
        let source = StaticSource::ignoring_limit(vec![
            contact_list("new", 200, &["B", "C"]),
            contact_list("old", 100, &["A"]),
        ]);
        let following = resolve_following(&source, "me", &CancellationToken::new()).await?;
        assert_eq!(following, vec!["B".to_string(), "C".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn missing_contact_list_is_empty_and_gates_feed() -> Result<()> {
        let source = StaticSource::new(vec![]);
        let mut resolver = FollowingResolver::new(Some("me".to_string()));
        let state = resolver.resolve(&source, &CancellationToken::new()).await;
        assert_eq!(state, &FollowingState::Loaded(vec![]));
        assert!(resolver.feed_query().is_none());
        assert!(resolver.error().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn lookup_failure_is_distinct_state() {
        let source = StaticSource::failing("timed out");
        let mut resolver = FollowingResolver::new(Some("me".to_string()));
        resolver.resolve(&source, &CancellationToken::new()).await;

        assert!(matches!(resolver.state(), FollowingState::Failed(_)));
        assert!(resolver.error().is_some_and(|message| message.contains("timed out")));
        assert!(resolver.following().is_empty());
        assert!(resolver.feed_query().is_none());
    }

    #[tokio::test]
    async fn no_identity_means_no_query() {
        let source = StaticSource::new(vec![contact_list("c1", 1, &["A"])]);
        let mut resolver = FollowingResolver::new(None);
        resolver.resolve(&source, &CancellationToken::new()).await;
        assert_eq!(resolver.state(), &FollowingState::Idle);
        assert!(source.requests().is_empty());
        assert!(resolver.feed_query().is_none());
    }
}
