//! Single-shot reads and the note publish path.

use std::collections::HashSet;
use std::time::Duration;

use nostr::{
    Event, EventTemplate, KIND_METADATA, KIND_TEXT_NOTE, Metadata, sort_events, unix_now_secs,
    verify_event,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ClientError, Result};
use crate::filter::Filter;
use crate::identity::Identity;
use crate::pool::{EventSource, PublishReport, QueryOptions, RelayPool};

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(3);
pub const EVENT_STALE_TIME: Duration = Duration::from_secs(60);
pub const AUTHOR_EVENTS_LIMIT: u64 = 50;
pub const PROFILE_TIMEOUT: Duration = Duration::from_millis(1500);
pub const PROFILE_STALE_TIME: Duration = Duration::from_secs(300);

/// An author's newest kind-0 event and its parsed content.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub event: Event,
    pub metadata: Metadata,
}

/// Look up one event by id.
pub async fn fetch_event(
    source: &dyn EventSource,
    id: &str,
    signal: &CancellationToken,
) -> Result<Option<Event>> {
    let filter = Filter::new().ids([id]).limit(1);
    let options = QueryOptions::with_timeout(EVENT_TIMEOUT)
        .signal(signal.clone())
        .stale_time(EVENT_STALE_TIME);
    let events = source.query(vec![filter], options).await?;
    Ok(events.into_iter().find(|event| event.id == id))
}

/// Recent events by `pubkey`, newest first.
pub async fn fetch_author_events(
    source: &dyn EventSource,
    pubkey: &str,
    kinds: &[u16],
    signal: &CancellationToken,
) -> Result<Vec<Event>> {
    if pubkey.is_empty() {
        return Ok(Vec::new());
    }

    let filter = Filter::new()
        .authors([pubkey])
        .kinds(kinds.iter().copied())
        .limit(AUTHOR_EVENTS_LIMIT);
    let options = QueryOptions::with_timeout(EVENT_TIMEOUT)
        .signal(signal.clone())
        .stale_time(EVENT_STALE_TIME);

    let mut events = source.query(vec![filter], options).await?;
    let mut seen = HashSet::new();
    events.retain(|event| seen.insert(event.id.clone()));
    sort_events(&mut events);
    Ok(events)
}

/// The newest profile metadata published by `pubkey`, if any.
pub async fn fetch_profile(
    source: &dyn EventSource,
    pubkey: &str,
    signal: &CancellationToken,
) -> Result<Option<Profile>> {
    if pubkey.is_empty() {
        return Ok(None);
    }

    let filter = Filter::new().kinds([KIND_METADATA]).authors([pubkey]).limit(1);
    let options = QueryOptions::with_timeout(PROFILE_TIMEOUT)
        .signal(signal.clone())
        .stale_time(PROFILE_STALE_TIME);
    let events = source.query(vec![filter], options).await?;

    let newest = events
        .into_iter()
        .filter(|event| event.kind == KIND_METADATA && event.pubkey == pubkey)
        .max_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
    Ok(newest.map(|event| Profile {
        metadata: Metadata::from_content(&event.content),
        event,
    }))
}

/// Sign a kind-1 note as `identity`.
pub async fn compose_note(identity: Option<&Identity>, content: &str) -> Result<Event> {
    let content = content.trim();
    if content.is_empty() {
        return Err(ClientError::InvalidRequest(
            "note content is empty".to_string(),
        ));
    }
    let identity = identity.ok_or(ClientError::NoSigner)?;
    let signer = identity.signer().ok_or(ClientError::NoSigner)?;

    let template = EventTemplate {
        created_at: unix_now_secs()?,
        kind: KIND_TEXT_NOTE,
        tags: Vec::new(),
        content: content.to_string(),
    };
    let event = signer
        .sign_event(template.into_unsigned(identity.pubkey()))
        .await?;
    if !verify_event(&event)? {
        return Err(ClientError::Signing(
            "signer returned an invalid event".to_string(),
        ));
    }
    Ok(event)
}

/// Sign and publish a kind-1 note through `pool`.
pub async fn publish_note(
    pool: &RelayPool,
    identity: Option<&Identity>,
    content: &str,
    timeout: Duration,
) -> Result<PublishReport> {
    let event = compose_note(identity, content).await?;
    debug!(event_id = %event.id, "publishing note");
    pool.publish(&event, timeout).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::fixture::{StaticSource, event};
    use crate::identity::SecretKeySigner;

    #[tokio::test]
    async fn fetch_event_by_id() -> Result<()> {
        let source = StaticSource::new(vec![event("a", "alice", 1, 1), event("b", "bob", 20, 2)]);
        let signal = CancellationToken::new();

        let found = fetch_event(&source, "b", &signal).await?;
        assert_eq!(found.map(|event| event.pubkey), Some("bob".to_string()));
        assert_eq!(fetch_event(&source, "missing", &signal).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn author_events_are_sorted_and_scoped() -> Result<()> {
        let source = StaticSource::new(vec![
            event("a1", "alice", 1, 10),
            event("a2", "alice", 20, 30),
            event("a3", "alice", 7, 40),
            event("b1", "bob", 1, 20),
        ]);
        let signal = CancellationToken::new();

        let events = fetch_author_events(&source, "alice", &[1, 20], &signal).await?;
        let ids: Vec<&str> = events.iter().map(|event| event.id.as_str()).collect();
        assert_eq!(ids, vec!["a2", "a1"]);
        assert_eq!(source.requests()[0][0].limit, Some(AUTHOR_EVENTS_LIMIT));

        assert!(fetch_author_events(&source, "", &[1], &signal).await?.is_empty());
        assert_eq!(source.requests().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn profile_is_newest_metadata_event() -> Result<()> {
        let mut old = event("p1", "alice", 0, 10);
        old.content = r#"{"name":"old alice"}"#.to_string();
        let mut new = event("p2", "alice", 0, 20);
        new.content = r#"{"name":"alice","about":"gm"}"#.to_string();
        let source = StaticSource::ignoring_limit(vec![
            new,
            old,
            event("n1", "alice", 1, 30),
            event("p3", "bob", 0, 40),
        ]);
        let signal = CancellationToken::new();

        let profile = fetch_profile(&source, "alice", &signal)
            .await?
            .expect("alice has a profile");
        assert_eq!(profile.event.id, "p2");
        assert_eq!(profile.metadata.name(), Some("alice"));
        assert_eq!(profile.metadata.about(), Some("gm"));

        let request = &source.requests()[0][0];
        assert_eq!(request.kinds, Some(vec![KIND_METADATA]));
        assert_eq!(request.authors, Some(vec!["alice".to_string()]));
        assert_eq!(request.limit, Some(1));
        Ok(())
    }

    #[tokio::test]
    async fn missing_profile_is_none() -> Result<()> {
        let source = StaticSource::new(vec![event("n1", "alice", 1, 30)]);
        let signal = CancellationToken::new();
        assert_eq!(fetch_profile(&source, "alice", &signal).await?, None);
        assert_eq!(fetch_profile(&source, "", &signal).await?, None);
        assert_eq!(source.requests().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn compose_note_trims_and_signs() -> Result<()> {
        let identity = Identity::with_signer(Arc::new(SecretKeySigner::generate()?));
        let note = compose_note(Some(&identity), "  gm nostr \n").await?;
        assert_eq!(note.content, "gm nostr");
        assert_eq!(note.kind, KIND_TEXT_NOTE);
        assert_eq!(note.pubkey, identity.pubkey());
        assert!(verify_event(&note)?);
        Ok(())
    }

    #[tokio::test]
    async fn compose_note_rejects_blank_or_unsigned() {
        let read_only = Identity::read_only("ab".repeat(32));
        assert!(matches!(
            compose_note(Some(&read_only), "   ").await,
            Err(ClientError::InvalidRequest(_))
        ));
        assert!(matches!(
            compose_note(Some(&read_only), "hello").await,
            Err(ClientError::NoSigner)
        ));
        assert!(matches!(
            compose_note(None, "hello").await,
            Err(ClientError::NoSigner)
        ));
    }
}
