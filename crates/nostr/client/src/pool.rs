//! Lazily opened, identity-bound relay pool.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use nostr::Event;
use tokio::sync::{Mutex, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::{AuthSigner, IdentityAuthSigner};
use crate::error::{ClientError, Result};
use crate::filter::Filter;
use crate::identity::Identity;
use crate::relay::{RelayConfig, RelayConnection, normalize_relay_url};
use crate::router::{PublishRouter, QueryRouter};
use crate::signal::RequestSignal;

/// Relay pool configuration.
#[derive(Debug, Clone, Default)]
pub struct PoolConfig {
    /// Relay configuration template.
    pub relay_config: RelayConfig,
}

/// Per-call query settings.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Caller cancellation; the timeout applies on top of it.
    pub signal: CancellationToken,
    pub timeout: Duration,
    /// How long a cached result may be served. `None` bypasses caching.
    pub stale_time: Option<Duration>,
}

impl QueryOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            signal: CancellationToken::new(),
            timeout,
            stale_time: None,
        }
    }

    pub fn signal(mut self, signal: CancellationToken) -> Self {
        self.signal = signal;
        self
    }

    pub fn stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = Some(stale_time);
        self
    }
}

/// Outcome of a fan-out publish. The primary relay is always in `accepted`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub event_id: String,
    pub accepted: Vec<String>,
    /// Secondary relays that did not take the event, with the reason.
    pub failed: Vec<(String, String)>,
}

/// Anything that can answer a filter query.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn query(&self, filters: Vec<Filter>, options: QueryOptions) -> Result<Vec<Event>>;
}

type RelaySlot = Arc<OnceCell<Arc<RelayConnection>>>;

/// Multi-relay pool bound to one identity.
///
/// Connections open on first use. Concurrent requests for a URL that is
/// not yet open share a single connection attempt.
pub struct RelayPool {
    config: PoolConfig,
    pubkey: Option<String>,
    auth_signer: Option<Arc<dyn AuthSigner>>,
    query_router: Arc<dyn QueryRouter>,
    publish_router: Arc<dyn PublishRouter>,
    relays: Mutex<HashMap<String, RelaySlot>>,
    closed: AtomicBool,
}

impl RelayPool {
    /// Create new relay pool. Connections answer AUTH only when `identity` can sign.
    pub fn new(
        config: PoolConfig,
        identity: Option<Identity>,
        query_router: Arc<dyn QueryRouter>,
        publish_router: Arc<dyn PublishRouter>,
    ) -> Self {
        let pubkey = identity.as_ref().map(|identity| identity.pubkey().to_string());
        let auth_signer = identity
            .filter(Identity::can_sign)
            .map(|identity| Arc::new(IdentityAuthSigner::new(identity)) as Arc<dyn AuthSigner>);
        Self {
            config,
            pubkey,
            auth_signer,
            query_router,
            publish_router,
            relays: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Pubkey of the identity this pool authenticates as, if any.
    pub fn pubkey(&self) -> Option<&str> {
        self.pubkey.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Get an open relay by URL without opening one.
    pub async fn relay(&self, url: &str) -> Option<Arc<RelayConnection>> {
        let url = normalize_relay_url(url).ok()?;
        self.relays
            .lock()
            .await
            .get(&url)
            .and_then(|slot| slot.get().cloned())
    }

    /// URLs with a live connection, sorted.
    pub async fn live_relays(&self) -> Vec<String> {
        let relays = self.relays.lock().await;
        let mut live = Vec::new();
        for (url, slot) in relays.iter() {
            if let Some(relay) = slot.get()
                && relay.is_alive().await
            {
                live.push(url.clone());
            }
        }
        live.sort();
        live
    }

    /// Connection for `url`, opening it if needed.
    pub async fn relay_for(&self, url: &str) -> Result<Arc<RelayConnection>> {
        if self.is_closed() {
            return Err(ClientError::Connection("relay pool is closed".to_string()));
        }
        let url = normalize_relay_url(url)?;

        let slot = {
            let mut relays = self.relays.lock().await;
            let dead = match relays.get(&url).and_then(|slot| slot.get()) {
                Some(relay) => !relay.is_alive().await,
                None => false,
            };
            if dead {
                debug!(relay = %url, "evicting dead connection");
                relays.remove(&url);
            }
            Arc::clone(relays.entry(url.clone()).or_default())
        };

        let relay = slot.get_or_try_init(|| self.open(&url)).await?;
        Ok(Arc::clone(relay))
    }

    async fn open(&self, url: &str) -> Result<Arc<RelayConnection>> {
        debug!(
            relay = url,
            can_authenticate = self.auth_signer.is_some(),
            "opening relay connection"
        );
        let relay = RelayConnection::open(
            url,
            self.config.relay_config.clone(),
            self.auth_signer.clone(),
        )
        .await?;

        if self.is_closed() {
            let _ = relay.close().await;
            return Err(ClientError::Connection("relay pool is closed".to_string()));
        }
        Ok(Arc::new(relay))
    }

    async fn evict(&self, url: &str) {
        if let Ok(url) = normalize_relay_url(url) {
            self.relays.lock().await.remove(&url);
        }
    }

    /// Query every routed relay concurrently and return the union of events.
    ///
    /// Results are neither sorted nor de-duplicated. With several targets
    /// the call fails only when all of them fail.
    pub async fn query(&self, filters: Vec<Filter>, options: QueryOptions) -> Result<Vec<Event>> {
        if filters.is_empty() || filters.iter().any(Filter::is_match_all) {
            return Err(ClientError::InvalidRequest(
                "query needs ids, authors or kinds in every filter".to_string(),
            ));
        }
        let routes = self.query_router.route(&filters);
        if routes.is_empty() {
            return Err(ClientError::InvalidRequest(
                "no relay selected for query".to_string(),
            ));
        }

        let signal = RequestSignal::new(options.signal, options.timeout);
        let attempts = routes.into_iter().map(|(url, filters)| {
            let signal = &signal;
            async move {
                let result = self.query_relay(&url, &filters, signal).await;
                (url, result)
            }
        });

        let mut events = Vec::new();
        let mut succeeded = false;
        let mut last_error = None;
        for (url, result) in join_all(attempts).await {
            match result {
                Ok(batch) => {
                    succeeded = true;
                    events.extend(batch);
                }
                Err(error) => {
                    debug!(relay = %url, "query failed: {}", error);
                    last_error = Some(error);
                }
            }
        }

        match last_error {
            Some(error) if !succeeded => Err(error),
            _ => Ok(events),
        }
    }

    async fn query_relay(
        &self,
        url: &str,
        filters: &[Filter],
        signal: &RequestSignal,
    ) -> Result<Vec<Event>> {
        let relay = tokio::select! {
            error = signal.aborted() => return Err(error),
            relay = self.relay_for(url) => relay?,
        };
        let result = relay.query(filters, signal).await;
        if let Err(error) = &result
            && error.is_transport()
        {
            self.evict(url).await;
        }
        result
    }

    /// Publish to every routed relay. Only a failure on the primary (first)
    /// relay fails the call.
    pub async fn publish(&self, event: &Event, timeout: Duration) -> Result<PublishReport> {
        let targets = self.publish_router.route(event);
        let Some(primary) = targets.first().cloned() else {
            return Err(ClientError::InvalidRequest(
                "no relay selected for publish".to_string(),
            ));
        };

        let signal = RequestSignal::with_timeout(timeout);
        let attempts = targets.iter().map(|url| {
            let signal = &signal;
            async move { (url.clone(), self.publish_to(url, event, signal).await) }
        });

        let mut report = PublishReport {
            event_id: event.id.clone(),
            accepted: Vec::new(),
            failed: Vec::new(),
        };
        for (url, result) in join_all(attempts).await {
            match result {
                Ok(_) => report.accepted.push(url),
                Err(error) if url == primary => return Err(error),
                Err(error) => {
                    warn!(relay = %url, event_id = %event.id, "secondary publish failed: {}", error);
                    report.failed.push((url, error.to_string()));
                }
            }
        }

        info!(
            event_id = %event.id,
            accepted = report.accepted.len(),
            failed = report.failed.len(),
            "published event"
        );
        Ok(report)
    }

    async fn publish_to(&self, url: &str, event: &Event, signal: &RequestSignal) -> Result<()> {
        let relay = tokio::select! {
            error = signal.aborted() => return Err(error),
            relay = self.relay_for(url) => relay?,
        };
        match relay.publish(event, signal).await {
            Ok(_) => Ok(()),
            Err(error) => {
                if error.is_transport() {
                    self.evict(url).await;
                }
                Err(error)
            }
        }
    }

    /// Close every live connection and refuse further requests.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let slots: Vec<RelaySlot> = self
            .relays
            .lock()
            .await
            .drain()
            .map(|(_, slot)| slot)
            .collect();

        for slot in slots {
            if let Some(relay) = slot.get()
                && let Err(error) = relay.close().await
            {
                debug!(relay = relay.url(), "close failed: {}", error);
            }
        }
    }
}

#[async_trait]
impl EventSource for RelayPool {
    async fn query(&self, filters: Vec<Filter>, options: QueryOptions) -> Result<Vec<Event>> {
        RelayPool::query(self, filters, options).await
    }
}
