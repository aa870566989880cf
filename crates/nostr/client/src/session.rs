//! The active identity, its relay pool and the query cache.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use nostr::Event;
use tracing::{debug, info};

use crate::cache::QueryCache;
use crate::config::ClientConfig;
use crate::error::Result;
use crate::filter::Filter;
use crate::identity::Identity;
use crate::pool::{EventSource, PoolConfig, PublishReport, QueryOptions, RelayPool};
use crate::queries;
use crate::relay::normalize_relay_url;
use crate::router::{
    RelaySettings, SelectedRelayPublishRouter, SelectedRelayQueryRouter, SharedRelaySettings,
    shared_settings,
};

struct SessionState {
    identity: Option<Identity>,
    pool: Arc<RelayPool>,
}

/// Owns the pool for the current identity and rebuilds it when the
/// identity changes, so no connection authenticated as one user is reused
/// for another.
pub struct NostrSession {
    pool_config: PoolConfig,
    publish_fanout_cap: usize,
    settings: SharedRelaySettings,
    state: RwLock<SessionState>,
    cache: QueryCache,
}

/// Identities that produce the same pool. A signer appearing for the same
/// pubkey also counts as a change, since open connections could not answer AUTH.
fn fingerprint(identity: Option<&Identity>) -> Option<(&str, bool)> {
    identity.map(|identity| (identity.pubkey(), identity.can_sign()))
}

impl NostrSession {
    pub fn new(config: &ClientConfig, identity: Option<Identity>) -> Self {
        let settings = shared_settings(config.relay_settings());
        let pool_config = config.pool_config();
        let publish_fanout_cap = config.publish_fanout_cap;
        let pool = build_pool(&pool_config, publish_fanout_cap, &settings, identity.clone());
        Self {
            pool_config,
            publish_fanout_cap,
            settings,
            state: RwLock::new(SessionState { identity, pool }),
            cache: QueryCache::new(),
        }
    }

    /// Current pool handle. Hold it only for the duration of a request.
    pub fn pool(&self) -> Arc<RelayPool> {
        Arc::clone(&self.read_state().pool)
    }

    pub fn identity(&self) -> Option<Identity> {
        self.read_state().identity.clone()
    }

    pub fn relay_settings(&self) -> RelaySettings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// Switch the active identity. The old pool is closed when the identity
    /// differs; cached queries are always dropped.
    pub async fn set_identity(&self, identity: Option<Identity>) {
        let retired = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            let changed = fingerprint(state.identity.as_ref()) != fingerprint(identity.as_ref());
            let retired = if changed {
                let pool = build_pool(
                    &self.pool_config,
                    self.publish_fanout_cap,
                    &self.settings,
                    identity.clone(),
                );
                Some(std::mem::replace(&mut state.pool, pool))
            } else {
                None
            };
            state.identity = identity;
            retired
        };
        self.cache.reset();

        if let Some(pool) = retired {
            info!(
                pubkey = ?self.identity().as_ref().map(Identity::pubkey),
                "identity changed, rebuilding relay pool"
            );
            pool.close().await;
        }
    }

    /// Select a different relay. Existing connections stay open.
    ///
    /// The URL is stored normalized; an invalid URL leaves the selection
    /// and the cache untouched.
    pub fn set_relay_url(&self, relay_url: &str) -> Result<()> {
        let relay_url = normalize_relay_url(relay_url)?;
        debug!(relay = %relay_url, "selected relay changed");
        self.settings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .relay_url = relay_url;
        self.cache.reset();
        Ok(())
    }

    /// Sign and publish a kind-1 note as the current identity.
    pub async fn publish_note(&self, content: &str, timeout: Duration) -> Result<PublishReport> {
        let identity = self.identity();
        queries::publish_note(&self.pool(), identity.as_ref(), content, timeout).await
    }

    pub async fn close(&self) {
        self.pool().close().await;
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, SessionState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }
}

fn build_pool(
    config: &PoolConfig,
    publish_fanout_cap: usize,
    settings: &SharedRelaySettings,
    identity: Option<Identity>,
) -> Arc<RelayPool> {
    Arc::new(RelayPool::new(
        config.clone(),
        identity,
        Arc::new(SelectedRelayQueryRouter::new(Arc::clone(settings))),
        Arc::new(SelectedRelayPublishRouter::with_cap(
            Arc::clone(settings),
            publish_fanout_cap,
        )),
    ))
}

#[async_trait]
impl EventSource for NostrSession {
    /// Serves from the cache when `options.stale_time` is set.
    async fn query(&self, filters: Vec<Filter>, options: QueryOptions) -> Result<Vec<Event>> {
        let Some(stale_time) = options.stale_time else {
            return self.pool().query(filters, options).await;
        };

        let key = QueryCache::key(&filters)?;
        if let Some(events) = self.cache.get(&key, stale_time) {
            debug!(count = events.len(), "query served from cache");
            return Ok(events);
        }

        let generation = self.cache.generation();
        let events = self.pool().query(filters, options).await?;
        self.cache.insert(generation, key, events.clone());
        Ok(events)
    }
}
