//! Target relay selection for queries and publishes.

use std::sync::{Arc, PoisonError, RwLock};

use nostr::Event;
use tracing::warn;

use crate::filter::Filter;
use crate::relay::normalize_relay_url;

/// Maximum number of relays a single publish is sent to.
pub const DEFAULT_PUBLISH_FANOUT_CAP: usize = 5;

/// A named relay the user can pick from or fan publishes out to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresetRelay {
    pub name: String,
    pub url: String,
}

impl PresetRelay {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// The externally supplied relay selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySettings {
    pub relay_url: String,
    pub preset_relays: Vec<PresetRelay>,
}

impl RelaySettings {
    pub fn new(relay_url: impl Into<String>, preset_relays: Vec<PresetRelay>) -> Self {
        Self {
            relay_url: relay_url.into(),
            preset_relays,
        }
    }
}

/// Relay settings readable by routers while the session updates them.
pub type SharedRelaySettings = Arc<RwLock<RelaySettings>>;

pub fn shared_settings(settings: RelaySettings) -> SharedRelaySettings {
    Arc::new(RwLock::new(settings))
}

fn snapshot(settings: &SharedRelaySettings) -> RelaySettings {
    settings
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Decides which relays receive a query and with which filters.
pub trait QueryRouter: Send + Sync {
    fn route(&self, filters: &[Filter]) -> Vec<(String, Vec<Filter>)>;
}

/// Decides which relays receive a published event. The first entry is the
/// primary target.
pub trait PublishRouter: Send + Sync {
    fn route(&self, event: &Event) -> Vec<String>;
}

/// Sends every query, unchanged, to the selected relay.
#[derive(Debug, Clone)]
pub struct SelectedRelayQueryRouter {
    settings: SharedRelaySettings,
}

impl SelectedRelayQueryRouter {
    pub fn new(settings: SharedRelaySettings) -> Self {
        Self { settings }
    }
}

impl QueryRouter for SelectedRelayQueryRouter {
    fn route(&self, filters: &[Filter]) -> Vec<(String, Vec<Filter>)> {
        let settings = snapshot(&self.settings);
        vec![(settings.relay_url, filters.to_vec())]
    }
}

/// Selected relay first, then presets in order, capped. URLs are compared
/// in normalized form so two spellings of one relay count once; URLs that do
/// not parse are skipped.
#[derive(Debug, Clone)]
pub struct SelectedRelayPublishRouter {
    settings: SharedRelaySettings,
    cap: usize,
}

impl SelectedRelayPublishRouter {
    pub fn new(settings: SharedRelaySettings) -> Self {
        Self::with_cap(settings, DEFAULT_PUBLISH_FANOUT_CAP)
    }

    pub fn with_cap(settings: SharedRelaySettings, cap: usize) -> Self {
        Self {
            settings,
            cap: cap.max(1),
        }
    }
}

impl PublishRouter for SelectedRelayPublishRouter {
    fn route(&self, _event: &Event) -> Vec<String> {
        let settings = snapshot(&self.settings);
        let mut targets: Vec<String> = Vec::with_capacity(self.cap);
        let candidates = std::iter::once(settings.relay_url)
            .chain(settings.preset_relays.into_iter().map(|preset| preset.url));

        for url in candidates {
            if targets.len() == self.cap {
                break;
            }
            if url.is_empty() {
                continue;
            }
            let url = match normalize_relay_url(&url) {
                Ok(url) => url,
                Err(error) => {
                    warn!(relay = %url, "skipping publish target: {}", error);
                    continue;
                }
            };
            if !targets.contains(&url) {
                targets.push(url);
            }
        }
        targets
    }
}
