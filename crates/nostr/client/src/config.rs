//! Environment-driven client configuration.

use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::pool::PoolConfig;
use crate::relay::{RelayConfig, normalize_relay_url};
use crate::router::{DEFAULT_PUBLISH_FANOUT_CAP, PresetRelay, RelaySettings};

pub const DEFAULT_RELAY_URL: &str = "wss://relay.damus.io";
pub const DEFAULT_FEED_PAGE_SIZE: u64 = 20;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

const DEFAULT_PRESET_RELAYS: [(&str, &str); 4] = [
    ("Damus", "wss://relay.damus.io"),
    ("Nos", "wss://nos.lol"),
    ("Primal", "wss://relay.primal.net"),
    ("Ditto", "wss://ditto.pub/relay"),
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid NOSTR_RELAY_URL: {0}")]
    InvalidRelayUrl(String),
    #[error("invalid NOSTR_PRESET_RELAYS: {0}")]
    InvalidPresetRelays(String),
    #[error("invalid NOSTR_PUBLISH_FANOUT_CAP: {0}")]
    InvalidPublishFanoutCap(String),
    #[error("invalid NOSTR_CONNECT_TIMEOUT_MS: {0}")]
    InvalidConnectTimeout(String),
    #[error("invalid NOSTR_FEED_PAGE_SIZE: {0}")]
    InvalidFeedPageSize(String),
}

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub relay_url: String,
    pub preset_relays: Vec<PresetRelay>,
    pub publish_fanout_cap: usize,
    pub connect_timeout: Duration,
    pub feed_page_size: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            preset_relays: default_preset_relays(),
            publish_fanout_cap: DEFAULT_PUBLISH_FANOUT_CAP,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            feed_page_size: DEFAULT_FEED_PAGE_SIZE,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let relay_url = match non_empty(&lookup, "NOSTR_RELAY_URL") {
            Some(raw) => normalize_relay_url(&raw)
                .map_err(|error| ConfigError::InvalidRelayUrl(error.to_string()))?,
            None => DEFAULT_RELAY_URL.to_string(),
        };
        let preset_relays = match non_empty(&lookup, "NOSTR_PRESET_RELAYS") {
            Some(raw) => parse_preset_relays(&raw)?,
            None => default_preset_relays(),
        };
        let publish_fanout_cap = match non_empty(&lookup, "NOSTR_PUBLISH_FANOUT_CAP") {
            Some(raw) => match raw.parse::<usize>() {
                Ok(0) => {
                    return Err(ConfigError::InvalidPublishFanoutCap(
                        "must be at least 1".to_string(),
                    ));
                }
                Ok(cap) => cap,
                Err(error) => return Err(ConfigError::InvalidPublishFanoutCap(error.to_string())),
            },
            None => DEFAULT_PUBLISH_FANOUT_CAP,
        };
        let connect_timeout_ms = match non_empty(&lookup, "NOSTR_CONNECT_TIMEOUT_MS") {
            Some(raw) => raw
                .parse::<u64>()
                .map_err(|error| ConfigError::InvalidConnectTimeout(error.to_string()))?,
            None => DEFAULT_CONNECT_TIMEOUT_MS,
        };
        let feed_page_size = match non_empty(&lookup, "NOSTR_FEED_PAGE_SIZE") {
            Some(raw) => raw
                .parse::<u64>()
                .map_err(|error| ConfigError::InvalidFeedPageSize(error.to_string()))?
                .clamp(1, 500),
            None => DEFAULT_FEED_PAGE_SIZE,
        };

        Ok(Self {
            relay_url,
            preset_relays,
            publish_fanout_cap,
            connect_timeout: Duration::from_millis(connect_timeout_ms),
            feed_page_size,
        })
    }

    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings::new(self.relay_url.clone(), self.preset_relays.clone())
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            relay_config: RelayConfig {
                connect_timeout: self.connect_timeout,
                ..RelayConfig::default()
            },
        }
    }
}

pub fn default_preset_relays() -> Vec<PresetRelay> {
    DEFAULT_PRESET_RELAYS
        .iter()
        .map(|(name, url)| PresetRelay::new(*name, *url))
        .collect()
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Comma separated entries, each either `url` or `name=url`.
fn parse_preset_relays(raw: &str) -> Result<Vec<PresetRelay>, ConfigError> {
    let mut presets = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
        let (name, url) = match entry.split_once('=') {
            Some((name, url)) => (name.trim().to_string(), url.trim()),
            None => (String::new(), entry),
        };
        let url = normalize_relay_url(url)
            .map_err(|error| ConfigError::InvalidPresetRelays(format!("{entry}: {error}")))?;
        let name = if name.is_empty() { url.clone() } else { name };
        presets.push(PresetRelay::new(name, url));
    }
    Ok(presets)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from<'a>(values: &'a HashMap<&str, &str>) -> impl Fn(&str) -> Option<String> + 'a {
        move |key: &str| values.get(key).map(ToString::to_string)
    }

    #[test]
    fn defaults_apply_without_env() {
        let values = HashMap::new();
        let config = ClientConfig::from_lookup(lookup_from(&values)).expect("config parse");
        assert_eq!(config.relay_url, DEFAULT_RELAY_URL);
        assert_eq!(config.publish_fanout_cap, 5);
        assert_eq!(config.feed_page_size, 20);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.preset_relays.len(), DEFAULT_PRESET_RELAYS.len());
    }

    #[test]
    fn env_overrides_are_parsed() {
        let values = HashMap::from([
            ("NOSTR_RELAY_URL", "wss://relay.example/"),
            (
                "NOSTR_PRESET_RELAYS",
                "Main=wss://one.example, wss://two.example/relay",
            ),
            ("NOSTR_PUBLISH_FANOUT_CAP", "3"),
            ("NOSTR_CONNECT_TIMEOUT_MS", "2500"),
            ("NOSTR_FEED_PAGE_SIZE", "50"),
        ]);
        let config = ClientConfig::from_lookup(lookup_from(&values)).expect("config parse");
        assert_eq!(config.relay_url, "wss://relay.example");
        assert_eq!(
            config.preset_relays,
            vec![
                PresetRelay::new("Main", "wss://one.example"),
                PresetRelay::new("wss://two.example/relay", "wss://two.example/relay"),
            ]
        );
        assert_eq!(config.publish_fanout_cap, 3);
        assert_eq!(config.connect_timeout, Duration::from_millis(2500));
        assert_eq!(config.feed_page_size, 50);
        assert_eq!(
            config.pool_config().relay_config.connect_timeout,
            Duration::from_millis(2500)
        );
    }

    #[test]
    fn invalid_values_name_the_variable() {
        let cases = [
            ("NOSTR_RELAY_URL", "https://relay.example", "NOSTR_RELAY_URL"),
            ("NOSTR_PRESET_RELAYS", "a=ftp://x", "NOSTR_PRESET_RELAYS"),
            ("NOSTR_PUBLISH_FANOUT_CAP", "0", "NOSTR_PUBLISH_FANOUT_CAP"),
            ("NOSTR_CONNECT_TIMEOUT_MS", "soon", "NOSTR_CONNECT_TIMEOUT_MS"),
            ("NOSTR_FEED_PAGE_SIZE", "-1", "NOSTR_FEED_PAGE_SIZE"),
        ];
        for (key, value, fragment) in cases {
            let values = HashMap::from([(key, value)]);
            let error = ClientConfig::from_lookup(lookup_from(&values))
                .expect_err("invalid value should fail");
            assert!(
                error.to_string().contains(fragment),
                "{key}: '{error}' should mention {fragment}"
            );
        }
    }
}
