//! Nostr relay client for feed-style apps.
//!
//! This crate exposes:
//! - one-shot REQ queries and EVENT publishes over WebSocket, with NIP-42 auth
//! - an identity-bound relay pool with pluggable query/publish routing
//! - cursor pagination for note/picture feeds and follow-list resolution

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod feed;
pub mod filter;
pub mod following;
pub mod identity;
pub mod pool;
pub mod queries;
pub mod relay;
pub mod router;
pub mod session;
pub mod signal;
pub mod subscription;

#[cfg(test)]
mod fixture;

pub use auth::{AuthSigner, IdentityAuthSigner, sign_auth_challenge};
pub use cache::QueryCache;
pub use config::{ClientConfig, ConfigError};
pub use error::{ClientError, Result};
pub use feed::{FeedPage, FeedPaginator, FeedQuery, FeedState, fetch_page};
pub use filter::Filter;
pub use following::{FollowingResolver, FollowingState, resolve_following};
pub use identity::{Identity, SecretKeySigner, Signer};
pub use pool::{EventSource, PoolConfig, PublishReport, QueryOptions, RelayPool};
pub use queries::{
    Profile, compose_note, fetch_author_events, fetch_event, fetch_profile, publish_note,
};
pub use relay::{
    AuthStatus, ConnectionState, PublishConfirmation, RelayConfig, RelayConnection, RelayMessage,
    normalize_relay_url,
};
pub use router::{
    PresetRelay, PublishRouter, QueryRouter, RelaySettings, SelectedRelayPublishRouter,
    SelectedRelayQueryRouter, SharedRelaySettings,
};
pub use session::NostrSession;
pub use signal::RequestSignal;
pub use tokio_util::sync::CancellationToken;
