//! NIP-42 challenge answering.

use async_trait::async_trait;
use nostr::{Event, create_auth_template, unix_now_secs};

use crate::error::{ClientError, Result};
use crate::identity::Identity;

/// Produce the signed kind-22242 answer to a relay's AUTH challenge.
///
/// Fails with [`ClientError::NoSigner`] without touching any signer when the
/// identity cannot sign. Holds no state, so every challenge is signed fresh.
pub async fn sign_auth_challenge(
    challenge: &str,
    relay_url: &str,
    identity: &Identity,
) -> Result<Event> {
    let signer = identity.signer().ok_or(ClientError::NoSigner)?;
    let template = create_auth_template(challenge, relay_url, unix_now_secs()?);
    signer
        .sign_event(template.into_unsigned(identity.pubkey()))
        .await
}

/// Capability a relay connection uses to answer AUTH challenges.
#[async_trait]
pub trait AuthSigner: Send + Sync {
    async fn authenticate(&self, challenge: &str, relay_url: &str) -> Result<Event>;
}

/// [`AuthSigner`] backed by the active identity.
#[derive(Debug, Clone)]
pub struct IdentityAuthSigner {
    identity: Identity,
}

impl IdentityAuthSigner {
    pub fn new(identity: Identity) -> Self {
        Self { identity }
    }
}

#[async_trait]
impl AuthSigner for IdentityAuthSigner {
    async fn authenticate(&self, challenge: &str, relay_url: &str) -> Result<Event> {
        sign_auth_challenge(challenge, relay_url, &self.identity).await
    }
}
