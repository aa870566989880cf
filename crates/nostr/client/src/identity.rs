//! The active user as seen by the client: a pubkey and, optionally, a way to sign.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use nostr::{Event, UnsignedEvent};

use crate::error::{ClientError, Result};

/// Signing capability supplied by the login subsystem (local key, browser
/// extension, remote bunker, ...).
#[async_trait]
pub trait Signer: Send + Sync {
    /// Hex pubkey events will be signed as.
    fn public_key(&self) -> String;

    /// Compute id and signature for `event`.
    async fn sign_event(&self, event: UnsignedEvent) -> Result<Event>;
}

/// Signer holding a raw secret key in memory.
#[derive(Clone)]
pub struct SecretKeySigner {
    secret_key: [u8; 32],
    public_key: String,
}

impl SecretKeySigner {
    pub fn from_secret_key(secret_key: [u8; 32]) -> Result<Self> {
        let public_key = nostr::get_public_key_hex(&secret_key)?;
        Ok(Self {
            secret_key,
            public_key,
        })
    }

    /// Accepts either 64 hex characters or an `nsec1...` string.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let secret_key = if input.starts_with("nsec1") {
            nostr::decode_nsec(input)
                .map_err(|error| ClientError::InvalidRequest(error.to_string()))?
        } else {
            let mut bytes = [0u8; 32];
            hex::decode_to_slice(input, &mut bytes).map_err(|error| {
                ClientError::InvalidRequest(format!("invalid secret key hex: {error}"))
            })?;
            bytes
        };
        Self::from_secret_key(secret_key)
    }

    pub fn generate() -> Result<Self> {
        Self::from_secret_key(nostr::generate_secret_key())
    }
}

impl fmt::Debug for SecretKeySigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretKeySigner")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Signer for SecretKeySigner {
    fn public_key(&self) -> String {
        self.public_key.clone()
    }

    async fn sign_event(&self, event: UnsignedEvent) -> Result<Event> {
        Ok(nostr::sign_unsigned_event(event, &self.secret_key)?)
    }
}

/// Current user. A user can be known (for reading) without being able to
/// sign, e.g. while a remote signer handshake is still pending.
#[derive(Clone)]
pub struct Identity {
    pubkey: String,
    signer: Option<Arc<dyn Signer>>,
}

impl Identity {
    pub fn read_only(pubkey: impl Into<String>) -> Self {
        Self {
            pubkey: pubkey.into(),
            signer: None,
        }
    }

    pub fn with_signer(signer: Arc<dyn Signer>) -> Self {
        Self {
            pubkey: signer.public_key(),
            signer: Some(signer),
        }
    }

    pub fn pubkey(&self) -> &str {
        &self.pubkey
    }

    pub fn signer(&self) -> Option<&Arc<dyn Signer>> {
        self.signer.as_ref()
    }

    pub fn can_sign(&self) -> bool {
        self.signer.is_some()
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("pubkey", &self.pubkey)
            .field("can_sign", &self.can_sign())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET_HEX: &str = "d217c1ff2f8a65c3e3a1740db3b9f58b8c848bb45e26d00ed4714e4a0f4ceecf";

    #[test]
    fn parse_hex_and_nsec_agree() -> Result<()> {
        let from_hex = SecretKeySigner::parse(SECRET_HEX)?;
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(SECRET_HEX, &mut bytes)
            .map_err(|error| ClientError::Internal(error.to_string()))?;
        let direct = SecretKeySigner::from_secret_key(bytes)?;
        assert_eq!(from_hex.public_key(), direct.public_key());
        assert!(SecretKeySigner::parse("not-a-key").is_err());
        Ok(())
    }

    #[tokio::test]
    async fn identity_with_signer_signs_as_its_pubkey() -> Result<()> {
        let signer = Arc::new(SecretKeySigner::parse(SECRET_HEX)?);
        let identity = Identity::with_signer(signer);
        assert!(identity.can_sign());

        let unsigned = UnsignedEvent {
            pubkey: identity.pubkey().to_string(),
            created_at: 1,
            kind: 1,
            tags: vec![],
            content: "hi".to_string(),
        };
        let signer = identity
            .signer()
            .ok_or(ClientError::NoSigner)?;
        let event = signer.sign_event(unsigned).await?;
        assert_eq!(event.pubkey, identity.pubkey());
        assert!(nostr::verify_event(&event)?);
        Ok(())
    }

    #[test]
    fn read_only_identity_cannot_sign() {
        let identity = Identity::read_only("abc");
        assert!(!identity.can_sign());
        assert!(format!("{identity:?}").contains("can_sign: false"));
    }
}
