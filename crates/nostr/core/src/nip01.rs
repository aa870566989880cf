//! NIP-01 event model: serialization, hashing, signing and verification.

use std::time::{SystemTime, UNIX_EPOCH};

use bitcoin::hashes::{Hash, sha256};
use bitcoin::key::Secp256k1;
use bitcoin::secp256k1::{Keypair, Message, SecretKey, XOnlyPublicKey, schnorr};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::kinds::EventKind;

/// Errors raised while building, signing or verifying events.
#[derive(Debug, Error)]
pub enum Nip01Error {
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("signing error: {0}")]
    Signing(String),

    #[error("verification error: {0}")]
    Verification(String),

    #[error("invalid secret key: {0}")]
    InvalidSecretKey(String),

    #[error("system clock error: {0}")]
    Clock(String),
}

/// A signed event as it travels over the wire.
///
/// `id` is trusted as an opaque dedup key by the client; it is only
/// recomputed by [`verify_event`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}

impl Event {
    /// Typed category of this event.
    pub fn event_kind(&self) -> EventKind {
        EventKind::from(self.kind)
    }
}

/// Event body handed to a signer. The signer fills in `id` and `sig`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedEvent {
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

/// Event body without an author; the pubkey comes from whoever signs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTemplate {
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

impl EventTemplate {
    /// Attach an author, producing the body a signer receives.
    pub fn into_unsigned(self, pubkey: impl Into<String>) -> UnsignedEvent {
        UnsignedEvent {
            pubkey: pubkey.into(),
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags,
            content: self.content,
        }
    }
}

/// Current unix time in whole seconds.
pub fn unix_now_secs() -> Result<u64, Nip01Error> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .map_err(|error| Nip01Error::Clock(error.to_string()))
}

/// Random 32-byte secret key.
pub fn generate_secret_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    rand::rng().fill_bytes(&mut key);
    key
}

/// Hex x-only public key for a secret key.
pub fn get_public_key_hex(secret_key: &[u8; 32]) -> Result<String, Nip01Error> {
    let secp = Secp256k1::new();
    let secret = SecretKey::from_slice(secret_key)
        .map_err(|error| Nip01Error::InvalidSecretKey(error.to_string()))?;
    let (xonly, _parity) = secret.x_only_public_key(&secp);
    Ok(hex::encode(xonly.serialize()))
}

/// Canonical `[0, pubkey, created_at, kind, tags, content]` serialization.
pub fn serialize_event(event: &UnsignedEvent) -> Result<String, Nip01Error> {
    if !is_lower_hex(&event.pubkey, 64) {
        return Err(Nip01Error::InvalidEvent(
            "pubkey must be 64 lowercase hex characters".to_string(),
        ));
    }

    serde_json::to_string(&(
        0,
        &event.pubkey,
        event.created_at,
        event.kind,
        &event.tags,
        &event.content,
    ))
    .map_err(|error| Nip01Error::Serialization(error.to_string()))
}

/// Hex sha256 of the canonical serialization; this is the event id.
pub fn get_event_hash(event: &UnsignedEvent) -> Result<String, Nip01Error> {
    let serialized = serialize_event(event)?;
    let hash = sha256::Hash::hash(serialized.as_bytes());
    Ok(hex::encode(hash.as_byte_array()))
}

/// Sign an unsigned event whose pubkey must belong to `secret_key`.
pub fn sign_unsigned_event(
    unsigned: UnsignedEvent,
    secret_key: &[u8; 32],
) -> Result<Event, Nip01Error> {
    let secp = Secp256k1::new();
    let secret = SecretKey::from_slice(secret_key)
        .map_err(|error| Nip01Error::InvalidSecretKey(error.to_string()))?;
    let keypair = Keypair::from_secret_key(&secp, &secret);
    let (xonly, _parity) = keypair.x_only_public_key();
    let pubkey = hex::encode(xonly.serialize());
    if pubkey != unsigned.pubkey {
        return Err(Nip01Error::Signing(format!(
            "event pubkey {} does not match signing key {}",
            unsigned.pubkey, pubkey
        )));
    }

    let id = get_event_hash(&unsigned)?;
    let digest = decode_32(&id).map_err(Nip01Error::Signing)?;
    let signature = secp.sign_schnorr_no_aux_rand(&Message::from_digest(digest), &keypair);

    Ok(Event {
        id,
        pubkey,
        created_at: unsigned.created_at,
        kind: unsigned.kind,
        tags: unsigned.tags,
        content: unsigned.content,
        sig: hex::encode(signature.serialize()),
    })
}

/// Sign a template with a secret key, deriving the pubkey from it.
pub fn finalize_event(
    template: &EventTemplate,
    secret_key: &[u8; 32],
) -> Result<Event, Nip01Error> {
    let pubkey = get_public_key_hex(secret_key)?;
    sign_unsigned_event(template.clone().into_unsigned(pubkey), secret_key)
}

/// Check that the id matches the content and the signature matches the id.
pub fn verify_event(event: &Event) -> Result<bool, Nip01Error> {
    if !is_lower_hex(&event.id, 64) || !is_lower_hex(&event.sig, 128) {
        return Ok(false);
    }

    let unsigned = UnsignedEvent {
        pubkey: event.pubkey.clone(),
        created_at: event.created_at,
        kind: event.kind,
        tags: event.tags.clone(),
        content: event.content.clone(),
    };
    if get_event_hash(&unsigned)? != event.id {
        return Ok(false);
    }

    let digest = decode_32(&event.id).map_err(Nip01Error::Verification)?;
    let sig_bytes = hex::decode(&event.sig)
        .map_err(|error| Nip01Error::Verification(format!("invalid sig hex: {error}")))?;
    let signature = schnorr::Signature::from_slice(&sig_bytes)
        .map_err(|error| Nip01Error::Verification(error.to_string()))?;
    let pubkey_bytes = decode_32(&event.pubkey).map_err(Nip01Error::Verification)?;
    let pubkey = XOnlyPublicKey::from_slice(&pubkey_bytes)
        .map_err(|error| Nip01Error::Verification(error.to_string()))?;

    let secp = Secp256k1::verification_only();
    Ok(secp
        .verify_schnorr(&signature, &Message::from_digest(digest), &pubkey)
        .is_ok())
}

/// Newest first; equal timestamps fall back to id order so the result is
/// deterministic regardless of arrival order.
pub fn sort_events(events: &mut [Event]) {
    events.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

fn is_lower_hex(value: &str, len: usize) -> bool {
    value.len() == len
        && value
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

fn decode_32(value: &str) -> Result<[u8; 32], String> {
    let bytes = hex::decode(value).map_err(|error| format!("invalid hex: {error}"))?;
    bytes
        .try_into()
        .map_err(|bytes: Vec<u8>| format!("expected 32 bytes, got {}", bytes.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET_HEX: &str = "d217c1ff2f8a65c3e3a1740db3b9f58b8c848bb45e26d00ed4714e4a0f4ceecf";

    fn secret() -> [u8; 32] {
        let mut key = [0u8; 32];
        hex::decode_to_slice(SECRET_HEX, &mut key).unwrap();
        key
    }

    fn note_template(created_at: u64) -> EventTemplate {
        EventTemplate {
            created_at,
            kind: 1,
            tags: vec![vec!["t".to_string(), "nostr".to_string()]],
            content: "hello relays".to_string(),
        }
    }

    #[test]
    fn finalize_then_verify() {
        let event = finalize_event(&note_template(1_700_000_000), &secret()).unwrap();
        assert_eq!(event.pubkey, get_public_key_hex(&secret()).unwrap());
        assert_eq!(event.id.len(), 64);
        assert_eq!(event.sig.len(), 128);
        assert!(verify_event(&event).unwrap());
    }

    #[test]
    fn tampered_content_fails_verification() {
        let mut event = finalize_event(&note_template(1_700_000_000), &secret()).unwrap();
        event.content.push('!');
        assert!(!verify_event(&event).unwrap());
    }

    #[test]
    fn signing_rejects_foreign_pubkey() {
        let unsigned = note_template(1).into_unsigned("ab".repeat(32));
        let error = sign_unsigned_event(unsigned, &secret()).unwrap_err();
        assert!(matches!(error, Nip01Error::Signing(_)));
    }

    #[test]
    fn serialization_is_canonical_array() {
        let unsigned = note_template(42).into_unsigned("cd".repeat(32));
        let serialized = serialize_event(&unsigned).unwrap();
        assert_eq!(
            serialized,
            format!(
                r#"[0,"{}",42,1,[["t","nostr"]],"hello relays"]"#,
                "cd".repeat(32)
            )
        );
    }

    #[test]
    fn sort_is_newest_first_with_id_tiebreak() {
        let make = |id: &str, created_at: u64| Event {
            id: id.to_string(),
            pubkey: String::new(),
            created_at,
            kind: 1,
            tags: vec![],
            content: String::new(),
            sig: String::new(),
        };
        let mut events = vec![make("b", 10), make("c", 30), make("a", 10)];
        sort_events(&mut events);
        let order: Vec<&str> = events.iter().map(|event| event.id.as_str()).collect();
        assert_eq!(order, vec!["c", "a", "b"]);
    }
}
