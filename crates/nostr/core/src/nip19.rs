//! NIP-19 bech32 entities.
//!
//! Bare keys and ids (`npub`, `nsec`, `note`) plus the TLV-shaped `nprofile`
//! and `nevent` pointers. Unknown TLV types are skipped when decoding.

use bech32::{Bech32, Hrp};
use thiserror::Error;

static HRP_NPUB: Hrp = Hrp::parse_unchecked("npub");
static HRP_NSEC: Hrp = Hrp::parse_unchecked("nsec");
static HRP_NOTE: Hrp = Hrp::parse_unchecked("note");
static HRP_NPROFILE: Hrp = Hrp::parse_unchecked("nprofile");
static HRP_NEVENT: Hrp = Hrp::parse_unchecked("nevent");

const TLV_SPECIAL: u8 = 0;
const TLV_RELAY: u8 = 1;
const TLV_AUTHOR: u8 = 2;
const TLV_KIND: u8 = 3;

#[derive(Debug, Error)]
pub enum Nip19Error {
    #[error("bech32 decode error: {0}")]
    Decode(String),

    #[error("bech32 encode error: {0}")]
    Encode(String),

    #[error("expected {expected} prefix, got {got}")]
    WrongPrefix { expected: String, got: String },

    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("expected 32 bytes, got {0}")]
    InvalidLength(usize),

    #[error("malformed TLV: {0}")]
    InvalidTlv(String),

    #[error("unsupported entity: {0}")]
    Unsupported(String),
}

/// A profile with relay hints, as carried by `nprofile`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilePointer {
    pub pubkey: String,
    pub relays: Vec<String>,
}

/// An event with optional relay, author and kind hints, as carried by `nevent`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventPointer {
    pub id: String,
    pub relays: Vec<String>,
    pub author: Option<String>,
    pub kind: Option<u32>,
}

/// Public entities a NIP-19 string can name. Secret keys are decoded only
/// through [`decode_nsec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Nip19Entity {
    Pubkey(String),
    Note(String),
    Profile(ProfilePointer),
    Event(EventPointer),
}

impl Nip19Entity {
    /// The pubkey for `npub`/`nprofile`.
    pub fn pubkey(&self) -> Option<&str> {
        match self {
            Self::Pubkey(pubkey) => Some(pubkey),
            Self::Profile(profile) => Some(&profile.pubkey),
            Self::Note(_) | Self::Event(_) => None,
        }
    }

    /// The event id for `note`/`nevent`.
    pub fn event_id(&self) -> Option<&str> {
        match self {
            Self::Note(id) => Some(id),
            Self::Event(event) => Some(&event.id),
            Self::Pubkey(_) | Self::Profile(_) => None,
        }
    }
}

pub fn encode_npub(pubkey_hex: &str) -> Result<String, Nip19Error> {
    encode(HRP_NPUB, pubkey_hex)
}

pub fn encode_note(event_id_hex: &str) -> Result<String, Nip19Error> {
    encode(HRP_NOTE, event_id_hex)
}

/// Hex pubkey from an `npub1...` string.
pub fn decode_npub(npub: &str) -> Result<String, Nip19Error> {
    decode_fixed(HRP_NPUB, npub).map(hex::encode)
}

/// Raw secret key bytes from an `nsec1...` string.
pub fn decode_nsec(nsec: &str) -> Result<[u8; 32], Nip19Error> {
    decode_fixed(HRP_NSEC, nsec)
}

pub fn encode_nprofile(profile: &ProfilePointer) -> Result<String, Nip19Error> {
    let mut tlv = Vec::new();
    push_tlv(&mut tlv, TLV_SPECIAL, &key_bytes(&profile.pubkey)?)?;
    for relay in &profile.relays {
        push_tlv(&mut tlv, TLV_RELAY, relay.as_bytes())?;
    }
    bech32_encode(HRP_NPROFILE, &tlv)
}

pub fn encode_nevent(event: &EventPointer) -> Result<String, Nip19Error> {
    let mut tlv = Vec::new();
    push_tlv(&mut tlv, TLV_SPECIAL, &key_bytes(&event.id)?)?;
    for relay in &event.relays {
        push_tlv(&mut tlv, TLV_RELAY, relay.as_bytes())?;
    }
    if let Some(author) = &event.author {
        push_tlv(&mut tlv, TLV_AUTHOR, &key_bytes(author)?)?;
    }
    if let Some(kind) = event.kind {
        push_tlv(&mut tlv, TLV_KIND, &kind.to_be_bytes())?;
    }
    bech32_encode(HRP_NEVENT, &tlv)
}

/// Decode any public entity: `npub`, `note`, `nprofile` or `nevent`.
pub fn decode(encoded: &str) -> Result<Nip19Entity, Nip19Error> {
    let (hrp, data) =
        bech32::decode(encoded.trim()).map_err(|error| Nip19Error::Decode(error.to_string()))?;

    if hrp == HRP_NPUB {
        Ok(Nip19Entity::Pubkey(hex::encode(fixed(data)?)))
    } else if hrp == HRP_NOTE {
        Ok(Nip19Entity::Note(hex::encode(fixed(data)?)))
    } else if hrp == HRP_NPROFILE {
        decode_profile(&data).map(Nip19Entity::Profile)
    } else if hrp == HRP_NEVENT {
        decode_event(&data).map(Nip19Entity::Event)
    } else {
        Err(Nip19Error::Unsupported(hrp.to_string()))
    }
}

fn decode_profile(data: &[u8]) -> Result<ProfilePointer, Nip19Error> {
    let mut pubkey = None;
    let mut relays = Vec::new();
    for (kind, value) in read_tlv(data)? {
        match kind {
            TLV_SPECIAL if pubkey.is_none() => pubkey = Some(hex::encode(fixed(value.to_vec())?)),
            TLV_RELAY => relays.push(relay_hint(value)?),
            _ => {}
        }
    }
    let pubkey = pubkey.ok_or_else(|| Nip19Error::InvalidTlv("missing pubkey".to_string()))?;
    Ok(ProfilePointer { pubkey, relays })
}

fn decode_event(data: &[u8]) -> Result<EventPointer, Nip19Error> {
    let mut id = None;
    let mut relays = Vec::new();
    let mut author = None;
    let mut kind = None;
    for (tag, value) in read_tlv(data)? {
        match tag {
            TLV_SPECIAL if id.is_none() => id = Some(hex::encode(fixed(value.to_vec())?)),
            TLV_RELAY => relays.push(relay_hint(value)?),
            TLV_AUTHOR if author.is_none() => author = Some(hex::encode(fixed(value.to_vec())?)),
            TLV_KIND if kind.is_none() => {
                let bytes: [u8; 4] = value
                    .try_into()
                    .map_err(|_| Nip19Error::InvalidTlv(format!("kind is {} bytes", value.len())))?;
                kind = Some(u32::from_be_bytes(bytes));
            }
            _ => {}
        }
    }
    let id = id.ok_or_else(|| Nip19Error::InvalidTlv("missing event id".to_string()))?;
    Ok(EventPointer {
        id,
        relays,
        author,
        kind,
    })
}

fn read_tlv(mut data: &[u8]) -> Result<Vec<(u8, &[u8])>, Nip19Error> {
    let mut entries = Vec::new();
    while !data.is_empty() {
        let [kind, len, rest @ ..] = data else {
            return Err(Nip19Error::InvalidTlv("truncated header".to_string()));
        };
        let len = usize::from(*len);
        if rest.len() < len {
            return Err(Nip19Error::InvalidTlv(format!(
                "type {kind} needs {len} bytes, {} left",
                rest.len()
            )));
        }
        entries.push((*kind, &rest[..len]));
        data = &rest[len..];
    }
    Ok(entries)
}

fn push_tlv(out: &mut Vec<u8>, kind: u8, value: &[u8]) -> Result<(), Nip19Error> {
    let len = u8::try_from(value.len())
        .map_err(|_| Nip19Error::Encode(format!("TLV value of {} bytes", value.len())))?;
    out.push(kind);
    out.push(len);
    out.extend_from_slice(value);
    Ok(())
}

fn relay_hint(value: &[u8]) -> Result<String, Nip19Error> {
    String::from_utf8(value.to_vec())
        .map_err(|error| Nip19Error::InvalidTlv(format!("relay is not UTF-8: {error}")))
}

fn key_bytes(data_hex: &str) -> Result<Vec<u8>, Nip19Error> {
    let data = hex::decode(data_hex).map_err(|error| Nip19Error::InvalidHex(error.to_string()))?;
    if data.len() != 32 {
        return Err(Nip19Error::InvalidLength(data.len()));
    }
    Ok(data)
}

fn fixed(data: Vec<u8>) -> Result<[u8; 32], Nip19Error> {
    let len = data.len();
    data.try_into().map_err(|_| Nip19Error::InvalidLength(len))
}

fn bech32_encode(hrp: Hrp, data: &[u8]) -> Result<String, Nip19Error> {
    bech32::encode::<Bech32>(hrp, data).map_err(|error| Nip19Error::Encode(error.to_string()))
}

fn encode(hrp: Hrp, data_hex: &str) -> Result<String, Nip19Error> {
    bech32_encode(hrp, &key_bytes(data_hex)?)
}

fn decode_fixed(expected: Hrp, encoded: &str) -> Result<[u8; 32], Nip19Error> {
    let (hrp, data) =
        bech32::decode(encoded.trim()).map_err(|error| Nip19Error::Decode(error.to_string()))?;
    if hrp != expected {
        return Err(Nip19Error::WrongPrefix {
            expected: expected.to_string(),
            got: hrp.to_string(),
        });
    }
    fixed(data)
}
