#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod kinds;
pub mod metadata;
pub mod nip01;
pub mod nip02;
pub mod nip19;
pub mod nip42;
pub mod picture;
mod tag_parsing;

pub use kinds::{
    EventKind, FEED_KINDS, KIND_CLIENT_AUTH, KIND_CONTACT_LIST, KIND_METADATA, KIND_PICTURE,
    KIND_TEXT_NOTE,
};
pub use metadata::{Metadata, MetadataError};
pub use nip01::{
    Event, EventTemplate, Nip01Error, UnsignedEvent, finalize_event, generate_secret_key,
    get_event_hash, get_public_key_hex, sign_unsigned_event, sort_events, unix_now_secs,
    verify_event,
};
pub use nip02::{Nip02Error, followed_pubkeys};
pub use nip19::{
    EventPointer, Nip19Entity, Nip19Error, ProfilePointer, decode_npub, decode_nsec, encode_nevent,
    encode_note, encode_nprofile, encode_npub,
};
pub use nip42::{AUTH_REQUIRED_PREFIX, create_auth_template, is_auth_required};
