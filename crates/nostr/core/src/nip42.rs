//! NIP-42 relay authentication.

use crate::kinds::KIND_CLIENT_AUTH;
use crate::nip01::EventTemplate;

/// Prefix relays use in CLOSED / OK messages when a request needs AUTH first.
pub const AUTH_REQUIRED_PREFIX: &str = "auth-required:";

/// Unsigned kind-22242 event answering `challenge` for `relay_url`.
pub fn create_auth_template(challenge: &str, relay_url: &str, created_at: u64) -> EventTemplate {
    EventTemplate {
        created_at,
        kind: KIND_CLIENT_AUTH,
        tags: vec![
            vec!["relay".to_string(), relay_url.to_string()],
            vec!["challenge".to_string(), challenge.to_string()],
        ],
        content: String::new(),
    }
}

pub fn is_auth_required(message: &str) -> bool {
    message.starts_with(AUTH_REQUIRED_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_carries_exactly_relay_and_challenge() {
        let template = create_auth_template("abc", "wss://relay.example", 99);
        assert_eq!(template.kind, 22242);
        assert_eq!(template.created_at, 99);
        assert!(template.content.is_empty());
        assert_eq!(
            template.tags,
            vec![
                vec!["relay".to_string(), "wss://relay.example".to_string()],
                vec!["challenge".to_string(), "abc".to_string()],
            ]
        );
    }

    #[test]
    fn detects_auth_required_prefix() {
        assert!(is_auth_required("auth-required: we only serve members"));
        assert!(!is_auth_required("blocked: spam"));
        assert!(!is_auth_required(""));
    }
}
