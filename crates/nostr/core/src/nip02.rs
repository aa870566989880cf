//! NIP-02 contact lists (kind 3).

use thiserror::Error;

use crate::Event;
use crate::kinds::KIND_CONTACT_LIST;
use crate::tag_parsing::collect_tag_values;

#[derive(Debug, Error)]
pub enum Nip02Error {
    #[error("invalid event kind: expected 3, got {0}")]
    InvalidKind(u16),
}

/// Pubkeys referenced by `p` tags of a contact list, in tag order.
///
/// Tags without a value are skipped; other tag names (`e`, `t`, ...) are
/// ignored.
pub fn followed_pubkeys(event: &Event) -> Result<Vec<String>, Nip02Error> {
    if event.kind != KIND_CONTACT_LIST {
        return Err(Nip02Error::InvalidKind(event.kind));
    }
    Ok(collect_tag_values(&event.tags, "p"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact_list(tags: Vec<Vec<&str>>) -> Event {
        Event {
            id: "contacts".to_string(),
            pubkey: "me".to_string(),
            created_at: 1,
            kind: KIND_CONTACT_LIST,
            tags: tags
                .into_iter()
                .map(|tag| tag.into_iter().map(str::to_string).collect())
                .collect(),
            content: String::new(),
            sig: String::new(),
        }
    }

    #[test]
    fn extracts_p_tags_in_order() {
        let event = contact_list(vec![
            vec!["p", "A"],
            vec!["p", "B", "wss://relay.example"],
            vec!["e", "ignored"],
        ]);
        assert_eq!(followed_pubkeys(&event).unwrap(), vec!["A", "B"]);
    }

    #[test]
    fn skips_p_tags_without_value() {
        let event = contact_list(vec![vec!["p"], vec!["p", ""], vec!["p", "C"]]);
        assert_eq!(followed_pubkeys(&event).unwrap(), vec!["C"]);
    }

    #[test]
    fn rejects_other_kinds() {
        let mut event = contact_list(vec![vec!["p", "A"]]);
        event.kind = 1;
        assert!(matches!(
            followed_pubkeys(&event),
            Err(Nip02Error::InvalidKind(1))
        ));
    }
}
