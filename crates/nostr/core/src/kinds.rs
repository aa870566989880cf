//! Event categories the feed client understands.

pub const KIND_METADATA: u16 = 0;
pub const KIND_TEXT_NOTE: u16 = 1;
pub const KIND_CONTACT_LIST: u16 = 3;
pub const KIND_PICTURE: u16 = 20;
pub const KIND_CLIENT_AUTH: u16 = 22242;

/// Kinds shown in home, following and profile timelines.
pub const FEED_KINDS: [u16; 2] = [KIND_TEXT_NOTE, KIND_PICTURE];

/// Known event categories, with a fallback for everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Metadata,
    TextNote,
    ContactList,
    Picture,
    ClientAuth,
    Unknown(u16),
}

impl EventKind {
    pub fn as_u16(self) -> u16 {
        match self {
            Self::Metadata => KIND_METADATA,
            Self::TextNote => KIND_TEXT_NOTE,
            Self::ContactList => KIND_CONTACT_LIST,
            Self::Picture => KIND_PICTURE,
            Self::ClientAuth => KIND_CLIENT_AUTH,
            Self::Unknown(kind) => kind,
        }
    }

    /// Whether events of this kind belong in a timeline.
    pub fn is_feed_kind(self) -> bool {
        matches!(self, Self::TextNote | Self::Picture)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Metadata => "metadata",
            Self::TextNote => "note",
            Self::ContactList => "contacts",
            Self::Picture => "picture",
            Self::ClientAuth => "auth",
            Self::Unknown(_) => "unknown",
        }
    }
}

impl From<u16> for EventKind {
    fn from(kind: u16) -> Self {
        match kind {
            KIND_METADATA => Self::Metadata,
            KIND_TEXT_NOTE => Self::TextNote,
            KIND_CONTACT_LIST => Self::ContactList,
            KIND_PICTURE => Self::Picture,
            KIND_CLIENT_AUTH => Self::ClientAuth,
            other => Self::Unknown(other),
        }
    }
}

impl From<EventKind> for u16 {
    fn from(kind: EventKind) -> Self {
        kind.as_u16()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_kinds_map_both_ways() {
        for kind in [0u16, 1, 3, 20, 22242] {
            let typed = EventKind::from(kind);
            assert!(!matches!(typed, EventKind::Unknown(_)), "{kind} should be known");
            assert_eq!(typed.as_u16(), kind);
        }
    }

    #[test]
    fn unknown_kind_keeps_its_number() {
        assert_eq!(EventKind::from(7), EventKind::Unknown(7));
        assert_eq!(u16::from(EventKind::Unknown(30023)), 30023);
    }

    #[test]
    fn only_notes_and_pictures_are_feed_kinds() {
        assert!(EventKind::TextNote.is_feed_kind());
        assert!(EventKind::Picture.is_feed_kind());
        assert!(!EventKind::ContactList.is_feed_kind());
        assert!(!EventKind::Unknown(1).is_feed_kind());
    }
}
