//! Kind-0 profile metadata.
//!
//! Content is a JSON object of loosely typed fields. Anything that is not an
//! object parses as empty metadata, and fields with the wrong type read as
//! absent.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::kinds::KIND_METADATA;
use crate::nip01::Event;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("expected kind 0, got {0}")]
    InvalidKind(u16),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata(Map<String, Value>);

impl Metadata {
    pub fn from_content(content: &str) -> Self {
        match serde_json::from_str(content) {
            Ok(Value::Object(fields)) => Self(fields),
            _ => Self::default(),
        }
    }

    pub fn from_event(event: &Event) -> Result<Self, MetadataError> {
        if event.kind != KIND_METADATA {
            return Err(MetadataError::InvalidKind(event.kind));
        }
        Ok(Self::from_content(&event.content))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0
            .get(field)
            .and_then(Value::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.get_str("name")
    }

    #[inline]
    pub fn display_name(&self) -> Option<&str> {
        self.get_str("display_name")
    }

    /// `name`, falling back to `display_name`.
    pub fn preferred_name(&self) -> Option<&str> {
        self.name().or_else(|| self.display_name())
    }

    #[inline]
    pub fn about(&self) -> Option<&str> {
        self.get_str("about")
    }

    #[inline]
    pub fn picture(&self) -> Option<&str> {
        self.get_str("picture")
    }

    #[inline]
    pub fn banner(&self) -> Option<&str> {
        self.get_str("banner")
    }

    #[inline]
    pub fn website(&self) -> Option<&str> {
        self.get_str("website")
    }

    #[inline]
    pub fn nip05(&self) -> Option<&str> {
        self.get_str("nip05")
    }

    #[inline]
    pub fn lud16(&self) -> Option<&str> {
        self.get_str("lud16")
    }

    pub fn is_bot(&self) -> bool {
        self.0.get("bot").and_then(Value::as_bool).unwrap_or(false)
    }
}
