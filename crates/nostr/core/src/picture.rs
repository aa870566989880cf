//! Helpers for kind-20 picture events.

use crate::Event;
use crate::tag_parsing::{collect_tag_values, find_tag_value, is_tag};

/// Value of the `title` tag, if any.
pub fn picture_title(event: &Event) -> Option<&str> {
    find_tag_value(&event.tags, "title")
}

/// Image URLs carried by a picture event.
///
/// `imeta` tags hold space-separated `key value` entries; their `url`
/// entries come first, followed by plain `url` and `image` tag values.
/// Duplicates are dropped.
pub fn picture_urls(event: &Event) -> Vec<String> {
    let mut urls: Vec<String> = event
        .tags
        .iter()
        .filter(|tag| is_tag(tag, "imeta"))
        .flat_map(|tag| tag.iter().skip(1))
        .filter_map(|entry| entry.strip_prefix("url "))
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty())
        .collect();

    for name in ["url", "image"] {
        urls.extend(collect_tag_values(&event.tags, name));
    }

    let mut seen = std::collections::HashSet::new();
    urls.retain(|url| seen.insert(url.clone()));
    urls
}

/// Alt text from the first `imeta` entry that has one.
pub fn picture_alt(event: &Event) -> Option<&str> {
    event
        .tags
        .iter()
        .filter(|tag| is_tag(tag, "imeta"))
        .flat_map(|tag| tag.iter().skip(1))
        .find_map(|entry| entry.strip_prefix("alt "))
}
