pub(crate) fn tag_name(tag: &[String]) -> Option<&str> {
    tag.first().map(String::as_str)
}

pub(crate) fn tag_field(tag: &[String], index: usize) -> Option<&str> {
    tag.get(index).map(String::as_str)
}

pub(crate) fn is_tag(tag: &[String], name: &str) -> bool {
    matches!(tag_name(tag), Some(tag_name) if tag_name == name)
}

pub(crate) fn find_tag_value<'a>(tags: &'a [Vec<String>], name: &str) -> Option<&'a str> {
    tags.iter()
        .filter(|tag| is_tag(tag, name))
        .find_map(|tag| non_empty_field(tag, 1))
}

/// Second-position values of every `name` tag, skipping tags where it is
/// missing or empty.
pub(crate) fn collect_tag_values(tags: &[Vec<String>], name: &str) -> Vec<String> {
    tags.iter()
        .filter(|tag| is_tag(tag, name))
        .filter_map(|tag| non_empty_field(tag, 1).map(str::to_owned))
        .collect()
}

fn non_empty_field(tag: &[String], index: usize) -> Option<&str> {
    tag_field(tag, index).filter(|value| !value.is_empty())
}
