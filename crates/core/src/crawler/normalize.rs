//! Tag normalization.

/// Normalize one tag to `namespace:value` form.
///
/// Trims, lowercases, collapses internal whitespace and expands the short
/// namespace aliases the upstream accepts (`f:` for `female:` and so on).
pub fn normalize_tag(raw: &str) -> String {
    let collapsed = raw
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    match collapsed.split_once(':') {
        Some((namespace, value)) => {
            format!("{}:{}", expand_namespace(namespace.trim()), value.trim())
        }
        None => collapsed,
    }
}

/// Normalize a tag list, dropping tags that end up empty.
pub fn normalize_tags(raw: &[String]) -> Vec<String> {
    raw.iter()
        .map(|tag| normalize_tag(tag))
        .filter(|tag| !tag.is_empty())
        .collect()
}

fn expand_namespace(namespace: &str) -> &str {
    match namespace {
        "a" => "artist",
        "c" | "char" => "character",
        "cos" => "cosplayer",
        "f" => "female",
        "g" | "circle" => "group",
        "l" | "lang" => "language",
        "loc" => "location",
        "m" => "male",
        "x" => "mixed",
        "o" => "other",
        "p" | "series" => "parody",
        "r" => "reclass",
        other => other,
    }
}
