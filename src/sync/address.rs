//! Address header normalization.
//!
//! Recipient headers come in three shapes: `"Display Name" <addr>`, the
//! escaped variant `"'Display Name'" <addr>` produced by some clients, and
//! bare addresses. The normalizer tries each shape against the whole header
//! in that order and returns the captures of the first shape that matches at
//! least once. Headers mixing shapes collapse to the first matching one.

use regex::Regex;
use std::sync::OnceLock;

static QUOTED_NAME_REGEX: OnceLock<Regex> = OnceLock::new();
static ESCAPED_NAME_REGEX: OnceLock<Regex> = OnceLock::new();
static BARE_ADDRESS_REGEX: OnceLock<Regex> = OnceLock::new();

fn quoted_name_regex() -> &'static Regex {
    QUOTED_NAME_REGEX.get_or_init(|| {
        Regex::new(r#""([^'"]+)"\s*<([A-Za-z0-9_.+-]+@[A-Za-z0-9.-]+)>"#)
            .expect("Invalid quoted name regex")
    })
}

fn escaped_name_regex() -> &'static Regex {
    ESCAPED_NAME_REGEX.get_or_init(|| {
        Regex::new(r#""'([^"]+)'"\s*<([A-Za-z0-9_.+-]+@[A-Za-z0-9.-]+)>"#)
            .expect("Invalid escaped name regex")
    })
}

fn bare_address_regex() -> &'static Regex {
    BARE_ADDRESS_REGEX.get_or_init(|| {
        Regex::new(r"[A-Za-z0-9_.+-]+@[A-Za-z0-9.-]+").expect("Invalid bare address regex")
    })
}

/// Normalize a raw address header into display strings, one per entry.
///
/// Never returns an empty vector: when nothing matches, the raw input is
/// returned unchanged as the only element.
pub fn normalize_addresses(raw: &str) -> Vec<String> {
    let names = captured_names(quoted_name_regex(), raw);
    if !names.is_empty() {
        return names;
    }

    let names = captured_names(escaped_name_regex(), raw);
    if !names.is_empty() {
        return names;
    }

    let addresses: Vec<String> = bare_address_regex()
        .find_iter(raw)
        .map(|m| m.as_str().to_string())
        .collect();
    if !addresses.is_empty() {
        return addresses;
    }

    vec![raw.to_string()]
}

/// Normalize and join with `", "`, the shape used for the `from` field.
pub fn join_addresses(raw: &str) -> String {
    normalize_addresses(raw).join(", ")
}

fn captured_names(regex: &Regex, raw: &str) -> Vec<String> {
    regex
        .captures_iter(raw)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .collect()
}
