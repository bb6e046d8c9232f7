//! Query string parsing.

use std::collections::HashMap;

/// Parses the query string of a raw request target.
///
/// Everything after the first `?` is split on `&`, each pair on its first
/// `=`. Keys and values are percent-decoded (`+` reads as a space). A pair
/// without `=` maps to an empty value and a repeated key keeps its last
/// value.
pub fn parse_query(target: &str) -> HashMap<String, String> {
    let query = match target.split_once('?') {
        Some((_, query)) => query,
        None => return HashMap::new(),
    };

    let mut params = HashMap::new();
    for pair in query.split('&').filter(|s| !s.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        params.insert(decode_component(key), decode_component(value));
    }
    params
}

fn decode_component(raw: &str) -> String {
    let raw = raw.replace('+', " ");
    String::from_utf8_lossy(&urlencoding::decode_binary(raw.as_bytes())).into_owned()
}
