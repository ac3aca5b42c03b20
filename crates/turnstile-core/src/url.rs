//! URL helpers

use std::collections::HashMap;
use tracing::warn;

/// Path prefix of every service endpoint
pub const SERVICE_API_PATH: &str = "/swg/_/api/v1";

fn is_unreserved(byte: u8) -> bool {
    byte.is_ascii_alphanumeric()
        || matches!(byte, b'-' | b'_' | b'.' | b'!' | b'~' | b'*' | b'\'' | b'(' | b')')
}

/// Percent-encode everything outside the URI component unreserved set
pub fn encode_uri_component(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        if is_unreserved(byte) {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

/// Reverse of [`encode_uri_component`]. `+` is left alone.
pub fn decode_uri_component(value: &str) -> Option<String> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = value.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

/// Parse `a=1&b=2` (optionally led by `?` or `#`) into a map.
///
/// Pairs with an empty key are skipped. Pairs that fail to decode are logged
/// and skipped.
pub fn parse_query_string(query: &str) -> HashMap<String, String> {
    let query = query
        .strip_prefix('?')
        .or_else(|| query.strip_prefix('#'))
        .unwrap_or(query);

    let mut params = HashMap::new();
    for pair in query.split('&') {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        match (decode_uri_component(key), decode_uri_component(value)) {
            (Some(key), Some(value)) => {
                if !key.is_empty() {
                    params.insert(key, value);
                }
            }
            _ => warn!(pair = %pair, "Failed to decode query parameter"),
        }
    }
    params
}

/// Append `param=value` to the query part of `url`, ahead of any fragment
pub fn add_query_param(url: &str, param: &str, value: &str) -> String {
    let (base, fragment) = match url.find('#') {
        Some(idx) => url.split_at(idx),
        None => (url, ""),
    };

    let mut out = String::with_capacity(url.len() + param.len() + value.len() + 2);
    out.push_str(base);
    match base.find('?') {
        None => out.push('?'),
        Some(idx) if idx + 1 < base.len() => out.push('&'),
        Some(_) => {}
    }
    out.push_str(&encode_uri_component(param));
    out.push('=');
    out.push_str(&encode_uri_component(value));
    out.push_str(fragment);
    out
}

/// Full URL of a service endpoint
pub fn service_url(base: &str, path: &str) -> String {
    format!("{}{}{}", base.trim_end_matches('/'), SERVICE_API_PATH, path)
}

/// Split a URL into `(origin + path, query, fragment)`.
///
/// The query keeps its leading `?` and the fragment its `#`.
pub fn split_url(url: &str) -> (&str, &str, &str) {
    let (rest, fragment) = match url.find('#') {
        Some(idx) => url.split_at(idx),
        None => (url, ""),
    };
    let (base, query) = match rest.find('?') {
        Some(idx) => rest.split_at(idx),
        None => (rest, ""),
    };
    (base, query, fragment)
}
