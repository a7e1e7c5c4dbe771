// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Canonical, tracker-free URL rewriting.
//!
//! Output is a pure function of the input and the policy's tracking list,
//! and feeding the output back in returns it unchanged.

use crate::error::PolicyViolation;
use crate::policy::UrlPolicy;
use url::{form_urlencoded, Url};

/// Bytes left as-is inside a path segment: RFC 3986 unreserved, sub-delims,
/// `:` and `@`. Everything else is percent-encoded.
const SEGMENT_SAFE: &[u8] = b"-._~!$&'()*+,;=:@";

/// Rewrite `raw` into its canonical form.
///
/// Scheme and host are lower-cased, credentials, default ports and
/// fragments removed, repeated `/` collapsed, tracking parameters dropped
/// and the remaining query sorted by key.
pub fn sanitize_url(policy: &UrlPolicy, raw: &str) -> Result<String, PolicyViolation> {
    let parsed = Url::parse(raw.trim()).map_err(|_| PolicyViolation::InvalidFormat)?;
    let host = parsed.host_str().ok_or(PolicyViolation::InvalidFormat)?;

    // The parser already lower-cases scheme and host and reports default
    // ports as absent.
    let mut out = format!("{}://{}", parsed.scheme(), host);
    if let Some(port) = parsed.port() {
        out.push(':');
        out.push_str(&port.to_string());
    }

    out.push_str(&normalize_path(parsed.path()));

    if let Some(query) = parsed.query() {
        let filtered = filter_query(policy, query);
        if !filtered.is_empty() {
            out.push('?');
            out.push_str(&filtered);
        }
    }

    Ok(out)
}

/// Collapse repeated separators and re-encode each segment.
fn normalize_path(path: &str) -> String {
    let mut collapsed = String::with_capacity(path.len());
    for c in path.chars() {
        if c == '/' && collapsed.ends_with('/') {
            continue;
        }
        collapsed.push(c);
    }

    if collapsed.is_empty() {
        return "/".to_string();
    }
    if !collapsed.starts_with('/') {
        collapsed.insert(0, '/');
    }

    collapsed
        .split('/')
        .map(reencode_segment)
        .collect::<Vec<_>>()
        .join("/")
}

/// Decode a path segment fully, then encode only what must be escaped.
///
/// A `.` that arrived encoded stays encoded at a segment edge or next to
/// another `.`, so decoding never forms `..` or `./.`.
fn reencode_segment(segment: &str) -> String {
    let decoded = decode_segment(segment);
    let mut out = String::with_capacity(segment.len());
    for (i, &(b, was_encoded)) in decoded.iter().enumerate() {
        if b == b'.' && was_encoded {
            let prev = i.checked_sub(1).and_then(|j| decoded.get(j));
            let next = decoded.get(i + 1);
            let exposed = [prev, next]
                .iter()
                .any(|n| n.map_or(true, |&(c, _)| c == b'.'));
            if exposed {
                out.push_str("%2E");
                continue;
            }
        }
        if b.is_ascii_alphanumeric() || SEGMENT_SAFE.contains(&b) {
            out.push(b as char);
        } else {
            out.push_str(&urlencoding::encode_binary(&[b]));
        }
    }
    out
}

/// Percent-decode a segment, remembering which bytes were escaped.
fn decode_segment(segment: &str) -> Vec<(u8, bool)> {
    let bytes = segment.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let escaped = (bytes[i] == b'%')
            .then(|| bytes.get(i + 1..i + 3))
            .flatten()
            .and_then(|hex| std::str::from_utf8(hex).ok())
            .and_then(|hex| u8::from_str_radix(hex, 16).ok());
        match escaped {
            Some(b) => {
                decoded.push((b, true));
                i += 3;
            }
            None => {
                decoded.push((bytes[i], false));
                i += 1;
            }
        }
    }
    decoded
}

/// Drop tracking parameters and serialize the rest sorted by key. Values of
/// a repeated key keep their original relative order.
fn filter_query(policy: &UrlPolicy, query: &str) -> String {
    let mut pairs: Vec<(String, String)> = form_urlencoded::parse(query.as_bytes())
        .filter(|(name, _)| !policy.is_tracking_param(name))
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

/// Short labels describing how sanitization changed `original`.
pub fn describe_changes(original: &str, sanitized: &str) -> Vec<&'static str> {
    let mut changes = Vec::new();
    if original == sanitized {
        return changes;
    }

    let parsed = Url::parse(original.trim()).ok();
    let pairs = |url: Option<&Url>| url.map_or(0, |u| u.query_pairs().count());
    if pairs(parsed.as_ref()) > pairs(Url::parse(sanitized).ok().as_ref()) {
        changes.push("Removed tracking parameters");
    }
    if parsed.as_ref().is_some_and(|u| u.fragment().is_some()) {
        changes.push("Removed fragment");
    }
    if changes.is_empty() || original.to_lowercase() != original {
        changes.push("Normalized URL");
    }
    changes
}
