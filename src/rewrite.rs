//! Computes the outbound destination for one dispatch: scheme and host come
//! from the chosen target, the path is the target path joined with the
//! inbound path. Joining is done twice when either side carries a distinct
//! escaped form, so percent-encoded octets are never corrupted by the merge.

use std::borrow::Cow;

use hyper::Uri;
use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};

use crate::target::{Scheme, Target};

/// Bytes that are percent-encoded in the canonical form of a URL path.
const PATH_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

pub(crate) fn encode_path(path: &str) -> Cow<'_, str> {
    utf8_percent_encode(path, PATH_ENCODE_SET).into()
}

/// Splits an escaped path into its decoded form plus the escaped original.
/// The escaped original is kept only when re-encoding the decoded form does
/// not reproduce it, mirroring the `raw_path` convention on [`Target`].
pub(crate) fn split_escaped(escaped: &str) -> (String, String) {
    let plain = percent_decode_str(escaped).decode_utf8_lossy().into_owned();
    if encode_path(&plain) == escaped {
        (plain, String::new())
    } else {
        (plain, escaped.to_string())
    }
}

/// Destination of an outbound request. The inbound query string and headers
/// are not part of this; they pass through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenUrl {
    pub scheme: Scheme,
    pub host: String,
    pub path: String,
    pub raw_path: String,
}

impl RewrittenUrl {
    pub fn escaped_path(&self) -> Cow<'_, str> {
        if self.raw_path.is_empty() {
            encode_path(&self.path)
        } else {
            Cow::Borrowed(&self.raw_path)
        }
    }
}

pub fn rewrite(target: &Target, inbound: &Uri) -> RewrittenUrl {
    let (path, raw_path) = join_url_paths(target, inbound.path());
    RewrittenUrl {
        scheme: target.scheme,
        host: target.host.clone(),
        path,
        raw_path,
    }
}

fn join_url_paths(target: &Target, inbound_escaped: &str) -> (String, String) {
    let (b_plain, b_raw) = split_escaped(inbound_escaped);

    if target.raw_path.is_empty() && b_raw.is_empty() {
        return (single_joining_slash(&target.path, &b_plain), String::new());
    }

    // Same as single_joining_slash, but the slash test runs on the escaped
    // pair, and the plain and escaped results are concatenated separately.
    let a_escaped = target.escaped_path();
    let b_escaped = if b_raw.is_empty() {
        encode_path(&b_plain)
    } else {
        Cow::Borrowed(b_raw.as_str())
    };

    let a_slash = a_escaped.ends_with('/');
    let b_slash = b_escaped.starts_with('/');
    match (a_slash, b_slash) {
        (true, true) => (
            format!(
                "{}{}",
                target.path,
                b_plain.strip_prefix('/').unwrap_or(&b_plain)
            ),
            format!("{}{}", a_escaped, &b_escaped[1..]),
        ),
        (false, false) => (
            format!("{}/{}", target.path, b_plain),
            format!("{}/{}", a_escaped, b_escaped),
        ),
        _ => (
            format!("{}{}", target.path, b_plain),
            format!("{}{}", a_escaped, b_escaped),
        ),
    }
}

fn single_joining_slash(a: &str, b: &str) -> String {
    let a_slash = a.ends_with('/');
    let b_slash = b.starts_with('/');
    match (a_slash, b_slash) {
        (true, true) => format!("{}{}", a, &b[1..]),
        (false, false) => format!("{}/{}", a, b),
        _ => format!("{}{}", a, b),
    }
}
