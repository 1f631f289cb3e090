//! Digest authentication core (RFC 2069 and RFC 2617/7616 `qop=auth`).
//!
//! This module holds the pieces shared by client and server: challenge
//! parsing and the `HA1`/`HA2`/`response` computation. [`client`] and
//! [`server`] build the stateful request/response flow on top of it.

use std::collections::HashMap;

use crate::hash::{digest_hex, Algorithm};

/// A parsed `WWW-Authenticate: Digest ...` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    pub algorithm: Algorithm,
    /// `Some("auth")` when the server offers RFC 2617 `qop=auth`; `None`
    /// for a bare RFC 2069 challenge.
    pub qop: Option<String>,
}

/// Parse a `WWW-Authenticate` header value into a [`Challenge`].
///
/// Tolerant of both quoted and unquoted field values, matching how real
/// RTSP servers (and the cameras they run on) format the header.
///
/// # Examples
///
/// ```
/// use rtsp_auth::digest::parse_challenge;
///
/// let c = parse_challenge(
///     r#"Digest realm="AXIS_ACCC8E000AA9", nonce="0024e47aY398109708de9ccd8056c58a068a59540a99d3""#
/// ).unwrap();
/// assert_eq!(c.realm, "AXIS_ACCC8E000AA9");
/// assert!(c.qop.is_none());
/// ```
pub fn parse_challenge(header: &str) -> Option<Challenge> {
    let rest = header.trim().strip_prefix("Digest")?.trim();
    let fields = parse_field_list(rest);

    Some(Challenge {
        realm: fields.get("realm")?.clone(),
        nonce: fields.get("nonce")?.clone(),
        opaque: fields.get("opaque").cloned(),
        algorithm: Algorithm::parse(fields.get("algorithm").map(String::as_str)),
        qop: fields.get("qop").cloned(),
    })
}

fn parse_field_list(rest: &str) -> HashMap<String, String> {
    let mut fields = HashMap::new();

    for part in split_respecting_quotes(rest) {
        let Some(eq) = part.find('=') else { continue };
        let key = part[..eq].trim().to_ascii_lowercase();
        let value = part[eq + 1..].trim().trim_matches('"').to_string();
        fields.insert(key, value);
    }

    fields
}

fn split_respecting_quotes(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;

    for (i, c) in s.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(s[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(s[start..].trim());
    parts
}

/// `HA1 = H(user ":" realm ":" pass)`.
pub fn ha1(algorithm: Algorithm, user: &str, realm: &str, pass: &str) -> String {
    digest_hex(algorithm, &format!("{user}:{realm}:{pass}"))
}

/// `HA2 = H(method ":" uri)`.
pub fn ha2(algorithm: Algorithm, method: &str, uri: &str) -> String {
    digest_hex(algorithm, &format!("{method}:{uri}"))
}

/// Final `response` field, branching on whether `qop=auth` is in play.
///
/// # Examples
///
/// ```
/// use rtsp_auth::digest::{ha1, ha2, response, Qop};
/// use rtsp_auth::hash::Algorithm;
///
/// // RFC 2069 worked example from an Axis camera challenge.
/// let a1 = ha1(Algorithm::Md5, "root", "AXIS_ACCC8E000AA9", "admin123");
/// let a2 = ha2(Algorithm::Md5, "DESCRIBE", "rtsp://cam/axis-media/media.amp");
/// let r = response(
///     Algorithm::Md5,
///     &a1,
///     &a2,
///     "0024e47aY398109708de9ccd8056c58a068a59540a99d3",
///     Qop::None,
/// );
/// assert_eq!(r, "7daaf0f4e40fdff42cff28260f37914d");
/// ```
pub fn response(algorithm: Algorithm, ha1: &str, ha2: &str, nonce: &str, qop: Qop<'_>) -> String {
    match qop {
        Qop::None => digest_hex(algorithm, &format!("{ha1}:{nonce}:{ha2}")),
        Qop::Auth { nc, cnonce } => digest_hex(
            algorithm,
            &format!("{ha1}:{nonce}:{nc}:{cnonce}:auth:{ha2}"),
        ),
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Qop<'a> {
    None,
    Auth { nc: &'a str, cnonce: &'a str },
}

/// Zero-pad a nonce-count to the 8-hex-digit form the wire requires.
///
/// # Examples
///
/// ```
/// use rtsp_auth::digest::format_nc;
///
/// assert_eq!(format_nc(1), "00000001");
/// ```
pub fn format_nc(nc: u32) -> String {
    format!("{nc:08x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_challenge_with_qop() {
        let c = parse_challenge(
            r#"Digest realm="streaming", nonce="abc123", qop="auth", opaque="xyz""#,
        )
        .unwrap();
        assert_eq!(c.realm, "streaming");
        assert_eq!(c.qop.as_deref(), Some("auth"));
        assert_eq!(c.opaque.as_deref(), Some("xyz"));
    }

    #[test]
    fn parses_challenge_without_quotes() {
        let c = parse_challenge("Digest realm=streaming, nonce=abc123").unwrap();
        assert_eq!(c.realm, "streaming");
        assert_eq!(c.nonce, "abc123");
    }

    #[test]
    fn rfc2069_vector_matches() {
        let a1 = ha1(Algorithm::Md5, "root", "AXIS_ACCC8E000AA9", "admin123");
        let a2 = ha2(Algorithm::Md5, "DESCRIBE", "rtsp://cam/axis-media/media.amp");
        let r = response(
            Algorithm::Md5,
            &a1,
            &a2,
            "0024e47aY398109708de9ccd8056c58a068a59540a99d3",
            Qop::None,
        );
        assert_eq!(r, "7daaf0f4e40fdff42cff28260f37914d");
    }

    #[test]
    fn missing_realm_is_rejected() {
        assert!(parse_challenge(r#"Digest nonce="abc""#).is_none());
    }
}
