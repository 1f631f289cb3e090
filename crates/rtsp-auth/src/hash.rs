//! The hash functions Digest authentication is allowed to use.

use md5::Md5;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Md5,
    Sha256,
}

impl Algorithm {
    /// Recognize an `algorithm` token from a `WWW-Authenticate` header,
    /// case-insensitively. Anything other than `SHA-256` is treated as MD5,
    /// matching servers that omit the field entirely (MD5 is the RFC 2069
    /// default).
    pub fn parse(token: Option<&str>) -> Self {
        match token {
            Some(t) if t.eq_ignore_ascii_case("SHA-256") => Algorithm::Sha256,
            _ => Algorithm::Md5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Md5 => "MD5",
            Algorithm::Sha256 => "SHA-256",
        }
    }
}

/// Hex-encode `H(input)` for the chosen algorithm.
///
/// # Examples
///
/// ```
/// use rtsp_auth::hash::{digest_hex, Algorithm};
///
/// assert_eq!(digest_hex(Algorithm::Md5, ""), "d41d8cd98f00b204e9800998ecf8427e");
/// ```
pub fn digest_hex(algorithm: Algorithm, input: &str) -> String {
    match algorithm {
        Algorithm::Md5 => {
            let digest = Md5::digest(input.as_bytes());
            hex(&digest)
        }
        Algorithm::Sha256 => {
            let digest = Sha256::digest(input.as_bytes());
            hex(&digest)
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(out, "{b:02x}").unwrap();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_of_empty_string_matches_known_vector() {
        assert_eq!(digest_hex(Algorithm::Md5, ""), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn algorithm_parse_defaults_to_md5() {
        assert_eq!(Algorithm::parse(None), Algorithm::Md5);
        assert_eq!(Algorithm::parse(Some("md5")), Algorithm::Md5);
        assert_eq!(Algorithm::parse(Some("sha-256")), Algorithm::Sha256);
        assert_eq!(Algorithm::parse(Some("SHA-256")), Algorithm::Sha256);
    }
}
