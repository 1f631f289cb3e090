//! Server-side authentication: validates Basic and Digest credentials and
//! owns the per-connection nonce lifecycle.
//!
//! Digest nonce rotation mirrors a per-client context kept alive for the
//! connection's lifetime: each peer gets its own nonce and reuse counter,
//! rather than one nonce shared across the whole server.

use std::collections::HashMap;

use ahash::AHashMap;
use rand::RngCore;
use thiserror::Error;

use crate::digest::{ha1, ha2, response, Qop};
use crate::hash::Algorithm;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ServerAuthError {
    #[error("no authorization header presented")]
    Missing,
    #[error("authorization header could not be parsed")]
    Malformed,
    #[error("unknown user {0:?}")]
    UnknownUser(String),
    #[error("nonce is stale; re-challenge with the current one")]
    StaleNonce,
    #[error("digest response did not match")]
    BadResponse,
}

pub type Result<T> = std::result::Result<T, ServerAuthError>;

/// Validates Basic credentials against a static table.
#[derive(Debug, Clone)]
pub struct BasicAuth {
    realm: String,
    credentials: AHashMap<String, String>,
}

impl BasicAuth {
    pub fn new(realm: impl Into<String>, credentials: AHashMap<String, String>) -> Self {
        Self {
            realm: realm.into(),
            credentials,
        }
    }

    pub fn challenge_header(&self) -> String {
        format!(r#"Basic realm="{}""#, self.realm)
    }

    pub fn validate(&self, authorization: &str) -> Result<String> {
        let (user, pass) =
            crate::basic::decode_authorization(authorization).ok_or(ServerAuthError::Malformed)?;

        match self.credentials.get(&user) {
            Some(expected) if expected == &pass => Ok(user),
            Some(_) => Err(ServerAuthError::BadResponse),
            None => Err(ServerAuthError::UnknownUser(user)),
        }
    }
}

/// Server-side Digest context for one connecting peer. Owns the active
/// nonce and its reuse counter; rotates the nonce once `max_reuse`
/// successful validations have occurred.
#[derive(Debug, Clone)]
pub struct DigestAuth {
    realm: String,
    credentials: AHashMap<String, String>,
    algorithm: Algorithm,
    max_reuse: u32,
    nonce: String,
    uses: u32,
}

impl DigestAuth {
    pub fn new(
        realm: impl Into<String>,
        credentials: AHashMap<String, String>,
        max_reuse: u32,
    ) -> Self {
        Self {
            realm: realm.into(),
            credentials,
            algorithm: Algorithm::Md5,
            max_reuse,
            nonce: fresh_nonce(),
            uses: 0,
        }
    }

    pub fn challenge_header(&self) -> String {
        format!(
            r#"Digest realm="{}", nonce="{}", qop="auth", algorithm={}"#,
            self.realm,
            self.nonce,
            self.algorithm.as_str()
        )
    }

    fn rotate_nonce(&mut self) {
        self.nonce = fresh_nonce();
        self.uses = 0;
    }

    /// Validate a client's `Authorization: Digest ...` header against the
    /// active nonce. `method` and `uri` are the request line's own method
    /// and request-URI, recomputed server-side rather than trusted from
    /// the header.
    ///
    /// The reuse counter is checked *before* validating the presented
    /// nonce: the `max_reuse`-th successful use still rotates the nonce
    /// as a side effect, so the very next request — even with a response
    /// that would otherwise be valid — is rejected as stale.
    pub fn validate(&mut self, authorization: &str, method: &str, uri: &str) -> Result<String> {
        let fields = parse_authorization_fields(authorization).ok_or(ServerAuthError::Malformed)?;

        let user = fields.get("username").ok_or(ServerAuthError::Malformed)?;
        let nonce = fields.get("nonce").ok_or(ServerAuthError::Malformed)?;
        let presented = fields.get("response").ok_or(ServerAuthError::Malformed)?;

        if self.uses >= self.max_reuse {
            self.rotate_nonce();
        }

        if nonce != &self.nonce {
            return Err(ServerAuthError::StaleNonce);
        }

        let pass = self
            .credentials
            .get(user)
            .ok_or_else(|| ServerAuthError::UnknownUser(user.clone()))?;

        let a1 = ha1(self.algorithm, user, &self.realm, pass);
        let a2 = ha2(self.algorithm, method, uri);

        let qop = fields.get("qop").map(String::as_str);
        let expected = if qop == Some("auth") {
            let nc = fields.get("nc").ok_or(ServerAuthError::Malformed)?;
            let cnonce = fields.get("cnonce").ok_or(ServerAuthError::Malformed)?;
            response(self.algorithm, &a1, &a2, &self.nonce, Qop::Auth { nc, cnonce })
        } else {
            response(self.algorithm, &a1, &a2, &self.nonce, Qop::None)
        };

        if &expected == presented {
            self.uses += 1;
            Ok(user.clone())
        } else {
            Err(ServerAuthError::BadResponse)
        }
    }
}

fn parse_authorization_fields(header: &str) -> Option<HashMap<String, String>> {
    let rest = header.trim().strip_prefix("Digest")?.trim();
    let mut fields = HashMap::new();

    for part in rest.split(',') {
        let part = part.trim();
        let eq = part.find('=')?;
        let key = part[..eq].trim().to_ascii_lowercase();
        let value = part[eq + 1..].trim().trim_matches('"').to_string();
        fields.insert(key, value);
    }

    Some(fields)
}

fn fresh_nonce() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> AHashMap<String, String> {
        let mut c = AHashMap::new();
        c.insert("root".to_string(), "admin123".to_string());
        c
    }

    fn digest_header(auth: &DigestAuth, user: &str, pass: &str, method: &str, uri: &str) -> String {
        let a1 = ha1(Algorithm::Md5, user, &auth_realm(auth), pass);
        let a2 = ha2(Algorithm::Md5, method, uri);
        let resp = response(Algorithm::Md5, &a1, &a2, &auth.nonce, Qop::None);
        format!(
            r#"Digest username="{user}", realm="{}", nonce="{}", uri="{uri}", response="{resp}""#,
            auth_realm(auth),
            auth.nonce
        )
    }

    fn auth_realm(auth: &DigestAuth) -> String {
        auth.realm.clone()
    }

    #[test]
    fn basic_auth_accepts_known_user() {
        let auth = BasicAuth::new("cams", credentials());
        let header = crate::basic::encode_authorization("root", "admin123");
        assert_eq!(auth.validate(&header).unwrap(), "root");
    }

    #[test]
    fn basic_auth_rejects_wrong_password() {
        let auth = BasicAuth::new("cams", credentials());
        let header = crate::basic::encode_authorization("root", "wrong");
        assert!(auth.validate(&header).is_err());
    }

    #[test]
    fn digest_auth_accepts_correct_response() {
        let mut auth = DigestAuth::new("cams", credentials(), 10);
        let header = digest_header(&auth, "root", "admin123", "DESCRIBE", "rtsp://cam/x");
        assert_eq!(
            auth.validate(&header, "DESCRIBE", "rtsp://cam/x").unwrap(),
            "root"
        );
    }

    #[test]
    fn digest_auth_rejects_wrong_password() {
        let mut auth = DigestAuth::new("cams", credentials(), 10);
        let header = digest_header(&auth, "root", "wrongpass", "DESCRIBE", "rtsp://cam/x");
        assert!(matches!(
            auth.validate(&header, "DESCRIBE", "rtsp://cam/x"),
            Err(ServerAuthError::BadResponse)
        ));
    }

    #[test]
    fn max_reuse_rotates_nonce_on_the_reuse_past_the_limit() {
        let mut auth = DigestAuth::new("cams", credentials(), 2);
        let nonce_before = auth.nonce.clone();

        for _ in 0..2 {
            let header = digest_header(&auth, "root", "admin123", "OPTIONS", "rtsp://cam/x");
            assert!(auth.validate(&header, "OPTIONS", "rtsp://cam/x").is_ok());
        }

        // Built against the still-current nonce, but validating it is what
        // triggers rotation (the reuse counter is checked first), so this
        // response arrives just after the nonce it was computed against.
        let stale_header = digest_header(&auth, "root", "admin123", "OPTIONS", "rtsp://cam/x");
        assert!(matches!(
            auth.validate(&stale_header, "OPTIONS", "rtsp://cam/x"),
            Err(ServerAuthError::StaleNonce)
        ));
        assert_ne!(auth.nonce, nonce_before);
    }
}
