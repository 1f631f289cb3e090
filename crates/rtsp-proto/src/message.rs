//! RTSP request/response/binary message types and the case-insensitive
//! header map shared between them.

use std::fmt;

/// RTSP protocol version string emitted on every request/response line.
pub const RTSP_VERSION: &str = "RTSP/1.0";

/// Case-insensitive header storage that preserves the original case of
/// each header name for re-serialization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a header. Case is preserved as given; lookup is
    /// always case-insensitive.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();

        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(&name))
        {
            entry.1 = value;
        } else {
            self.entries.push((name, value));
        }
    }

    /// # Examples
    ///
    /// ```
    /// use rtsp_proto::Headers;
    ///
    /// let mut h = Headers::new();
    /// h.insert("CSeq", "1");
    /// assert_eq!(h.get("cseq"), Some("1"));
    /// ```
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.entries {
            write!(f, "{name}: {value}\r\n")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub url: String,
    pub cseq: u32,
    pub headers: Headers,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub reason: String,
    pub cseq: u32,
    pub headers: Headers,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binary {
    pub channel: u8,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Request(Request),
    Response(Response),
    Binary(Binary),
}

impl Request {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = format!("{} {} {}\r\n", self.method, self.url, RTSP_VERSION).into_bytes();
        out.extend_from_slice(format!("CSeq: {}\r\n", self.cseq).as_bytes());
        out.extend_from_slice(self.headers.to_string().as_bytes());
        if !self.body.is_empty() {
            out.extend_from_slice(format!("Content-Length: {}\r\n", self.body.len()).as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}

impl Response {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = format!("{} {} {}\r\n", RTSP_VERSION, self.status, self.reason).into_bytes();
        out.extend_from_slice(format!("CSeq: {}\r\n", self.cseq).as_bytes());
        out.extend_from_slice(self.headers.to_string().as_bytes());
        if !self.body.is_empty() {
            out.extend_from_slice(format!("Content-Length: {}\r\n", self.body.len()).as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl Binary {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.bytes.len());
        out.push(b'$');
        out.push(self.channel);
        out.extend_from_slice(&(self.bytes.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.bytes);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive_and_preserves_original_case() {
        let mut h = Headers::new();
        h.insert("Content-Type", "application/sdp");
        assert_eq!(h.get("content-type"), Some("application/sdp"));
        assert_eq!(h.get("CONTENT-TYPE"), Some("application/sdp"));
        assert_eq!(h.iter().next().unwrap().0, "Content-Type");
    }

    #[test]
    fn insert_replaces_existing_value_keeping_original_name_case() {
        let mut h = Headers::new();
        h.insert("Session", "123");
        h.insert("session", "456");
        assert_eq!(h.get("Session"), Some("456"));
        assert_eq!(h.iter().count(), 1);
    }

    #[test]
    fn response_is_success_only_for_2xx() {
        let mut response = Response {
            status: 200,
            reason: "OK".into(),
            cseq: 1,
            headers: Headers::new(),
            body: vec![],
        };
        assert!(response.is_success());
        response.status = 401;
        assert!(!response.is_success());
    }
}
