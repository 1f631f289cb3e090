//! Incremental RTSP message parser.
//!
//! The wire carries plain-text requests/responses interleaved with
//! `$`-framed binary media on the same TCP byte stream. [`Parser`] accepts
//! arbitrary byte chunks (as they arrive from the socket) and yields
//! complete [`Message`]s as soon as they are available, regardless of how
//! the input was chunked.

use thiserror::Error;

use crate::message::{Binary, Headers, Message, Request, Response, RTSP_VERSION};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed request/status line: {0}")]
    BadStartLine(String),
    #[error("malformed header line: {0}")]
    BadHeader(String),
    #[error("content-length header is not a valid number")]
    BadContentLength,
    #[error("cseq header is missing or not a valid number")]
    BadCSeq,
}

pub type Result<T> = std::result::Result<T, ParseError>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Wait,
    TextHeader,
    Body {
        start_line: String,
        headers: Headers,
        expected_len: usize,
    },
    BinaryHeader,
    BinaryBody {
        channel: u8,
        expected_len: usize,
    },
}

/// A streaming parser over one RTSP connection's byte stream.
///
/// Feed it bytes with [`Parser::feed`]; every call returns the messages
/// that became complete as a result, in wire order. The parser carries no
/// assumption about chunk boundaries: splitting one input differently
/// into chunks yields the same output sequence.
#[derive(Debug)]
pub struct Parser {
    state: State,
    buf: Vec<u8>,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub fn new() -> Self {
        Self {
            state: State::Wait,
            buf: Vec::new(),
        }
    }

    /// Feed a chunk of bytes, returning every message that completed as a
    /// result of this call.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Message>> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();

        loop {
            match std::mem::replace(&mut self.state, State::Wait) {
                State::Wait => {
                    // Skip leading CR/LF between messages.
                    let mut skip = 0;
                    while skip < self.buf.len() && matches!(self.buf[skip], b'\r' | b'\n') {
                        skip += 1;
                    }
                    self.buf.drain(..skip);

                    if self.buf.is_empty() {
                        self.state = State::Wait;
                        break;
                    }

                    if self.buf[0] == b'$' {
                        self.state = State::BinaryHeader;
                    } else {
                        self.state = State::TextHeader;
                    }
                }

                State::BinaryHeader => {
                    if self.buf.len() < 4 {
                        self.state = State::BinaryHeader;
                        break;
                    }

                    let channel = self.buf[1];
                    let len = u16::from_be_bytes([self.buf[2], self.buf[3]]) as usize;
                    self.buf.drain(..4);
                    self.state = State::BinaryBody {
                        channel,
                        expected_len: len,
                    };
                }

                State::BinaryBody {
                    channel,
                    expected_len,
                } => {
                    if self.buf.len() < expected_len {
                        self.state = State::BinaryBody {
                            channel,
                            expected_len,
                        };
                        break;
                    }

                    let bytes = self.buf.drain(..expected_len).collect();
                    out.push(Message::Binary(Binary { channel, bytes }));
                    self.state = State::Wait;
                }

                State::TextHeader => {
                    let Some(header_end) = find_header_terminator(&self.buf) else {
                        self.state = State::TextHeader;
                        break;
                    };

                    let header_block = self.buf[..header_end].to_vec();
                    self.buf.drain(..header_end + 4);

                    let text = String::from_utf8_lossy(&header_block);
                    let mut lines = text.split("\r\n").filter(|l| !l.is_empty());

                    let start_line = lines
                        .next()
                        .ok_or_else(|| ParseError::BadStartLine(String::new()))?
                        .to_string();

                    // Unfold continuation lines (starting with SP/HT) onto the
                    // header they continue before splitting name from value.
                    let mut unfolded: Vec<String> = Vec::new();
                    for line in lines {
                        if line.starts_with(' ') || line.starts_with('\t') {
                            if let Some(last) = unfolded.last_mut() {
                                last.push(' ');
                                last.push_str(line.trim());
                                continue;
                            }
                        }
                        unfolded.push(line.to_string());
                    }

                    let mut headers = Headers::new();
                    for line in &unfolded {
                        let colon = line
                            .find(':')
                            .ok_or_else(|| ParseError::BadHeader(line.to_string()))?;
                        let name = line[..colon].trim();
                        let value = line[colon + 1..].trim();
                        headers.insert(name, value);
                    }

                    let expected_len = match headers.get("content-length") {
                        Some(v) => v.trim().parse().map_err(|_| ParseError::BadContentLength)?,
                        None => 0,
                    };

                    self.state = State::Body {
                        start_line,
                        headers,
                        expected_len,
                    };
                }

                State::Body {
                    start_line,
                    headers,
                    expected_len,
                } => {
                    if self.buf.len() < expected_len {
                        self.state = State::Body {
                            start_line,
                            headers,
                            expected_len,
                        };
                        break;
                    }

                    let body: Vec<u8> = self.buf.drain(..expected_len).collect();
                    out.push(parse_message(start_line, headers, body)?);
                    self.state = State::Wait;
                }
            }
        }

        Ok(out)
    }
}

fn find_header_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_message(start_line: String, headers: Headers, body: Vec<u8>) -> Result<Message> {
    let cseq = headers
        .get("cseq")
        .and_then(|v| v.trim().parse().ok())
        .ok_or(ParseError::BadCSeq)?;

    if let Some(rest) = start_line.strip_prefix(RTSP_VERSION) {
        // Response: "RTSP/1.0 200 OK"
        let rest = rest.trim_start();
        let mut parts = rest.splitn(2, ' ');
        let status = parts
            .next()
            .ok_or_else(|| ParseError::BadStartLine(start_line.clone()))?
            .parse()
            .map_err(|_| ParseError::BadStartLine(start_line.clone()))?;
        let reason = parts.next().unwrap_or("").to_string();

        Ok(Message::Response(Response {
            status,
            reason,
            cseq,
            headers,
            body,
        }))
    } else {
        // Request: "METHOD url RTSP/1.0"
        let mut parts = start_line.splitn(3, ' ');
        let method = parts
            .next()
            .ok_or_else(|| ParseError::BadStartLine(start_line.clone()))?
            .to_string();
        let url = parts
            .next()
            .ok_or_else(|| ParseError::BadStartLine(start_line.clone()))?
            .to_string();
        let version = parts.next().unwrap_or("");
        if version != RTSP_VERSION {
            return Err(ParseError::BadStartLine(start_line));
        }

        Ok(Message::Request(Request {
            method,
            url,
            cseq,
            headers,
            body,
        }))
    }
}
