//! Incremental RTSP 1.0 message parser and wire types.
//!
//! The parser in [`parser`] consumes arbitrary byte chunks from a TCP
//! stream and emits [`message::Message`]s, tolerating `$`-framed binary
//! media interleaved with text requests/responses. [`transport`] parses
//! and builds `Transport` header values.

pub mod message;
pub mod parser;
pub mod transport;

pub use message::{Binary, Headers, Message, Request, Response};
pub use parser::{ParseError, Parser};
