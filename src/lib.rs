//! A pure rust-implemented asynchronous RTSP 1.0 client/server library.
//!
//! [`client::MediaSession`] drives one client-side conversation through
//! OPTIONS/DESCRIBE/SETUP/PLAY; [`server::Server`] accepts connections and
//! dispatches them against a pluggable [`server::Streamer`]. Both sides
//! share [`any_transport::AnyTransport`] to move RTP/RTCP over either a
//! UDP-pair or a TCP-interleaved transport.

pub mod any_transport;
pub mod client;
pub mod config;
pub mod error;
pub mod sdp;
pub mod server;

pub use error::{Result, RtspError};
