//! UDP-pair and TCP-interleaved delivery of RTP/RTCP, the periodic RTCP
//! reporting loop, and the idle-timeout watchdog.

pub mod client;
pub mod header;
pub mod rtcp_loop;
pub mod tcp;
pub mod udp;
pub mod watchdog;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rtsp_proto::transport::TransportDescriptor;
use rtsp_rtcp::Compound;
use rtsp_rtp::Rtp;
use thiserror::Error;

pub use client::TransportClient;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Endpoint(#[from] rtsp_endpoint::EndpointError),
    #[error("no port pair available after {0} attempts")]
    NoPortAvailable(u32),
    #[error("the peer's transport response did not match our offer")]
    Mismatch,
    #[error("transport has been idle for longer than the configured timeout")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Shared surface of the UDP-pair and TCP-interleaved variants. `stream_number`
/// identifies which SETUP (and thus which media stream) a call concerns when
/// one transport instance is reused across them; each variant in this crate
/// models one stream and ignores the index.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Allocate whatever resources (sockets, channel ids) this transport
    /// needs before a `Transport` header can be offered.
    async fn prepare(&mut self) -> Result<()>;

    /// Build this transport's half of the `Transport` header for the next
    /// SETUP request.
    fn on_transport_request(&self) -> TransportDescriptor;

    /// Validate and absorb the server's echoed `Transport` header.
    async fn on_transport_response(&mut self, descriptor: &TransportDescriptor) -> Result<()>;

    fn subscribe(&self, client: Arc<dyn TransportClient>);
    fn unsubscribe(&self);

    /// Push one RTP packet out to the peer (server-side media fan-out).
    async fn send_rtp(&self, rtp: &Rtp) -> Result<()>;

    async fn send_rtcp_report(&self, report: &Compound) -> Result<()>;

    fn running(&self) -> bool;
}

/// Parameters shared by both transport variants' background loops.
#[derive(Debug, Clone, Copy)]
pub struct LoopConfig {
    pub rtcp: rtsp_rtcp::IntervalParams,
    pub idle_timeout: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            rtcp: rtsp_rtcp::IntervalParams::default(),
            idle_timeout: Duration::from_secs(10),
        }
    }
}
