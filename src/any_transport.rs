//! A concrete sum type over the two transport kinds, so one media session
//! can hold a heterogeneous list of streams (some TCP-interleaved, some
//! UDP) while still satisfying `rtcp_loop::spawn`'s concrete-type bound.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rtsp_proto::transport::TransportDescriptor;
use rtsp_rtcp::stats::SourceStats;
use rtsp_rtcp::Compound;
use rtsp_transport::tcp::TcpTransport;
use rtsp_transport::udp::UdpTransport;
use rtsp_transport::{Result, Transport, TransportClient};

pub enum AnyTransport {
    Udp(UdpTransport),
    Tcp(TcpTransport),
}

impl AnyTransport {
    pub fn stats_handle(&self) -> Arc<Mutex<Option<SourceStats>>> {
        match self {
            Self::Udp(t) => t.stats_handle(),
            Self::Tcp(t) => t.stats_handle(),
        }
    }

    /// Server-side UDP wiring: connect this transport's socket pair to
    /// the client's announced `client_port` at `peer_ip`. A no-op for the
    /// TCP-interleaved variant, whose channels are already live once
    /// `prepare()` has run.
    pub async fn connect_udp_peer(
        &mut self,
        peer_ip: std::net::IpAddr,
        remote_ports: rtsp_proto::transport::PortPair,
    ) -> rtsp_transport::Result<()> {
        match self {
            Self::Udp(t) => t.connect_to(peer_ip, remote_ports).await,
            Self::Tcp(_) => Ok(()),
        }
    }
}

#[async_trait]
impl Transport for AnyTransport {
    async fn prepare(&mut self) -> Result<()> {
        match self {
            Self::Udp(t) => t.prepare().await,
            Self::Tcp(t) => t.prepare().await,
        }
    }

    fn on_transport_request(&self) -> TransportDescriptor {
        match self {
            Self::Udp(t) => t.on_transport_request(),
            Self::Tcp(t) => t.on_transport_request(),
        }
    }

    async fn on_transport_response(&mut self, descriptor: &TransportDescriptor) -> Result<()> {
        match self {
            Self::Udp(t) => t.on_transport_response(descriptor).await,
            Self::Tcp(t) => t.on_transport_response(descriptor).await,
        }
    }

    fn subscribe(&self, client: Arc<dyn TransportClient>) {
        match self {
            Self::Udp(t) => t.subscribe(client),
            Self::Tcp(t) => t.subscribe(client),
        }
    }

    fn unsubscribe(&self) {
        match self {
            Self::Udp(t) => t.unsubscribe(),
            Self::Tcp(t) => t.unsubscribe(),
        }
    }

    async fn send_rtp(&self, rtp: &rtsp_rtp::Rtp) -> Result<()> {
        match self {
            Self::Udp(t) => t.send_rtp(rtp).await,
            Self::Tcp(t) => t.send_rtp(rtp).await,
        }
    }

    async fn send_rtcp_report(&self, report: &Compound) -> Result<()> {
        match self {
            Self::Udp(t) => t.send_rtcp_report(report).await,
            Self::Tcp(t) => t.send_rtcp_report(report).await,
        }
    }

    fn running(&self) -> bool {
        match self {
            Self::Udp(t) => t.running(),
            Self::Tcp(t) => t.running(),
        }
    }
}

/// Build the `build` closure `rtcp_loop::spawn` calls each tick: `None`
/// until this side has observed at least one RTP packet, otherwise an
/// RR + SDES/CNAME compound from the running statistics.
pub fn rtcp_builder(
    stats: Arc<Mutex<Option<SourceStats>>>,
    cname: String,
) -> impl FnMut() -> Option<Compound> {
    move || {
        let now = now_unix();
        let mut guard = stats.lock();
        let source = guard.as_mut()?;
        let report = source.report_block(now);
        let ssrc = source.ssrc;

        Some(Compound {
            sub_packets: vec![
                rtsp_rtcp::SubPacket::Rr(rtsp_rtcp::ReceiverReport {
                    ssrc,
                    reports: vec![report],
                }),
                rtsp_rtcp::SubPacket::Sdes(rtsp_rtcp::Sdes {
                    chunks: vec![rtsp_rtcp::SdesChunk {
                        ssrc,
                        items: vec![rtsp_rtcp::SdesItem::cname(&cname)],
                    }],
                }),
            ],
        })
    }
}

fn now_unix() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
