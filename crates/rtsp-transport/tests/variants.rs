use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rtsp_endpoint::Endpoint;
use rtsp_proto::transport::{PortPair, Protocol, TransportDescriptor};
use rtsp_rtcp::Compound;
use rtsp_rtp::Rtp;
use rtsp_transport::client::TransportClient;
use rtsp_transport::tcp::TcpTransport;
use rtsp_transport::udp::UdpTransport;
use rtsp_transport::{LoopConfig, Transport, TransportError};
use tokio::net::{TcpListener, TcpStream, UdpSocket};

struct Recorder {
    rtp_count: AtomicU32,
    rtcp_count: AtomicU32,
}

impl Recorder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            rtp_count: AtomicU32::new(0),
            rtcp_count: AtomicU32::new(0),
        })
    }
}

impl TransportClient for Recorder {
    fn on_rtp(&self, _rtp: Rtp) {
        self.rtp_count.fetch_add(1, Ordering::SeqCst);
    }
    fn on_rtcp(&self, _compound: Compound) {
        self.rtcp_count.fetch_add(1, Ordering::SeqCst);
    }
    fn on_closed(&self, _error: Option<TransportError>) {}
}

#[tokio::test]
async fn udp_pair_delivers_rtp_and_rtcp_to_subscriber() -> anyhow::Result<()> {
    let mut transport = UdpTransport::new(LoopConfig::default());
    transport.prepare().await?;
    let offer = transport.on_transport_request();
    let client_port = offer.client_port.unwrap();

    let peer_rtp = UdpSocket::bind("0.0.0.0:0").await?;
    let peer_rtcp = UdpSocket::bind("0.0.0.0:0").await?;

    let echoed = TransportDescriptor {
        server_port: Some(PortPair {
            first: peer_rtp.local_addr()?.port(),
            second: peer_rtcp.local_addr()?.port(),
        }),
        ..offer.clone()
    };
    transport.on_transport_response(&echoed).await?;

    let recorder = Recorder::new();
    transport.subscribe(recorder.clone());

    let rtp = Rtp::new(96, 1, 1000, 0xfeed_face, vec![9, 9, 9]);
    peer_rtp
        .send_to(&rtp.encode(), ("127.0.0.1", client_port.first))
        .await?;

    let report = Compound {
        sub_packets: vec![rtsp_rtcp::SubPacket::Bye(rtsp_rtcp::Bye {
            ssrcs: vec![0xfeed_face],
            reason: None,
        })],
    };
    peer_rtcp
        .send_to(&report.encode(), ("127.0.0.1", client_port.second))
        .await?;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(recorder.rtp_count.load(Ordering::SeqCst) >= 1);
    assert!(recorder.rtcp_count.load(Ordering::SeqCst) >= 1);
    Ok(())
}

#[tokio::test]
async fn tcp_interleaved_offer_round_trips_through_confirm() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (endpoint, _incoming) = Endpoint::new(stream);
        TcpTransport::new(endpoint, LoopConfig::default())
    });

    let stream = TcpStream::connect(addr).await?;
    let (endpoint, _incoming) = Endpoint::new(stream);
    let mut transport = TcpTransport::new(endpoint, LoopConfig::default());
    transport.prepare().await?;

    let offer = transport.on_transport_request();
    assert_eq!(offer.protocol, Protocol::Tcp);

    let echoed = offer.clone();
    transport.on_transport_response(&echoed).await?;

    let _server_transport = server.await?;
    Ok(())
}

#[tokio::test]
async fn tcp_interleaved_rejects_mismatched_confirmation() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = listener.accept().await;
    });

    let stream = TcpStream::connect(addr).await?;
    let (endpoint, _incoming) = Endpoint::new(stream);
    let mut transport = TcpTransport::new(endpoint, LoopConfig::default());
    transport.prepare().await?;

    let mut mismatched = transport.on_transport_request();
    mismatched.interleaved = Some(PortPair { first: 40, second: 41 });

    let result = transport.on_transport_response(&mismatched).await;
    assert!(matches!(result, Err(TransportError::Mismatch)));
    Ok(())
}
