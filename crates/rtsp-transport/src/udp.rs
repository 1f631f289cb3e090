//! UDP-pair transport: one even-numbered RTP socket and the next odd
//! RTCP socket, connected to the peer once its `server_port` is known.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use log::{debug, warn};
use parking_lot::Mutex;
use rtsp_proto::transport::{PortPair, Protocol, TransportDescriptor};
use rtsp_rtcp::{stats::SourceStats, Compound};
use rtsp_rtp::Rtp;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::client::TransportClient;
use crate::header::{confirm_udp, udp_offer};
use crate::watchdog::{self, LastReceived};
use crate::{LoopConfig, Result, Transport, TransportError};

const PORT_ALLOCATION_ATTEMPTS: u32 = 16;

pub struct UdpTransport {
    rtp_socket: Option<Arc<UdpSocket>>,
    rtcp_socket: Option<Arc<UdpSocket>>,
    client_rtp_port: u16,
    client_rtcp_port: u16,
    server_port: Mutex<Option<(u16, u16)>>,
    client: Arc<Mutex<Option<Arc<dyn TransportClient>>>>,
    stats: Arc<Mutex<Option<SourceStats>>>,
    last_received: Arc<LastReceived>,
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
    config: LoopConfig,
}

impl UdpTransport {
    pub fn new(config: LoopConfig) -> Self {
        Self {
            rtp_socket: None,
            rtcp_socket: None,
            client_rtp_port: 0,
            client_rtcp_port: 0,
            server_port: Mutex::new(None),
            client: Arc::new(Mutex::new(None)),
            stats: Arc::new(Mutex::new(None)),
            last_received: LastReceived::new(),
            running: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
            config,
        }
    }

    /// Bind a consecutive even/odd port pair, retrying with a new
    /// candidate on collision (the odd RTCP port being taken by someone
    /// else).
    async fn bind_pair() -> Result<(UdpSocket, UdpSocket, u16, u16)> {
        for _ in 0..PORT_ALLOCATION_ATTEMPTS {
            let rtp = UdpSocket::bind("0.0.0.0:0").await?;
            let rtp_port = rtp.local_addr()?.port();
            let even_port = rtp_port & !1;

            if even_port != rtp_port {
                continue;
            }

            match UdpSocket::bind(("0.0.0.0", even_port + 1)).await {
                Ok(rtcp) => return Ok((rtp, rtcp, even_port, even_port + 1)),
                Err(_) => continue,
            }
        }

        Err(TransportError::NoPortAvailable(PORT_ALLOCATION_ATTEMPTS))
    }

    fn start_receive_loops(&mut self) {
        self.running.store(true, Ordering::Release);

        let rtp_socket = self.rtp_socket.clone().expect("prepare() was called");
        let rtcp_socket = self.rtcp_socket.clone().expect("prepare() was called");
        let client = self.client.clone();
        let stats = self.stats.clone();
        let last_received = self.last_received.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(rtp_receive_loop(
            rtp_socket,
            client.clone(),
            stats,
            last_received.clone(),
            cancel.clone(),
        ));
        tokio::spawn(rtcp_receive_loop(rtcp_socket, client.clone(), cancel.clone()));

        let running = self.running.clone();
        let watchdog_cancel = cancel.clone();
        watchdog::spawn(last_received, self.config.idle_timeout, cancel, move || {
            running.store(false, Ordering::Release);
            watchdog_cancel.cancel();
            if let Some(handler) = client.lock().clone() {
                handler.on_closed(Some(TransportError::Timeout));
            }
        });
    }
}

async fn rtp_receive_loop(
    socket: Arc<UdpSocket>,
    client: Arc<Mutex<Option<Arc<dyn TransportClient>>>>,
    stats: Arc<Mutex<Option<SourceStats>>>,
    last_received: Arc<LastReceived>,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; 2048];

    loop {
        let n = tokio::select! {
            _ = cancel.cancelled() => return,
            result = socket.recv(&mut buf) => match result {
                Ok(n) => n,
                Err(err) => {
                    warn!("rtsp transport: udp rtp recv error: {err}");
                    return;
                }
            },
        };

        last_received.mark();

        match Rtp::decode(&buf[..n]) {
            Ok(rtp) => {
                record_rtp_stats(&stats, &rtp);
                if let Some(handler) = client.lock().clone() {
                    handler.on_rtp(rtp);
                }
            }
            Err(err) => debug!("rtsp transport: dropped malformed rtp packet: {err}"),
        }
    }
}

fn record_rtp_stats(stats: &Mutex<Option<SourceStats>>, rtp: &Rtp) {
    let now_units = now_unix_millis();
    let mut guard = stats.lock();
    match guard.as_mut() {
        Some(existing) => existing.on_rtp(rtp.sequence, rtp.timestamp, now_units as u32),
        None => *guard = Some(SourceStats::new(rtp.ssrc, rtp.sequence)),
    }
}

fn now_unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

async fn rtcp_receive_loop(
    socket: Arc<UdpSocket>,
    client: Arc<Mutex<Option<Arc<dyn TransportClient>>>>,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; 2048];

    loop {
        let n = tokio::select! {
            _ = cancel.cancelled() => return,
            result = socket.recv(&mut buf) => match result {
                Ok(n) => n,
                Err(err) => {
                    warn!("rtsp transport: udp rtcp recv error: {err}");
                    return;
                }
            },
        };

        match Compound::decode(&buf[..n]) {
            Ok(compound) => {
                if let Some(handler) = client.lock().clone() {
                    handler.on_rtcp(compound);
                }
            }
            Err(err) => debug!("rtsp transport: dropped malformed rtcp packet: {err}"),
        }
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn prepare(&mut self) -> Result<()> {
        let (rtp, rtcp, rtp_port, rtcp_port) = Self::bind_pair().await?;
        self.rtp_socket = Some(Arc::new(rtp));
        self.rtcp_socket = Some(Arc::new(rtcp));
        self.client_rtp_port = rtp_port;
        self.client_rtcp_port = rtcp_port;
        Ok(())
    }

    fn on_transport_request(&self) -> TransportDescriptor {
        udp_offer(self.client_rtp_port, self.client_rtcp_port)
    }

    async fn on_transport_response(&mut self, descriptor: &TransportDescriptor) -> Result<()> {
        let offer = self.on_transport_request();
        let server_port = confirm_udp(&offer, descriptor).ok_or(TransportError::Mismatch)?;

        self.rtp_socket
            .as_ref()
            .expect("prepare() was called")
            .connect(("0.0.0.0", server_port.first))
            .await?;
        self.rtcp_socket
            .as_ref()
            .expect("prepare() was called")
            .connect(("0.0.0.0", server_port.second))
            .await?;

        *self.server_port.lock() = Some((server_port.first, server_port.second));
        self.start_receive_loops();
        Ok(())
    }

    fn subscribe(&self, client: Arc<dyn TransportClient>) {
        *self.client.lock() = Some(client);
    }

    fn unsubscribe(&self) {
        *self.client.lock() = None;
    }

    async fn send_rtp(&self, rtp: &Rtp) -> Result<()> {
        let socket = self.rtp_socket.as_ref().ok_or(TransportError::Mismatch)?;
        socket.send(&rtp.encode()).await?;
        Ok(())
    }

    async fn send_rtcp_report(&self, report: &Compound) -> Result<()> {
        let socket = self.rtcp_socket.as_ref().ok_or(TransportError::Mismatch)?;
        socket.send(&report.encode()).await?;
        Ok(())
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl UdpTransport {
    /// Shared handle to this transport's reception statistics, for a
    /// caller that wants to drive its own RTCP reporting loop (see
    /// `rtsp_transport::rtcp_loop`).
    pub fn stats_handle(&self) -> Arc<Mutex<Option<SourceStats>>> {
        self.stats.clone()
    }

    /// Server-side counterpart to `on_transport_response`: the client's
    /// offered `client_port` is accepted as-is (there is nothing for the
    /// server to confirm against its own prior offer), and connected to
    /// using the control connection's peer address.
    pub async fn connect_to(&mut self, peer_ip: std::net::IpAddr, remote_ports: PortPair) -> Result<()> {
        self.rtp_socket
            .as_ref()
            .expect("prepare() was called")
            .connect((peer_ip, remote_ports.first))
            .await?;
        self.rtcp_socket
            .as_ref()
            .expect("prepare() was called")
            .connect((peer_ip, remote_ports.second))
            .await?;

        *self.server_port.lock() = Some((remote_ports.first, remote_ports.second));
        self.start_receive_loops();
        Ok(())
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
