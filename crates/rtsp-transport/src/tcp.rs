//! TCP-interleaved transport: media rides the same RTSP socket as the
//! text conversation, framed with `$`-prefixed binary messages.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use log::debug;
use parking_lot::Mutex;
use rtsp_endpoint::Endpoint;
use rtsp_proto::transport::TransportDescriptor;
use rtsp_rtcp::{stats::SourceStats, Compound};
use rtsp_rtp::Rtp;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::client::TransportClient;
use crate::header::{confirm_tcp, tcp_offer};
use crate::watchdog::{self, LastReceived};
use crate::{LoopConfig, Result, Transport, TransportError};

pub struct TcpTransport {
    endpoint: Endpoint,
    rtp_channel: u8,
    rtcp_channel: u8,
    client: Arc<Mutex<Option<Arc<dyn TransportClient>>>>,
    stats: Arc<Mutex<Option<SourceStats>>>,
    last_received: Arc<LastReceived>,
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl TcpTransport {
    /// Reserve the next RTP/RTCP channel pair on `endpoint` and start its
    /// dispatch loops, along with the idle-timeout watchdog from `config`.
    pub fn new(endpoint: Endpoint, config: LoopConfig) -> Self {
        let (rtp_channel, rtp_rx) = endpoint.register_binary_handler();
        let (rtcp_channel, rtcp_rx) = endpoint.register_binary_handler();

        let client: Arc<Mutex<Option<Arc<dyn TransportClient>>>> = Arc::new(Mutex::new(None));
        let stats = Arc::new(Mutex::new(None));
        let last_received = LastReceived::new();
        let running = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();

        tokio::spawn(rtp_dispatch_loop(
            rtp_rx,
            client.clone(),
            stats.clone(),
            last_received.clone(),
            cancel.clone(),
        ));
        tokio::spawn(rtcp_dispatch_loop(rtcp_rx, client.clone(), cancel.clone()));

        let watchdog_running = running.clone();
        let watchdog_client = client.clone();
        let watchdog_cancel = cancel.clone();
        watchdog::spawn(
            last_received.clone(),
            config.idle_timeout,
            cancel.clone(),
            move || {
                watchdog_running.store(false, Ordering::Release);
                watchdog_cancel.cancel();
                if let Some(handler) = watchdog_client.lock().clone() {
                    handler.on_closed(Some(TransportError::Timeout));
                }
            },
        );

        Self {
            endpoint,
            rtp_channel,
            rtcp_channel,
            client,
            stats,
            last_received,
            running,
            cancel,
        }
    }
}

async fn rtp_dispatch_loop(
    mut rx: mpsc::UnboundedReceiver<rtsp_proto::message::Binary>,
    client: Arc<Mutex<Option<Arc<dyn TransportClient>>>>,
    stats: Arc<Mutex<Option<SourceStats>>>,
    last_received: Arc<LastReceived>,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return,
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => return,
            },
        };

        last_received.mark();

        match Rtp::decode(&frame.bytes) {
            Ok(rtp) => {
                record_rtp_stats(&stats, &rtp);
                if let Some(handler) = client.lock().clone() {
                    handler.on_rtp(rtp);
                }
            }
            Err(err) => debug!("rtsp transport: dropped malformed interleaved rtp frame: {err}"),
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

async fn rtcp_dispatch_loop(
    mut rx: mpsc::UnboundedReceiver<rtsp_proto::message::Binary>,
    client: Arc<Mutex<Option<Arc<dyn TransportClient>>>>,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return,
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => return,
            },
        };

        match Compound::decode(&frame.bytes) {
            Ok(compound) => {
                if let Some(handler) = client.lock().clone() {
                    handler.on_rtcp(compound);
                }
            }
            Err(err) => debug!("rtsp transport: dropped malformed interleaved rtcp frame: {err}"),
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn prepare(&mut self) -> Result<()> {
        // Channels were already reserved in `new`; nothing further to
        // allocate for the TCP-interleaved variant.
        Ok(())
    }

    fn on_transport_request(&self) -> TransportDescriptor {
        tcp_offer(self.rtp_channel, self.rtcp_channel)
    }

    async fn on_transport_response(&mut self, descriptor: &TransportDescriptor) -> Result<()> {
        let offer = self.on_transport_request();
        if !confirm_tcp(&offer, descriptor) {
            return Err(TransportError::Mismatch);
        }
        Ok(())
    }

    fn subscribe(&self, client: Arc<dyn TransportClient>) {
        *self.client.lock() = Some(client);
    }

    fn unsubscribe(&self) {
        *self.client.lock() = None;
    }

    async fn send_rtp(&self, rtp: &Rtp) -> Result<()> {
        self.endpoint
            .send_binary(self.rtp_channel, &rtp.encode())
            .await?;
        Ok(())
    }

    async fn send_rtcp_report(&self, report: &Compound) -> Result<()> {
        self.endpoint
            .send_binary(self.rtcp_channel, &report.encode())
            .await?;
        Ok(())
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::Acquire) && !self.endpoint.is_closed()
    }
}

impl TcpTransport {
    /// Shared handle to this transport's reception statistics, for a
    /// caller that wants to drive its own RTCP reporting loop (see
    /// `rtsp_transport::rtcp_loop`).
    pub fn stats_handle(&self) -> Arc<Mutex<Option<SourceStats>>> {
        self.stats.clone()
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtsp_proto::transport::{PortPair, Protocol};
    use tokio::net::{TcpListener, TcpStream};

    #[tokio::test]
    async fn transport_request_offers_the_reserved_channel_pair() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let (endpoint, _incoming) = Endpoint::new(stream);
        let transport = TcpTransport::new(endpoint, LoopConfig::default());

        let offer = transport.on_transport_request();
        assert_eq!(offer.protocol, Protocol::Tcp);
        assert_eq!(offer.interleaved, Some(PortPair { first: 0, second: 1 }));
    }
}
