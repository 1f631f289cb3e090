//! Client-side media session: drives one RTSP conversation through
//! OPTIONS → DESCRIBE → SETUP(×N) → PLAY, and hands received RTP/RTCP to
//! the caller through an mpsc channel.

pub mod time;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use parking_lot::Mutex;
use rtsp_proto::message::Headers;
use rtsp_rtcp::Compound;
use rtsp_rtp::Rtp;
use rtsp_transport::{rtcp_loop, Transport, TransportClient, TransportError};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::any_transport::{rtcp_builder, AnyTransport};
use crate::config::ClientOptions;
use crate::error::{Result, RtspError};
use crate::sdp::SessionDescription;

const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 60;
const KEEPALIVE_MARGIN: Duration = Duration::from_secs(5);

/// Where a `MediaSession` currently stands in the RTSP exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Init,
    Described,
    Ready,
    Playing,
    Closed,
}

/// What a caller receives off a session's event channel.
pub enum MediaEvent {
    Rtp(Rtp),
    Rtcp(Compound),
    Closed(Option<TransportError>),
}

/// Bridges a `Transport`'s callback interface onto an mpsc channel, so a
/// caller can consume media as a stream of events rather than callbacks.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<MediaEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<MediaEvent>) -> Self {
        Self { tx }
    }
}

impl TransportClient for ChannelSink {
    fn on_rtp(&self, rtp: Rtp) {
        let _ = self.tx.send(MediaEvent::Rtp(rtp));
    }

    fn on_rtcp(&self, compound: Compound) {
        let _ = self.tx.send(MediaEvent::Rtcp(compound));
    }

    fn on_closed(&self, error: Option<TransportError>) {
        let _ = self.tx.send(MediaEvent::Closed(error));
    }
}

/// A single set-up media stream: its transport and the receiver end of
/// its event channel.
pub struct MediaStream {
    pub media_type: String,
    pub transport: Arc<AnyTransport>,
    pub events: mpsc::UnboundedReceiver<MediaEvent>,
    rtcp_cancel: CancellationToken,
}

impl Drop for MediaStream {
    fn drop(&mut self) {
        self.rtcp_cancel.cancel();
    }
}

/// One client-driven RTSP conversation.
pub struct MediaSession {
    endpoint: rtsp_endpoint::Endpoint,
    url: String,
    content_base: Mutex<String>,
    session_id: Mutex<Option<String>>,
    timeout: Mutex<Duration>,
    state: Mutex<State>,
    request_timeout: Duration,
    rtcp_bandwidth: rtsp_rtcp::IntervalParams,
    transport_config: rtsp_transport::LoopConfig,
    keepalive_cancel: CancellationToken,
}

impl MediaSession {
    /// Connect to `url`'s host:port and start an empty session; call
    /// [`MediaSession::open`] next to run the DESCRIBE/SETUP handshake.
    /// `options.watchdog_timeout` governs the idle-timeout watchdog of
    /// every transport this session later creates through `open`.
    pub async fn connect(url: &str, options: ClientOptions) -> Result<Self> {
        let authority = parse_authority(url)?;
        let stream = tokio::time::timeout(options.connect_timeout, TcpStream::connect(&authority))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"))??;
        let (endpoint, _incoming) = rtsp_endpoint::Endpoint::new(stream);

        Ok(Self {
            endpoint,
            url: url.to_string(),
            content_base: Mutex::new(url.to_string()),
            session_id: Mutex::new(None),
            timeout: Mutex::new(Duration::from_secs(DEFAULT_SESSION_TIMEOUT_SECS)),
            state: Mutex::new(State::Init),
            request_timeout: options.request_timeout,
            rtcp_bandwidth: rtsp_rtcp::IntervalParams::default(),
            transport_config: rtsp_transport::LoopConfig {
                rtcp: rtsp_rtcp::IntervalParams::default(),
                idle_timeout: options.watchdog_timeout,
            },
            keepalive_cancel: CancellationToken::new(),
        })
    }

    pub fn set_credentials(&self, user: impl Into<String>, pass: impl Into<String>, max_retry: u32) {
        self.endpoint.set_credentials(user, pass, max_retry);
    }

    pub fn state(&self) -> State {
        *self.state.lock()
    }

    /// The connection this session negotiates over, for callers that need
    /// to build a [`crate::any_transport::AnyTransport::Tcp`] sharing it.
    pub fn endpoint(&self) -> &rtsp_endpoint::Endpoint {
        &self.endpoint
    }

    /// Run OPTIONS, then DESCRIBE, then SETUP for every media type in
    /// `media_types`. `describe_sdp` converts the DESCRIBE body into a
    /// [`SessionDescription`]; SDP grammar itself is out of this crate's
    /// scope.
    pub async fn open(
        &self,
        media_types: &[&str],
        describe_sdp: impl Fn(&[u8]) -> Result<SessionDescription>,
        make_transport: impl Fn(rtsp_transport::LoopConfig) -> AnyTransport,
    ) -> Result<Vec<MediaStream>> {
        self.options().await?;

        let response = self
            .endpoint
            .send_request("DESCRIBE", &self.url, None, None, self.request_timeout)
            .await?;

        if let Some(base) = response.headers.get("content-base") {
            *self.content_base.lock() = base.to_string();
        }

        let description = describe_sdp(&response.body)?;
        *self.state.lock() = State::Described;

        let session_control = resolve_control(
            &self.content_base.lock(),
            description.control.as_deref(),
        );

        let mut streams = Vec::with_capacity(media_types.len());

        for media_type in media_types {
            let media = description
                .media
                .iter()
                .find(|m| &m.media_type == media_type)
                .ok_or_else(|| RtspError::StreamNotFound((*media_type).to_string()))?;

            let setup_url = resolve_control(&session_control, media.control.as_deref());

            let mut transport = make_transport(self.transport_config);
            transport.prepare().await?;
            let offer = transport.on_transport_request();

            let mut headers = Headers::new();
            headers.insert("Transport", rtsp_proto::transport::build(&offer));
            if let Some(session_id) = self.session_id.lock().clone() {
                headers.insert("Session", session_id);
            }

            let response = self
                .endpoint
                .send_request("SETUP", &setup_url, Some(headers), None, self.request_timeout)
                .await?;

            let transport_header = response
                .headers
                .get("transport")
                .ok_or(RtspError::InvalidTransport)?;
            let echoed = rtsp_proto::transport::parse(transport_header)
                .map_err(|_| RtspError::InvalidTransport)?
                .into_iter()
                .next()
                .ok_or(RtspError::InvalidTransport)?;

            transport.on_transport_response(&echoed).await?;

            if let Some(session_header) = response.headers.get("session") {
                let (id, timeout) = parse_session_header(session_header);
                *self.session_id.lock() = Some(id);
                if let Some(timeout) = timeout {
                    *self.timeout.lock() = Duration::from_secs(timeout);
                }
            }

            let (tx, events) = mpsc::unbounded_channel();
            let transport = Arc::new(transport);
            transport.subscribe(Arc::new(ChannelSink::new(tx)));

            let rtcp_cancel = CancellationToken::new();
            let stats = transport.stats_handle();
            let cname = format!("rtsp-rs@{}", self.url);
            rtcp_loop::spawn(
                transport.clone(),
                rtcp_builder(stats, cname),
                self.rtcp_bandwidth,
                rtcp_cancel.clone(),
            );

            streams.push(MediaStream {
                media_type: media.media_type.clone(),
                transport,
                events,
                rtcp_cancel,
            });
        }

        *self.state.lock() = State::Ready;
        Ok(streams)
    }

    async fn options(&self) -> Result<()> {
        self.endpoint
            .send_request("OPTIONS", &self.url, None, None, self.request_timeout)
            .await?;
        Ok(())
    }

    /// Send PLAY, optionally with a `Range` header, and start the
    /// keep-alive background loop.
    pub async fn play(&self, range: Option<&str>) -> Result<()> {
        let mut headers = Headers::new();
        if let Some(session_id) = self.session_id.lock().clone() {
            headers.insert("Session", session_id);
        }
        if let Some(range) = range {
            headers.insert("Range", range);
        }

        self.endpoint
            .send_request("PLAY", &self.url, Some(headers), None, self.request_timeout)
            .await?;

        *self.state.lock() = State::Playing;
        self.spawn_keepalive();
        Ok(())
    }

    fn spawn_keepalive(&self) {
        let endpoint = self.endpoint.clone();
        let url = self.url.clone();
        let session_id = self.session_id.lock().clone();
        let interval = self.timeout.lock().saturating_sub(KEEPALIVE_MARGIN);
        let cancel = self.keepalive_cancel.clone();
        let request_timeout = self.request_timeout;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(interval) => {}
                }

                let mut headers = Headers::new();
                if let Some(session_id) = &session_id {
                    headers.insert("Session", session_id.clone());
                }

                if let Err(err) = endpoint
                    .send_request("OPTIONS", &url, Some(headers), None, request_timeout)
                    .await
                {
                    warn!("rtsp client: keep-alive request failed: {err}");
                }
            }
        });
    }

    /// Send TEARDOWN and move to `Closed`. Idempotent.
    pub async fn teardown(&self) -> Result<()> {
        if *self.state.lock() == State::Closed {
            return Ok(());
        }

        let mut headers = Headers::new();
        if let Some(session_id) = self.session_id.lock().clone() {
            headers.insert("Session", session_id);
        }

        let _ = self
            .endpoint
            .send_request("TEARDOWN", &self.url, Some(headers), None, self.request_timeout)
            .await;

        self.keepalive_cancel.cancel();
        *self.state.lock() = State::Closed;
        self.endpoint.close().await;
        Ok(())
    }
}

fn parse_authority(url: &str) -> Result<String> {
    let without_scheme = url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(url);
    let authority = without_scheme.split('/').next().unwrap_or(without_scheme);

    if authority.contains(':') {
        Ok(authority.to_string())
    } else {
        Ok(format!("{authority}:554"))
    }
}

fn parse_session_header(value: &str) -> (String, Option<u64>) {
    let mut parts = value.splitn(2, ';');
    let id = parts.next().unwrap_or(value).trim().to_string();
    let timeout = parts
        .next()
        .and_then(|rest| rest.trim().strip_prefix("timeout="))
        .and_then(|n| n.trim().parse().ok());
    (id, timeout)
}

/// Whether `url` is absolute (carries its own scheme) rather than
/// relative to a base.
fn is_absolute(url: &str) -> bool {
    url.contains("://")
}

/// Apply RFC 2326 appendix C.1.1's control-URL resolution: `*` keeps the
/// base unchanged, an absolute control URL replaces it, and anything else
/// is appended as a path segment.
fn join_relative(base: &str, relative: &str) -> String {
    if base.ends_with('/') {
        format!("{base}{relative}")
    } else {
        format!("{base}/{relative}")
    }
}

fn resolve_control(base: &str, control: Option<&str>) -> String {
    match control {
        None | Some("*") => base.to_string(),
        Some(control) if is_absolute(control) => control.to_string(),
        Some(control) => join_relative(base, control),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_control_keeps_base_for_wildcard() {
        assert_eq!(
            resolve_control("rtsp://cam/stream", Some("*")),
            "rtsp://cam/stream"
        );
    }

    #[test]
    fn resolve_control_replaces_base_with_an_absolute_control_url() {
        assert_eq!(
            resolve_control("rtsp://cam/stream", Some("rtsp://cam/other")),
            "rtsp://cam/other"
        );
    }

    #[test]
    fn resolve_control_appends_a_relative_control_url() {
        assert_eq!(
            resolve_control("rtsp://cam/stream", Some("track1")),
            "rtsp://cam/stream/track1"
        );
    }

    #[test]
    fn resolve_control_appends_without_doubling_the_slash() {
        assert_eq!(
            resolve_control("rtsp://cam/stream/", Some("track1")),
            "rtsp://cam/stream/track1"
        );
    }

    #[test]
    fn resolve_control_falls_back_to_base_when_absent() {
        assert_eq!(resolve_control("rtsp://cam/stream", None), "rtsp://cam/stream");
    }

    #[test]
    fn parse_authority_adds_default_port() {
        assert_eq!(parse_authority("rtsp://cam/stream").unwrap(), "cam:554");
    }

    #[test]
    fn parse_authority_keeps_explicit_port() {
        assert_eq!(
            parse_authority("rtsp://cam:8554/stream").unwrap(),
            "cam:8554"
        );
    }

    #[test]
    fn parse_session_header_splits_id_and_timeout() {
        assert_eq!(
            parse_session_header("12345678;timeout=60"),
            ("12345678".to_string(), Some(60))
        );
    }

    #[test]
    fn parse_session_header_defaults_timeout_when_absent() {
        assert_eq!(
            parse_session_header("12345678"),
            ("12345678".to_string(), None)
        );
    }
}
