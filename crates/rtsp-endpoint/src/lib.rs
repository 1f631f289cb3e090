//! RTSP endpoint: owns one TCP byte stream, serializes outbound writes,
//! and multiplexes inbound parsed messages to the right waiter.
//!
//! A background task owns the read half and feeds every chunk through a
//! [`rtsp_proto::Parser`]; responses are matched to their caller by
//! `CSeq`, binary frames are routed to whichever handler registered the
//! channel, and requests are handed to the server-side dispatcher (if
//! any) over an unbounded channel.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use log::{debug, warn};
use parking_lot::Mutex;
use rtsp_auth::client::ClientAuth;
use rtsp_proto::message::{Binary, Headers, Message, Request, Response};
use rtsp_proto::{ParseError, Parser};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Error)]
pub enum EndpointError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("request timed out")]
    Timeout,
    #[error("connection closed")]
    ConnectionClosed,
    #[error(transparent)]
    Auth(#[from] rtsp_auth::client::AuthError),
    #[error("server returned {status} {reason}")]
    NonSuccess { status: u16, reason: String },
}

pub type Result<T> = std::result::Result<T, EndpointError>;

const READ_CHUNK: usize = 4096;

struct Shared {
    // Async mutex: writes hold the lock across the socket write itself,
    // so a sync lock would block the executor thread while awaiting it.
    write_half: tokio::sync::Mutex<OwnedWriteHalf>,
    next_cseq: AtomicU32,
    next_channel: AtomicU8,
    pending: Mutex<AHashMap<u32, oneshot::Sender<Response>>>,
    binary_handlers: Mutex<AHashMap<u8, mpsc::UnboundedSender<Binary>>>,
    closed: AtomicBool,
    auth: Mutex<Option<ClientAuth>>,
}

impl Shared {
    /// Writes are serialized through this lock, preserving wire order
    /// across concurrent callers of `send_request`/`send_binary`.
    async fn write_all(&self, bytes: &[u8]) -> Result<()> {
        let mut write_half = self.write_half.lock().await;
        write_half.write_all(bytes).await?;
        Ok(())
    }
}

/// One RTSP connection. Cheap to clone: all state lives behind the inner
/// `Arc`.
#[derive(Clone)]
pub struct Endpoint {
    shared: Arc<Shared>,
}

/// The server-side half of a freshly created endpoint: inbound requests
/// (anything that isn't a response or binary frame) arrive here.
pub struct IncomingRequests {
    pub rx: mpsc::UnboundedReceiver<Request>,
}

impl Endpoint {
    /// Take ownership of an already-connected TCP stream and start its
    /// background reader task.
    pub fn new(stream: TcpStream) -> (Self, IncomingRequests) {
        let (read_half, write_half) = stream.into_split();
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            write_half: tokio::sync::Mutex::new(write_half),
            next_cseq: AtomicU32::new(0),
            next_channel: AtomicU8::new(0),
            pending: Mutex::new(AHashMap::new()),
            binary_handlers: Mutex::new(AHashMap::new()),
            closed: AtomicBool::new(false),
            auth: Mutex::new(None),
        });

        tokio::spawn(reader_task(shared.clone(), read_half, requests_tx));

        (Self { shared }, IncomingRequests { rx: requests_rx })
    }

    /// Install credentials to be applied automatically on the next `401`.
    pub fn set_credentials(&self, user: impl Into<String>, pass: impl Into<String>, max_retry: u32) {
        *self.shared.auth.lock() = Some(ClientAuth::new(user, pass, max_retry));
    }

    /// Send a request, assigning the next `CSeq`, and await its matching
    /// response. A `401` carrying `WWW-Authenticate` triggers exactly one
    /// automatic retry if credentials were installed via
    /// [`Endpoint::set_credentials`].
    pub async fn send_request(
        &self,
        method: &str,
        url: &str,
        headers: Option<Headers>,
        body: Option<Vec<u8>>,
        timeout: Duration,
    ) -> Result<Response> {
        let response = self
            .send_request_once(method, url, headers.clone(), body.clone(), timeout)
            .await?;

        if response.status != 401 {
            return finish(response);
        }

        let Some(www_authenticate) = response.headers.get("www-authenticate").map(str::to_string)
        else {
            return finish(response);
        };

        let retried = {
            let mut auth_guard = self.shared.auth.lock();
            match auth_guard.as_mut() {
                Some(auth) => {
                    auth.on_challenge(&www_authenticate)?;
                    true
                }
                None => false,
            }
        };

        if !retried {
            return finish(response);
        }

        let response = self
            .send_request_once(method, url, headers, body, timeout)
            .await?;
        finish(response)
    }

    async fn send_request_once(
        &self,
        method: &str,
        url: &str,
        headers: Option<Headers>,
        body: Option<Vec<u8>>,
        timeout: Duration,
    ) -> Result<Response> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(EndpointError::ConnectionClosed);
        }

        let cseq = self.shared.next_cseq.fetch_add(1, Ordering::Relaxed) + 1;
        let mut headers = headers.unwrap_or_default();

        if let Some(authorization) = self
            .shared
            .auth
            .lock()
            .as_mut()
            .and_then(|auth| auth.authorization(method, url))
        {
            headers.insert("Authorization", authorization);
        }

        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(cseq, tx);

        let request = Request {
            method: method.to_string(),
            url: url.to_string(),
            cseq,
            headers,
            body: body.unwrap_or_default(),
        };

        self.shared.write_all(&request.encode()).await?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(EndpointError::ConnectionClosed),
            Err(_) => {
                self.shared.pending.lock().remove(&cseq);
                Err(EndpointError::Timeout)
            }
        }
    }

    /// Allocate the next even channel id for an RTP handler (RTCP
    /// conventionally follows on the next odd id) and register its
    /// receiver. Channel ids are never reused within one connection's
    /// lifetime.
    pub fn register_binary_handler(&self) -> (u8, mpsc::UnboundedReceiver<Binary>) {
        let channel = self.shared.next_channel.fetch_add(2, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.binary_handlers.lock().insert(channel, tx);
        (channel, rx)
    }

    /// Frame and send a binary payload on `channel`.
    pub async fn send_binary(&self, channel: u8, bytes: &[u8]) -> Result<()> {
        let frame = Binary {
            channel,
            bytes: bytes.to_vec(),
        };
        self.shared.write_all(&frame.encode()).await
    }

    /// Reply to a request received on the server side.
    pub async fn send_response(&self, response: &Response) -> Result<()> {
        self.shared.write_all(&response.encode()).await
    }

    /// Flush, shut down the socket, and fail every pending request with
    /// [`EndpointError::ConnectionClosed`]. Idempotent.
    pub async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        for (_, waiter) in self.shared.pending.lock().drain() {
            let _ = waiter; // dropping the sender completes the receiver with an error
        }

        let mut write_half = self.shared.write_half.lock().await;
        let _ = write_half.shutdown().await;
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

fn finish(response: Response) -> Result<Response> {
    if response.is_success() || response.status == 401 {
        Ok(response)
    } else {
        Err(EndpointError::NonSuccess {
            status: response.status,
            reason: response.reason,
        })
    }
}

async fn reader_task(
    shared: Arc<Shared>,
    mut read_half: OwnedReadHalf,
    requests_tx: mpsc::UnboundedSender<Request>,
) {
    let mut parser = Parser::new();
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        let n = match read_half.read(&mut buf).await {
            Ok(0) => {
                debug!("rtsp endpoint: peer closed the connection");
                break;
            }
            Ok(n) => n,
            Err(err) => {
                warn!("rtsp endpoint: read error: {err}");
                break;
            }
        };

        let messages = match parser.feed(&buf[..n]) {
            Ok(messages) => messages,
            Err(err) => {
                warn!("rtsp endpoint: parse error: {err}");
                continue;
            }
        };

        for message in messages {
            dispatch(&shared, &requests_tx, message);
        }
    }

    shared.closed.store(true, Ordering::Release);
    for (_, waiter) in shared.pending.lock().drain() {
        let _ = waiter;
    }
}

fn dispatch(shared: &Arc<Shared>, requests_tx: &mpsc::UnboundedSender<Request>, message: Message) {
    match message {
        Message::Response(response) => {
            if let Some(waiter) = shared.pending.lock().remove(&response.cseq) {
                let _ = waiter.send(response);
            } else {
                warn!("rtsp endpoint: no waiter for cseq {}", response.cseq);
            }
        }
        Message::Binary(binary) => {
            let handler = shared.binary_handlers.lock().get(&binary.channel).cloned();
            if let Some(handler) = handler {
                let _ = handler.send(binary);
            }
        }
        Message::Request(request) => {
            let _ = requests_tx.send(request);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trip_request_response_over_a_loopback_socket() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (endpoint, mut incoming) = Endpoint::new(stream);
            let request = incoming.rx.recv().await.unwrap();

            let mut headers = Headers::new();
            headers.insert("Public", "OPTIONS, DESCRIBE");
            let response = Response {
                status: 200,
                reason: "OK".to_string(),
                cseq: request.cseq,
                headers,
                body: vec![],
            };
            endpoint.send_response(&response).await.unwrap();
        });

        let client_stream = TcpStream::connect(addr).await.unwrap();
        let (client, _incoming) = Endpoint::new(client_stream);
        let response = client
            .send_request("OPTIONS", "rtsp://cam/live", None, None, Duration::from_secs(2))
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn channel_ids_are_never_reused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let (endpoint, _incoming) = Endpoint::new(stream);

        let (first, _) = endpoint.register_binary_handler();
        let (second, _) = endpoint.register_binary_handler();
        assert_ne!(first, second);
        assert_eq!(first % 2, 0);
        assert_eq!(second % 2, 0);
    }
}
