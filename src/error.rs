//! Top-level error type, composing every subordinate crate's error.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RtspError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Parse(#[from] rtsp_proto::ParseError),
    #[error(transparent)]
    Rtp(#[from] rtsp_rtp::RtpError),
    #[error(transparent)]
    Rtcp(#[from] rtsp_rtcp::RtcpError),
    #[error(transparent)]
    Endpoint(#[from] rtsp_endpoint::EndpointError),
    #[error(transparent)]
    Transport(#[from] rtsp_transport::TransportError),
    #[error(transparent)]
    Auth(#[from] rtsp_auth::AuthError),
    #[error("no stream matching {0:?}")]
    StreamNotFound(String),
    #[error("no transport alternative in the request was supported")]
    InvalidTransport,
    #[error("a session header was required but missing")]
    MissingSession,
    #[error("unknown session id {0:?}")]
    UnknownSession(String),
    #[error("server returned {status} {reason}")]
    NonSuccess { status: u16, reason: String },
    #[error("no Content-Base, request URL, or SDP control attribute to resolve against")]
    NoSetupUrl,
    #[error("request was not authorized")]
    Unauthorized,
}

pub type Result<T> = std::result::Result<T, RtspError>;
