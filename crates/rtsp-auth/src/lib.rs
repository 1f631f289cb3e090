//! Basic and Digest authentication for both sides of an RTSP conversation.

pub mod basic;
pub mod client;
pub mod digest;
pub mod hash;
pub mod server;

pub use client::{AuthError, ClientAuth};
pub use server::{BasicAuth, DigestAuth, ServerAuthError};
