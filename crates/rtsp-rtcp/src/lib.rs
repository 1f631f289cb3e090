//! RTCP compound packet codec and per-source reception statistics.
//!
//! See [RFC 3550 section 6](https://datatracker.ietf.org/doc/html/rfc3550#section-6)
//! for the packet formats and section A.8 for the jitter algorithm this
//! crate implements in [`stats`].

pub mod ntp;
pub mod packet;
pub mod stats;

pub use ntp::NtpTimestamp;
pub use packet::{
    Bye, Compound, PacketType, ReceiverReport, ReportBlock, RtcpError, Sdes, SdesChunk, SdesItem,
    SenderReport, SubPacket, Unknown,
};
pub use stats::{IntervalParams, JitterEstimator, SequenceTracker, SourceStats};
