//! The parsed-SDP shape this crate consumes. The actual SDP grammar is
//! out of scope; a real deployment plugs in a third-party parser that
//! produces this tree (or something convertible into it).

/// One `rtpmap`-equivalent payload description for a media section.
#[derive(Debug, Clone)]
pub struct RtpMap {
    pub payload: u8,
    pub rate: u32,
}

/// One media section (`m=` line and its attributes).
#[derive(Debug, Clone)]
pub struct Media {
    pub media_type: String,
    pub rtp: Vec<RtpMap>,
    pub fmtp_options: Vec<String>,
    pub control: Option<String>,
}

/// The top-level parsed session description.
#[derive(Debug, Clone)]
pub struct SessionDescription {
    pub version: u8,
    pub origin: String,
    pub control: Option<String>,
    pub media: Vec<Media>,
}
