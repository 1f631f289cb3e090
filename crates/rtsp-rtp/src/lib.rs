//! ## RTP (Real-time Transport Protocol)
//!
//! [RFC3550 section 5]: https://datatracker.ietf.org/doc/html/rfc3550#section-5
//!
//! ### RTP fixed header fields
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|X|  CC   |M|     PT      |       sequence number        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           timestamp                          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           synchronization source (SSRC) identifier            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |            contributing source (CSRC) identifiers             |
//! |                             ....                              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! [`Rtp::decode`] and [`Rtp::encode`] are exact inverses of each other
//! as long as no payload substitution took place: `decode(encode(p)) == p`.

use std::convert::TryFrom;

use thiserror::Error;

pub const VERSION: u8 = 2;

const FIXED_HEADER_LEN: usize = 12;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RtpError {
    #[error("rtp packet truncated: need at least {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },
    #[error("unsupported rtp version: {0}")]
    BadVersion(u8),
    #[error("rtp extension header length overruns packet")]
    BadLength,
}

pub type Result<T> = std::result::Result<T, RtpError>;

/// A single RTP extension header: a profile-defined 16-bit identifier
/// followed by a run of 32-bit words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    pub profile: u16,
    pub data: Vec<u8>,
}

/// A parsed (or about-to-be-built) RTP packet.
///
/// Immutable after construction except for [`Rtp::set_payload`], which
/// installs a substitute payload that `encode` prefers over the bytes
/// the packet was originally decoded from. This mirrors forwarders that
/// need to rewrite the payload (e.g. NAL repacketization) without paying
/// for a full header rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rtp {
    pub padding: bool,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub csrc: Vec<u32>,
    pub extension: Option<Extension>,
    payload: Vec<u8>,
    substituted: Option<Vec<u8>>,
    /// Number of trailing padding bytes (last one being this count), as
    /// read off the wire. Zero when the packet carries no padding.
    pad_len: u8,
}

impl Rtp {
    /// Build a new packet with no CSRC list and no extension.
    pub fn new(payload_type: u8, sequence: u16, timestamp: u32, ssrc: u32, payload: Vec<u8>) -> Self {
        Self {
            padding: false,
            marker: false,
            payload_type,
            sequence,
            timestamp,
            ssrc,
            csrc: Vec::new(),
            extension: None,
            payload,
            substituted: None,
            pad_len: 0,
        }
    }

    /// Decode a full RTP packet from wire bytes.
    ///
    /// # Examples
    ///
    /// ```
    /// use rtsp_rtp::Rtp;
    ///
    /// // V=2, no padding, no extension, cc=0, marker=0, pt=96
    /// let mut raw = vec![0x80, 0x60, 0x00, 0x01, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x03];
    /// raw.extend_from_slice(b"payload");
    ///
    /// let rtp = Rtp::decode(&raw).unwrap();
    /// assert_eq!(rtp.payload_type, 96);
    /// assert_eq!(rtp.sequence, 1);
    /// assert_eq!(rtp.payload(), b"payload");
    /// ```
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < FIXED_HEADER_LEN {
            return Err(RtpError::Truncated {
                need: FIXED_HEADER_LEN,
                got: data.len(),
            });
        }

        let version = data[0] >> 6;
        if version != VERSION {
            return Err(RtpError::BadVersion(version));
        }

        let padding = (data[0] & 0x20) != 0;
        let has_extension = (data[0] & 0x10) != 0;
        let cc = (data[0] & 0x0f) as usize;
        let marker = (data[1] & 0x80) != 0;
        let payload_type = data[1] & 0x7f;
        let sequence = u16::from_be_bytes([data[2], data[3]]);
        let timestamp = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let ssrc = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

        let csrc_end = FIXED_HEADER_LEN + cc * 4;
        if data.len() < csrc_end {
            return Err(RtpError::Truncated {
                need: csrc_end,
                got: data.len(),
            });
        }

        let csrc = (0..cc)
            .map(|i| {
                let off = FIXED_HEADER_LEN + i * 4;
                u32::from_be_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]])
            })
            .collect();

        let mut cursor = csrc_end;
        let extension = if has_extension {
            if data.len() < cursor + 4 {
                return Err(RtpError::BadLength);
            }

            let profile = u16::from_be_bytes([data[cursor], data[cursor + 1]]);
            let words = u16::from_be_bytes([data[cursor + 2], data[cursor + 3]]) as usize;
            let ext_start = cursor + 4;
            let ext_end = ext_start + words * 4;

            if data.len() < ext_end {
                return Err(RtpError::BadLength);
            }

            cursor = ext_end;
            Some(Extension {
                profile,
                data: data[ext_start..ext_end].to_vec(),
            })
        } else {
            None
        };

        let mut payload_end = data.len();
        let mut pad_len = 0u8;
        if padding {
            let raw_pad_len = *data.last().ok_or(RtpError::BadLength)? as usize;
            if raw_pad_len == 0 || cursor + raw_pad_len > payload_end {
                return Err(RtpError::BadLength);
            }

            payload_end -= raw_pad_len;
            pad_len = raw_pad_len as u8;
        }

        if payload_end < cursor {
            return Err(RtpError::BadLength);
        }

        Ok(Self {
            padding,
            marker,
            payload_type,
            sequence,
            timestamp,
            ssrc,
            csrc,
            extension,
            payload: data[cursor..payload_end].to_vec(),
            substituted: None,
            pad_len,
        })
    }

    /// Current payload: the substituted one if [`Rtp::set_payload`] was
    /// called, otherwise the bytes the packet was decoded with (or built
    /// with, for a freshly constructed packet).
    pub fn payload(&self) -> &[u8] {
        self.substituted.as_deref().unwrap_or(&self.payload)
    }

    /// Install a substitute payload. `encode` will emit header + CSRC +
    /// this payload without touching the originally decoded bytes.
    pub fn set_payload(&mut self, payload: Vec<u8>) {
        self.substituted = Some(payload);
    }

    /// Encode the packet back to wire bytes. Inverse of [`Rtp::decode`]
    /// when no payload substitution occurred.
    pub fn encode(&self) -> Vec<u8> {
        let payload = self.payload();
        let mut out = Vec::with_capacity(FIXED_HEADER_LEN + self.csrc.len() * 4 + payload.len());

        let mut byte0 = (VERSION << 6) | (self.csrc.len() as u8 & 0x0f);
        if self.padding {
            byte0 |= 0x20;
        }
        if self.extension.is_some() {
            byte0 |= 0x10;
        }

        out.push(byte0);
        out.push((self.marker as u8) << 7 | (self.payload_type & 0x7f));
        out.extend_from_slice(&self.sequence.to_be_bytes());
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(&self.ssrc.to_be_bytes());

        for csrc in &self.csrc {
            out.extend_from_slice(&csrc.to_be_bytes());
        }

        if let Some(ext) = &self.extension {
            out.extend_from_slice(&ext.profile.to_be_bytes());
            out.extend_from_slice(&((ext.data.len() / 4) as u16).to_be_bytes());
            out.extend_from_slice(&ext.data);
        }

        out.extend_from_slice(payload);

        if self.padding {
            // RFC 3550 section 5.1: the last padding byte counts the whole
            // padding run, including itself; at least one byte is required
            // whenever the padding bit is set.
            let pad_len = self.pad_len.max(1);
            out.resize(out.len() + pad_len as usize - 1, 0);
            out.push(pad_len);
        }

        out
    }
}

impl TryFrom<&[u8]> for Rtp {
    type Error = RtpError;

    fn try_from(value: &[u8]) -> Result<Self> {
        Self::decode(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_truncated() {
        assert_eq!(
            Rtp::decode(&[0x80, 0x60]),
            Err(RtpError::Truncated { need: 12, got: 2 })
        );
    }

    #[test]
    fn decode_bad_version() {
        let data = [0x00u8; 12];
        assert_eq!(Rtp::decode(&data), Err(RtpError::BadVersion(0)));
    }

    #[test]
    fn round_trip_with_csrc_and_extension() {
        let mut rtp = Rtp::new(96, 42, 1000, 0xdead_beef, b"hello".to_vec());
        rtp.csrc = vec![1, 2, 3];
        rtp.extension = Some(Extension {
            profile: 0xbede,
            data: vec![0, 0, 0, 1],
        });
        rtp.marker = true;

        let encoded = rtp.encode();
        let decoded = Rtp::decode(&encoded).unwrap();
        assert_eq!(decoded, rtp);
    }

    #[test]
    fn round_trip_with_padding() {
        let mut raw = vec![0xa0, 0x60, 0x00, 0x01, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x03];
        raw.extend_from_slice(b"pay");
        raw.extend_from_slice(&[0, 0, 3]);

        let rtp = Rtp::decode(&raw).unwrap();
        assert_eq!(rtp.payload(), b"pay");
        assert!(rtp.padding);

        let encoded = rtp.encode();
        assert_eq!(encoded, raw);
        assert_eq!(Rtp::decode(&encoded).unwrap(), rtp);
    }

    #[test]
    fn payload_substitution_skips_reencoding_source() {
        let raw = {
            let mut v = vec![0x80, 0x60, 0x00, 0x01, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x03];
            v.extend_from_slice(b"original");
            v
        };

        let mut rtp = Rtp::decode(&raw).unwrap();
        rtp.set_payload(b"replaced".to_vec());
        assert_eq!(rtp.payload(), b"replaced");

        let encoded = rtp.encode();
        let decoded = Rtp::decode(&encoded).unwrap();
        assert_eq!(decoded.payload(), b"replaced");
    }
}
