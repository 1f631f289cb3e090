//! NTP timestamp conversion.
//!
//! NTP timestamps count seconds since 1 Jan 1900; Unix time counts seconds
//! since 1 Jan 1970. The difference between the two epochs is a constant
//! 2208988800 seconds.

/// Seconds between the NTP epoch (1900-01-01) and the Unix epoch
/// (1970-01-01).
pub const NTP_UNIX_EPOCH_OFFSET: u64 = 2_208_988_800;

/// A 64-bit NTP timestamp split into its two 32-bit halves, as carried in
/// an RTCP Sender Report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NtpTimestamp {
    pub seconds: u32,
    pub fraction: u32,
}

impl NtpTimestamp {
    /// The middle 32 bits of the 64-bit NTP timestamp: the low 16 bits of
    /// `seconds` and the high 16 bits of `fraction`. This is the `LSR`
    /// field carried in receiver report blocks.
    ///
    /// # Examples
    ///
    /// ```
    /// use rtsp_rtcp::ntp::NtpTimestamp;
    ///
    /// let ntp = NtpTimestamp { seconds: 0x1122_3344, fraction: 0x5566_7788 };
    /// assert_eq!(ntp.mid32(), 0x3344_5566);
    /// ```
    pub fn mid32(&self) -> u32 {
        (self.seconds << 16) | (self.fraction >> 16)
    }
}

/// Convert a Unix epoch timestamp (seconds, as an `f64`) to an NTP
/// timestamp.
///
/// # Examples
///
/// ```
/// use rtsp_rtcp::ntp::ts_to_ntp;
///
/// let ntp = ts_to_ntp(0.0);
/// assert_eq!(ntp.seconds, 2_208_988_800);
/// assert_eq!(ntp.fraction, 0);
/// ```
pub fn ts_to_ntp(unix_seconds: f64) -> NtpTimestamp {
    let ntp_seconds = unix_seconds + NTP_UNIX_EPOCH_OFFSET as f64;
    let seconds = ntp_seconds.floor();
    let frac = ntp_seconds - seconds;

    NtpTimestamp {
        seconds: seconds as u32,
        fraction: (frac * 4_294_967_296.0_f64).floor() as u32,
    }
}

/// Convert an NTP timestamp back to a Unix epoch timestamp (seconds).
///
/// Round-trip law: `ntp_to_ts(ts_to_ntp(t)) == t` for every `t >= 0`
/// representable as an `f64`.
///
/// # Examples
///
/// ```
/// use rtsp_rtcp::ntp::{ts_to_ntp, ntp_to_ts};
///
/// let t = 1_553_609_305.123_f64;
/// let roundtrip = ntp_to_ts(ts_to_ntp(t));
/// assert!((roundtrip - t).abs() < 1e-6);
/// ```
pub fn ntp_to_ts(ntp: NtpTimestamp) -> f64 {
    let frac = ntp.fraction as f64 / 4_294_967_296.0_f64;
    ntp.seconds as f64 + frac - NTP_UNIX_EPOCH_OFFSET as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_many_values() {
        for t in [0.0_f64, 1.0, 1_553_609_305.123, 1_700_000_000.5, 4_000_000_000.0] {
            let back = ntp_to_ts(ts_to_ntp(t));
            assert!((back - t).abs() < 1e-6, "t={t} back={back}");
        }
    }

    #[test]
    fn mid32_matches_sr_to_rr_convention() {
        let ntp = ts_to_ntp(1_553_609_305.123);
        let mid = ntp.mid32();
        assert_eq!(mid, (ntp.seconds << 16) | (ntp.fraction >> 16));
    }
}
