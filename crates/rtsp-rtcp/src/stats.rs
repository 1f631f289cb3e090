//! Per-source reception statistics and RTCP report-interval scheduling.
//!
//! [RFC3550 section A.8]: https://datatracker.ietf.org/doc/html/rfc3550#appendix-A.8
//! [RFC3550 section 6.3.1]: https://datatracker.ietf.org/doc/html/rfc3550#section-6.3.1

use crate::ntp::{ts_to_ntp, NtpTimestamp};
use crate::packet::{ReportBlock, SenderReport};

/// A sequence number is treated as having wrapped if the jump from the
/// previous extended sequence exceeds this many packets; beyond it the
/// source is assumed to have restarted rather than merely reordered.
const MAX_DROPOUT: u32 = 3000;
const MAX_MISORDER: u32 = 100;
const RTP_SEQ_MOD: u32 = 1 << 16;

/// Tracks sequence-number cycling and packet loss for one incoming source,
/// per the algorithm in RFC 3550 appendix A.1.
#[derive(Debug, Clone)]
pub struct SequenceTracker {
    base_seq: u32,
    max_seq: u16,
    cycles: u32,
    bad_seq: u32,
    probation: u32,
    received: u64,
    expected_prior: u32,
    received_prior: u64,
}

impl SequenceTracker {
    /// Start tracking a source from its first observed sequence number.
    /// The RFC reference implementation places new sources on two packets'
    /// probation before trusting their sequence space.
    pub fn new(first_seq: u16) -> Self {
        Self {
            base_seq: first_seq as u32,
            max_seq: first_seq,
            cycles: 0,
            bad_seq: RTP_SEQ_MOD + 1,
            probation: 2,
            received: 0,
            expected_prior: 0,
            received_prior: 0,
        }
    }

    /// Record a received sequence number, returning `true` if it was
    /// accepted as part of this source's normal sequence (as opposed to
    /// being provisionally discarded during probation).
    pub fn update(&mut self, seq: u16) -> bool {
        let udelta = seq.wrapping_sub(self.max_seq);

        if self.probation > 0 {
            if seq == self.max_seq.wrapping_add(1) {
                self.probation -= 1;
                self.max_seq = seq;
                if self.probation == 0 {
                    self.received += 1;
                    return true;
                }
            } else {
                self.probation = 2;
                self.max_seq = seq;
            }
            return false;
        }

        if (udelta as u32) < MAX_DROPOUT {
            if seq < self.max_seq {
                self.cycles += RTP_SEQ_MOD;
            }
            self.max_seq = seq;
        } else if (udelta as u32) <= RTP_SEQ_MOD - MAX_MISORDER {
            if seq as u32 == self.bad_seq {
                // Two sequential packets agree: the source really did
                // restart, so re-synchronize to it.
                self.base_seq = seq as u32;
                self.max_seq = seq;
                self.cycles = 0;
                self.bad_seq = RTP_SEQ_MOD + 1;
            } else {
                self.bad_seq = (seq as u32).wrapping_add(1) & (RTP_SEQ_MOD - 1);
                return false;
            }
        } else {
            // Duplicate or misordered within tolerance; ignore for the
            // purposes of extended-sequence bookkeeping.
        }

        self.received += 1;
        true
    }

    pub fn extended_highest_seq(&self) -> u32 {
        self.cycles | self.max_seq as u32
    }

    fn expected(&self) -> u32 {
        self.extended_highest_seq().wrapping_sub(self.base_seq) + 1
    }

    /// Cumulative number of packets lost since tracking began. Can be
    /// negative if duplicates pushed `received` above `expected`.
    pub fn cumulative_lost(&self) -> i32 {
        self.expected() as i32 - self.received as i32
    }

    /// Fraction of packets lost during the interval since the last call,
    /// as a Q8 fixed-point byte, alongside resetting the interval markers.
    pub fn fraction_lost(&mut self) -> u8 {
        let expected = self.expected();
        let expected_interval = expected.wrapping_sub(self.expected_prior);
        self.expected_prior = expected;

        let received_interval = self.received.wrapping_sub(self.received_prior);
        self.received_prior = self.received;

        let lost_interval = expected_interval as i64 - received_interval as i64;

        if expected_interval == 0 || lost_interval <= 0 {
            0
        } else {
            ((lost_interval << 8) / expected_interval as i64) as u8
        }
    }
}

/// Running jitter estimate per RFC 3550 appendix A.8, a Q4 fixed-point
/// interarrival jitter statistic.
#[derive(Debug, Clone, Copy, Default)]
pub struct JitterEstimator {
    jitter: f64,
    prev_transit: Option<i64>,
}

impl JitterEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in one packet's arrival. `rtp_timestamp` and `arrival_rtp_units`
    /// must share the same clock rate as the RTP stream being measured.
    ///
    /// # Examples
    ///
    /// ```
    /// use rtsp_rtcp::stats::JitterEstimator;
    ///
    /// let mut j = JitterEstimator::new();
    /// j.update(1000, 1000);
    /// j.update(2000, 2008); // 8 units of jitter relative to a constant clock
    /// assert!(j.jitter() > 0.0);
    /// ```
    pub fn update(&mut self, rtp_timestamp: u32, arrival_rtp_units: u32) {
        let transit = arrival_rtp_units as i64 - rtp_timestamp as i64;

        if let Some(prev) = self.prev_transit {
            let d = (transit - prev).unsigned_abs() as f64;
            self.jitter += (d - self.jitter) / 16.0;
        }

        self.prev_transit = Some(transit);
    }

    /// The current jitter estimate, in RTP timestamp units.
    pub fn jitter(&self) -> f64 {
        self.jitter
    }
}

/// Everything needed to build an outgoing report block for one remote
/// source, plus the bookkeeping to schedule the next RTCP interval.
#[derive(Debug, Clone)]
pub struct SourceStats {
    pub ssrc: u32,
    seq: SequenceTracker,
    jitter: JitterEstimator,
    last_sr: Option<NtpTimestamp>,
    last_sr_received_at: Option<f64>,
}

impl SourceStats {
    pub fn new(ssrc: u32, first_seq: u16) -> Self {
        Self {
            ssrc,
            seq: SequenceTracker::new(first_seq),
            jitter: JitterEstimator::new(),
            last_sr: None,
            last_sr_received_at: None,
        }
    }

    pub fn on_rtp(&mut self, sequence: u16, rtp_timestamp: u32, arrival_rtp_units: u32) {
        self.seq.update(sequence);
        self.jitter.update(rtp_timestamp, arrival_rtp_units);
    }

    /// Remember when the most recent Sender Report from this source
    /// arrived, used to compute `dlsr` on the next outgoing report block.
    pub fn on_sender_report(&mut self, sr: &SenderReport, received_at_unix: f64) {
        self.last_sr = Some(sr.ntp);
        self.last_sr_received_at = Some(received_at_unix);
    }

    /// Build a `ReportBlock` describing this source, as of `now_unix`.
    pub fn report_block(&mut self, now_unix: f64) -> ReportBlock {
        let lsr = self.last_sr.map(|ntp| ntp.mid32()).unwrap_or(0);

        let dlsr = match self.last_sr_received_at {
            Some(received_at) if lsr != 0 => {
                let elapsed = (now_unix - received_at).max(0.0);
                (elapsed * 65536.0) as u32
            }
            _ => 0,
        };

        ReportBlock {
            ssrc: self.ssrc,
            fraction_lost: self.seq.fraction_lost(),
            cumulative_lost: self.seq.cumulative_lost(),
            extended_highest_seq: self.seq.extended_highest_seq(),
            jitter: self.jitter.jitter() as u32,
            lsr,
            dlsr,
        }
    }
}

/// RTCP transmission interval parameters, RFC 3550 section 6.3.1.
#[derive(Debug, Clone, Copy)]
pub struct IntervalParams {
    /// Minimum interval between RTCP transmissions, other than the first.
    pub min_interval: f64,
    /// Fraction of session bandwidth allotted to RTCP, typically 5%.
    pub rtcp_fraction: f64,
    pub session_bandwidth_bps: f64,
    pub average_packet_size_bytes: f64,
    pub members: u32,
    pub senders: u32,
    pub we_sent: bool,
}

impl Default for IntervalParams {
    fn default() -> Self {
        Self {
            min_interval: 2.5,
            rtcp_fraction: 0.05,
            session_bandwidth_bps: 64_000.0,
            average_packet_size_bytes: 200.0,
            members: 1,
            senders: 0,
            we_sent: false,
        }
    }
}

/// Compute the deterministic (pre-dither) RTCP reporting interval.
///
/// Follows RFC 3550's `rtcp_interval()`: senders get at least 25% of the
/// RTCP bandwidth share when there are few of them, and the first interval
/// after joining is halved to let the group learn about new members
/// quickly.
///
/// # Examples
///
/// ```
/// use rtsp_rtcp::stats::{rtcp_interval, IntervalParams};
///
/// let t = rtcp_interval(&IntervalParams::default(), false);
/// assert!(t >= 2.5);
/// ```
pub fn rtcp_interval(params: &IntervalParams, initial: bool) -> f64 {
    let members = params.members.max(1) as f64;
    let senders = params.senders as f64;

    let rtcp_bw = params.session_bandwidth_bps * params.rtcp_fraction;

    let (n, c) = if senders > 0.0 && senders / members < 0.25 {
        if params.we_sent {
            (senders, rtcp_bw * 0.25 / senders)
        } else {
            (
                members - senders,
                rtcp_bw * 0.75 / (members - senders).max(1.0),
            )
        }
    } else {
        (members, rtcp_bw / members)
    };

    let avg_size = params.average_packet_size_bytes.max(1.0);
    let t = (n * avg_size / c.max(f64::MIN_POSITIVE)).max(params.min_interval);

    if initial { t / 2.0 } else { t }
}

/// Apply the RFC 3550 dithering rule: multiply the deterministic interval
/// by a uniformly distributed factor in `[0.5, 1.5]` so that members of a
/// large session do not transmit in lockstep.
pub fn dither(interval: f64, unit_random: f64) -> f64 {
    interval * (0.5 + unit_random)
}

pub fn now_as_ntp(unix_seconds: f64) -> NtpTimestamp {
    ts_to_ntp(unix_seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_tracker_counts_in_order_packets() {
        let mut tracker = SequenceTracker::new(0);
        tracker.update(1);
        assert!(tracker.update(2));
        assert_eq!(tracker.extended_highest_seq(), 2);
        assert_eq!(tracker.cumulative_lost(), 0);
    }

    #[test]
    fn sequence_tracker_detects_wraparound() {
        let mut tracker = SequenceTracker::new(u16::MAX - 1);
        tracker.update(u16::MAX);
        tracker.update(0);
        tracker.update(1);
        assert_eq!(tracker.extended_highest_seq(), (1u32 << 16) | 1);
    }

    #[test]
    fn sequence_tracker_reports_loss() {
        let mut tracker = SequenceTracker::new(0);
        tracker.update(1); // leaves probation
        tracker.update(5); // 3 packets missing: 2, 3, 4
        assert_eq!(tracker.cumulative_lost(), 3);
    }

    #[test]
    fn jitter_is_zero_for_perfectly_regular_arrivals() {
        let mut j = JitterEstimator::new();
        for i in 0..10 {
            j.update(i * 1000, i * 1000);
        }
        assert_eq!(j.jitter(), 0.0);
    }

    #[test]
    fn jitter_grows_with_irregular_arrivals() {
        let mut j = JitterEstimator::new();
        j.update(0, 0);
        j.update(1000, 1000);
        j.update(2000, 3000);
        assert!(j.jitter() > 0.0);
    }

    #[test]
    fn interval_respects_floor() {
        let params = IntervalParams {
            session_bandwidth_bps: 1.0,
            ..Default::default()
        };
        assert_eq!(rtcp_interval(&params, false), params.min_interval);
    }

    #[test]
    fn initial_interval_is_halved() {
        let params = IntervalParams::default();
        let full = rtcp_interval(&params, false);
        let initial = rtcp_interval(&params, true);
        assert!((initial - full / 2.0).abs() < 1e-9);
    }

    #[test]
    fn dither_stays_within_bounds() {
        assert_eq!(dither(10.0, 0.0), 5.0);
        assert_eq!(dither(10.0, 1.0), 15.0);
    }
}
