//! Periodic RTCP reporting: after the first packet is observed, sleeps a
//! dithered interval (RFC 3550 section 6.3.1), builds a report from the
//! running statistics, and sends it. Failure to build or send is logged
//! but never terminates the loop; cancellation is graceful.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use parking_lot::Mutex;
use rand::Rng;
use rtsp_rtcp::stats::{dither, now_as_ntp, rtcp_interval, IntervalParams, SourceStats};
use rtsp_rtcp::{Compound, SdesChunk, SdesItem, SubPacket};
use tokio_util::sync::CancellationToken;

use crate::Transport;

/// Build an RR + SDES/CNAME compound from the current statistics, or
/// `None` if no RTP packet has been observed yet for this source
/// (mirrors `build_rtcp()` returning nothing before the first packet).
pub fn build_rtcp(stats: &Mutex<SourceStats>, cname: &str, now_unix: f64, observed_any: bool) -> Option<Compound> {
    if !observed_any {
        return None;
    }

    let mut guard = stats.lock();
    let report = guard.report_block(now_unix);
    let ssrc = guard.ssrc;
    drop(guard);

    let _ = now_as_ntp(now_unix);

    Some(Compound {
        sub_packets: vec![
            SubPacket::Rr(rtsp_rtcp::ReceiverReport {
                ssrc,
                reports: vec![report],
            }),
            SubPacket::Sdes(rtsp_rtcp::Sdes {
                chunks: vec![SdesChunk {
                    ssrc,
                    items: vec![SdesItem::cname(cname)],
                }],
            }),
        ],
    })
}

/// Spawn the periodic RTCP loop against any transport implementation.
/// `build` is called on every tick and should return `None` until the
/// first RTP packet has arrived.
pub fn spawn<T, B>(
    transport: Arc<T>,
    mut build: B,
    params: IntervalParams,
    token: CancellationToken,
) -> tokio::task::JoinHandle<()>
where
    T: Transport + 'static,
    B: FnMut() -> Option<Compound> + Send + 'static,
{
    tokio::spawn(async move {
        let mut initial = true;

        loop {
            let interval = rtcp_interval(&params, initial);
            let dithered = dither(interval, rand::rng().random::<f64>());
            initial = false;

            tokio::select! {
                _ = token.cancelled() => {
                    debug!("rtsp transport: rtcp loop cancelled");
                    return;
                }
                _ = tokio::time::sleep(Duration::from_secs_f64(dithered)) => {}
            }

            match build() {
                Some(report) => {
                    if let Err(err) = transport.send_rtcp_report(&report).await {
                        warn!("rtsp transport: failed to send rtcp report: {err}");
                    }
                }
                None => debug!("rtsp transport: no rtcp report to build yet"),
            }
        }
    })
}
