//! Minimal RTSP client probe: connects to a URL, negotiates one media
//! stream, plays for a fixed window, and reports how many RTP/RTCP
//! packets arrived. The SDP body is parsed with a throwaway parser good
//! enough for the common single-track case; a real client plugs in a
//! proper SDP crate behind [`rtsp_rs::sdp::SessionDescription`].

use std::time::Duration;

use clap::Parser;
use rtsp_rs::any_transport::AnyTransport;
use rtsp_rs::client::MediaEvent;
use rtsp_rs::config::ClientOptions;
use rtsp_rs::sdp::{Media, RtpMap, SessionDescription};
use rtsp_transport::tcp::TcpTransport;
use rtsp_transport::udp::UdpTransport;
use rtsp_transport::LoopConfig;

#[derive(Parser)]
#[command(about = "Connect to an RTSP URL and report received media stats.")]
struct Args {
    /// rtsp:// URL to DESCRIBE and SETUP against.
    url: String,

    /// Transport to offer in SETUP.
    #[arg(long, default_value = "tcp")]
    transport: String,

    /// Seconds to stay in PLAY before tearing down.
    #[arg(long, default_value_t = 5)]
    duration: u64,

    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("rtsp-probe: {err}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let level = args.log_level.parse().unwrap_or(log::Level::Info);
    simple_logger::init_with_level(level)?;

    let options = ClientOptions::default();
    let session = rtsp_rs::client::MediaSession::connect(&args.url, options).await?;

    let use_tcp = args.transport.eq_ignore_ascii_case("tcp");
    let endpoint = session.endpoint().clone();
    let mut streams = session
        .open(
            &["video"],
            |body| Ok(parse_minimal_sdp(body)),
            move |config: LoopConfig| {
                if use_tcp {
                    AnyTransport::Tcp(TcpTransport::new(endpoint.clone(), config))
                } else {
                    AnyTransport::Udp(UdpTransport::new(config))
                }
            },
        )
        .await?;

    session.play(None).await?;
    log::info!("rtsp-probe: playing, collecting for {}s", args.duration);

    let mut rtp_count = 0u64;
    let mut rtcp_count = 0u64;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(args.duration);

    if let Some(stream) = streams.first_mut() {
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => break,
                event = stream.events.recv() => match event {
                    Some(MediaEvent::Rtp(_)) => rtp_count += 1,
                    Some(MediaEvent::Rtcp(_)) => rtcp_count += 1,
                    Some(MediaEvent::Closed(err)) => {
                        log::warn!("rtsp-probe: transport closed: {err:?}");
                        break;
                    }
                    None => break,
                },
            }
        }
    }

    log::info!("rtsp-probe: received {rtp_count} rtp packets, {rtcp_count} rtcp reports");
    session.teardown().await?;
    Ok(())
}

fn parse_minimal_sdp(body: &[u8]) -> SessionDescription {
    let text = String::from_utf8_lossy(body);
    let mut media = Vec::new();
    let mut current: Option<Media> = None;
    let mut session_control = None;

    for line in text.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };

        match key {
            "m" => {
                if let Some(m) = current.take() {
                    media.push(m);
                }
                let media_type = value.split_whitespace().next().unwrap_or("").to_string();
                current = Some(Media {
                    media_type,
                    rtp: Vec::new(),
                    fmtp_options: Vec::new(),
                    control: None,
                });
            }
            "a" if value.starts_with("rtpmap:") => {
                if let Some(m) = current.as_mut() {
                    if let Some((payload, rest)) = value.trim_start_matches("rtpmap:").split_once(' ') {
                        if let (Ok(payload), Some((_, rate))) = (payload.parse(), rest.split_once('/')) {
                            m.rtp.push(RtpMap {
                                payload,
                                rate: rate.parse().unwrap_or(90000),
                            });
                        }
                    }
                }
            }
            "a" if value.starts_with("fmtp:") => {
                if let Some(m) = current.as_mut() {
                    m.fmtp_options.push(value.trim_start_matches("fmtp:").to_string());
                }
            }
            "a" if value.starts_with("control:") => {
                let control = value.trim_start_matches("control:").to_string();
                match current.as_mut() {
                    Some(m) => m.control = Some(control),
                    None => session_control = Some(control),
                }
            }
            _ => {}
        }
    }

    if let Some(m) = current.take() {
        media.push(m);
    }

    SessionDescription {
        version: 0,
        origin: String::new(),
        control: session_control,
        media,
    }
}
