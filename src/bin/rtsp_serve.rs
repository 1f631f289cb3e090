//! Minimal RTSP server binary: serves a single static stream description
//! at every URL and accepts SETUP/PLAY against it without pushing any
//! media. Demonstrates wiring a [`rtsp_rs::server::Streamer`] to
//! [`rtsp_rs::server::Server`]; a real deployment replaces `StaticStreamer`
//! with something backed by an actual media source.

use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::Mutex;
use rtsp_rs::config::ServerConfig;
use rtsp_rs::error::{Result, RtspError};
use rtsp_rs::server::{AuthMode, Server, Streamer};

const DEMO_SDP: &str = "\
v=0\r\n\
o=- 0 0 IN IP4 0.0.0.0\r\n\
s=rtsp-rs demo stream\r\n\
t=0 0\r\n\
m=video 0 RTP/AVP 96\r\n\
a=rtpmap:96 H264/90000\r\n\
a=control:track1\r\n\
";

struct StaticStreamer {
    sessions: Mutex<AHashMap<String, String>>,
}

impl StaticStreamer {
    fn new() -> Self {
        Self {
            sessions: Mutex::new(AHashMap::new()),
        }
    }
}

impl Streamer for StaticStreamer {
    fn describe(&self, _url: &str) -> Result<(String, Vec<u8>)> {
        Ok(("application/sdp".to_string(), DEMO_SDP.as_bytes().to_vec()))
    }

    fn setup_stream(&self, session_id: &str, url: &str) -> Result<String> {
        self.sessions
            .lock()
            .insert(session_id.to_string(), url.to_string());
        Ok(url.to_string())
    }

    fn play(&self, session_id: &str, _since: Option<f64>, _until: Option<f64>, _speed: Option<f64>) -> Result<()> {
        if self.sessions.lock().contains_key(session_id) {
            Ok(())
        } else {
            Err(RtspError::UnknownSession(session_id.to_string()))
        }
    }

    fn pause(&self, _session_id: &str) -> Result<()> {
        Ok(())
    }

    fn teardown(&self, session_id: &str) {
        self.sessions.lock().remove(session_id);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::load()?;
    simple_logger::init_with_level(config.log.level.as_level())?;

    let auth = if config.credentials.is_empty() {
        AuthMode::None
    } else {
        AuthMode::Basic(rtsp_auth::server::BasicAuth::new(
            config.realm.clone(),
            config.credentials.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        ))
    };

    let streamer = Arc::new(StaticStreamer::new());
    let server = Server::bind(&config.listen.to_string(), streamer, auth).await?;

    log::info!("rtsp-serve: listening on {}", config.listen);
    server.serve().await?;
    Ok(())
}
