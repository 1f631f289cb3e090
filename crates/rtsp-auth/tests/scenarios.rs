use anyhow::Result;
use ahash::AHashMap;
use rtsp_auth::basic::encode_authorization;
use rtsp_auth::client::ClientAuth;
use rtsp_auth::server::DigestAuth;

#[test]
fn basic_auth_known_vector() {
    assert_eq!(
        encode_authorization("root", "admin123"),
        "Basic cm9vdDphZG1pbjEyMw=="
    );
}

#[test]
fn client_and_server_agree_on_digest_response() -> Result<()> {
    let mut credentials = AHashMap::new();
    credentials.insert("root".to_string(), "admin123".to_string());
    let mut server = DigestAuth::new("cams", credentials, 100);

    let challenge = server.challenge_header();
    let mut client = ClientAuth::new("root", "admin123", 3);
    client.on_challenge(&format!("Digest realm=\"cams\", nonce=\"{}\", qop=\"auth\"", nonce_from(&challenge)))?;

    let header = client
        .authorization("DESCRIBE", "rtsp://cam/axis-media/media.amp")
        .expect("client should produce a digest header after a challenge");

    let user = server.validate(&header, "DESCRIBE", "rtsp://cam/axis-media/media.amp")?;
    assert_eq!(user, "root");
    Ok(())
}

fn nonce_from(challenge_header: &str) -> String {
    challenge_header
        .split(',')
        .find_map(|p| p.trim().strip_prefix("nonce=").map(|v| v.trim_matches('"').to_string()))
        .unwrap()
}

#[test]
fn server_digest_max_reuse_scenario() -> Result<()> {
    let mut credentials = AHashMap::new();
    credentials.insert("root".to_string(), "admin123".to_string());
    let mut server = DigestAuth::new("cams", credentials, 2);

    let mut client = ClientAuth::new("root", "admin123", 10);
    let challenge = server.challenge_header();
    client.on_challenge(&challenge)?;

    // Two successful uses of the same challenge.
    for _ in 0..2 {
        let header = client
            .authorization("OPTIONS", "rtsp://cam/x")
            .expect("should have a digest header");
        server.validate(&header, "OPTIONS", "rtsp://cam/x")?;
    }

    // A third request built against the same (now stale) nonce fails.
    let header = client
        .authorization("OPTIONS", "rtsp://cam/x")
        .expect("should have a digest header");
    assert!(server.validate(&header, "OPTIONS", "rtsp://cam/x").is_err());
    Ok(())
}
