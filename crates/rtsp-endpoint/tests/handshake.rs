use std::time::Duration;

use anyhow::Result;
use rtsp_endpoint::Endpoint;
use rtsp_proto::message::{Headers, Response};
use tokio::net::{TcpListener, TcpStream};

#[tokio::test]
async fn options_describe_round_trip() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (endpoint, mut incoming) = Endpoint::new(stream);

        for _ in 0..2 {
            let request = incoming.rx.recv().await.unwrap();
            let mut headers = Headers::new();
            let body = if request.method == "DESCRIBE" {
                headers.insert("Content-Type", "application/sdp");
                b"v=0\r\n".to_vec()
            } else {
                headers.insert("Public", "OPTIONS, DESCRIBE, SETUP, PLAY");
                vec![]
            };

            let response = Response {
                status: 200,
                reason: "OK".to_string(),
                cseq: request.cseq,
                headers,
                body,
            };
            endpoint.send_response(&response).await.unwrap();
        }
    });

    let stream = TcpStream::connect(addr).await?;
    let (client, _incoming) = Endpoint::new(stream);

    let options = client
        .send_request("OPTIONS", "rtsp://cam/x", None, None, Duration::from_secs(2))
        .await?;
    assert_eq!(options.status, 200);

    let describe = client
        .send_request("DESCRIBE", "rtsp://cam/x", None, None, Duration::from_secs(2))
        .await?;
    assert_eq!(describe.body, b"v=0\r\n");

    server.await?;
    Ok(())
}

#[tokio::test]
async fn send_request_times_out_when_no_response_arrives() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        let (_stream, _) = listener.accept().await.unwrap();
        // Never responds.
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let stream = TcpStream::connect(addr).await?;
    let (client, _incoming) = Endpoint::new(stream);

    let result = client
        .send_request("OPTIONS", "rtsp://cam/x", None, None, Duration::from_millis(50))
        .await;

    assert!(result.is_err());
    Ok(())
}
