use anyhow::Result;
use rtsp_proto::{Message, Parser};

fn scripted_stream() -> Vec<u8> {
    let mut data = Vec::new();
    data.extend(b"OPTIONS rtsp://cam/axis-media/media.amp RTSP/1.0\r\nCSeq: 1\r\n\r\n");
    data.extend(b"RTSP/1.0 200 OK\r\nCSeq: 1\r\nPublic: OPTIONS, DESCRIBE, SETUP, PLAY\r\n\r\n");
    data.extend(b"DESCRIBE rtsp://cam/axis-media/media.amp RTSP/1.0\r\nCSeq: 2\r\n\r\n");
    data.extend(b"RTSP/1.0 200 OK\r\nCSeq: 2\r\nContent-Type: application/sdp\r\nContent-Length: 4\r\n\r\nsdp!");
    data.push(b'$');
    data.push(0);
    data.extend_from_slice(&12u16.to_be_bytes());
    data.extend_from_slice(&[0xffu8; 12]);
    data
}

#[test]
fn restartability_holds_for_every_partition() -> Result<()> {
    let data = scripted_stream();
    let baseline = Parser::new().feed(&data)?;

    for chunk_size in [1usize, 2, 3, 5, 7, 11, 64] {
        let mut parser = Parser::new();
        let mut got = Vec::new();
        for chunk in data.chunks(chunk_size) {
            got.extend(parser.feed(chunk)?);
        }
        assert_eq!(got, baseline, "mismatch at chunk_size={chunk_size}");
    }

    assert_eq!(baseline.len(), 5);
    Ok(())
}

#[test]
fn cseq_increases_monotonically_across_scripted_requests() -> Result<()> {
    let data = scripted_stream();
    let messages = Parser::new().feed(&data)?;

    let cseqs: Vec<u32> = messages
        .iter()
        .filter_map(|m| match m {
            Message::Request(r) => Some(r.cseq),
            Message::Response(r) => Some(r.cseq),
            Message::Binary(_) => None,
        })
        .collect();

    assert!(cseqs.windows(2).all(|w| w[0] <= w[1]));
    Ok(())
}
