use anyhow::Result;
use rtsp_rtp::Rtp;

#[test]
fn rtp_round_trip_property() -> Result<()> {
    // Exercise decode(encode(p)) == p across a handful of representative
    // header shapes, standing in for the universal round-trip property.
    let samples = [
        Rtp::new(0, 0, 0, 0, vec![]),
        Rtp::new(127, u16::MAX, u32::MAX, u32::MAX, vec![1, 2, 3, 4]),
        Rtp::new(96, 12345, 90000, 0x1234_5678, vec![0xffu8; 188]),
    ];

    for sample in samples {
        let encoded = sample.encode();
        let decoded = Rtp::decode(&encoded)?;
        assert_eq!(decoded, sample);
    }

    Ok(())
}

#[test]
fn rejects_packet_shorter_than_csrc_list() {
    // cc = 2 but only one CSRC word follows the fixed header.
    let data = [0x82, 0x60, 0x00, 0x01, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x03, 0, 0, 0, 1];
    assert!(Rtp::decode(&data).is_err());
}
