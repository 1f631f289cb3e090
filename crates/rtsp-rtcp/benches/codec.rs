use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rtsp_rtcp::ntp::NtpTimestamp;
use rtsp_rtcp::{Compound, ReportBlock, SenderReport, SubPacket};

fn sample() -> Compound {
    Compound {
        sub_packets: vec![SubPacket::Sr(SenderReport {
            ssrc: 0x77ae_8d65,
            ntp: NtpTimestamp {
                seconds: 0xe051_bc2b,
                fraction: 0xea33_b000,
            },
            rtp_timestamp: 0x01fa_8034,
            packet_count: 12345,
            octet_count: 987_654,
            reports: vec![ReportBlock {
                ssrc: 0x1234_5678,
                fraction_lost: 0,
                cumulative_lost: 0,
                extended_highest_seq: 1000,
                jitter: 5,
                lsr: 0,
                dlsr: 0,
            }],
        })],
    }
}

fn bench_encode_decode(c: &mut Criterion) {
    let compound = sample();
    let encoded = compound.encode();

    c.bench_function("rtcp_encode", |b| b.iter(|| black_box(compound.encode())));
    c.bench_function("rtcp_decode", |b| {
        b.iter(|| black_box(Compound::decode(&encoded).unwrap()))
    });
}

criterion_group!(benches, bench_encode_decode);
criterion_main!(benches);
