use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rtsp_rtp::Rtp;

fn bench_encode_decode(c: &mut Criterion) {
    let rtp = Rtp::new(96, 1, 1000, 0xdead_beef, vec![0u8; 1200]);
    let encoded = rtp.encode();

    c.bench_function("rtp_encode", |b| b.iter(|| black_box(rtp.encode())));
    c.bench_function("rtp_decode", |b| b.iter(|| black_box(Rtp::decode(&encoded).unwrap())));
}

criterion_group!(benches, bench_encode_decode);
criterion_main!(benches);
