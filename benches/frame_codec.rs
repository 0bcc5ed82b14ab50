use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

// The frame codec's hot path: parsing a masked client frame and generating
// one back. Mirrors a plain unmask/mask micro-benchmark but through the
// full `parse`/`generate` surface so regressions in the length-field
// branching show up too.

fn masked_text_frame(payload_len: usize) -> Vec<u8> {
    let mut frame = wsgate::Frame::text(wsgate::Payload::Owned(vec![b'a'; payload_len]));
    frame.mask();
    frame.generate()
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_parse");

    for &size in &[16usize, 1024, 65536] {
        let bytes = masked_text_frame(size);
        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_function(format!("parse_{size}B"), |b| {
            b.iter(|| {
                let outcome = wsgate::parse_frame(black_box(&bytes));
                black_box(outcome);
            });
        });
    }

    group.finish();
}

fn bench_generate(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_generate");

    for &size in &[16usize, 1024, 65536] {
        let frame = wsgate::Frame::binary(wsgate::Payload::Owned(vec![0u8; size]));
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("generate_{size}B"), |b| {
            b.iter(|| black_box(frame.generate()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_parse, bench_generate);
criterion_main!(benches);
