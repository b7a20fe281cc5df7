use criterion::{criterion_group, criterion_main, Criterion};
use holt::connection::scan_line;

/// A single request line as it sits mid-buffer: `scan_line`'s hot path, called once per
/// line by `Connection::process_read`.
const LINE: &[u8] = b"GET /api/v1.0/weather/forecast HTTP/1.1\r\n";

fn benchmark(c: &mut Criterion) {
    c.bench_function("scan_line/single_line", |b| {
        b.iter(|| {
            let mut buf = LINE.to_vec();
            let mut checked_idx = 0;
            scan_line(&mut buf, &mut checked_idx, buf.len())
        })
    });

    c.bench_function("scan_line/open_partial_line", |b| {
        let partial = &LINE[..LINE.len() - 3];
        b.iter(|| {
            let mut buf = partial.to_vec();
            let mut checked_idx = 0;
            scan_line(&mut buf, &mut checked_idx, buf.len())
        })
    });
}

criterion_group!(benches, benchmark);
criterion_main!(benches);
