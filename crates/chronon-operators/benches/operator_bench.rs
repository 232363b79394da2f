//! Chronon Operator Benchmarks
//!
//! Throughput of the k-way merge hot path and the sample codec.
//!
//! @version 0.1.0
//! @author Chronon Development Team

use chronon_common::{Result, Sample, SeriesId, Timestamp};
use chronon_operators::{Direction, MergeOperator, PointCursor, ReadBatch, SampleOperator, TimeOrder};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

const POINTS: u64 = 100_000;

/// Cursor producing an arithmetic timestamp sequence without allocation.
struct SyntheticCursor {
    next: u64,
    limit: u64,
    stride: u64,
}

impl PointCursor for SyntheticCursor {
    fn read(&mut self, ts: &mut [Timestamp], values: &mut [f64]) -> Result<ReadBatch> {
        let mut n = 0;
        while n < ts.len() && n < values.len() && self.next < self.limit {
            ts[n] = self.next;
            values[n] = self.next as f64;
            self.next += self.stride;
            n += 1;
        }
        if self.next >= self.limit {
            Ok(ReadBatch::end(n))
        } else {
            Ok(ReadBatch::more(n))
        }
    }

    fn direction(&self) -> Direction {
        Direction::Forward
    }
}

fn merge_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("kway_merge");
    for sources in [2usize, 8, 32] {
        group.throughput(Throughput::Elements(POINTS));
        group.bench_with_input(BenchmarkId::from_parameter(sources), &sources, |b, &sources| {
            b.iter(|| {
                let ids: Vec<SeriesId> = (0..sources).map(|i| SeriesId(i as u64)).collect();
                let cursors: Vec<Box<dyn PointCursor>> = (0..sources)
                    .map(|i| {
                        Box::new(SyntheticCursor {
                            next: i as u64,
                            limit: POINTS,
                            stride: sources as u64,
                        }) as Box<dyn PointCursor>
                    })
                    .collect();
                let mut merge = MergeOperator::<TimeOrder>::new(ids, cursors);
                let mut buf = vec![0u8; 128 * 1024];
                loop {
                    let batch = merge.read(&mut buf).expect("read should succeed");
                    black_box(batch.len);
                    if batch.at_end {
                        break;
                    }
                }
            })
        });
    }
    group.finish();
}

fn codec_benchmark(c: &mut Criterion) {
    let sample = Sample::float(SeriesId(1), 12_345, 42.0);
    let mut buf = [0u8; 64];
    c.bench_function("sample_encode_decode", |b| {
        b.iter(|| {
            let n = sample.encode(&mut buf).expect("encode should succeed");
            let (decoded, _) = Sample::decode(&buf[..n]).expect("decode should succeed");
            black_box(decoded);
        })
    });
}

criterion_group!(benches, merge_benchmark, codec_benchmark);
criterion_main!(benches);
