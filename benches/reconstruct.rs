//! Benchmarks for frame reconstruction
//!
//! Run with: cargo bench --bench reconstruct

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use raster_acquisition::reconstruction::ReconstructionConfig;
use raster_acquisition::{FrameGeometry, FrameReconstructor, SampleBuffer};

/// Ramp with an occasional dropped sample, similar to what a live scan produces
fn raw_frame(geometry: &FrameGeometry) -> Vec<i16> {
    (0..geometry.total_samples_per_frame())
        .map(|n| if n % 97 == 96 { -1 } else { (n % 4096) as i16 })
        .collect()
}

fn bench_reconstruct(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconstruct");

    for &(spp, size) in &[(1, 256), (4, 256), (4, 512), (8, 512)] {
        let geometry = match FrameGeometry::new(spp, size, size) {
            Ok(geometry) => geometry,
            Err(e) => panic!("invalid benchmark geometry: {}", e),
        };
        let reconstructor = match FrameReconstructor::new(geometry, ReconstructionConfig::default())
        {
            Ok(reconstructor) => reconstructor,
            Err(e) => panic!("invalid benchmark reconstructor: {}", e),
        };
        let raw = raw_frame(&geometry);

        group.throughput(Throughput::Elements(raw.len() as u64));
        group.bench_with_input(
            BenchmarkId::new("frame", format!("{}x{}@{}", size, size, spp)),
            &raw,
            |b, raw| b.iter(|| reconstructor.reconstruct(black_box(raw))),
        );
    }

    group.finish();
}

fn bench_buffer(c: &mut Criterion) {
    let geometry = match FrameGeometry::new(4, 512, 512) {
        Ok(geometry) => geometry,
        Err(e) => panic!("invalid benchmark geometry: {}", e),
    };
    let chunk: Vec<i16> = (0..65_536).map(|n| (n % 4096) as i16).collect();

    let mut group = c.benchmark_group("sample_buffer");
    group.throughput(Throughput::Elements(chunk.len() as u64));
    group.bench_function("append_extract", |b| {
        let mut buffer = SampleBuffer::new(geometry.total_samples_per_frame());
        b.iter(|| {
            buffer.append(black_box(&chunk));
            buffer.extract_complete_frames()
        })
    });
    group.finish();
}

criterion_group!(benches, bench_reconstruct, bench_buffer);
criterion_main!(benches);
