//! Benchmarks for pixel transforms, analysis and the synthetic pipeline.
//!
//! Run with: cargo bench
//! Run with parallel filters: cargo bench --features rayon

use std::time::Duration;

use criterion::{BenchmarkId, Criterion};
use image::{Rgba, RgbaImage};

use clipsmith::analysis::{self, kmeans};
use clipsmith::synthetic::{MemorySink, SyntheticSource};
use clipsmith::transform::{self, ColorFilter, Rotation, SubtitleCue, TransformSpec};
use clipsmith::{Job, Pipeline, PipelineOptions};

fn gradient(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8, 255])
    })
}

fn benchmark_color_filters(criterion: &mut Criterion) {
    let raster = gradient(640, 360);
    let mut group = criterion.benchmark_group("color filter 640x360");

    for filter in ColorFilter::ALL {
        let spec = TransformSpec::Color(filter);
        group.bench_with_input(BenchmarkId::from_parameter(filter), &spec, |bencher, spec| {
            bencher.iter(|| transform::apply(&raster, spec).unwrap());
        });
    }

    group.finish();
}

fn benchmark_geometry(criterion: &mut Criterion) {
    let raster = gradient(1280, 720);

    criterion.bench_function("rotate 90 (1280x720)", |bencher| {
        let spec = TransformSpec::Rotate(Rotation::Deg90);
        bencher.iter(|| transform::apply(&raster, &spec).unwrap());
    });

    criterion.bench_function("vertical crop 9:16 (1280x720)", |bencher| {
        let spec = TransformSpec::CenterCropAspect(9.0 / 16.0);
        bencher.iter(|| transform::apply(&raster, &spec).unwrap());
    });

    criterion.bench_function("zoom 1.12 (1280x720)", |bencher| {
        let spec = TransformSpec::Zoom(1.12);
        bencher.iter(|| transform::apply(&raster, &spec).unwrap());
    });

    criterion.bench_function("subtitle overlay (1280x720)", |bencher| {
        let spec = TransformSpec::SubtitleOverlay(vec![SubtitleCue::new(Duration::ZERO, "Hello there")]);
        bencher.iter(|| transform::apply(&raster, &spec).unwrap());
    });
}

fn benchmark_analysis(criterion: &mut Criterion) {
    let pool: Vec<[u8; 3]> = gradient(320, 180)
        .pixels()
        .step_by(analysis::POOL_STRIDE)
        .map(|pixel| [pixel[0], pixel[1], pixel[2]])
        .collect();

    criterion.bench_function("kmeans k=5", |bencher| {
        bencher.iter(|| kmeans(&pool, analysis::DEFAULT_PALETTE_SIZE));
    });

    let before = gradient(160, 90);
    let after = RgbaImage::from_fn(160, 90, |x, y| *before.get_pixel(159 - x, y));
    criterion.bench_function("red difference 160x90", |bencher| {
        bencher.iter(|| analysis::red_difference(&before, &after));
    });
}

fn benchmark_synthetic_pipeline(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("synthetic pipeline");
    group.sample_size(10);

    group.bench_function("filter 2s at 320x180", |bencher| {
        bencher.iter(|| {
            let backend = SyntheticSource::new(320, 180, 30.0, Duration::from_secs(2), |_| gradient(320, 180));
            Pipeline::new(backend, MemorySink::new())
                .run(&Job::Filter(ColorFilter::WarmVintage), &PipelineOptions::new())
                .unwrap()
        });
    });

    group.bench_function("color analysis 12s", |bencher| {
        bencher.iter(|| {
            let backend = SyntheticSource::new(320, 180, 10.0, Duration::from_secs(12), |_| gradient(320, 180));
            Pipeline::new(backend, MemorySink::new())
                .run(&Job::analyze_color(), &PipelineOptions::new())
                .unwrap()
        });
    });

    group.finish();
}

criterion::criterion_group!(
    benches,
    benchmark_color_filters,
    benchmark_geometry,
    benchmark_analysis,
    benchmark_synthetic_pipeline,
);
criterion::criterion_main!(benches);
