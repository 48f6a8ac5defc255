//! Benchmarks for batch rendering and scheduling.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use phobz_synth::output::PlaybackQueue;
use phobz_synth::{
    AudioSegment, BatchRequest, ComputeMode, CpuSampleUnit, Engine, EngineConfig, GpuContext,
    GpuSampleUnit, ProgramSource, SampleCompute, VirtualOutput,
};

const SAMPLE_RATE: f64 = 44100.0;

const SINE: &str = "fn main_sound(time: f32) -> vec2<f32> {\n    let v = sin(6.2831853 * 440.0 * time);\n    return vec2<f32>(v, v);\n}";

fn bench_cpu_batches(c: &mut Criterion) {
    let mut group = c.benchmark_group("CPU Batch Render");

    let mut unit = CpuSampleUnit::with_program(|t| {
        let v = (std::f64::consts::TAU * 440.0 * t).sin() as f32;
        [v, v]
    });
    unit.configure(&ProgramSource::new("sine")).unwrap();

    for count in [1024u32, 4410, 16384] {
        group.throughput(Throughput::Elements(u64::from(count)));
        group.bench_with_input(BenchmarkId::new("render", count), &count, |b, &count| {
            b.iter(|| {
                black_box(unit.render(&BatchRequest::new(0, count, SAMPLE_RATE)).unwrap());
            });
        });
    }

    group.finish();
}

fn bench_gpu_batches(c: &mut Criterion) {
    let Ok(ctx) = pollster::block_on(GpuContext::new()) else {
        return;
    };
    let mut unit = GpuSampleUnit::new(&ctx);
    if unit.configure(&ProgramSource::new(SINE)).is_err() {
        return;
    }

    let mut group = c.benchmark_group("GPU Batch Render");

    for count in [1024u32, 4410, 65536] {
        group.throughput(Throughput::Elements(u64::from(count)));
        group.bench_with_input(BenchmarkId::new("render", count), &count, |b, &count| {
            b.iter(|| {
                black_box(unit.render(&BatchRequest::new(0, count, SAMPLE_RATE)).unwrap());
            });
        });
    }

    group.finish();
}

fn bench_scheduler_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("Scheduler Tick");

    let config = EngineConfig {
        compute_mode: ComputeMode::Inline,
        ..Default::default()
    };
    let output = VirtualOutput::new(SAMPLE_RATE);
    let handle = output.handle();
    let mut engine = Engine::init(
        config,
        Box::new(output),
        Box::new(CpuSampleUnit::silence()),
        "silence",
    )
    .unwrap();
    engine.start().unwrap();

    group.bench_function("steady_state", |b| {
        b.iter(|| {
            handle.advance_frames(441);
            black_box(engine.tick().unwrap());
        });
    });

    group.finish();
}

fn bench_playback_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("Playback Queue");

    for buffer in [256usize, 1024] {
        group.throughput(Throughput::Elements(buffer as u64));
        group.bench_with_input(BenchmarkId::new("render", buffer), &buffer, |b, &buffer| {
            let mut queue = PlaybackQueue::new(SAMPLE_RATE);
            let mut out = vec![0.0f32; buffer * 2];
            let mut next_start = 0.0;
            b.iter(|| {
                if queue.len() < 2 {
                    let segment = AudioSegment::from_interleaved(&vec![0.1; 4410 * 2], SAMPLE_RATE);
                    let duration = segment.duration();
                    queue.push(segment, next_start);
                    next_start += duration;
                }
                queue.render(&mut out, 2);
                black_box(&out);
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_cpu_batches,
    bench_gpu_batches,
    bench_scheduler_tick,
    bench_playback_queue
);
criterion_main!(benches);
