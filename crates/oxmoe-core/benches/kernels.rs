//! Kernel throughput benchmarks.
//!
//! Shapes follow one gpt-oss-20b layer where that stays cheap enough to run
//! on a laptop; the end-to-end case uses a scaled-down synthetic model.
//! Build with `--features parallel` to compare against the rayon path.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use oxmoe_core::checkpoint::{encode_bf16, Bf16View, Checkpoint, Mxfp4Weight};
use oxmoe_core::kernels::{
    linear_bf16, mxfp4_matmul, rmsnorm, sdpa_with_sinks, topk_gating, AttentionShape,
};
use oxmoe_core::model::{synthetic_checkpoint, ModelConfig, Transformer};
use oxmoe_core::quantization::{groups_per_row, MXFP4_BYTES_PER_GROUP};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const HIDDEN: usize = 2880;

fn random(rng: &mut StdRng, n: usize) -> Vec<f32> {
    (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

fn bench_rmsnorm(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(1);
    let scale = encode_bf16(&random(&mut rng, HIDDEN));
    let scale = Bf16View::new(&scale).unwrap();

    let mut group = c.benchmark_group("rmsnorm");
    for seq in [1, 32, 128] {
        let x = random(&mut rng, seq * HIDDEN);
        let mut out = vec![0.0; x.len()];
        group.throughput(Throughput::Elements(x.len() as u64));
        group.bench_with_input(BenchmarkId::new("seq", seq), &seq, |b, _| {
            b.iter(|| rmsnorm(black_box(&x), scale, 1e-5, HIDDEN, &mut out).unwrap());
        });
    }
    group.finish();
}

fn bench_linear(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(2);
    // Router projection.
    let out_features = 32;
    let weight = encode_bf16(&random(&mut rng, out_features * HIDDEN));
    let bias = encode_bf16(&random(&mut rng, out_features));
    let weight = Bf16View::new(&weight).unwrap();
    let bias = Bf16View::new(&bias).unwrap();

    let mut group = c.benchmark_group("linear_bf16");
    for seq in [1, 32] {
        let x = random(&mut rng, seq * HIDDEN);
        let mut out = vec![0.0; seq * out_features];
        group.throughput(Throughput::Elements((seq * out_features * HIDDEN) as u64));
        group.bench_with_input(BenchmarkId::new("seq", seq), &seq, |b, _| {
            b.iter(|| {
                linear_bf16(black_box(&x), weight, Some(bias), HIDDEN, out_features, &mut out)
                    .unwrap()
            });
        });
    }
    group.finish();
}

fn bench_mxfp4(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(3);
    // One expert's up projection: [2 * intermediate, hidden].
    let rows = 2 * HIDDEN;
    let groups = groups_per_row(HIDDEN);
    let blocks: Vec<u8> = (0..rows * groups * MXFP4_BYTES_PER_GROUP)
        .map(|_| rng.gen())
        .collect();
    let scales: Vec<u8> = (0..rows * groups).map(|_| rng.gen_range(120..130)).collect();
    let weight = Mxfp4Weight::new(&blocks, &scales, rows, groups).unwrap();
    let x = random(&mut rng, HIDDEN);
    let mut out = vec![0.0; rows];

    let mut group = c.benchmark_group("mxfp4_matmul");
    group.throughput(Throughput::Elements((rows * HIDDEN) as u64));
    group.bench_function("expert_up_projection", |b| {
        b.iter(|| mxfp4_matmul(black_box(&x), weight, None, &mut out).unwrap());
    });
    group.finish();
}

fn bench_attention(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(4);
    let (heads, kv_heads, head_dim) = (64, 8, 64);
    let sinks = encode_bf16(&random(&mut rng, heads));
    let sinks = Bf16View::new(&sinks).unwrap();

    let mut group = c.benchmark_group("sdpa_with_sinks");
    for (seq, window) in [(128, None), (512, None), (512, Some(128))] {
        let shape = AttentionShape {
            seq_len: seq,
            num_q_heads: heads,
            num_kv_heads: kv_heads,
            head_dim,
        };
        let q = random(&mut rng, seq * heads * head_dim);
        let k = random(&mut rng, seq * kv_heads * head_dim);
        let v = random(&mut rng, seq * kv_heads * head_dim);
        let mut out = vec![0.0; q.len()];
        let label = match window {
            Some(w) => format!("{seq}/window{w}"),
            None => format!("{seq}/full"),
        };
        group.bench_function(label, |b| {
            b.iter(|| {
                sdpa_with_sinks(&q, &k, &v, sinks, shape, 0.125, window, &mut out).unwrap()
            });
        });
    }
    group.finish();
}

fn bench_gating(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(5);
    let logits = random(&mut rng, 32);
    c.bench_function("topk_gating/32_choose_4", |b| {
        b.iter(|| topk_gating(black_box(&logits), 4).unwrap());
    });
}

fn bench_forward(c: &mut Criterion) {
    let config = ModelConfig {
        num_hidden_layers: 2,
        num_experts: 8,
        experts_per_token: 2,
        vocab_size: 512,
        hidden_size: 128,
        intermediate_size: 128,
        head_dim: 32,
        num_attention_heads: 4,
        num_key_value_heads: 2,
        sliding_window: 16,
        ..ModelConfig::default()
    };
    let bytes = synthetic_checkpoint(&config).to_bytes().unwrap();
    let checkpoint = Checkpoint::from_bytes(bytes).unwrap();
    let model = Transformer::load(&checkpoint, config).unwrap();

    let mut group = c.benchmark_group("forward");
    for seq in [8, 32] {
        let tokens: Vec<i32> = (0..seq).map(|t| (t * 7 % 512) as i32).collect();
        group.throughput(Throughput::Elements(seq as u64));
        group.bench_with_input(BenchmarkId::new("seq", seq), &seq, |b, _| {
            b.iter(|| model.forward(black_box(&tokens)).unwrap());
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_rmsnorm,
    bench_linear,
    bench_mxfp4,
    bench_attention,
    bench_gating,
    bench_forward
);
criterion_main!(benches);
