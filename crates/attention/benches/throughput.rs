use attention::masks::causal_mask;
use attention::{CrossAttention, CrossAttentionConfig, MultiHeadAttention, SelfAttentionConfig};
use candle_core::{DType, Device, Tensor};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

const HEADS: usize = 8;
const HEAD_DIM: usize = 64;

fn bench_self_attention(c: &mut Criterion) {
    let device = Device::Cpu;
    let batch = 2usize;
    let in_dim = HEADS * HEAD_DIM;

    for dtype in [DType::F32, DType::BF16] {
        let mut group = c.benchmark_group(format!("self_attention/{dtype:?}"));
        let layer = MultiHeadAttention::new(
            SelfAttentionConfig::new(in_dim, HEAD_DIM, HEAD_DIM, HEADS),
            &device,
            dtype,
        )
        .expect("layer init");
        for seq_len in [64usize, 256, 1024] {
            let x = Tensor::randn(0f32, 1.0, (batch, seq_len, in_dim), &device)
                .and_then(|t| t.to_dtype(dtype))
                .expect("input");
            let mask = causal_mask(&device, seq_len, seq_len).expect("mask");
            group.throughput(Throughput::Elements((batch * seq_len) as u64));
            group.bench_with_input(
                BenchmarkId::from_parameter(seq_len),
                &(x, mask),
                |b, (x, mask)| {
                    b.iter(|| {
                        let out = layer.forward(black_box(x), Some(mask)).expect("forward");
                        black_box(out);
                    });
                },
            );
        }
        group.finish();
    }
}

fn bench_cross_attention(c: &mut Criterion) {
    let device = Device::Cpu;
    let batch = 2usize;
    let in_dim1 = HEADS * HEAD_DIM;
    let in_dim2 = 384usize;
    let layer = CrossAttention::new(
        CrossAttentionConfig::new(in_dim1, in_dim2, HEAD_DIM, HEAD_DIM, HEADS),
        &device,
        DType::F32,
    )
    .expect("layer init");

    let mut group = c.benchmark_group("cross_attention/F32");
    let x1 = Tensor::randn(0f32, 1.0, (batch, 64, in_dim1), &device).expect("queries");
    for context_len in [128usize, 512, 2048] {
        let x2 = Tensor::randn(0f32, 1.0, (batch, context_len, in_dim2), &device).expect("context");
        group.throughput(Throughput::Elements((batch * context_len) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(context_len), &x2, |b, x2| {
            b.iter(|| {
                let out = layer
                    .forward(black_box(&x1), black_box(x2), None)
                    .expect("forward");
                black_box(out);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_self_attention, bench_cross_attention);
criterion_main!(benches);
