//! Benchmarks for the inner loops of training and inference.
//!
//! Row dot products and axpy dominate training; subword hashing dominates
//! dictionary lookups; `dot_row` on a quantized matrix dominates queries on
//! compressed models.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::io::Cursor;

use subvec::model::sigmoid;
use subvec::{simd, Args, Dictionary, Matrix, QMatrix, RowStore};

// === Generators ===

fn random_matrix(rows: usize, dim: usize) -> Matrix {
    Matrix::uniform(rows, dim, 1.0, 42)
}

// === Benchmarks ===

fn bench_dense_kernels(c: &mut Criterion) {
    let mut group = c.benchmark_group("dense");
    for dim in [64usize, 100, 300] {
        let m = random_matrix(2, dim);
        let (a, b) = (m.row(0).to_vec(), m.row(1).to_vec());
        group.throughput(Throughput::Elements(dim as u64));

        group.bench_with_input(BenchmarkId::new("dot", dim), &dim, |bencher, _| {
            bencher.iter(|| simd::dot(black_box(&a), black_box(&b)))
        });
        group.bench_with_input(BenchmarkId::new("axpy", dim), &dim, |bencher, _| {
            let mut y = b.clone();
            bencher.iter(|| simd::axpy(black_box(0.01), black_box(&a), &mut y))
        });
    }
    group.finish();
}

fn bench_sigmoid(c: &mut Criterion) {
    c.bench_function("sigmoid_table", |b| {
        b.iter(|| {
            let mut acc = 0.0f32;
            for i in -100..100 {
                acc += sigmoid(black_box(i as f32 * 0.1));
            }
            acc
        })
    });
}

fn bench_subwords(c: &mut Criterion) {
    let args = Args {
        min_count: 1,
        bucket: 2_000_000,
        vocab_capacity: 1024,
        ..Args::skipgram()
    };
    let dict = Dictionary::from_reader(&args, Cursor::new("internationalization and more\n"))
        .expect("dictionary");
    let mut group = c.benchmark_group("subword_ids");
    for word in ["and", "internationalization", "unseenword"] {
        group.bench_with_input(BenchmarkId::from_parameter(word), word, |b, w| {
            b.iter(|| dict.subword_ids(black_box(w)))
        });
    }
    group.finish();
}

fn bench_quantized_rows(c: &mut Criterion) {
    let dense = random_matrix(4096, 100);
    let query = dense.row(7).to_vec();
    let mut group = c.benchmark_group("dot_row_4096x100");
    group.throughput(Throughput::Elements(4096));

    group.bench_function("dense", |b| {
        b.iter(|| (0..dense.rows()).map(|i| dense.dot_row(black_box(&query), i)).sum::<f32>())
    });
    for qnorm in [false, true] {
        let q = QMatrix::quantize(&dense, 2, 8, qnorm, 1).expect("quantize");
        let name = if qnorm { "pq_qnorm" } else { "pq" };
        group.bench_function(name, |b| {
            b.iter(|| (0..q.rows()).map(|i| q.dot_row(black_box(&query), i)).sum::<f32>())
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_dense_kernels,
    bench_sigmoid,
    bench_subwords,
    bench_quantized_rows
);
criterion_main!(benches);
