use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use sparsering::{
    config, ewise_add, mxm, reduce_scalar, transpose, AxbMethod, BinaryOp, BinaryOpcode, Config,
    Descriptor, Matrix, Monoid, Semiring, Type,
};

fn bench_mxm_methods(c: &mut Criterion) {
    config::init(Config::default()).ok();
    let mut group = c.benchmark_group("mxm_methods");

    // Deterministic operands for stable benches
    let a = Matrix::random(Type::FP64, 400, 400, 0.01, 11).unwrap();
    let b = Matrix::random(Type::FP64, 400, 400, 0.01, 12).unwrap();
    let sr = Semiring::plus_times(Type::FP64).unwrap();

    for method in [AxbMethod::Gustavson, AxbMethod::Heap, AxbMethod::Dot] {
        group.bench_with_input(
            BenchmarkId::new("plus_times_fp64", format!("{:?}", method)),
            &method,
            |bencher, &method| {
                let desc = Descriptor {
                    axb_method: method,
                    ..Descriptor::default()
                };
                bencher.iter(|| {
                    let mut out = Matrix::new(Type::FP64, 400, 400).unwrap();
                    mxm(
                        &mut out,
                        None,
                        None,
                        &sr,
                        black_box(&a),
                        black_box(&b),
                        &desc,
                    )
                    .unwrap();
                    black_box(out)
                })
            },
        );
    }

    group.finish();
}

fn bench_masked_mxm(c: &mut Criterion) {
    config::init(Config::default()).ok();
    let mut group = c.benchmark_group("masked_mxm");

    let a = Matrix::random(Type::FP64, 400, 400, 0.02, 21).unwrap();
    let b = Matrix::random(Type::FP64, 400, 400, 0.02, 22).unwrap();
    let m = Matrix::random(Type::BOOL, 400, 400, 0.001, 23).unwrap();
    let sr = Semiring::plus_times(Type::FP64).unwrap();

    group.bench_function("sparse_mask", |bencher| {
        bencher.iter(|| {
            let mut out = Matrix::new(Type::FP64, 400, 400).unwrap();
            mxm(
                &mut out,
                Some(black_box(&m)),
                None,
                &sr,
                black_box(&a),
                black_box(&b),
                &Descriptor::default(),
            )
            .unwrap();
            black_box(out)
        })
    });

    group.finish();
}

fn bench_ewise_and_friends(c: &mut Criterion) {
    config::init(Config::default()).ok();
    let mut group = c.benchmark_group("ewise_and_friends");

    let a = Matrix::random(Type::FP64, 600, 600, 0.05, 31).unwrap();
    let b = Matrix::random(Type::FP64, 600, 600, 0.05, 32).unwrap();
    let plus = BinaryOp::builtin(BinaryOpcode::Plus, Type::FP64).unwrap();
    let monoid = Monoid::plus(Type::FP64).unwrap();

    group.bench_function("ewise_add", |bencher| {
        bencher.iter(|| {
            let mut out = Matrix::new(Type::FP64, 600, 600).unwrap();
            ewise_add(
                &mut out,
                None,
                None,
                &plus,
                black_box(&a),
                black_box(&b),
                &Descriptor::default(),
            )
            .unwrap();
            black_box(out)
        })
    });

    group.bench_function("transpose", |bencher| {
        bencher.iter(|| {
            let mut out = Matrix::new(Type::FP64, 600, 600).unwrap();
            transpose(&mut out, None, None, black_box(&a), &Descriptor::default()).unwrap();
            black_box(out)
        })
    });

    group.bench_function("reduce_scalar", |bencher| {
        bencher.iter(|| black_box(reduce_scalar(&monoid, black_box(&a)).unwrap()))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_mxm_methods,
    bench_masked_mxm,
    bench_ewise_and_friends
);
criterion_main!(benches);
