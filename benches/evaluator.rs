//! Benchmarks for program evaluation and screening.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use symreg::{
    compute::{
        BatchEvaluator, Dataset, Evaluator, Instruction, Program, ScreeningCascade, StackEvaluator,
    },
    compute::evolution::{LogSink, ProgramRng, RandomEngine, SearchEngine},
    schema::{EngineConfig, ScreeningConfig},
};

fn dataset(rows: usize) -> Dataset {
    let x0: Vec<f64> = (0..rows).map(|i| i as f64 / rows as f64).collect();
    let x1: Vec<f64> = (0..rows).map(|i| (i % 17) as f64 - 8.0).collect();
    let y = x0.iter().zip(&x1).map(|(a, b)| a * b + a.sin()).collect();
    Dataset::from_columns(vec![x0, x1], y).unwrap()
}

/// `x0 * x1 + sin(x0)`
fn target_program() -> Program {
    use Instruction::*;
    Program::new(vec![
        PushVariable(0),
        PushVariable(1),
        Multiply,
        PushVariable(0),
        Sine,
        Add,
    ])
}

fn bench_stack_evaluator(c: &mut Criterion) {
    let mut group = c.benchmark_group("stack_evaluator");
    let program = target_program();

    for rows in [100, 1_000, 10_000, 100_000] {
        let data = dataset(rows);
        let mut evaluator = StackEvaluator::new();
        let mut out = vec![0.0; rows];

        group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |b, _| {
            b.iter(|| {
                evaluator.evaluate_into(black_box(&program), &data, &mut out);
            });
        });
    }

    group.finish();
}

fn bench_batch_evaluator(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_evaluator");
    let data = dataset(10_000);

    for count in [16, 128] {
        let mut rng = ProgramRng::new(1, 2, EngineConfig::default());
        let programs: Vec<Program> = (0..count).map(|_| rng.random_program(5)).collect();

        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| BatchEvaluator.evaluate_batch(black_box(&programs), &data));
        });
    }

    group.finish();
}

fn bench_screening_cascade(c: &mut Criterion) {
    let mut group = c.benchmark_group("screening_cascade");

    for rows in [1_000, 100_000] {
        let data = dataset(rows);
        let mut engine = RandomEngine::new(2, EngineConfig::default(), 3, LogSink::default());
        let programs = engine.initial_population(256);
        let mut cascade = ScreeningCascade::from_config(&ScreeningConfig::default()).unwrap();
        let mut evaluator = StackEvaluator::new();

        group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |b, _| {
            b.iter(|| {
                programs
                    .iter()
                    .filter(|p| cascade.screen(black_box(p), &mut evaluator, &data).passed)
                    .count()
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_stack_evaluator,
    bench_batch_evaluator,
    bench_screening_cascade
);
criterion_main!(benches);
