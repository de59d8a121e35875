//! End-to-end runs of the search stack through the public API.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use symreg::compute::evolution::{
    EngineContext, EnsembleRegressor, GeneticOperator, IslandOrchestrator, LogSink, ParetoArchive,
    ProgressCallback, RandomEngine, SearchEngine, SubSearch, feature_importance,
};
use symreg::compute::{Dataset, DimensionalType, Instruction, Program};
use symreg::schema::{
    DimensionalConfig, EnsembleConfig, GenerationReport, IslandConfig, ScreeningConfig,
    SearchConfig, StopReason,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// y = 2.5 * x0 + x1, with an unused third feature.
fn planar_data() -> Dataset {
    let rows = 120;
    let x0: Vec<f64> = (0..rows).map(|i| (i as f64 * 0.37).sin() * 3.0).collect();
    let x1: Vec<f64> = (0..rows).map(|i| (i % 11) as f64 - 5.0).collect();
    let x2: Vec<f64> = (0..rows).map(|i| (i * 7 % 13) as f64).collect();
    let y = x0.iter().zip(&x1).map(|(a, b)| 2.5 * a + b).collect();
    Dataset::from_columns(vec![x0, x1, x2], y)
        .unwrap()
        .with_feature_names(vec!["force".into(), "offset".into(), "noise".into()])
        .unwrap()
}

/// Complexity strictly rises and error strictly falls along the front, so
/// no member dominates another.
fn assert_non_dominated(archive: &ParetoArchive) {
    for pair in archive.models().windows(2) {
        assert!(pair[0].complexity < pair[1].complexity, "{pair:?}");
        assert!(archive.error(&pair[0]) > archive.error(&pair[1]), "{pair:?}");
    }
}

fn config(seed: u64) -> SearchConfig {
    SearchConfig {
        population_size: 40,
        max_generations: 12,
        random_seed: Some(seed),
        ..Default::default()
    }
}

#[test]
fn test_islands_find_planar_relation() {
    init_logging();
    let data = planar_data();
    let result = IslandOrchestrator::new(config(11), IslandConfig { island_count: 3 })
        .unwrap()
        .run(&data)
        .unwrap();

    let best = result.archive.best().unwrap();
    assert!(best.r2 > 0.7, "best {} r2 {}", best.expression, best.r2);
    assert_eq!(result.best_expression.as_deref(), Some(best.expression.as_str()));
    assert!(best.aic.is_some() && best.bic.is_some());

    let importance =
        feature_importance(&result.archive, data.feature_count(), data.feature_names());
    assert_eq!(importance.len(), 3);
    assert_ne!(importance[0].name, "noise");
}

#[test]
fn test_seeded_islands_are_reproducible() {
    let data = planar_data();
    let run = || {
        IslandOrchestrator::new(config(5), IslandConfig { island_count: 2 })
            .unwrap()
            .run(&data)
            .unwrap()
    };
    assert_eq!(run().archive.models(), run().archive.models());
}

#[test]
fn test_merged_front_matches_manual_merge() {
    let data = planar_data();
    let archives: Vec<ParetoArchive> = (0..2)
        .map(|index| {
            SubSearch::new(
                index,
                &config(21),
                data.clone(),
                &RandomEngine::from_context,
                LogSink::default(),
            )
            .unwrap()
            .run()
            .archive
        })
        .collect();
    let result = IslandOrchestrator::new(config(21), IslandConfig { island_count: 2 })
        .unwrap()
        .run(&data)
        .unwrap();

    assert_eq!(result.archive.models(), ParetoArchive::merge(&archives).models());
}

#[test]
fn test_ensemble_with_progress() {
    init_logging();
    let reports = Arc::new(Mutex::new(Vec::<GenerationReport>::new()));
    let progress: ProgressCallback = {
        let reports = Arc::clone(&reports);
        Arc::new(move |report: &GenerationReport| {
            reports.lock().unwrap().push(report.clone())
        })
    };

    let ensemble = EnsembleConfig {
        number_of_models: 4,
        bootstrap_ratio: 0.8,
    };
    let result = EnsembleRegressor::new(config(3), ensemble)
        .unwrap()
        .with_progress(progress)
        .run(&planar_data())
        .unwrap();

    assert_eq!(result.stop_reasons.len(), 4);
    let reports = reports.lock().unwrap();
    // Initial report plus one per generation, for every member.
    assert_eq!(reports.len(), result.total_generations + 4);
    for member in 0..4 {
        assert!(
            reports
                .iter()
                .any(|r| r.sub_search == member && r.operator.is_none())
        );
    }
}

#[test]
fn test_cancellation_from_progress_callback() {
    let orchestrator = IslandOrchestrator::new(
        SearchConfig {
            max_generations: 10_000,
            ..config(8)
        },
        IslandConfig { island_count: 2 },
    )
    .unwrap();
    let cancel = orchestrator.cancel_handle();
    let progress: ProgressCallback = Arc::new(move |report: &GenerationReport| {
        if report.generation >= 3 {
            cancel.cancel();
        }
    });

    let result = orchestrator
        .with_progress(progress)
        .run(&planar_data())
        .unwrap();
    assert_eq!(result.stop_reasons, vec![StopReason::Cancelled; 2]);
    assert!(result.total_generations < 100);
    assert!(!result.archive.is_empty());
    assert_non_dominated(&result.archive);
}

#[test]
fn test_time_limit() {
    let config = SearchConfig {
        max_generations: usize::MAX,
        time_limit_secs: Some(0.2),
        ..config(4)
    };
    let result = IslandOrchestrator::new(config, IslandConfig { island_count: 2 })
        .unwrap()
        .run(&planar_data())
        .unwrap();
    assert_eq!(result.stop_reasons, vec![StopReason::DeadlineExceeded; 2]);
    assert_non_dominated(&result.archive);
}

/// Engine that only ever proposes `x0 * x1`.
struct FixedEngine;

impl SearchEngine for FixedEngine {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn initial_population(&mut self, size: usize) -> Vec<Program> {
        vec![product(); size]
    }

    fn breed(&mut self, _operator: GeneticOperator, _parents: &[Program]) -> Program {
        product()
    }
}

fn product() -> Program {
    Program::new(vec![
        Instruction::PushVariable(0),
        Instruction::PushVariable(1),
        Instruction::Multiply,
    ])
}

#[test]
fn test_custom_engine_and_dimensional_screen() {
    let built = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&built);

    // Length times mass can never be a length.
    let features = [
        (0, DimensionalType::new(1, 0, 0)),
        (1, DimensionalType::new(0, 1, 0)),
        (2, DimensionalType::DIMENSIONLESS),
    ]
    .into_iter()
    .collect();
    let config = SearchConfig {
        screening: ScreeningConfig {
            dimensional: Some(DimensionalConfig {
                features,
                target: DimensionalType::new(1, 0, 0),
            }),
            ..Default::default()
        },
        ..config(2)
    };

    let result = IslandOrchestrator::new(config, IslandConfig { island_count: 2 })
        .unwrap()
        .with_engine_factory(move |_context: EngineContext| {
            counter.fetch_add(1, Ordering::Relaxed);
            Box::new(FixedEngine) as Box<dyn SearchEngine>
        })
        .run(&planar_data())
        .unwrap();

    assert_eq!(built.load(Ordering::Relaxed), 2);
    // Every candidate is dimensionally invalid, so nothing reaches the archive.
    assert!(result.archive.is_empty());
    assert!(result.best_expression.is_none());
}
