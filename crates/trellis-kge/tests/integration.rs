//! Integration tests for the full pipeline:
//! indexing -> distributed training -> filtered evaluation -> export.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use trellis_core::{index_raw_triples, CompletionIndex, TripleStore};
use trellis_kge::{
    export, DistributedTrainer, EmbeddingModel, EpochCallback, Evaluator, OptimizerKind,
    RankingMode, ScoringFunction, ScoringTechnique, TrainingConfig,
};

/// A small social-network graph with enough regularity to learn from.
fn raw_social() -> Vec<(&'static str, &'static str, &'static str)> {
    vec![
        ("alice", "friendOf", "bob"),
        ("bob", "friendOf", "alice"),
        ("bob", "friendOf", "carol"),
        ("carol", "friendOf", "bob"),
        ("carol", "friendOf", "dave"),
        ("dave", "friendOf", "carol"),
        ("alice", "worksAt", "acme"),
        ("bob", "worksAt", "acme"),
        ("carol", "worksAt", "globex"),
        ("dave", "worksAt", "globex"),
        ("acme", "locatedIn", "nyc"),
        ("globex", "locatedIn", "sf"),
        ("eve", "friendOf", "alice"),
        ("alice", "friendOf", "eve"),
        ("eve", "worksAt", "acme"),
    ]
}

fn quick_config() -> TrainingConfig {
    TrainingConfig::default()
        .with_epochs(5)
        .with_batch_size(4)
        .with_neg_ratio(2)
        .with_learning_rate(0.05)
        .with_sync_timeout(Duration::from_secs(10))
}

#[test]
fn test_train_then_evaluate_entity_ranking() {
    let (entities, relations, store) = index_raw_triples(&raw_social());

    // Hold out the last two triples for evaluation.
    let all = store.to_vec();
    let (train, test) = all.split_at(all.len() - 2);
    let train_store = TripleStore::from_triples(train.iter().copied());

    let mut model = EmbeddingModel::new(
        ScoringFunction::TransE,
        entities.len(),
        relations.len(),
        16,
        42,
    )
    .unwrap();

    let trainer = DistributedTrainer::new(quick_config().with_devices_per_node(2));
    trainer.fit(&mut model, &train_store).unwrap();

    assert_eq!(model.loss_history.len(), 5);
    assert!(model.loss_history.iter().all(|l| l.is_finite() && *l >= 0.0));

    // Filter against everything known true, train and test alike.
    let evaluator = Evaluator::new(CompletionIndex::from_stores(&[&store]));
    let metrics = evaluator
        .evaluate(&model, test, RankingMode::EntityRanking)
        .unwrap();

    assert_eq!(metrics.num_samples, 2 * test.len());
    for value in metrics.to_map().values() {
        assert!(*value >= 0.0 && *value <= 1.0);
    }
    assert!(metrics.hits_at_10 >= metrics.hits_at_3);
    assert!(metrics.hits_at_3 >= metrics.hits_at_1);
}

#[test]
fn test_relation_ranking_pipeline() {
    let (entities, relations, store) = index_raw_triples(&raw_social());
    let mut model = EmbeddingModel::new(
        ScoringFunction::DistMult,
        entities.len(),
        relations.len(),
        16,
        7,
    )
    .unwrap();

    DistributedTrainer::new(quick_config())
        .fit(&mut model, &store)
        .unwrap();

    let evaluator = Evaluator::new(CompletionIndex::from_stores(&[&store]));
    let queries = store.to_vec();
    let metrics = evaluator
        .evaluate(&model, &queries, RankingMode::RelationRanking)
        .unwrap();

    // One rank per query in relation mode.
    assert_eq!(metrics.num_samples, queries.len());
    assert!(metrics.mrr > 0.0 && metrics.mrr <= 1.0);
}

#[test]
fn test_one_vs_all_training_pipeline() {
    let (entities, relations, store) = index_raw_triples(&raw_social());
    let mut model = EmbeddingModel::new(
        ScoringFunction::DistMult,
        entities.len(),
        relations.len(),
        8,
        0,
    )
    .unwrap();

    let config = quick_config()
        .with_technique(ScoringTechnique::KvsAll)
        .with_optimizer(OptimizerKind::Sgd { momentum: 0.9 });
    DistributedTrainer::new(config)
        .fit(&mut model, &store)
        .unwrap();

    assert_eq!(model.loss_history.len(), 5);
    // BCE over the full vocabulary decreases on this tiny graph.
    assert!(model.loss_history.last().unwrap() < model.loss_history.first().unwrap());
}

#[test]
fn test_workers_produce_identical_replicas_via_checkpoint() {
    // The parameters the caller gets back are rank 0's; training again with
    // the same seed and worker count reproduces them exactly.
    let (entities, relations, store) = index_raw_triples(&raw_social());
    let make_model = || {
        EmbeddingModel::new(
            ScoringFunction::TransE,
            entities.len(),
            relations.len(),
            8,
            42,
        )
        .unwrap()
    };

    let mut first = make_model();
    let mut second = make_model();
    let trainer = DistributedTrainer::new(quick_config().with_devices_per_node(2));
    trainer.fit(&mut first, &store).unwrap();
    trainer.fit(&mut second, &store).unwrap();

    let probe = store.get(0).unwrap();
    assert_eq!(
        first.score_triple(probe).unwrap(),
        second.score_triple(probe).unwrap()
    );
    assert_eq!(first.loss_history, second.loss_history);
}

#[test]
fn test_epoch_callbacks_see_progress() {
    struct Recorder(AtomicUsize);
    impl EpochCallback for Recorder {
        fn on_epoch_end(&self, model: &EmbeddingModel, epoch: usize, loss: f32) {
            assert!(loss.is_finite());
            assert!(model.num_entities() > 0);
            assert_eq!(self.0.fetch_add(1, Ordering::SeqCst), epoch);
        }
    }

    let (entities, relations, store) = index_raw_triples(&raw_social());
    let mut model = EmbeddingModel::new(
        ScoringFunction::TransE,
        entities.len(),
        relations.len(),
        8,
        1,
    )
    .unwrap();

    let recorder = Arc::new(Recorder(AtomicUsize::new(0)));
    DistributedTrainer::new(quick_config().with_devices_per_node(2))
        .with_callback(recorder.clone())
        .fit(&mut model, &store)
        .unwrap();

    assert_eq!(recorder.0.load(Ordering::SeqCst), 5);
}

#[test]
fn test_persisted_partitions_feed_the_evaluator() {
    let (entities, relations, store) = index_raw_triples(&raw_social());

    let all = store.to_vec();
    let (train, rest) = all.split_at(all.len() - 4);
    let (valid, test) = rest.split_at(2);
    let train_store = TripleStore::from_triples(train.iter().copied());
    let valid_store = TripleStore::from_triples(valid.iter().copied());
    let test_store = TripleStore::from_triples(test.iter().copied());

    let dir = tempfile::tempdir().unwrap();
    let train_path = dir.path().join("idx_train.json");
    let valid_path = dir.path().join("idx_valid.json");
    let test_path = dir.path().join("idx_test.json");
    train_store.save(&train_path).unwrap();
    valid_store.save(&valid_path).unwrap();
    test_store.save(&test_path).unwrap();

    let mut model = EmbeddingModel::new(
        ScoringFunction::TransE,
        entities.len(),
        relations.len(),
        8,
        3,
    )
    .unwrap();
    DistributedTrainer::new(quick_config())
        .fit(&mut model, &train_store)
        .unwrap();

    let evaluator =
        Evaluator::from_partitions(&[&train_path, &valid_path, &test_path]).unwrap();
    assert_eq!(evaluator.index().num_triples(), all.len());

    // Validation metrics survive a failing test-set evaluation.
    let valid_metrics = evaluator
        .evaluate(&model, valid, RankingMode::EntityRanking)
        .unwrap();
    let bad_query = [trellis_core::Triple::new(999, 0, 0)];
    assert!(evaluator
        .evaluate(&model, &bad_query, RankingMode::EntityRanking)
        .is_err());
    assert!(valid_metrics.num_samples > 0);
}

#[test]
fn test_export_after_training() {
    let (entities, relations, store) = index_raw_triples(&raw_social());
    let mut model = EmbeddingModel::new(
        ScoringFunction::TransE,
        entities.len(),
        relations.len(),
        8,
        5,
    )
    .unwrap();
    let config = quick_config();
    DistributedTrainer::new(config.clone())
        .fit(&mut model, &store)
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    export::export_embeddings_csv(&model, &entities, &relations, dir.path()).unwrap();
    export::export_run_config(&config, &dir.path().join("configuration.json")).unwrap();

    let entity_csv =
        std::fs::read_to_string(dir.path().join("entity_embeddings.csv")).unwrap();
    assert_eq!(entity_csv.lines().count(), 1 + entities.len());
    assert!(dir.path().join("configuration.json").exists());
}
