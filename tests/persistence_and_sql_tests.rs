// Persistence round-trips, SQL emission (including the subfeature
// ordering) and the fingerprint cache.

use std::sync::Arc;

use relfeat::containers::{Encoding, FloatColumn, IntColumn};
use relfeat::fingerprints::FingerprintCache;
use relfeat::{DataFrame, DataFrameView, FeatureEnsemble, Hyperparameters, Placeholder, Role};

fn population() -> Arc<DataFrame> {
    Arc::new(
        DataFrame::new(
            "POPULATION",
            vec![],
            vec![],
            vec![IntColumn::new("jk", Role::JoinKey, vec![1, 2, 3, 4])],
            vec![],
            vec![FloatColumn::new("y", Role::Target, vec![1.0, 0.0, 2.0, 1.0])],
            vec![FloatColumn::new("ts", Role::TimeStamp, vec![10.0; 4])],
        )
        .unwrap(),
    )
}

fn middle_peripheral() -> Arc<DataFrame> {
    // P1 carries nothing aggregatable itself, only the keys linking the
    // population to P2; every feature over it must go through the
    // subfeatures.
    Arc::new(
        DataFrame::new(
            "P1",
            vec![],
            vec![],
            vec![
                IntColumn::new("jk", Role::JoinKey, vec![1, 2, 3, 4, 1]),
                IntColumn::new("jk2", Role::JoinKey, vec![10, 20, 30, 40, 50]),
            ],
            vec![],
            vec![],
            vec![FloatColumn::new("ts", Role::TimeStamp, vec![1.0; 5])],
        )
        .unwrap(),
    )
}

fn leaf_peripheral() -> Arc<DataFrame> {
    Arc::new(
        DataFrame::new(
            "P2",
            vec![],
            vec![],
            vec![IntColumn::new(
                "jk2",
                Role::JoinKey,
                vec![10, 10, 20, 30, 40, 50],
            )],
            vec![FloatColumn::new(
                "z",
                Role::Numerical,
                vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
            )],
            vec![],
            vec![FloatColumn::new("ts", Role::TimeStamp, vec![0.5; 6])],
        )
        .unwrap(),
    )
}

fn two_level_placeholder() -> Placeholder {
    let child = Placeholder::new("P1").join(Placeholder::new("P2"), "jk2", "jk2", "ts", "ts", "");
    Placeholder::new("POPULATION").join(child, "jk", "jk", "ts", "ts", "")
}

fn fitted_two_level_ensemble() -> FeatureEnsemble {
    let mut ensemble = FeatureEnsemble::new(
        Hyperparameters {
            num_features: 2,
            num_subfeatures: 2,
            max_depth: 1,
            min_num_samples: 1,
            num_threads: 1,
            aggregation: vec!["AVG".to_string()],
            ..Hyperparameters::default()
        },
        two_level_placeholder(),
        vec!["P1".to_string(), "P2".to_string()],
    )
    .unwrap();

    let view = DataFrameView::new(population());
    ensemble
        .fit(&view, &[middle_peripheral(), leaf_peripheral()])
        .unwrap();
    ensemble
}

// ----------------------------------------------------------------------------
// Subfeatures and SQL
// ----------------------------------------------------------------------------

#[test]
fn test_subfeatures_are_trained_and_consumed() {
    let ensemble = fitted_two_level_ensemble();

    assert_eq!(ensemble.num_features(), 2);
    for tree in ensemble.trees() {
        assert_eq!(
            tree.data_used,
            relfeat::aggregations::DataUsed::Subfeatures,
            "P1 offers nothing but subfeatures to aggregate"
        );
    }

    let view = DataFrameView::new(population());
    let matrix = ensemble
        .transform(&view, &[middle_peripheral(), leaf_peripheral()])
        .unwrap();
    assert_eq!(matrix.len(), 4 * 2);
}

#[test]
fn test_sql_defines_subfeature_tables_first() {
    let ensemble = fitted_two_level_ensemble();
    let statements = ensemble.to_sql(&Encoding::new());

    // Two subfeature tables, then the two features.
    assert_eq!(statements.len(), 4);
    assert!(statements[0].contains("CREATE TABLE \"FEATURE_1_1\""));
    assert!(statements[1].contains("CREATE TABLE \"FEATURE_1_2\""));
    assert!(statements[2].contains("CREATE TABLE \"FEATURE_1\""));
    assert!(statements[3].contains("CREATE TABLE \"FEATURE_2\""));

    // Subfeature tables aggregate P2 joined to P1.
    assert!(statements[0].contains("FROM \"P1\" t1"));
    assert!(statements[0].contains("LEFT JOIN \"P2\" t2"));
    assert!(statements[0].contains("AVG( t2.\"z\" )"));
    assert!(statements[0].contains("t2.\"ts\" <= t1.\"ts\""));

    // The features reference them through LEFT JOIN + COALESCE.
    assert!(statements[2].contains("LEFT JOIN \"FEATURE_1_"));
    assert!(statements[2].contains("COALESCE( f_1_"));
    assert!(statements[2].contains("GROUP BY t1.rownum"));

    for statement in &statements {
        assert!(statement.starts_with("DROP TABLE IF EXISTS"));
    }
}

// ----------------------------------------------------------------------------
// Persistence
// ----------------------------------------------------------------------------

#[test]
fn test_save_load_is_an_involution() {
    let ensemble = fitted_two_level_ensemble();

    let categories = Encoding::from_strings(["red", "green", "blue"]);
    let join_keys = Encoding::from_strings(["a", "b"]);

    let dir = tempfile::tempdir().unwrap();
    ensemble
        .save(dir.path(), &categories, &join_keys)
        .unwrap();

    let (loaded, loaded_categories, loaded_join_keys) =
        FeatureEnsemble::load(dir.path()).unwrap();

    assert_eq!(ensemble, loaded);
    assert_eq!(loaded_categories.len(), 3);
    assert_eq!(loaded_categories.at(2).as_deref(), Some("blue"));
    assert_eq!(loaded_join_keys.len(), 2);

    // The loaded ensemble transforms identically.
    let view = DataFrameView::new(population());
    let peripherals = [middle_peripheral(), leaf_peripheral()];
    assert_eq!(
        ensemble.transform(&view, &peripherals).unwrap(),
        loaded.transform(&view, &peripherals).unwrap()
    );
}

#[test]
fn test_load_rejects_foreign_endianness() {
    let ensemble = fitted_two_level_ensemble();
    let dir = tempfile::tempdir().unwrap();
    ensemble
        .save(dir.path(), &Encoding::new(), &Encoding::new())
        .unwrap();

    let metadata_path = dir.path().join("metadata.json");
    let metadata = std::fs::read_to_string(&metadata_path).unwrap();
    let swapped = if metadata.contains("little") {
        metadata.replace("little", "big")
    } else {
        metadata.replace("big", "little")
    };
    std::fs::write(&metadata_path, swapped).unwrap();

    assert!(FeatureEnsemble::load(dir.path()).is_err());
}

// ----------------------------------------------------------------------------
// Fingerprints and the artifact cache
// ----------------------------------------------------------------------------

#[test]
fn test_fingerprint_reflects_hyperparameters_and_data() {
    let make = |seed: u64| {
        FeatureEnsemble::new(
            Hyperparameters {
                seed,
                ..Hyperparameters::default()
            },
            two_level_placeholder(),
            vec!["P1".to_string(), "P2".to_string()],
        )
        .unwrap()
    };

    let a = make(1);
    let b = make(1);
    let c = make(2);

    assert_eq!(a.fingerprint(), b.fingerprint());
    assert_ne!(
        a.fingerprint().content_address(),
        c.fingerprint().content_address()
    );

    let peripherals = [middle_peripheral(), leaf_peripheral()];
    let with_data = a.fingerprint_with_data(&population(), &peripherals);
    assert_ne!(
        with_data.content_address(),
        a.fingerprint().content_address()
    );
}

#[test]
fn test_training_through_the_cache() {
    let cache: FingerprintCache<FeatureEnsemble> = FingerprintCache::new();

    let template = FeatureEnsemble::new(
        Hyperparameters {
            num_features: 1,
            max_depth: 0,
            min_num_samples: 1,
            num_threads: 1,
            aggregation: vec!["COUNT".to_string()],
            ..Hyperparameters::default()
        },
        Placeholder::new("POPULATION").join(Placeholder::new("P1"), "jk", "jk", "ts", "ts", ""),
        vec!["P1".to_string()],
    )
    .unwrap();

    let peripherals = [middle_peripheral()];
    let view = DataFrameView::new(population());
    let key = template.fingerprint_with_data(&population(), &peripherals);

    let first = cache
        .get_or_build(&key, || {
            let mut ensemble = template.clone();
            ensemble.fit(&view, &peripherals)?;
            Ok(ensemble)
        })
        .unwrap();
    assert!(first.is_fitted());

    // Second request hits the cache; the build closure must not run.
    let second = cache
        .get_or_build(&key, || panic!("cache miss on identical fingerprint"))
        .unwrap();
    assert_eq!(*first, *second);
}
