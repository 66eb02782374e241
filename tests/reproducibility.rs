//! 同じシードなら学習結果が一致する
//!
//! バックエンドの乱数はプロセス全体で共有されるので、他の学習テストと
//! 並行しないよう独立したテストバイナリにしている。

use screenshot_tagger_lib::commands;
use screenshot_tagger_lib::ml::training::TrainingOutcome;

mod common;

use common::{write_fixture, Train};

fn losses(outcome: &TrainingOutcome<Train>) -> Vec<(f64, f64, f64)> {
    outcome
        .history
        .iter()
        .map(|r| (r.train_loss, r.test_loss, r.evaluation.macro_f1()))
        .collect()
}

#[test]
fn same_seed_gives_same_history() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = write_fixture(dir.path());
    config.training.epochs = 2;
    config.training.seed = 42;
    let device = Default::default();

    let first = commands::train_classifier::<Train, _>(&config, &device, |_| {}).unwrap();
    let second = commands::train_classifier::<Train, _>(&config, &device, |_| {}).unwrap();

    assert_eq!(first.history.len(), 2);
    assert_eq!(losses(&first), losses(&second));
}
