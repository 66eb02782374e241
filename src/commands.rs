//! 取り込み・分割・学習・推論のコマンド
//!
//! 設定 (`AppConfig`) をライブラリの各コンポーネントに配線します。
//! CLI からもテストからも同じ関数を呼びます。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use burn::module::AutodiffModule;
use burn::tensor::backend::{AutodiffBackend, Backend};
use serde::Serialize;

use crate::csv_loader::load_csv;
use crate::error::{Result, TaggerError};
use crate::ml::dataset::SampleDataset;
use crate::ml::inference::{InferenceEngine, Prediction};
use crate::ml::training::{EpochReport, Trainer, TrainingOutcome};
use crate::ml::transform::ImageTransform;
use crate::model::config::AppConfig;
use crate::model::model_metadata::ModelMetadata;
use crate::model::model_storage::{self, archive_path};
use crate::schema::TagSchema;
use crate::store::{LabelStore, TEST_TABLE, TRAIN_TABLE};
use crate::types::Split;

/// 学習進捗データ
#[derive(Debug, Clone, Serialize)]
pub struct TrainingProgress {
    pub current_epoch: usize,
    pub total_epochs: usize,
    pub train_loss: f64,
    pub test_loss: f64,
    pub test_accuracy: f64,
    pub test_f1: f64,
    pub message: String,
}

impl From<&EpochReport> for TrainingProgress {
    fn from(report: &EpochReport) -> Self {
        Self {
            current_epoch: report.epoch,
            total_epochs: report.total_epochs,
            train_loss: report.train_loss,
            test_loss: report.test_loss,
            test_accuracy: report.evaluation.macro_accuracy(),
            test_f1: report.evaluation.macro_f1(),
            message: format!("Epoch {}/{}", report.epoch, report.total_epochs),
        }
    }
}

fn registry(config: &AppConfig) -> Arc<TagSchema> {
    Arc::new(config.tags.clone())
}

/// スクレイパーの CSV をソーステーブルに取り込む
///
/// テーブルが無ければ作成します。重複する app_id があれば何も挿入せずにエラー。
pub fn import_labels(config: &AppConfig, csv_path: &Path) -> Result<usize> {
    let schema = registry(config);
    let rows = load_csv(csv_path, &schema)?;
    let store = LabelStore::create(config.data.db_path(), &config.data.source_table, schema)?;
    let inserted = store.insert_rows(&rows)?;
    tracing::info!(
        rows = inserted,
        table = %config.data.source_table,
        total = store.row_count()?,
        "imported labels"
    );
    Ok(inserted)
}

/// ソーステーブルを train / test に分割
pub fn split_dataset(config: &AppConfig) -> Result<Split> {
    let store = LabelStore::open(config.data.db_path(), &config.data.source_table, registry(config))?;
    let split = store.create_split(config.training.train_ratio, config.training.seed)?;
    tracing::info!(
        train = split.train.len(),
        test = split.test.len(),
        total = split.total(),
        ratio = config.training.train_ratio,
        seed = config.training.seed,
        "dataset split"
    );
    Ok(split)
}

/// train / test パーティションのデータセットを開く
pub fn open_datasets(config: &AppConfig) -> Result<(SampleDataset, SampleDataset)> {
    let schema = registry(config);
    let db_path = config.data.db_path();
    let transform = ImageTransform::new(config.training.image_size, config.training.normalization);
    let images = config.data.images();

    let train = LabelStore::open(&db_path, TRAIN_TABLE, Arc::clone(&schema))?;
    let test = LabelStore::open(&db_path, TEST_TABLE, schema)?;

    Ok((
        SampleDataset::new(train, &images, transform),
        SampleDataset::new(test, images, transform),
    ))
}

/// モデル学習
///
/// 保存はしません。保存は `save_outcome` を明示的に呼んだときだけ行います。
pub fn train_classifier<B, F>(config: &AppConfig, device: &B::Device, on_progress: F) -> Result<TrainingOutcome<B>>
where
    B: AutodiffBackend,
    F: FnMut(TrainingProgress),
{
    config.validate()?;
    let (train, test) = open_datasets(config)?;

    let mut on_progress = on_progress;
    let mut trainer = Trainer::new(config.training.clone(), registry(config))?;
    trainer.run::<B, _>(&train, &test, device, |report| on_progress(TrainingProgress::from(report)))
}

/// モデル名はモデルディレクトリ直下のファイル名になる
fn check_model_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(|c: char| c == '/' || c == '\\') {
        return Err(TaggerError::Config(format!("invalid model name `{}`", name)));
    }
    Ok(())
}

/// 学習結果を `<model_dir>/<name>.tar.gz` に保存
pub fn save_outcome<B: AutodiffBackend>(
    config: &AppConfig,
    name: &str,
    outcome: &TrainingOutcome<B>,
) -> Result<PathBuf> {
    check_model_name(name)?;
    let metadata = ModelMetadata::from_outcome(config.tags.clone(), outcome, &config.training);
    model_storage::save_trained_model(&config.model.model_dir, name, outcome.model.valid(), &metadata)
}

/// モデル名またはパスからアーカイブのパスを解決
///
/// 既存ファイルならそのまま、そうでなければ `<model_dir>/<name>.tar.gz`。
pub fn resolve_model_path(config: &AppConfig, model: &str) -> PathBuf {
    let direct = PathBuf::from(model);
    if direct.is_file() {
        direct
    } else {
        archive_path(&config.model.model_dir.join(model))
    }
}

/// 画像ごとのタグ推論
pub fn predict_tags<B: Backend>(
    config: &AppConfig,
    model: &str,
    images: &[PathBuf],
    threshold: Option<f32>,
    device: &B::Device,
) -> Result<Vec<(PathBuf, Prediction)>> {
    let path = resolve_model_path(config, model);
    let mut engine = InferenceEngine::<B>::load(&path, device)?;
    if let Some(threshold) = threshold {
        engine = engine.with_threshold(threshold);
    }

    let predictions = engine.predict_batch(images)?;
    Ok(images
        .iter()
        .cloned()
        .zip(predictions)
        .inspect(|(image, prediction)| {
            tracing::debug!(image = %image.display(), tags = ?prediction.tags, "predicted");
        })
        .collect())
}

/// 保存済みモデルのメタデータ
pub fn describe_model(config: &AppConfig, model: &str) -> Result<ModelMetadata> {
    model_storage::load_metadata(&resolve_model_path(config, model))
}
