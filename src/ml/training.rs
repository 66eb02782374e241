//! モデル学習
//!
//! エポックごとに「学習パス → 評価パス」を繰り返します。バッチ単位のエラーは
//! リトライせず、`TrainingAbort` として学習全体を中断します。

use std::sync::Arc;

use burn::{
    data::dataloader::batcher::Batcher,
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{
        activation,
        backend::{AutodiffBackend, Backend},
        ElementConversion, Tensor,
    },
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TaggerError};
use crate::ml::batcher::{SampleBatch, SampleBatcher};
use crate::ml::dataset::SampleDataset;
use crate::ml::loader::{plan_batches, SampleLoader};
use crate::ml::metrics::{EvaluationReport, MultiLabelConfusion};
use crate::ml::ml_model::{GenreClassifier, ModelConfig};
use crate::model::config::TrainingSettings;
use crate::schema::TagSchema;
use crate::store::LabelStore;
use crate::types::TrainingPhase;

/// タグごとの正例重み（負例数 / 正例数）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassWeights {
    pub tags: Vec<String>,
    pub weights: Vec<f32>,
}

impl ClassWeights {
    /// (正例数, 負例数) の一覧から計算
    ///
    /// 正例が0件のタグがあればエラー（無限大の重みは作らない）。
    pub fn from_counts(schema: &TagSchema, counts: &[(usize, usize)]) -> Result<Self> {
        schema.check_width(counts.len())?;

        let mut weights = Vec::with_capacity(counts.len());
        for (tag, &(positive, negative)) in schema.tags().iter().zip(counts) {
            if positive == 0 {
                return Err(TaggerError::NoPositiveSamples { tag: tag.name.clone() });
            }
            if negative == 0 {
                tracing::warn!(tag = %tag.name, "tag has no negative samples; its positive weight is 0");
            }
            weights.push(negative as f32 / positive as f32);
        }

        Ok(Self {
            tags: schema.names(),
            weights,
        })
    }

    /// 学習用パーティションから計算
    pub fn from_store(store: &LabelStore) -> Result<Self> {
        let schema = store.registry();
        let counts = schema
            .tags()
            .iter()
            .map(|t| store.positive_negative_counts(&t.name))
            .collect::<Result<Vec<_>>>()?;
        Self::from_counts(schema, &counts)
    }

    pub fn tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 1> {
        Tensor::<B, 1>::from_floats(self.weights.as_slice(), device)
    }
}

/// 正例重み付きの BCE-with-logits（全要素の平均）
///
/// `-mean(w * y * log σ(x) + (1 - y) * log σ(-x))`
pub fn weighted_bce_with_logits<B: Backend>(
    logits: Tensor<B, 2>,
    targets: Tensor<B, 2>,
    pos_weight: Tensor<B, 1>,
) -> Tensor<B, 1> {
    let pos_weight = pos_weight.unsqueeze::<2>();
    let log_p = activation::log_sigmoid(logits.clone());
    let log_not_p = activation::log_sigmoid(logits.neg());

    let positive = targets.clone() * log_p * pos_weight;
    let negative = targets.neg().add_scalar(1.0) * log_not_p;
    (positive + negative).neg().mean()
}

/// 1エポック分の結果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochReport {
    pub epoch: usize,
    pub total_epochs: usize,
    /// 学習バッチ損失の平均
    pub train_loss: f64,
    /// 評価損失（サンプル数で重み付け）
    pub test_loss: f64,
    pub evaluation: EvaluationReport,
}

/// 学習結果
pub struct TrainingOutcome<B: AutodiffBackend> {
    pub model: GenreClassifier<B>,
    pub model_config: ModelConfig,
    pub history: Vec<EpochReport>,
    pub class_weights: ClassWeights,
}

impl<B: AutodiffBackend> TrainingOutcome<B> {
    pub fn final_report(&self) -> Option<&EpochReport> {
        self.history.last()
    }
}

fn abort(epoch: usize, batch: usize, source: TaggerError) -> TaggerError {
    TaggerError::TrainingAbort {
        epoch,
        batch,
        source: Box::new(source),
    }
}

fn to_f32_vec<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| TaggerError::Tensor(format!("{:?}", e)))
}

/// 評価パスの本体（失敗したバッチ番号も返す）
fn evaluate_batches<B: Backend>(
    model: &GenreClassifier<B>,
    dataset: &SampleDataset,
    loader: &SampleLoader,
    batch_size: usize,
    class_weights: &ClassWeights,
    threshold: f32,
    device: &B::Device,
) -> std::result::Result<(f64, EvaluationReport), (usize, TaggerError)> {
    let schema = dataset.store().registry();
    let batcher = SampleBatcher::new(dataset.transform().image_size, schema.len());
    let pos_weight = class_weights.tensor::<B>(device);
    let mut confusion = MultiLabelConfusion::new(schema.names(), threshold);

    let len = dataset.len().map_err(|e| (0, e))?;
    if len == 0 {
        return Err((0, TaggerError::Config("evaluation dataset is empty".to_string())));
    }
    let mut loss_sum = 0.0f64;
    let mut total = 0usize;

    for (batch_idx, indices) in plan_batches(len, batch_size, None).iter().enumerate() {
        let items = loader.fetch(dataset, indices).map_err(|e| (batch_idx, e))?;
        let batch: SampleBatch<B> = batcher.batch(items, device);

        let logits = model.forward(batch.images);
        let loss = weighted_bce_with_logits(logits.clone(), batch.targets.clone(), pos_weight.clone());
        let loss_value: f64 = loss.into_scalar().elem::<f64>();

        let probabilities = to_f32_vec(activation::sigmoid(logits)).map_err(|e| (batch_idx, e))?;
        let targets = to_f32_vec(batch.targets).map_err(|e| (batch_idx, e))?;
        confusion.update(&probabilities, &targets);

        // バッチ平均をサンプル数で重み付けして合算
        loss_sum += loss_value * indices.len() as f64;
        total += indices.len();
    }

    Ok((loss_sum / total as f64, confusion.finalize()))
}

/// 評価パス（勾配なし）
pub fn evaluate<B: Backend>(
    model: &GenreClassifier<B>,
    dataset: &SampleDataset,
    loader: &SampleLoader,
    batch_size: usize,
    class_weights: &ClassWeights,
    threshold: f32,
    device: &B::Device,
) -> Result<(f64, EvaluationReport)> {
    evaluate_batches(model, dataset, loader, batch_size, class_weights, threshold, device).map_err(|(_, e)| e)
}

/// 学習ループ
///
/// Idle → TrainEpoch(e) → EvalEpoch(e) → Idle → ... → Done の順に遷移します。
/// 1インスタンスで1回だけ実行でき、途中からの再開はできません。
pub struct Trainer {
    settings: TrainingSettings,
    schema: Arc<TagSchema>,
    phase: TrainingPhase,
}

impl Trainer {
    pub fn new(settings: TrainingSettings, schema: Arc<TagSchema>) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            schema,
            phase: TrainingPhase::Idle,
        })
    }

    pub fn phase(&self) -> TrainingPhase {
        self.phase
    }

    pub fn settings(&self) -> &TrainingSettings {
        &self.settings
    }

    fn transition(&mut self, next: TrainingPhase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            return Err(TaggerError::InvalidState(format!(
                "cannot move from {} to {}",
                self.phase, next
            )));
        }
        tracing::debug!(from = %self.phase, to = %next, "training phase");
        self.phase = next;
        Ok(())
    }

    pub fn model_config(&self) -> ModelConfig {
        ModelConfig::new(self.schema.len())
            .with_hidden_width(self.settings.hidden_width)
            .with_dropout(self.settings.dropout)
            .with_image_size(self.settings.image_size)
    }

    /// 学習を実行
    ///
    /// `progress` はエポックごとに呼ばれます。
    pub fn run<B, F>(
        &mut self,
        train: &SampleDataset,
        test: &SampleDataset,
        device: &B::Device,
        mut progress: F,
    ) -> Result<TrainingOutcome<B>>
    where
        B: AutodiffBackend,
        F: FnMut(&EpochReport),
    {
        if self.phase != TrainingPhase::Idle {
            return Err(TaggerError::InvalidState(format!(
                "trainer already used (phase {})",
                self.phase
            )));
        }

        // ラベルベクトルの列順は学習時のレジストリと一致している必要がある
        for dataset in [train, test] {
            self.schema.ensure_compatible(dataset.store().registry())?;
            if dataset.transform().image_size != self.settings.image_size {
                return Err(TaggerError::Config(format!(
                    "dataset image size {} does not match training image size {}",
                    dataset.transform().image_size,
                    self.settings.image_size
                )));
            }
        }

        let settings = self.settings.clone();
        if train.is_empty()? {
            return Err(TaggerError::Config("training partition is empty".to_string()));
        }
        // 評価損失と指標が定義できないので学習しない
        if test.is_empty()? {
            return Err(TaggerError::Config("test partition is empty; lower train_ratio and re-split".to_string()));
        }
        let train_len = train.len()?;
        let test_len = test.len()?;

        let class_weights = ClassWeights::from_store(train.store())?;
        tracing::info!(weights = ?class_weights.weights, "class weights");

        // 初期重みとドロップアウトのマスクもシードで固定する
        B::seed(device, settings.seed);
        let model_config = self.model_config();
        let mut model: GenreClassifier<B> = model_config.init(device);
        let mut optim = AdamConfig::new().init::<B, GenreClassifier<B>>();

        let loader = SampleLoader::new(settings.num_workers)?;
        let batcher = SampleBatcher::new(settings.image_size, self.schema.len());
        let pos_weight = class_weights.tensor::<B>(device);
        let mut rng = StdRng::seed_from_u64(settings.seed);

        tracing::info!(
            train = train_len,
            test = test_len,
            epochs = settings.epochs,
            batch_size = settings.batch_size,
            workers = loader.num_workers(),
            "training started"
        );

        let mut history = Vec::with_capacity(settings.epochs);

        for epoch in 1..=settings.epochs {
            // ── 学習パス ──
            self.transition(TrainingPhase::TrainEpoch(epoch))?;

            let batches = plan_batches(train_len, settings.batch_size, Some(&mut rng));
            let mut loss_sum = 0.0f64;

            for (batch_idx, indices) in batches.iter().enumerate() {
                let items = loader
                    .fetch(train, indices)
                    .map_err(|e| abort(epoch, batch_idx, e))?;
                let batch: SampleBatch<B> = batcher.batch(items, device);

                let logits = model.forward(batch.images);
                let loss = weighted_bce_with_logits(logits, batch.targets, pos_weight.clone());
                let loss_value: f64 = loss.clone().into_scalar().elem::<f64>();
                if !loss_value.is_finite() {
                    return Err(abort(
                        epoch,
                        batch_idx,
                        TaggerError::Tensor(format!("non-finite loss {}", loss_value)),
                    ));
                }

                // 勾配はこのステップで消費されるので、次のバッチには持ち越されない
                let grads = loss.backward();
                let grads = GradientsParams::from_grads(grads, &model);
                model = optim.step(settings.learning_rate, model, grads);

                loss_sum += loss_value;
                tracing::trace!(epoch, batch = batch_idx, loss = loss_value, "batch done");
            }

            let train_loss = loss_sum / batches.len() as f64;

            // ── 評価パス ──
            self.transition(TrainingPhase::EvalEpoch(epoch))?;

            let model_valid = model.valid();
            let (test_loss, evaluation) = evaluate_batches(
                &model_valid,
                test,
                &loader,
                settings.batch_size,
                &class_weights,
                settings.decision_threshold,
                device,
            )
            .map_err(|(batch_idx, e)| abort(epoch, batch_idx, e))?;

            self.transition(TrainingPhase::Idle)?;

            let report = EpochReport {
                epoch,
                total_epochs: settings.epochs,
                train_loss,
                test_loss,
                evaluation,
            };

            tracing::info!(
                "Epoch {:>3}/{} | train_loss={:.4} | test_loss={:.4} | acc={:.3} | f1={:.3}",
                epoch,
                settings.epochs,
                report.train_loss,
                report.test_loss,
                report.evaluation.macro_accuracy(),
                report.evaluation.macro_f1(),
            );
            for m in &report.evaluation.per_tag {
                tracing::debug!(
                    tag = %m.tag,
                    accuracy = m.accuracy,
                    precision = m.precision,
                    recall = m.recall,
                    f1 = m.f1,
                    "tag metrics"
                );
            }

            progress(&report);
            history.push(report);
        }

        self.transition(TrainingPhase::Done)?;
        tracing::info!("training complete");

        Ok(TrainingOutcome {
            model,
            model_config,
            history,
            class_weights,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TagDef;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn schema() -> TagSchema {
        TagSchema::new(
            1,
            vec![
                TagDef { name: "Action".to_string(), steam_id: 19 },
                TagDef { name: "RPG".to_string(), steam_id: 122 },
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_class_weights_ratio() {
        let weights = ClassWeights::from_counts(&schema(), &[(8, 2), (2, 8)]).unwrap();
        assert_eq!(weights.weights, vec![0.25, 4.0]);
        assert_eq!(weights.tags, vec!["Action", "RPG"]);
    }

    #[test]
    fn test_class_weights_zero_positive_fails() {
        let err = ClassWeights::from_counts(&schema(), &[(3, 2), (0, 5)]).unwrap_err();
        assert!(matches!(err, TaggerError::NoPositiveSamples { ref tag } if tag == "RPG"));
    }

    #[test]
    fn test_class_weights_width_checked() {
        assert!(ClassWeights::from_counts(&schema(), &[(1, 1)]).is_err());
    }

    #[test]
    fn test_weighted_bce_matches_closed_form() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 2>::zeros([2, 2], &device);
        let targets = Tensor::<TestBackend, 2>::from_floats([[1.0, 0.0], [1.0, 0.0]], &device);

        // 重み1: 全要素 ln 2
        let ones = Tensor::<TestBackend, 1>::from_floats([1.0, 1.0], &device);
        let loss: f64 = weighted_bce_with_logits(logits.clone(), targets.clone(), ones)
            .into_scalar()
            .elem::<f64>();
        assert!((loss - std::f64::consts::LN_2).abs() < 1e-5);

        // 正例側だけ3倍: (3 ln2 + ln2 + 3 ln2 + ln2) / 4 = 2 ln2
        let weighted = Tensor::<TestBackend, 1>::from_floats([3.0, 3.0], &device);
        let loss: f64 = weighted_bce_with_logits(logits, targets, weighted)
            .into_scalar()
            .elem::<f64>();
        assert!((loss - 2.0 * std::f64::consts::LN_2).abs() < 1e-5);
    }

    #[test]
    fn test_trainer_rejects_invalid_settings() {
        let mut settings = TrainingSettings::default();
        settings.epochs = 0;
        assert!(Trainer::new(settings, Arc::new(schema())).is_err());
    }

    #[test]
    fn test_trainer_phase_starts_idle() {
        let trainer = Trainer::new(TrainingSettings::default(), Arc::new(schema())).unwrap();
        assert_eq!(trainer.phase(), TrainingPhase::Idle);
        assert_eq!(trainer.model_config().num_tags, 2);
    }
}
