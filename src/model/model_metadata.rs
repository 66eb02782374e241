//! モデルメタデータの定義
//!
//! tar.gz 内の `metadata.json` として保存され、推論時にモデルの再構築と
//! ラベルのデコードに使われます。

use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ml::ml_model::ModelConfig;
use crate::ml::training::{EpochReport, TrainingOutcome};
use crate::ml::transform::{ImageTransform, Normalization};
use crate::model::config::TrainingSettings;
use crate::schema::TagSchema;

/// エポックごとの要約（メタデータ保存用）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochSummary {
    pub epoch: usize,
    pub train_loss: f64,
    pub test_loss: f64,
    pub macro_accuracy: f64,
    pub macro_f1: f64,
}

impl From<&EpochReport> for EpochSummary {
    fn from(report: &EpochReport) -> Self {
        Self {
            epoch: report.epoch,
            train_loss: report.train_loss,
            test_loss: report.test_loss,
            macro_accuracy: report.evaluation.macro_accuracy(),
            macro_f1: report.evaluation.macro_f1(),
        }
    }
}

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// 学習時のタグレジストリ（出力の列順）
    pub schema: TagSchema,

    /// モデル入力サイズ（正方形）
    pub image_size: usize,

    /// 畳み込み・全結合の幅
    pub hidden_width: usize,

    pub dropout: f64,

    /// 学習時の画素正規化
    pub normalization: Normalization,

    /// 推論時の判定閾値
    pub decision_threshold: f32,

    /// 学習エポック数
    pub num_epochs: usize,

    /// エポックごとの損失と指標
    #[serde(default)]
    pub history: Vec<EpochSummary>,

    /// モデルの学習時刻（ISO8601形式）
    pub trained_at: String,
}

impl ModelMetadata {
    /// 新しいメタデータを作成
    pub fn new(schema: TagSchema, model_config: &ModelConfig, settings: &TrainingSettings) -> Self {
        let trained_at = chrono::Local::now().to_rfc3339();

        Self {
            schema,
            image_size: model_config.image_size,
            hidden_width: model_config.hidden_width,
            dropout: model_config.dropout,
            normalization: settings.normalization,
            decision_threshold: settings.decision_threshold,
            num_epochs: settings.epochs,
            history: Vec::new(),
            trained_at,
        }
    }

    /// 学習結果からメタデータを作成
    pub fn from_outcome<B: AutodiffBackend>(
        schema: TagSchema,
        outcome: &TrainingOutcome<B>,
        settings: &TrainingSettings,
    ) -> Self {
        let mut metadata = Self::new(schema, &outcome.model_config, settings);
        metadata.history = outcome.history.iter().map(EpochSummary::from).collect();
        metadata
    }

    /// 推論用のモデル設定（ドロップアウトは評価モードで無効）
    pub fn model_config(&self) -> ModelConfig {
        ModelConfig::new(self.schema.len())
            .with_hidden_width(self.hidden_width)
            .with_dropout(self.dropout)
            .with_image_size(self.image_size)
    }

    pub fn transform(&self) -> ImageTransform {
        ImageTransform::new(self.image_size, self.normalization)
    }

    /// 最終エポックのマクロF1
    pub fn final_macro_f1(&self) -> Option<f64> {
        self.history.last().map(|h| h.macro_f1)
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// JSON文字列からメタデータを生成
    ///
    /// タグレジストリの検証もここで行われます。
    pub fn from_json_string(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_keeps_schema_order() {
        let metadata = ModelMetadata::new(
            TagSchema::steam_default(),
            &ModelConfig::new(12).with_image_size(32),
            &TrainingSettings::default(),
        );
        let json = metadata.to_json_string().unwrap();
        let restored = ModelMetadata::from_json_string(&json).unwrap();

        assert_eq!(restored.schema.names(), TagSchema::steam_default().names());
        assert_eq!(restored.image_size, 32);
        assert_eq!(restored.model_config().num_tags, 12);
        assert_eq!(restored.transform(), metadata.transform());
    }

    #[test]
    fn test_invalid_schema_in_json_is_rejected() {
        let metadata = ModelMetadata::new(
            TagSchema::steam_default(),
            &ModelConfig::new(12),
            &TrainingSettings::default(),
        );
        let json = metadata.to_json_string().unwrap().replace("\"RPG\"", "\"Action\"");
        assert!(ModelMetadata::from_json_string(&json).is_err());
    }
}
