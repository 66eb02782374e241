//! モデルメタデータを使用した推論設定
//!
//! 保存されたモデルメタデータを読み込んで推論に必要な情報を取得します。

use crate::error::Result;
use crate::ml::transform::ImageTransform;
use crate::model::model_metadata::ModelMetadata;
use crate::schema::TagSchema;

/// モデルメタデータから推論用情報を取得
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    /// 学習時のタグレジストリ
    pub schema: TagSchema,

    /// 学習時と同じ前処理
    pub transform: ImageTransform,

    /// 判定閾値（この値以上で陽性）
    pub threshold: f32,
}

impl InferenceConfig {
    /// メタデータからInferenceConfigを作成
    pub fn from_metadata(metadata: &ModelMetadata) -> Self {
        Self {
            schema: metadata.schema.clone(),
            transform: metadata.transform(),
            threshold: metadata.decision_threshold,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn num_tags(&self) -> usize {
        self.schema.len()
    }

    /// 確率ベクトルをタグ名に変換
    pub fn decode(&self, probabilities: &[f32]) -> Result<Vec<String>> {
        let flags: Vec<bool> = probabilities.iter().map(|&p| p >= self.threshold).collect();
        Ok(self.schema.decode(&flags)?)
    }
}
