//! モデル推論機能

use std::path::Path;

use burn::tensor::{backend::Backend, Tensor};
use serde::Serialize;

use crate::error::{Result, TaggerError};
use crate::ml::ml_model::GenreClassifier;
use crate::ml::transform::CHANNELS;
use crate::model::inference_config::InferenceConfig;
use crate::model::model_metadata::ModelMetadata;
use crate::model::model_storage::load_trained_model;

/// 1枚分の推論結果
#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    /// 閾値以上のタグ（スキーマ順）
    pub tags: Vec<String>,
    /// (タグ名, 確率)
    pub probabilities: Vec<(String, f32)>,
}

/// 推論エンジン
pub struct InferenceEngine<B: Backend> {
    model: GenreClassifier<B>,
    metadata: ModelMetadata,
    config: InferenceConfig,
    device: B::Device,
}

impl<B: Backend> InferenceEngine<B> {
    /// モデルを読み込んで推論エンジンを初期化
    pub fn load<P: AsRef<Path>>(model_path: P, device: &B::Device) -> Result<Self> {
        let (metadata, model) = load_trained_model::<B>(model_path.as_ref(), device)?;
        let config = InferenceConfig::from_metadata(&metadata);

        tracing::info!(
            path = %model_path.as_ref().display(),
            tags = config.num_tags(),
            image_size = config.transform.image_size,
            "inference engine ready"
        );

        Ok(Self {
            model,
            metadata,
            config,
            device: device.clone(),
        })
    }

    /// 判定閾値を上書き
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.config = self.config.with_threshold(threshold);
        self
    }

    /// 前処理済みの画素列を推論
    pub fn predict_pixels(&self, pixels: &[f32]) -> Result<Prediction> {
        let size = self.config.transform.image_size;
        let expected = self.config.transform.output_len();
        if pixels.len() != expected {
            return Err(TaggerError::Tensor(format!(
                "expected {} pixel values, got {}",
                expected,
                pixels.len()
            )));
        }

        let tensor = Tensor::<B, 1>::from_floats(pixels, &self.device).reshape([1, CHANNELS, size, size]);
        let probabilities = self
            .model
            .probabilities(tensor)
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| TaggerError::Tensor(format!("{:?}", e)))?;

        let tags = self.config.decode(&probabilities)?;
        let probabilities = self.config.schema.names().into_iter().zip(probabilities).collect();

        Ok(Prediction { tags, probabilities })
    }

    /// デコード済みの画像を推論
    pub fn predict_image(&self, image: &image::DynamicImage) -> Result<Prediction> {
        self.predict_pixels(&self.config.transform.apply(image))
    }

    /// 画像ファイルを推論
    pub fn predict<P: AsRef<Path>>(&self, image_path: P) -> Result<Prediction> {
        let pixels = self.config.transform.load(image_path.as_ref())?;
        self.predict_pixels(&pixels)
    }

    /// 複数画像を順に推論
    pub fn predict_batch(&self, image_paths: &[impl AsRef<Path>]) -> Result<Vec<Prediction>> {
        image_paths.iter().map(|p| self.predict(p)).collect()
    }

    /// InferenceConfigへの参照を取得
    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }
}
