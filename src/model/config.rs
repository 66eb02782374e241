//! アプリケーション設定管理モジュール
//!
//! 計算デバイス、データの場所、学習パラメータをJSON形式で保存・読み込みします。
//! 学習に関する数値（閾値や画像サイズなど）はすべて `TrainingSettings` に集約します。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, TaggerError};
use crate::ml::transform::Normalization;
use crate::schema::TagSchema;

/// 計算デバイスの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    Wgpu,
    /// NdArray (CPU) バックエンド
    Cpu,
}

impl Default for DeviceType {
    fn default() -> Self {
        DeviceType::Wgpu
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// データの配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSettings {
    /// データルート（ラベルDBと画像の既定の置き場所）
    pub data_root: PathBuf,
    /// ラベルDBファイル名（data_root からの相対）
    pub db_file: String,
    /// 分割元のテーブル
    pub source_table: String,
    /// 画像ディレクトリ（未指定なら data_root）
    #[serde(default)]
    pub image_dir: Option<PathBuf>,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("data"),
            db_file: "tag_info.db".to_string(),
            source_table: "games".to_string(),
            image_dir: None,
        }
    }
}

impl DataSettings {
    pub fn db_path(&self) -> PathBuf {
        self.data_root.join(&self.db_file)
    }

    pub fn images(&self) -> PathBuf {
        self.image_dir.clone().unwrap_or_else(|| self.data_root.clone())
    }
}

/// モデル保存先
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// 学習済みモデルを保存するディレクトリ
    pub model_dir: PathBuf,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models"),
        }
    }
}

fn default_num_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// トレーニング設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSettings {
    /// エポック数
    pub epochs: usize,
    /// バッチサイズ
    pub batch_size: usize,
    /// 学習率
    pub learning_rate: f64,
    /// sigmoid 出力に対する判定閾値
    pub decision_threshold: f32,
    /// 入力画像サイズ（正方形）
    pub image_size: usize,
    /// 畳み込み層・全結合層の幅
    pub hidden_width: usize,
    /// ドロップアウト率
    pub dropout: f64,
    /// 画素値の正規化
    #[serde(default)]
    pub normalization: Normalization,
    /// 画像読み込みワーカー数
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,
    /// ランダムシード（分割とシャッフル）
    pub seed: u64,
    /// トレーニングデータの割合
    pub train_ratio: f64,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            epochs: 20,
            batch_size: 32,
            learning_rate: 1e-3,
            decision_threshold: 0.5,
            image_size: 128,
            hidden_width: 64,
            dropout: 0.25,
            normalization: Normalization::default(),
            num_workers: default_num_workers(),
            seed: 42,
            train_ratio: 0.8,
        }
    }
}

impl TrainingSettings {
    /// 値の範囲を検証
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(TaggerError::Config(msg));

        if self.epochs == 0 {
            return fail("epochs must be at least 1".to_string());
        }
        if self.batch_size == 0 {
            return fail("batch_size must be at least 1".to_string());
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return fail(format!("learning_rate must be positive, got {}", self.learning_rate));
        }
        if !(self.decision_threshold > 0.0 && self.decision_threshold < 1.0) {
            return fail(format!(
                "decision_threshold must be within (0, 1), got {}",
                self.decision_threshold
            ));
        }
        // 3回の 2x2 プーリングに耐えるサイズ
        if self.image_size < 8 {
            return fail(format!("image_size must be at least 8, got {}", self.image_size));
        }
        if self.hidden_width == 0 {
            return fail("hidden_width must be at least 1".to_string());
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return fail(format!("dropout must be within [0, 1), got {}", self.dropout));
        }
        if self.num_workers == 0 {
            return fail("num_workers must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.train_ratio) {
            return fail(format!("train_ratio must be within [0, 1], got {}", self.train_ratio));
        }
        Ok(())
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// 計算デバイスの種類
    pub device_type: DeviceType,
    /// データ配置
    pub data: DataSettings,
    /// モデル設定
    pub model: ModelSettings,
    /// トレーニング設定
    pub training: TrainingSettings,
    /// タグレジストリ（ラベル列の順序）
    #[serde(default)]
    pub tags: TagSchema,
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// 設定を読み込む、存在しない場合はデフォルト設定を返す
    ///
    /// ファイルが存在して壊れている場合はエラーにします。
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let config = Self::load(path)?;
            tracing::info!(path = %path.display(), "loaded config");
            Ok(config)
        } else {
            tracing::info!(path = %path.display(), "config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.training.validate()
    }

    /// 設定情報をログに出す
    pub fn log_summary(&self) {
        tracing::info!(
            device = %self.device_type,
            db = %self.data.db_path().display(),
            images = %self.data.images().display(),
            table = %self.data.source_table,
            model_dir = %self.model.model_dir.display(),
            tags = self.tags.len(),
            "configuration"
        );
        tracing::info!(
            epochs = self.training.epochs,
            batch_size = self.training.batch_size,
            learning_rate = self.training.learning_rate,
            threshold = self.training.decision_threshold,
            image_size = self.training.image_size,
            hidden_width = self.training.hidden_width,
            workers = self.training.num_workers,
            seed = self.training.seed,
            "training settings"
        );
    }
}
