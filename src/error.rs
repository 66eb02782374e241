//! エラー型の定義
//!
//! ライブラリ全体で `TaggerError` を返します。ラベルストアやデータセットのエラーは
//! 握りつぶさず、そのまま学習ループまで伝播させます（リトライはしません）。

use std::path::PathBuf;
use thiserror::Error;

/// ライブラリ共通のエラー
#[derive(Error, Debug)]
pub enum TaggerError {
    /// 画像アセットが存在しない
    #[error("Image asset not found for app {app_id}: {}", path.display())]
    ImageNotFound { app_id: i64, path: PathBuf },

    /// ラベルストアのテーブルが存在しない
    #[error("Table `{table}` not found in {}", path.display())]
    TableNotFound { table: String, path: PathBuf },

    /// ラベルストアのデータベースファイルが存在しない
    #[error("Label store not found: {}", .0.display())]
    StoreNotFound(PathBuf),

    /// 序数インデックスが範囲外
    #[error("Index {index} out of bounds for length {len}")]
    OutOfBounds { index: usize, len: usize },

    /// スキーマ不整合
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// 主キー制約違反
    #[error("Duplicate app_id {0}")]
    DuplicateAppId(i64),

    /// 正例が1件もないタグはクラス重みを計算できない
    #[error("Tag `{tag}` has no positive samples; class weight would be infinite")]
    NoPositiveSamples { tag: String },

    /// バッチ処理中の致命的エラー（学習を中断）
    #[error("Training aborted at epoch {epoch}, batch {batch}: {source}")]
    TrainingAbort {
        epoch: usize,
        batch: usize,
        #[source]
        source: Box<TaggerError>,
    },

    /// 設定値が不正
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// 学習ループの不正な状態遷移
    #[error("Invalid training state: {0}")]
    InvalidState(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// 画像のデコード失敗
    #[error("Image error for {}: {source}", path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// モデルアーカイブが壊れている
    #[error("Invalid model archive: {0}")]
    Archive(String),

    /// モデル重みの保存・読み込み失敗
    #[error("Model record error: {0}")]
    Record(String),

    /// テンソルからの値取り出し失敗
    #[error("Tensor data error: {0}")]
    Tensor(String),

    #[error("Worker pool error: {0}")]
    WorkerPool(String),
}

/// タグスキーマに関するエラー
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("schema has no tags")]
    Empty,

    #[error("duplicate tag `{0}`")]
    DuplicateTag(String),

    #[error("duplicate Steam tag id {0}")]
    DuplicateTagId(u32),

    /// SQL識別子として使えない名前
    #[error("`{0}` is not a valid identifier")]
    InvalidIdentifier(String),

    /// レジストリに登録されていないタグ
    #[error("unknown tag `{0}`")]
    UnknownTag(String),

    #[error("table `{table}` has no INTEGER PRIMARY KEY column `app_id`")]
    MissingPrimaryKey { table: String },

    #[error("table `{table}` columns {found:?} do not match registry {expected:?}")]
    ColumnMismatch {
        table: String,
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("label vector has {found} entries, registry has {expected}")]
    LabelWidth { expected: usize, found: usize },

    #[error("registry version {found} does not match expected version {expected}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// ライブラリ共通の Result
pub type Result<T> = std::result::Result<T, TaggerError>;

impl TaggerError {
    /// NotFound 系のエラーかどうか
    pub fn is_not_found(&self) -> bool {
        match self {
            TaggerError::ImageNotFound { .. }
            | TaggerError::TableNotFound { .. }
            | TaggerError::StoreNotFound(_) => true,
            TaggerError::TrainingAbort { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}
