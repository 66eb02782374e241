//! Steam スクリーンショットのジャンルタグ分類器
//!
//! ラベルストア (SQLite) と `<app_id>.jpeg` の画像ディレクトリから
//! マルチラベルCNNを学習し、タグごとの指標で評価します。

pub mod commands;
pub mod csv_loader;
pub mod error;
pub mod ml;
pub mod model;
pub mod schema;
pub mod store;
pub mod types;

pub use error::{Result, SchemaError, TaggerError};
pub use schema::{TagDef, TagSchema};
pub use types::{SampleRow, Split, TrainingPhase};
