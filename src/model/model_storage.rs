//! モデルとメタデータの永続化
//!
//! Tar.gz形式でモデルとメタデータを1ファイルに統合して保存・読み込みします。
//!
//! ファイル構成（tar.gz内部）:
//! - metadata.json   - メタデータ（タグレジストリ、入力サイズ、学習履歴など）
//! - model.bin       - モデルの重み（burn のバイナリレコード）

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::record::{BinBytesRecorder, FullPrecisionSettings, Recorder};
use burn::tensor::backend::Backend;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Archive, Builder};

use crate::error::{Result, TaggerError};
use crate::ml::ml_model::GenreClassifier;
use crate::model::model_metadata::ModelMetadata;

const METADATA_ENTRY: &str = "metadata.json";
const MODEL_ENTRY: &str = "model.bin";

const ARCHIVE_SUFFIX: &str = ".tar.gz";

/// `.tar.gz` で終わっていなければファイル名の末尾に付ける
///
/// `run.1` のようなドット入りの名前も拡張子として扱わない。
pub fn archive_path(output_path: &Path) -> PathBuf {
    let already = output_path
        .file_name()
        .and_then(|s| s.to_str())
        .is_some_and(|name| name.ends_with(ARCHIVE_SUFFIX));
    if already {
        output_path.to_path_buf()
    } else {
        let mut name = output_path.as_os_str().to_os_string();
        name.push(ARCHIVE_SUFFIX);
        PathBuf::from(name)
    }
}

fn append_entry<W: std::io::Write>(builder: &mut Builder<W>, name: &str, bytes: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append(&header, bytes)?;
    Ok(())
}

/// メタデータと共にモデルをTar.gz形式で保存
///
/// 保存先のパスを返します。
pub fn save_model_with_metadata(
    output_path: &Path,
    metadata: &ModelMetadata,
    model_binary: &[u8],
) -> Result<PathBuf> {
    let tar_gz_path = archive_path(output_path);

    // 親ディレクトリが存在しない場合は作成
    if let Some(parent) = tar_gz_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let tar_gz_file = File::create(&tar_gz_path)?;
    let encoder = GzEncoder::new(tar_gz_file, Compression::default());
    let mut tar_builder = Builder::new(encoder);

    let json_str = metadata.to_json_string()?;
    append_entry(&mut tar_builder, METADATA_ENTRY, json_str.as_bytes())?;
    append_entry(&mut tar_builder, MODEL_ENTRY, model_binary)?;

    // gzip のフッタまで書き切る
    tar_builder.into_inner()?.finish()?;

    tracing::info!(path = %tar_gz_path.display(), bytes = model_binary.len(), "model archive saved");
    Ok(tar_gz_path)
}

/// 学習済みモデルを `<model_dir>/<name>.tar.gz` に保存
pub fn save_trained_model<B: Backend>(
    model_dir: &Path,
    name: &str,
    model: GenreClassifier<B>,
    metadata: &ModelMetadata,
) -> Result<PathBuf> {
    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    let model_binary = recorder
        .record(model.into_record(), ())
        .map_err(|e| TaggerError::Record(format!("{:?}", e)))?;

    save_model_with_metadata(&model_dir.join(name), metadata, &model_binary)
}

fn open_archive(tar_gz_path: &Path) -> Result<Archive<GzDecoder<File>>> {
    let tar_gz_file = File::open(tar_gz_path)?;
    Ok(Archive::new(GzDecoder::new(tar_gz_file)))
}

/// Tar.gzからモデルメタデータを読み込む
pub fn load_metadata(tar_gz_path: &Path) -> Result<ModelMetadata> {
    let mut archive = open_archive(tar_gz_path)?;

    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.path()?.to_str() == Some(METADATA_ENTRY) {
            let mut json_str = String::new();
            entry.read_to_string(&mut json_str)?;
            return ModelMetadata::from_json_string(&json_str);
        }
    }

    Err(TaggerError::Archive(format!("{} not found in {}", METADATA_ENTRY, tar_gz_path.display())))
}

/// メタデータとモデルバイナリを共に読み込む
pub fn load_model_with_metadata(tar_gz_path: &Path) -> Result<(ModelMetadata, Vec<u8>)> {
    let mut archive = open_archive(tar_gz_path)?;

    let mut metadata_opt: Option<ModelMetadata> = None;
    let mut model_binary_opt: Option<Vec<u8>> = None;

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_path_buf();

        match path.to_str() {
            Some(METADATA_ENTRY) => {
                let mut json_str = String::new();
                entry.read_to_string(&mut json_str)?;
                metadata_opt = Some(ModelMetadata::from_json_string(&json_str)?);
            }
            Some(MODEL_ENTRY) => {
                let mut buffer = Vec::new();
                entry.read_to_end(&mut buffer)?;
                model_binary_opt = Some(buffer);
            }
            _ => {}
        }
    }

    match (metadata_opt, model_binary_opt) {
        (Some(metadata), Some(binary)) => Ok((metadata, binary)),
        (None, _) => Err(TaggerError::Archive(format!("{} not found in archive", METADATA_ENTRY))),
        (_, None) => Err(TaggerError::Archive(format!("{} not found in archive", MODEL_ENTRY))),
    }
}

/// アーカイブからモデルを復元
pub fn load_trained_model<B: Backend>(
    tar_gz_path: &Path,
    device: &B::Device,
) -> Result<(ModelMetadata, GenreClassifier<B>)> {
    let (metadata, model_binary) = load_model_with_metadata(tar_gz_path)?;

    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    let record = recorder
        .load(model_binary, device)
        .map_err(|e| TaggerError::Record(format!("{:?}", e)))?;

    let model = metadata.model_config().init::<B>(device).load_record(record);
    Ok((metadata, model))
}

/// メタデータをコンソールに表示
pub fn print_metadata_info(metadata: &ModelMetadata) {
    println!("\n=== モデルメタデータ ===");
    println!("タグ ({}件, v{}): {}", metadata.schema.len(), metadata.schema.version(), metadata.schema.names().join(", "));
    println!("入力サイズ: {}x{}", metadata.image_size, metadata.image_size);
    println!("隠れ層の幅: {}", metadata.hidden_width);
    println!("正規化: {:?}", metadata.normalization);
    println!("判定閾値: {}", metadata.decision_threshold);
    println!("学習エポック数: {}", metadata.num_epochs);
    for h in &metadata.history {
        println!(
            "  epoch {:>3}: train_loss={:.4} test_loss={:.4} acc={:.3} f1={:.3}",
            h.epoch, h.train_loss, h.test_loss, h.macro_accuracy, h.macro_f1
        );
    }
    if let Some(f1) = metadata.final_macro_f1() {
        println!("最終マクロF1: {:.3}", f1);
    }
    println!("学習日時: {}", metadata.trained_at);
    println!("========================");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::ml_model::ModelConfig;
    use crate::model::config::TrainingSettings;
    use crate::schema::TagSchema;
    use burn::tensor::Tensor;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn metadata(image_size: usize) -> ModelMetadata {
        let mut settings = TrainingSettings::default();
        settings.image_size = image_size;
        let config = ModelConfig::new(12).with_hidden_width(4).with_image_size(image_size);
        ModelMetadata::new(TagSchema::steam_default(), &config, &settings)
    }

    #[test]
    fn test_archive_path_extension() {
        assert_eq!(archive_path(Path::new("models/a")), PathBuf::from("models/a.tar.gz"));
        assert_eq!(archive_path(Path::new("models/a.tar.gz")), PathBuf::from("models/a.tar.gz"));
        assert_eq!(archive_path(Path::new("models/run.1")), PathBuf::from("models/run.1.tar.gz"));
        assert_eq!(archive_path(Path::new("models/a.gz")), PathBuf::from("models/a.gz.tar.gz"));
    }

    #[test]
    fn test_dotted_names_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let first = save_model_with_metadata(&dir.path().join("run.1"), &metadata(16), &[1]).unwrap();
        let second = save_model_with_metadata(&dir.path().join("run.2"), &metadata(16), &[2]).unwrap();
        assert_ne!(first, second);

        assert_eq!(load_model_with_metadata(&first).unwrap().1, vec![1]);
        assert_eq!(load_model_with_metadata(&second).unwrap().1, vec![2]);
    }

    #[test]
    fn test_save_and_load_raw_archive() {
        let dir = tempfile::tempdir().unwrap();
        let saved = save_model_with_metadata(&dir.path().join("m"), &metadata(16), &[1, 2, 3]).unwrap();
        assert!(saved.ends_with("m.tar.gz"));

        let (meta, bytes) = load_model_with_metadata(&saved).unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
        assert_eq!(meta.schema.names(), TagSchema::steam_default().names());
        assert_eq!(load_metadata(&saved).unwrap().image_size, 16);
    }

    #[test]
    fn test_trained_model_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let meta = metadata(8);
        let model: GenreClassifier<TestBackend> = meta.model_config().init(&device);

        let images = Tensor::<TestBackend, 4>::ones([1, 3, 8, 8], &device);
        let before = model.forward(images.clone()).into_data().to_vec::<f32>().unwrap();

        let path = save_trained_model(dir.path(), "genre", model, &meta).unwrap();
        let (_, restored) = load_trained_model::<TestBackend>(&path, &device).unwrap();
        let after = restored.forward(images).into_data().to_vec::<f32>().unwrap();

        for (a, b) in before.iter().zip(&after) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_missing_archive_is_io_error() {
        let err = load_metadata(Path::new("/nonexistent/model.tar.gz")).unwrap_err();
        assert!(matches!(err, TaggerError::Io(_)));
    }
}
