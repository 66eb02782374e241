//! ラベルストアと画像ディレクトリを結合したインデックス付きデータセット

use std::path::{Path, PathBuf};

use crate::error::{Result, TaggerError};
use crate::ml::transform::ImageTransform;
use crate::store::LabelStore;

/// 変換済みの1サンプル
#[derive(Clone, Debug)]
pub struct SampleItem {
    pub app_id: i64,
    /// (C, H, W) 順に平坦化した画像
    pub image: Vec<f32>,
    /// スキーマ順の 0/1 ラベル
    pub labels: Vec<f32>,
}

/// 画像ファイルのパス規則: `<dir>/<app_id>.jpeg`
pub fn image_path(image_dir: &Path, app_id: i64) -> PathBuf {
    image_dir.join(format!("{}.jpeg", app_id))
}

/// パーティション（train / test）上のランダムアクセス可能なデータセット
///
/// 接続を保持しないので、複数ワーカーから同時に `item_at` を呼べます。
#[derive(Clone, Debug)]
pub struct SampleDataset {
    store: LabelStore,
    image_dir: PathBuf,
    transform: ImageTransform,
}

impl SampleDataset {
    pub fn new(store: LabelStore, image_dir: impl Into<PathBuf>, transform: ImageTransform) -> Self {
        Self {
            store,
            image_dir: image_dir.into(),
            transform,
        }
    }

    pub fn store(&self) -> &LabelStore {
        &self.store
    }

    pub fn transform(&self) -> &ImageTransform {
        &self.transform
    }

    pub fn num_tags(&self) -> usize {
        self.store.registry().len()
    }

    /// パーティションの行数
    pub fn len(&self) -> Result<usize> {
        self.store.row_count()
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// `index` 番目のサンプル
    ///
    /// 画像が無ければ `ImageNotFound`（スキップはしない）、範囲外なら `OutOfBounds`。
    pub fn item_at(&self, index: usize) -> Result<SampleItem> {
        let row = self.store.row_at(index)?;

        let path = image_path(&self.image_dir, row.app_id);
        if !path.is_file() {
            return Err(TaggerError::ImageNotFound {
                app_id: row.app_id,
                path,
            });
        }

        let image = self.transform.load(&path)?;
        tracing::trace!(index, app_id = row.app_id, "loaded sample");

        Ok(SampleItem {
            app_id: row.app_id,
            image,
            labels: row.label_vector(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::transform::Normalization;
    use crate::schema::{TagDef, TagSchema};
    use crate::types::SampleRow;
    use image::{Rgb, RgbImage};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn schema() -> Arc<TagSchema> {
        Arc::new(
            TagSchema::new(
                1,
                vec![
                    TagDef { name: "Action".to_string(), steam_id: 19 },
                    TagDef { name: "Casual".to_string(), steam_id: 597 },
                    TagDef { name: "RPG".to_string(), steam_id: 122 },
                ],
            )
            .unwrap(),
        )
    }

    fn write_jpeg(dir: &Path, app_id: i64) {
        RgbImage::from_pixel(24, 18, Rgb([200, 100, 50]))
            .save(image_path(dir, app_id))
            .unwrap();
    }

    fn dataset(dir: &TempDir, rows: &[SampleRow]) -> SampleDataset {
        let store = LabelStore::create(dir.path().join("tags.db"), "games", schema()).unwrap();
        store.insert_rows(rows).unwrap();
        SampleDataset::new(store, dir.path(), ImageTransform::new(16, Normalization::UnitRange))
    }

    #[test]
    fn test_item_at_first_row() {
        let dir = TempDir::new().unwrap();
        let ds = dataset(
            &dir,
            &[
                SampleRow::new(42, vec![true, false, true]),
                SampleRow::new(77, vec![false, true, false]),
            ],
        );
        write_jpeg(dir.path(), 42);

        let item = ds.item_at(0).unwrap();
        assert_eq!(item.app_id, 42);
        assert_eq!(item.labels, vec![1.0, 0.0, 1.0]);
        assert_eq!(item.labels.len(), ds.num_tags());
        assert_eq!(item.image.len(), 3 * 16 * 16);
    }

    #[test]
    fn test_labels_follow_registry_order() {
        let dir = TempDir::new().unwrap();
        let rows: Vec<SampleRow> = (0..4)
            .map(|i| SampleRow::new(i, vec![i == 0, i == 1, i >= 2]))
            .collect();
        let ds = dataset(&dir, &rows);
        for i in 0..4 {
            write_jpeg(dir.path(), i);
        }

        assert_eq!(ds.len().unwrap(), 4);
        for i in 0..ds.len().unwrap() {
            let item = ds.item_at(i).unwrap();
            assert_eq!(item.labels, rows[i].label_vector());
        }
    }

    #[test]
    fn test_item_at_out_of_bounds() {
        let dir = TempDir::new().unwrap();
        let rows: Vec<SampleRow> = (0..5).map(|i| SampleRow::new(i, vec![true, true, true])).collect();
        let ds = dataset(&dir, &rows);
        assert!(matches!(
            ds.item_at(5),
            Err(TaggerError::OutOfBounds { index: 5, len: 5 })
        ));
    }

    #[test]
    fn test_missing_image_is_not_found() {
        let dir = TempDir::new().unwrap();
        let ds = dataset(&dir, &[SampleRow::new(9, vec![true, false, false])]);
        let err = ds.item_at(0).unwrap_err();
        assert!(matches!(err, TaggerError::ImageNotFound { app_id: 9, .. }));
        assert!(err.is_not_found());
    }

    #[test]
    fn test_corrupt_image_is_image_error() {
        let dir = TempDir::new().unwrap();
        let ds = dataset(&dir, &[SampleRow::new(5, vec![true, false, false])]);
        std::fs::write(image_path(dir.path(), 5), b"not a jpeg").unwrap();
        assert!(matches!(ds.item_at(0), Err(TaggerError::Image { .. })));
    }
}
