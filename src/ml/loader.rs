//! ミニバッチの計画と並列読み込み
//!
//! 画像のデコードと前処理を rayon のスレッドプールで並列に行います。
//! 結果はインデックス順に集めるので、同じシードなら同じバッチ構成になります。
//! ワーカーはデータを読むだけで、モデルのパラメータには触れません。

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;
use rayon::ThreadPool;

use crate::error::{Result, TaggerError};
use crate::ml::dataset::{SampleDataset, SampleItem};

/// エポック内のバッチ分割（インデックスの並び）
///
/// `shuffle` が指定されていればシャッフルします。最後のバッチは短くなることがありますが、
/// 空のバッチは作りません。
pub fn plan_batches(len: usize, batch_size: usize, shuffle: Option<&mut StdRng>) -> Vec<Vec<usize>> {
    let mut indices: Vec<usize> = (0..len).collect();
    if let Some(rng) = shuffle {
        indices.shuffle(rng);
    }
    indices
        .chunks(batch_size.max(1))
        .map(|chunk| chunk.to_vec())
        .collect()
}

/// データ読み込みワーカープール
pub struct SampleLoader {
    pool: ThreadPool,
    num_workers: usize,
}

impl SampleLoader {
    pub fn new(num_workers: usize) -> Result<Self> {
        let num_workers = num_workers.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_workers)
            .thread_name(|i| format!("sample-loader-{}", i))
            .build()
            .map_err(|e| TaggerError::WorkerPool(format!("failed to build loader pool: {}", e)))?;

        tracing::debug!(num_workers, "sample loader ready");
        Ok(Self { pool, num_workers })
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// 指定インデックスのサンプルを並列に読み込む
    ///
    /// 1件でも失敗したらエラーを返します。
    pub fn fetch(&self, dataset: &SampleDataset, indices: &[usize]) -> Result<Vec<SampleItem>> {
        if self.num_workers == 1 || indices.len() <= 1 {
            return indices.iter().map(|&i| dataset.item_at(i)).collect();
        }

        self.pool.install(|| {
            indices
                .par_iter()
                .map(|&i| dataset.item_at(i))
                .collect::<Result<Vec<_>>>()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::dataset::image_path;
    use crate::ml::transform::{ImageTransform, Normalization};
    use crate::schema::{TagDef, TagSchema};
    use crate::store::LabelStore;
    use crate::types::SampleRow;
    use image::{Rgb, RgbImage};
    use rand::SeedableRng;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_plan_batches_sizes() {
        let batches = plan_batches(10, 4, None);
        assert_eq!(batches, vec![vec![0, 1, 2, 3], vec![4, 5, 6, 7], vec![8, 9]]);
        assert!(plan_batches(0, 4, None).is_empty());
    }

    #[test]
    fn test_plan_batches_shuffle_is_seeded() {
        let mut a = StdRng::seed_from_u64(3);
        let mut b = StdRng::seed_from_u64(3);
        let first = plan_batches(20, 6, Some(&mut a));
        let second = plan_batches(20, 6, Some(&mut b));
        assert_eq!(first, second);

        let mut all: Vec<usize> = first.into_iter().flatten().collect();
        all.sort_unstable();
        assert_eq!(all, (0..20).collect::<Vec<_>>());
    }

    fn dataset(dir: &TempDir, n: i64, with_images: bool) -> SampleDataset {
        let schema = Arc::new(TagSchema::new(1, vec![TagDef { name: "Action".to_string(), steam_id: 19 }]).unwrap());
        let store = LabelStore::create(dir.path().join("tags.db"), "games", schema).unwrap();
        let rows: Vec<SampleRow> = (0..n).map(|i| SampleRow::new(i, vec![i % 2 == 0])).collect();
        store.insert_rows(&rows).unwrap();
        if with_images {
            for i in 0..n {
                RgbImage::from_pixel(10, 10, Rgb([i as u8, 0, 0]))
                    .save(image_path(dir.path(), i))
                    .unwrap();
            }
        }
        SampleDataset::new(store, dir.path(), ImageTransform::new(8, Normalization::UnitRange))
    }

    #[test]
    fn test_fetch_preserves_order() {
        let dir = TempDir::new().unwrap();
        let ds = dataset(&dir, 6, true);
        let loader = SampleLoader::new(3).unwrap();
        let items = loader.fetch(&ds, &[5, 0, 3]).unwrap();
        let ids: Vec<i64> = items.iter().map(|item| item.app_id).collect();
        assert_eq!(ids, vec![5, 0, 3]);
    }

    #[test]
    fn test_fetch_propagates_errors() {
        let dir = TempDir::new().unwrap();
        let ds = dataset(&dir, 4, false);
        let loader = SampleLoader::new(2).unwrap();
        let err = loader.fetch(&ds, &[0, 1, 2]).unwrap_err();
        assert!(err.is_not_found());
    }
}
