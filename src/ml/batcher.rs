//! サンプル列をテンソルのバッチに変換する

use burn::data::dataloader::batcher::Batcher;
use burn::tensor::{backend::Backend, Tensor};

use crate::ml::dataset::SampleItem;
use crate::ml::transform::CHANNELS;

/// バッチデータ
#[derive(Clone, Debug)]
pub struct SampleBatch<B: Backend> {
    /// [batch_size, 3, size, size]
    pub images: Tensor<B, 4>,
    /// [batch_size, num_tags] の 0/1
    pub targets: Tensor<B, 2>,
}

/// バッチャー
#[derive(Clone, Debug)]
pub struct SampleBatcher {
    image_size: usize,
    num_tags: usize,
}

impl SampleBatcher {
    pub fn new(image_size: usize, num_tags: usize) -> Self {
        Self { image_size, num_tags }
    }
}

impl<B: Backend> Batcher<B, SampleItem, SampleBatch<B>> for SampleBatcher {
    fn batch(&self, items: Vec<SampleItem>, device: &B::Device) -> SampleBatch<B> {
        let batch_size = items.len();
        let size = self.image_size;
        let mut all_pixels = Vec::with_capacity(batch_size * CHANNELS * size * size);
        let mut all_targets = Vec::with_capacity(batch_size * self.num_tags);

        for item in items {
            all_pixels.extend_from_slice(&item.image);
            all_targets.extend_from_slice(&item.labels);
        }

        // 1回の転送でバッチ全体をデバイスへ
        let images = Tensor::<B, 1>::from_floats(all_pixels.as_slice(), device)
            .reshape([batch_size, CHANNELS, size, size]);
        let targets = Tensor::<B, 1>::from_floats(all_targets.as_slice(), device)
            .reshape([batch_size, self.num_tags]);

        SampleBatch { images, targets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_batch_shapes() {
        let device = Default::default();
        let batcher = SampleBatcher::new(4, 3);
        let items = vec![
            SampleItem { app_id: 1, image: vec![0.5; 48], labels: vec![1.0, 0.0, 1.0] },
            SampleItem { app_id: 2, image: vec![0.1; 48], labels: vec![0.0, 1.0, 0.0] },
        ];

        let batch: SampleBatch<TestBackend> = batcher.batch(items, &device);
        assert_eq!(batch.images.dims(), [2, 3, 4, 4]);
        assert_eq!(batch.targets.dims(), [2, 3]);

        let targets = batch.targets.into_data().to_vec::<f32>().unwrap();
        assert_eq!(targets, vec![1.0, 0.0, 1.0, 0.0, 1.0, 0.0]);
    }
}
