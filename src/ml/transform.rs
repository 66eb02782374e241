//! 画像の前処理パイプライン
//!
//! RGB変換 → 正方形へリサイズ → チャンネルごとの正規化 → (C, H, W) 順に平坦化。
//! 学習時と推論時で同じ設定を使うため、設定はモデルメタデータにも保存されます。

use image::imageops::FilterType;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, TaggerError};

/// チャンネル数（RGB）
pub const CHANNELS: usize = 3;

/// 画素値の正規化方法
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// [0, 1] へのスケーリングのみ
    UnitRange,
    /// ImageNetの平均と標準偏差
    ImageNet,
    /// 任意の平均・標準偏差
    Custom { mean: [f32; 3], std: [f32; 3] },
}

impl Default for Normalization {
    fn default() -> Self {
        Normalization::ImageNet
    }
}

impl Normalization {
    /// (平均, 標準偏差)
    pub fn stats(&self) -> ([f32; 3], [f32; 3]) {
        match self {
            Normalization::UnitRange => ([0.0; 3], [1.0; 3]),
            Normalization::ImageNet => ([0.485, 0.456, 0.406], [0.229, 0.224, 0.225]),
            Normalization::Custom { mean, std } => (*mean, *std),
        }
    }
}

/// 決定的な画像変換
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageTransform {
    pub image_size: usize,
    pub normalization: Normalization,
}

impl ImageTransform {
    pub fn new(image_size: usize, normalization: Normalization) -> Self {
        Self {
            image_size,
            normalization,
        }
    }

    /// 出力ベクトルの長さ（3 * size * size）
    pub fn output_len(&self) -> usize {
        CHANNELS * self.image_size * self.image_size
    }

    /// 変換を適用
    pub fn apply(&self, image: &DynamicImage) -> Vec<f32> {
        let size = self.image_size as u32;
        let rgb = image
            .resize_exact(size, size, FilterType::Triangle)
            .to_rgb8();

        let (mean, std) = self.normalization.stats();
        let plane = self.image_size * self.image_size;
        let mut data = vec![0.0f32; CHANNELS * plane];

        // (C, H, W) 順: offset = c * H * W + y * W + x
        for (i, pixel) in rgb.as_raw().chunks_exact(CHANNELS).enumerate() {
            for (c, &value) in pixel.iter().enumerate() {
                data[c * plane + i] = (value as f32 / 255.0 - mean[c]) / std[c];
            }
        }

        data
    }

    /// ファイルを読み込んで変換
    pub fn load(&self, path: &Path) -> Result<Vec<f32>> {
        let image = image::open(path).map_err(|source| TaggerError::Image {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(self.apply(&image))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_output_shape() {
        let transform = ImageTransform::new(16, Normalization::UnitRange);
        let img = DynamicImage::ImageRgb8(RgbImage::new(40, 30));
        assert_eq!(transform.apply(&img).len(), 3 * 16 * 16);
        assert_eq!(transform.output_len(), 3 * 16 * 16);
    }

    #[test]
    fn test_unit_range_channel_planes() {
        let transform = ImageTransform::new(4, Normalization::UnitRange);
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([255, 0, 51])));
        let data = transform.apply(&img);
        let plane = 16;
        assert!(data[..plane].iter().all(|&v| (v - 1.0).abs() < 1e-6));
        assert!(data[plane..2 * plane].iter().all(|&v| v.abs() < 1e-6));
        assert!(data[2 * plane..].iter().all(|&v| (v - 0.2).abs() < 1e-6));
    }

    #[test]
    fn test_imagenet_normalization() {
        let transform = ImageTransform::new(2, Normalization::ImageNet);
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(2, 2, Rgb([0, 0, 0])));
        let data = transform.apply(&img);
        assert!((data[0] - (-0.485 / 0.229)).abs() < 1e-5);
    }

    #[test]
    fn test_deterministic() {
        let transform = ImageTransform::new(8, Normalization::ImageNet);
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(20, 12, |x, y| Rgb([x as u8 * 10, y as u8 * 20, 7])));
        assert_eq!(transform.apply(&img), transform.apply(&img));
    }
}
