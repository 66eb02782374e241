//! ジャンル分類用CNNモデル
//!
//! スクリーンショットからタグごとのロジットを出力するマルチラベル分類器です。

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        Dropout, DropoutConfig, GroupNorm, GroupNormConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    tensor::{activation, backend::Backend, Tensor},
};

use crate::ml::transform::CHANNELS;

/// 畳み込みブロック数
pub const NUM_BLOCKS: usize = 3;

/// モデル設定
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 出力タグ数
    pub num_tags: usize,
    /// 畳み込み・全結合の幅
    #[config(default = 64)]
    pub hidden_width: usize,
    /// ドロップアウト率
    #[config(default = 0.25)]
    pub dropout: f64,
    /// 入力画像サイズ（正方形）
    #[config(default = 128)]
    pub image_size: usize,
}

/// GroupNorm のグループ数（チャンネル数を割り切れる最大の候補）
pub fn norm_groups(channels: usize) -> usize {
    [8, 4, 2]
        .into_iter()
        .find(|g| channels % g == 0)
        .unwrap_or(1)
}

impl ModelConfig {
    /// モデルを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> GenreClassifier<B> {
        let width = self.hidden_width;
        let blocks = (0..NUM_BLOCKS)
            .map(|i| {
                let in_channels = if i == 0 { CHANNELS } else { width };
                self.init_block(in_channels, device)
            })
            .collect();

        tracing::debug!(
            image_size = self.image_size,
            hidden_width = width,
            num_tags = self.num_tags,
            feature_map = self.image_size >> NUM_BLOCKS,
            "classifier initialised"
        );

        GenreClassifier {
            blocks,
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc1: LinearConfig::new(width, width).init(device),
            fc2: LinearConfig::new(width, self.num_tags).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            activation: Relu::new(),
        }
    }

    fn init_block<B: Backend>(&self, in_channels: usize, device: &B::Device) -> ConvBlock<B> {
        let width = self.hidden_width;
        ConvBlock {
            // 3x3, same padding
            conv: Conv2dConfig::new([in_channels, width], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .init(device),
            norm: GroupNormConfig::new(norm_groups(width), width).init(device),
            activation: Relu::new(),
            dropout: DropoutConfig::new(self.dropout).init(),
            // 2x2, stride 2 で半分に
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }
}

/// Conv → Norm → ReLU → Dropout → MaxPool
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    norm: GroupNorm<B>,
    activation: Relu,
    dropout: Dropout,
    pool: MaxPool2d,
}

impl<B: Backend> ConvBlock<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.norm.forward(x);
        let x = self.activation.forward(x);
        let x = self.dropout.forward(x);
        self.pool.forward(x)
    }
}

/// マルチラベル分類CNN
///
/// # アーキテクチャ
/// - {Conv 3x3 + GroupNorm + ReLU + Dropout + MaxPool 2x2} x 3
/// - AdaptiveAvgPool 1x1 → Flatten
/// - FC: hidden -> hidden + ReLU + Dropout
/// - FC: hidden -> num_tags（活性化なし、sigmoid は呼び出し側）
#[derive(Module, Debug)]
pub struct GenreClassifier<B: Backend> {
    blocks: Vec<ConvBlock<B>>,
    global_pool: AdaptiveAvgPool2d,
    fc1: Linear<B>,
    fc2: Linear<B>,
    dropout: Dropout,
    activation: Relu,
}

impl<B: Backend> GenreClassifier<B> {
    /// 順伝播
    ///
    /// - `images`: [batch_size, 3, size, size]
    /// - 戻り値: タグごとのロジット [batch_size, num_tags]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = images;
        for block in &self.blocks {
            x = block.forward(x);
        }

        let x = self.global_pool.forward(x);
        let [batch_size, channels, _, _] = x.dims();
        let x = x.reshape([batch_size, channels]);

        let x = self.fc1.forward(x);
        let x = self.activation.forward(x);
        let x = self.dropout.forward(x);
        self.fc2.forward(x)
    }

    /// タグごとの確率（sigmoid）
    pub fn probabilities(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        activation::sigmoid(self.forward(images))
    }
}
