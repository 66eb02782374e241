//! 結合テスト共通のフィクスチャ

#![allow(dead_code)]

use std::io::Write;
use std::path::Path;

use burn_autodiff::Autodiff;
use burn_ndarray::NdArray;
use image::{Rgb, RgbImage};

use screenshot_tagger_lib::commands;
use screenshot_tagger_lib::model::AppConfig;
use screenshot_tagger_lib::{TagDef, TagSchema};

pub type Inner = NdArray<f32>;
pub type Train = Autodiff<Inner>;

const NUM_APPS: i64 = 12;

pub fn schema() -> TagSchema {
    TagSchema::new(
        1,
        vec![
            TagDef { name: "Action".to_string(), steam_id: 19 },
            TagDef { name: "Casual".to_string(), steam_id: 597 },
        ],
    )
    .unwrap()
}

/// Action は偶数、Casual は3の倍数以外
pub fn write_fixture(root: &Path) -> AppConfig {
    let csv_path = root.join("games.csv");
    let mut file = std::fs::File::create(&csv_path).unwrap();
    writeln!(file, "app_id,tag_ids").unwrap();
    for app_id in 1..=NUM_APPS {
        let mut ids = Vec::new();
        if app_id % 2 == 0 {
            ids.push("19");
        }
        if app_id % 3 != 0 {
            ids.push("597");
        }
        writeln!(file, "{},\"[{}]\"", app_id, ids.join(",")).unwrap();

        let shade = (app_id * 20) as u8;
        RgbImage::from_pixel(12, 10, Rgb([shade, 255 - shade, 128]))
            .save(root.join(format!("{}.jpeg", app_id)))
            .unwrap();
    }
    drop(file);

    let mut config = AppConfig::default();
    config.data.data_root = root.to_path_buf();
    config.model.model_dir = root.join("models");
    config.tags = schema();
    config.training.epochs = 1;
    config.training.batch_size = 4;
    config.training.image_size = 8;
    config.training.hidden_width = 4;
    config.training.num_workers = 2;
    config.training.train_ratio = 0.75;

    assert_eq!(commands::import_labels(&config, &csv_path).unwrap(), NUM_APPS as usize);
    let split = commands::split_dataset(&config).unwrap();
    assert_eq!(split.train.len(), 9);
    assert_eq!(split.test.len(), 3);

    config
}
