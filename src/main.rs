//! screenshot_tagger CLI
//!
//! ```bash
//! # 設定ファイルを作成
//! screenshot_tagger init-config
//!
//! # スクレイパーの CSV を取り込んで分割
//! screenshot_tagger import games.csv
//! screenshot_tagger split
//!
//! # 学習して保存
//! screenshot_tagger train --epochs 10 --save-as genre
//!
//! # 推論
//! screenshot_tagger predict genre shot1.jpeg shot2.jpeg
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use burn::tensor::backend::{AutodiffBackend, Backend};
use clap::{Args, Parser, Subcommand, ValueEnum};
use dialoguer::{theme::ColorfulTheme, Confirm};

use screenshot_tagger_lib::commands;
use screenshot_tagger_lib::ml::backend::{cpu_device, CpuBackend, CpuTrainBackend};
use screenshot_tagger_lib::ml::metrics::EvaluationReport;
use screenshot_tagger_lib::model::{print_metadata_info, AppConfig, DeviceType};

mod logging;

/// Steam スクリーンショットのジャンルタグ分類器
#[derive(Parser, Debug)]
#[command(name = "screenshot_tagger")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// 設定ファイル
    #[arg(short, long, global = true, env = "TAGGER_CONFIG", default_value = "config.json")]
    config: PathBuf,

    /// DEBUG レベルのログを出す
    #[arg(short, long, global = true)]
    verbose: bool,

    /// ログを JSON で出す
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// デフォルト設定ファイルを書き出す
    InitConfig {
        /// 既存ファイルを上書きする
        #[arg(long)]
        force: bool,
    },

    /// スクレイパーの CSV (app_id,tag_ids) をラベルストアに取り込む
    Import {
        csv: PathBuf,
    },

    /// ソーステーブルを train / test に分割する
    Split {
        #[arg(long)]
        ratio: Option<f64>,
        #[arg(long)]
        seed: Option<u64>,
    },

    /// 分類器を学習する
    Train(TrainArgs),

    /// 画像のタグを推論する
    Predict(PredictArgs),

    /// 保存済みモデルのメタデータを表示する
    Inspect {
        /// モデル名または .tar.gz のパス
        model: String,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DeviceArg {
    Cpu,
    Wgpu,
}

impl From<DeviceArg> for DeviceType {
    fn from(arg: DeviceArg) -> Self {
        match arg {
            DeviceArg::Cpu => DeviceType::Cpu,
            DeviceArg::Wgpu => DeviceType::Wgpu,
        }
    }
}

#[derive(Args, Debug)]
struct TrainArgs {
    #[arg(long)]
    epochs: Option<usize>,
    #[arg(long)]
    batch_size: Option<usize>,
    #[arg(long)]
    learning_rate: Option<f64>,
    #[arg(long)]
    threshold: Option<f32>,
    #[arg(long)]
    image_size: Option<usize>,
    #[arg(long)]
    workers: Option<usize>,
    #[arg(long, value_enum)]
    device: Option<DeviceArg>,

    /// 学習後に `<model_dir>/<name>.tar.gz` へ保存する
    #[arg(long)]
    save_as: Option<String>,

    /// 保存の確認をスキップする
    #[arg(short, long)]
    yes: bool,

    /// エポックごとの進捗を JSON 行で stdout に出す
    #[arg(long)]
    progress_json: bool,
}

impl TrainArgs {
    fn apply(&self, config: &mut AppConfig) {
        let t = &mut config.training;
        if let Some(v) = self.epochs {
            t.epochs = v;
        }
        if let Some(v) = self.batch_size {
            t.batch_size = v;
        }
        if let Some(v) = self.learning_rate {
            t.learning_rate = v;
        }
        if let Some(v) = self.threshold {
            t.decision_threshold = v;
        }
        if let Some(v) = self.image_size {
            t.image_size = v;
        }
        if let Some(v) = self.workers {
            t.num_workers = v;
        }
        if let Some(v) = self.device {
            config.device_type = v.into();
        }
    }
}

#[derive(Args, Debug)]
struct PredictArgs {
    /// モデル名または .tar.gz のパス
    model: String,

    #[arg(required = true)]
    images: Vec<PathBuf>,

    /// 判定閾値の上書き
    #[arg(long)]
    threshold: Option<f32>,

    #[arg(long, value_enum)]
    device: Option<DeviceArg>,

    /// 結果を JSON で出す
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.json_logs);

    tracing::debug!("screenshot_tagger v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::InitConfig { force } => {
            if cli.config.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", cli.config.display());
            }
            AppConfig::default()
                .save(&cli.config)
                .with_context(|| format!("failed to write {}", cli.config.display()))?;
            println!("wrote {}", cli.config.display());
        }
        Commands::Import { csv } => {
            let config = load_config(&cli.config)?;
            let inserted = commands::import_labels(&config, &csv)
                .with_context(|| format!("failed to import {}", csv.display()))?;
            println!("imported {} rows into `{}`", inserted, config.data.source_table);
        }
        Commands::Split { ratio, seed } => {
            let mut config = load_config(&cli.config)?;
            if let Some(ratio) = ratio {
                config.training.train_ratio = ratio;
            }
            if let Some(seed) = seed {
                config.training.seed = seed;
            }
            let split = commands::split_dataset(&config).context("failed to split dataset")?;
            println!("train: {} rows, test: {} rows", split.train.len(), split.test.len());
        }
        Commands::Train(args) => {
            let mut config = load_config(&cli.config)?;
            args.apply(&mut config);
            config.validate()?;
            config.log_summary();
            match config.device_type {
                DeviceType::Cpu => run_train::<CpuTrainBackend>(&config, &cpu_device(), &args)?,
                DeviceType::Wgpu => train_on_gpu(&config, &args)?,
            }
        }
        Commands::Predict(args) => {
            let mut config = load_config(&cli.config)?;
            if let Some(device) = args.device {
                config.device_type = device.into();
            }
            match config.device_type {
                DeviceType::Cpu => run_predict::<CpuBackend>(&config, &cpu_device(), &args)?,
                DeviceType::Wgpu => predict_on_gpu(&config, &args)?,
            }
        }
        Commands::Inspect { model } => {
            let config = load_config(&cli.config)?;
            let metadata = commands::describe_model(&config, &model)
                .with_context(|| format!("failed to read model `{}`", model))?;
            print_metadata_info(&metadata);
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<AppConfig> {
    AppConfig::load_or_default(path).with_context(|| format!("failed to load {}", path.display()))
}

#[cfg(feature = "wgpu")]
fn train_on_gpu(config: &AppConfig, args: &TrainArgs) -> Result<()> {
    use screenshot_tagger_lib::ml::backend::{gpu_device, GpuTrainBackend};
    run_train::<GpuTrainBackend>(config, &gpu_device(), args)
}

#[cfg(not(feature = "wgpu"))]
fn train_on_gpu(config: &AppConfig, args: &TrainArgs) -> Result<()> {
    tracing::warn!("built without the `wgpu` feature; training on CPU");
    run_train::<CpuTrainBackend>(config, &cpu_device(), args)
}

#[cfg(feature = "wgpu")]
fn predict_on_gpu(config: &AppConfig, args: &PredictArgs) -> Result<()> {
    use screenshot_tagger_lib::ml::backend::{gpu_device, GpuBackend};
    run_predict::<GpuBackend>(config, &gpu_device(), args)
}

#[cfg(not(feature = "wgpu"))]
fn predict_on_gpu(config: &AppConfig, args: &PredictArgs) -> Result<()> {
    tracing::warn!("built without the `wgpu` feature; predicting on CPU");
    run_predict::<CpuBackend>(config, &cpu_device(), args)
}

fn run_train<B: AutodiffBackend>(config: &AppConfig, device: &B::Device, args: &TrainArgs) -> Result<()> {
    let progress_json = args.progress_json;
    let outcome = commands::train_classifier::<B, _>(config, device, |progress| {
        if progress_json {
            if let Ok(line) = serde_json::to_string(&progress) {
                println!("{}", line);
            }
        }
    })
    .context("training failed")?;

    if let Some(report) = outcome.final_report() {
        print_report(&report.evaluation);
    }

    // 保存は名前の指定と確認の両方が揃ったときだけ
    let Some(name) = args.save_as.as_deref() else {
        tracing::info!("model not saved (pass --save-as <name> to keep it)");
        return Ok(());
    };

    let confirmed = args.yes
        || Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(format!("Save model as `{}`?", name))
            .default(false)
            .interact_opt()?
            .unwrap_or(false);

    if !confirmed {
        tracing::info!("model discarded");
        return Ok(());
    }

    let path = commands::save_outcome(config, name, &outcome).context("failed to save model")?;
    println!("saved {}", path.display());
    Ok(())
}

fn run_predict<B: Backend>(config: &AppConfig, device: &B::Device, args: &PredictArgs) -> Result<()> {
    let results = commands::predict_tags::<B>(config, &args.model, &args.images, args.threshold, device)
        .context("prediction failed")?;

    for (path, prediction) in results {
        if args.json {
            let line = serde_json::json!({
                "image": path.display().to_string(),
                "tags": prediction.tags,
                "probabilities": prediction.probabilities,
            });
            println!("{}", line);
        } else {
            println!("{}\t{}", path.display(), prediction.tags.join(","));
        }
    }
    Ok(())
}

fn print_report(report: &EvaluationReport) {
    println!("\n=== 評価結果 ({} samples) ===", report.samples);
    println!("{:<12} {:>8} {:>9} {:>8} {:>8}", "tag", "accuracy", "precision", "recall", "f1");
    for m in &report.per_tag {
        println!(
            "{:<12} {:>8.3} {:>9.3} {:>8.3} {:>8.3}",
            m.tag, m.accuracy, m.precision, m.recall, m.f1
        );
    }
    println!(
        "{:<12} {:>8.3} {:>9.3} {:>8.3} {:>8.3}",
        "macro",
        report.macro_accuracy(),
        report.macro_precision(),
        report.macro_recall(),
        report.macro_f1()
    );
}
