//! ログ出力の初期化
//!
//! ログは stderr に出します（stdout は推論結果などのデータ出力用）。
//! `RUST_LOG` が設定されていればそちらを優先します。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// `verbose` で DEBUG、`json_format` で JSON 形式
pub fn init(verbose: bool, json_format: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}
