// 共通ユーティリティ関数

use crate::config::{default_log_dir, LogConfig};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// ログ初期化
///
/// `RUST_LOG` が設定されていればそれを優先し、なければ設定ファイルのレベルを使います。
/// ファイル出力が有効な場合、返された `WorkerGuard` を保持している間だけ書き込まれます。
pub fn init_logging(config: &LogConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .or_else(|_| EnvFilter::try_new("info"))?;

    let (file_layer, guard) = if config.enable_file_logging {
        let log_dir = config
            .log_dir
            .clone()
            .or_else(default_log_dir)
            .ok_or_else(|| anyhow::anyhow!("Failed to determine log directory"))?;
        std::fs::create_dir_all(&log_dir)?;

        let appender = tracing_appender::rolling::daily(&log_dir, "liftlens.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}

/// 拡張子を残したままファイル名を最大長に切り詰める
///
/// 例: 最大30文字で `very_long_filename_that_exceeds_maximum_length.mp4`
/// → `very_long_filename_that....mp4`
pub fn trim_filename(filename: &str, max_length: usize) -> String {
    const ELLIPSIS: &str = "...";

    let chars: Vec<char> = filename.chars().collect();
    if chars.len() <= max_length {
        return filename.to_string();
    }

    let (name, extension) = match filename.rfind('.') {
        Some(pos) if pos > 0 => filename.split_at(pos),
        _ => (filename, ""),
    };

    let extension_len = extension.chars().count();
    let available = match max_length.checked_sub(extension_len + ELLIPSIS.len()) {
        Some(n) if n > 0 => n,
        // 拡張子だけで長すぎる場合はそのまま
        _ => return filename.to_string(),
    };

    let trimmed: String = name.chars().take(available).collect();
    format!("{}{}{}", trimmed, ELLIPSIS, extension)
}

/// 人間が読みやすいバイト数
pub fn format_size(bytes: u64) -> String {
    const MB: f64 = 1024.0 * 1024.0;
    if bytes as f64 >= MB {
        format!("{:.2} MB", bytes as f64 / MB)
    } else {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    }
}

/// 時刻フォーマット
pub fn format_timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_filename_short_is_unchanged() {
        assert_eq!(trim_filename("squat.mp4", 50), "squat.mp4");
    }

    #[test]
    fn test_trim_filename_keeps_extension() {
        let name = "very_long_filename_that_exceeds_maximum_length.mp4";
        let trimmed = trim_filename(name, 30);
        assert_eq!(trimmed, "very_long_filename_that....mp4");
        assert_eq!(trimmed.chars().count(), 30);
    }

    #[test]
    fn test_trim_filename_without_extension() {
        assert_eq!(trim_filename("abcdefghijklmnop", 10), "abcdefg...");
    }

    #[test]
    fn test_trim_filename_extension_too_long() {
        let name = "a.verylongextension";
        assert_eq!(trim_filename(name, 8), name);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(10 * 1024 * 1024), "10.00 MB");
        assert_eq!(format_size(2048), "2.0 KB");
    }

    #[test]
    fn test_format_timestamp_shape() {
        assert_eq!(format_timestamp().len(), 8);
    }
}
