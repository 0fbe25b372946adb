//! tracing subscriber setup for the transport binary

use crate::domain::settings::{FileLogSettings, LogRotation, LogSettings};
use std::str::FromStr;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Keeps the non-blocking file writer alive; logs are flushed on drop
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

fn level_filter(level: &str) -> EnvFilter {
    // RUST_LOG wins over the configured level
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::from_str(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

fn rotation(rotation: LogRotation) -> Rotation {
    match rotation {
        LogRotation::Minutely => Rotation::MINUTELY,
        LogRotation::Hourly => Rotation::HOURLY,
        LogRotation::Daily => Rotation::DAILY,
        LogRotation::Never => Rotation::NEVER,
    }
}

fn file_appender(file: &FileLogSettings) -> RollingFileAppender {
    RollingFileAppender::new(rotation(file.rotation), &file.dir, &file.prefix)
}

pub fn init_logger(settings: &LogSettings) -> anyhow::Result<LoggingGuard> {
    let console_layer = settings.console.then(|| {
        fmt::layer()
            .with_writer(std::io::stdout)
            .with_file(settings.show_file_line)
            .with_line_number(settings.show_file_line)
            .with_thread_names(true)
    });

    let (file_layer, file_guard) = match &settings.file {
        Some(file) => {
            let (writer, guard) = tracing_appender::non_blocking(file_appender(file));
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_file(settings.show_file_line)
                .with_line_number(settings.show_file_line)
                .with_thread_names(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(level_filter(&settings.level))
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::info!(
        "Logging initialized (level: {}, file: {})",
        settings.level,
        settings
            .file
            .as_ref()
            .map(|f| f.dir.display().to_string())
            .unwrap_or_else(|| "off".to_string())
    );

    Ok(LoggingGuard { _file: file_guard })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_mapping() {
        assert_eq!(rotation(LogRotation::Hourly), Rotation::HOURLY);
        assert_eq!(rotation(LogRotation::Never), Rotation::NEVER);
        assert_eq!(rotation(LogRotation::default()), Rotation::DAILY);
    }

    #[test]
    fn test_file_logging_writes_into_log_dir() {
        let dir = tempfile::tempdir().unwrap();
        let settings = LogSettings {
            console: false,
            file: Some(FileLogSettings {
                dir: dir.path().to_path_buf(),
                rotation: LogRotation::Never,
                ..Default::default()
            }),
            ..Default::default()
        };

        let guard = init_logger(&settings).unwrap();
        tracing::info!("hello from the transport");
        drop(guard);

        let written: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(written, vec![std::ffi::OsString::from("metawear_btle")]);
    }
}
