//! Tracing setup: `RUST_LOG` filter, pretty or JSON output, optional daily
//! rolling log files.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, ServerConfig};

const DEFAULT_FILTER: &str = "info,view_config=debug,tower_http=info";

/// Install the global subscriber. Keep the returned guard alive for as long
/// as file logging should flush.
pub fn init(config: &ServerConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let (file_writer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "view_config.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match (config.log_format, file_writer) {
        (LogFormat::Json, Some(file)) => builder
            .json()
            .with_writer(std::io::stdout.and(file))
            .init(),
        (LogFormat::Json, None) => builder.json().init(),
        (LogFormat::Pretty, Some(file)) => builder
            .with_writer(std::io::stdout.and(file))
            .init(),
        (LogFormat::Pretty, None) => builder.init(),
    }

    guard
}
