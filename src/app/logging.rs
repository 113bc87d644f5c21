//! Usage: Tracing initialization (stdout layer + optional rolling file layer).

use crate::settings::AppSettings;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "modelgate.log";

/// Installs the global subscriber. The returned guard keeps the non-blocking
/// file writer alive; dropping it flushes buffered log lines.
pub(crate) fn init(settings: &AppSettings) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let _ = tracing_log::LogTracer::init();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_target(false);

    let log_dir = settings.log_dir.trim();
    if log_dir.is_empty() {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(stdout_layer)
            .try_init();
        return None;
    }

    let appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file_layer = fmt::layer().with_ansi(false).with_writer(writer);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init();

    Some(guard)
}
