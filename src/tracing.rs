use backtrace::Backtrace;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogConfig;

pub const LOG_FILE_NAME: &str = "aptsearch.log";

/// Installs the global subscriber. Keep the guard alive for as long as
/// logs should reach the file.
pub fn setup_tracing(config: &LogConfig) -> WorkerGuard {
    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|error| {
        eprintln!("invalid LOG_LEVEL {:?}: {error}", config.level);
        EnvFilter::new("info")
    });
    let registry = tracing_subscriber::registry().with(filter);

    let (fmt_layer, guard) = {
        // file
        let file_appender = tracing_appender::rolling::daily(&config.log_path, LOG_FILE_NAME);
        #[allow(unused_variables)]
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let fmt_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_writer(non_blocking);

        // on debug, also log to stdout
        #[cfg(debug_assertions)]
        let fmt_layer = fmt_layer.with_writer(std::io::stdout);

        (fmt_layer, guard)
    };

    registry.with(fmt_layer).init();

    set_panic_hook();

    guard
}

fn set_panic_hook() {
    std::panic::set_hook(Box::new(|panic| {
        let b = Backtrace::new();
        if let Some(location) = panic.location() {
            tracing::error!(
                message = %panic,
                panic.file = location.file(),
                panic.line = location.line(),
                panic.column = location.column(),
                backtrace = ?b,
            );
        } else {
            tracing::error!(message = %panic, backtrace = ?b);
        }
    }));
}
