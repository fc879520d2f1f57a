//! Colored logging module for WalletGuard

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing logger with colored output.
///
/// `LOG_FORMAT=json` switches to structured JSON lines.
pub fn init_logger() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,walletguard=debug"));

    let json = std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// Log macros with module prefixes and emojis
#[macro_export]
macro_rules! log_honeypot {
    ($($arg:tt)*) => {
        tracing::warn!(target: "HONEYPOT", "🍯 {}", format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_suspicious {
    ($($arg:tt)*) => {
        tracing::warn!(target: "SUSPICIOUS", "⚠️ {}", format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_phishing {
    ($($arg:tt)*) => {
        tracing::error!(target: "PHISHING", "🎣 {}", format!($($arg)*))
    };
}
