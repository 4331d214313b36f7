//! Logging setup for the switch
//!
//! The filter comes from `RUST_LOG` when set, otherwise from the `[logging]`
//! section. Per-packet events (forwarding decisions, runts, refused sends)
//! are emitted at trace level from the forwarding path; at `level = "trace"`
//! they are held back to debug unless `packet_trace` is on, since a busy
//! switch produces several per frame.

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Targets that log once per frame
const PACKET_TARGETS: &[&str] = &["lswitch::dataplane::switch", "lswitch::capture"];

/// `[logging]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// error, warn, info, debug, trace
    pub level: String,
    /// pretty, compact, json
    pub format: String,
    /// Keep per-packet trace events when `level` is trace
    pub packet_trace: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            packet_trace: false,
        }
    }
}

/// Install the global subscriber. The forwarding thread and tokio workers
/// are told apart by thread name in the pretty and json formats.
///
/// Calling it again is harmless; the first subscriber stays installed.
pub fn init_logging(config: Option<&LogConfig>) {
    let env_filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let default = LogConfig::default();
        EnvFilter::new(directives(config.unwrap_or(&default)))
    };

    let format = config.map(|c| c.format.as_str()).unwrap_or("pretty");

    match format {
        "json" => {
            let subscriber = tracing_subscriber::registry().with(env_filter).with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_thread_names(true)
                    .with_span_events(FmtSpan::CLOSE),
            );
            let _ = tracing::subscriber::set_global_default(subscriber);
        }
        "compact" => {
            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().compact().with_target(false));
            let _ = tracing::subscriber::set_global_default(subscriber);
        }
        _ => {
            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().with_thread_names(true));
            let _ = tracing::subscriber::set_global_default(subscriber);
        }
    }
}

/// Filter directives for a `[logging]` section
fn directives(config: &LogConfig) -> String {
    let level = parse_level(&config.level);
    let mut directives = level.as_str().to_lowercase();

    if level == Level::TRACE && !config.packet_trace {
        for target in PACKET_TARGETS {
            directives.push_str(&format!(",{}=debug", target));
        }
    }
    directives
}

/// Unknown names fall back to info; validation warns about them.
fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" => Level::WARN,
        "info" => Level::INFO,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    }
}
