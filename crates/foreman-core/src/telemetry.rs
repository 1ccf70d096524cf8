//! Process-wide log setup for the `foreman` binary and embedders.
//!
//! Run and node events from [`crate::obs`] carry their `run_id` as a field,
//! so JSON output can be grepped per run. Output always goes to stderr;
//! stdout is reserved for reports.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter directives override, checked before `RUST_LOG`.
pub const LOG_ENV: &str = "FOREMAN_LOG";

/// Crates whose events follow the requested verbosity by default.
const FOREMAN_TARGETS: [&str; 3] = ["foreman", "foreman_core", "foreman_state"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            Self::Json
        } else {
            Self::Text
        }
    }
}

/// Directives used when neither `FOREMAN_LOG` nor `RUST_LOG` is set:
/// Foreman's own crates at `level`, dependencies at `warn`.
pub fn default_directives(level: Level) -> String {
    let mut directives = vec!["warn".to_string()];
    directives.extend(FOREMAN_TARGETS.iter().map(|t| format!("{t}={level}")));
    directives.join(",").to_lowercase()
}

/// Install the global subscriber. Returns `false` if one was already set,
/// in which case nothing changes.
pub fn init_tracing(format: LogFormat, level: Level) -> bool {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(true).with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init(),
    };
    installed.is_ok()
}
