//! Console logging through `tracing-subscriber`.

use serde_json::Value;
use tracing_subscriber::EnvFilter;

/// Filter used when neither `RUST_LOG` nor the configuration says otherwise.
pub const DEFAULT_FILTER: &str = "info";

/// Install the global fmt subscriber. `RUST_LOG` wins over `default_filter`.
/// Returns false if a subscriber was already installed (e.g. by another test).
pub fn init(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_ok()
}

/// Build filter directives from the `logging.verbosity` section of a
/// configuration, e.g. `{"yogi_runtime::branch": "debug"}` becomes
/// `info,yogi_runtime::branch=debug`. A `"*"` component sets the default level.
pub fn filter_from_config(config: &Value) -> String {
    let mut default = DEFAULT_FILTER.to_string();
    let mut directives = Vec::new();
    if let Some(Value::Object(verbosity)) = config.pointer("/logging/verbosity") {
        for (component, level) in verbosity {
            let Some(level) = level.as_str() else {
                continue;
            };
            let level = level.to_ascii_lowercase();
            if component == "*" {
                default = level;
            } else {
                directives.push(format!("{}={}", component, level));
            }
        }
    }
    std::iter::once(default)
        .chain(directives)
        .collect::<Vec<_>>()
        .join(",")
}

/// Levels accepted by `--log-verbosity COMPONENT=LEVEL`.
pub(crate) fn is_valid_level(level: &str) -> bool {
    matches!(
        level.to_ascii_lowercase().as_str(),
        "off" | "error" | "warn" | "info" | "debug" | "trace"
    )
}
