//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Configuration for a [`crate::ShellEngine`].
///
/// Everything here is plain data; the interpreter-specific behavior
/// (launch arguments, literal printing, quoting) lives in the
/// [`crate::adapter::InterpreterAdapter`] chosen at engine construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Path to the interpreter executable. Empty means the adapter's default.
    pub interpreter_path: String,

    /// Working directory for the child. Empty means inherit the host's.
    pub working_directory: String,

    /// Extra environment variables merged into the child's environment.
    pub environment: BTreeMap<String, String>,

    /// Default per-command timeout in seconds. `0` disables the deadline.
    pub timeout_seconds: f64,

    /// Restart the interpreter after a command timeout.
    pub auto_restart_on_timeout: bool,

    /// Commands executed right after startup, each on its own line.
    pub startup_commands: Vec<String>,

    /// Optional session-restore script, executed against `snapshot_path`
    /// during `start` when both paths are set and the snapshot exists.
    pub restore_script_path: Option<PathBuf>,

    /// Optional session snapshot consumed by the restore script.
    pub snapshot_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            interpreter_path: String::new(),
            working_directory: String::new(),
            environment: BTreeMap::new(),
            timeout_seconds: 30.0,
            auto_restart_on_timeout: true,
            startup_commands: Vec::new(),
            restore_script_path: None,
            snapshot_path: None,
        }
    }
}

impl EngineConfig {
    /// Effective timeout for a submit: the per-call value when positive,
    /// otherwise the configured default. `0` means no deadline.
    #[must_use]
    pub(crate) fn effective_timeout(&self, timeout_seconds: f64) -> f64 {
        if timeout_seconds > 0.0 {
            timeout_seconds
        } else {
            self.timeout_seconds
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert!(config.interpreter_path.is_empty());
        assert_eq!(config.timeout_seconds, 30.0);
        assert!(config.auto_restart_on_timeout);
        assert!(config.startup_commands.is_empty());
    }

    #[test]
    fn test_effective_timeout_prefers_per_call_value() {
        let config = EngineConfig {
            timeout_seconds: 30.0,
            ..EngineConfig::default()
        };
        assert_eq!(config.effective_timeout(5.0), 5.0);
        assert_eq!(config.effective_timeout(0.0), 30.0);
        assert_eq!(config.effective_timeout(-1.0), 30.0);
    }

    #[test]
    fn test_config_json_roundtrip() {
        let mut config = EngineConfig::default();
        config.interpreter_path = "/usr/bin/pwsh".into();
        config.environment.insert("FOO".into(), "bar".into());

        let json = serde_json::to_string(&config).expect("serialize config");
        let restored: EngineConfig = serde_json::from_str(&json).expect("deserialize config");
        assert_eq!(restored.interpreter_path, "/usr/bin/pwsh");
        assert_eq!(restored.environment.get("FOO").map(String::as_str), Some("bar"));
    }
}
