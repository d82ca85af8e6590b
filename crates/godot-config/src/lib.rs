use serde::{Deserialize, Serialize};
use std::io;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;

/// Environment variable naming a config file when `--config` is not given.
pub const CONFIG_ENV_VAR: &str = "GODOT_DAP_CONFIG";

/// Top-level adapter configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DebuggerConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Logging level for the adapter crates.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// One JSON object per event instead of the human-readable format.
    #[serde(default)]
    pub json: bool,

    /// Write logs to stderr. Stdout carries the DAP stream and never receives logs.
    #[serde(default = "LoggingConfig::default_stderr")]
    pub stderr: bool,

    /// Append logs to the given file path.
    ///
    /// Opened in append mode. An unopenable path logs a warning and is
    /// skipped.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_owned()
    }

    fn default_stderr() -> bool {
        true
    }

    pub(crate) fn normalize_level_directives(input: &str) -> String {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Self::default_level();
        }

        match trimmed.to_ascii_lowercase().as_str() {
            // Case-insensitive, `warning` accepted.
            "trace" => "trace".to_owned(),
            "debug" => "debug".to_owned(),
            "info" => "info".to_owned(),
            "warn" | "warning" => "warn".to_owned(),
            "error" => "error".to_owned(),
            // Full directive strings such as `godot.wire=trace` pass through.
            _ => trimmed.to_owned(),
        }
    }

    fn config_env_filter(&self) -> tracing_subscriber::EnvFilter {
        let directives = Self::normalize_level_directives(&self.level);
        tracing_subscriber::EnvFilter::try_new(directives).unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::default()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        })
    }

    /// The effective `EnvFilter`: the configured level (a simple level or a
    /// full directive string) with `RUST_LOG` merged on top when set.
    pub fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        let env_directives = std::env::var("RUST_LOG")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());

        let config_directives = Self::normalize_level_directives(&self.level);

        match env_directives {
            Some(env_directives) => {
                let combined = format!("{config_directives},{env_directives}");
                tracing_subscriber::EnvFilter::try_new(combined)
                    .or_else(|_| tracing_subscriber::EnvFilter::try_new(env_directives))
                    .unwrap_or_else(|_| self.config_env_filter())
            }
            None => self.config_env_filter(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
            stderr: Self::default_stderr(),
            file: None,
        }
    }
}

/// Which frame layout to speak with the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolSetting {
    /// Follow whatever the engine sends.
    #[default]
    Auto,
    /// `[name, parameters]` frames.
    Legacy,
    /// `[name, thread_id, parameters]` frames.
    Threaded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// How long an object or scope fetch may stay unanswered. `0` waits forever.
    #[serde(default = "SessionConfig::default_object_fetch_timeout_ms")]
    pub object_fetch_timeout_ms: u64,

    /// How long `launch` waits for the client's `configurationDone`.
    #[serde(default = "SessionConfig::default_configuration_done_timeout_ms")]
    pub configuration_done_timeout_ms: u64,

    /// Largest inbound frame accepted before the connection is dropped.
    #[serde(default = "SessionConfig::default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    /// Largest `Content-Length` accepted from the DAP client.
    #[serde(default = "SessionConfig::default_max_message_bytes")]
    pub max_message_bytes: usize,

    /// Nesting cap for decoded values and for sub-value expansion.
    #[serde(default = "SessionConfig::default_max_variant_depth")]
    pub max_variant_depth: usize,

    #[serde(default)]
    pub protocol: ProtocolSetting,
}

impl SessionConfig {
    fn default_object_fetch_timeout_ms() -> u64 {
        10_000
    }

    fn default_configuration_done_timeout_ms() -> u64 {
        1_000
    }

    fn default_max_frame_bytes() -> usize {
        64 * 1024 * 1024
    }

    fn default_max_message_bytes() -> usize {
        16 * 1024 * 1024
    }

    fn default_max_variant_depth() -> usize {
        64
    }

    pub fn object_fetch_timeout(&self) -> Option<Duration> {
        match self.object_fetch_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn configuration_done_timeout(&self) -> Duration {
        Duration::from_millis(self.configuration_done_timeout_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            object_fetch_timeout_ms: Self::default_object_fetch_timeout_ms(),
            configuration_done_timeout_ms: Self::default_configuration_done_timeout_ms(),
            max_frame_bytes: Self::default_max_frame_bytes(),
            max_message_bytes: Self::default_max_message_bytes(),
            max_variant_depth: Self::default_max_variant_depth(),
            protocol: ProtocolSetting::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // The default `Display` includes a snippet of the input; keep the message only.
        ConfigError::Toml(err.message().to_owned())
    }
}

impl DebuggerConfig {
    /// Reads and parses `path`.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::load_from_str(&text)
    }

    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }
}

struct MutexFileMakeWriter {
    file: Arc<Mutex<std::fs::File>>,
}

impl<'a> MakeWriter<'a> for MutexFileMakeWriter {
    type Writer = MutexFileWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        MutexFileWriter {
            guard: self.file.lock(),
        }
    }
}

struct MutexFileWriter<'a> {
    guard: parking_lot::MutexGuard<'a, std::fs::File>,
}

impl Write for MutexFileWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.guard.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.guard.flush()
    }
}

static TRACING_INIT: Once = Once::new();

/// Installs the global `tracing` subscriber described by `logging`.
///
/// Later calls are no-ops.
pub fn init_tracing(logging: &LoggingConfig) {
    TRACING_INIT.call_once(|| {
        let filter = logging.env_filter();

        let file = logging.file.as_ref().and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });
        let file_open_failed = logging.file.is_some() && file.is_none();

        let mut make_writer = if logging.stderr {
            BoxMakeWriter::new(std::io::stderr)
        } else {
            BoxMakeWriter::new(std::io::sink)
        };
        if let Some(file) = file {
            let file = Arc::new(Mutex::new(file));
            make_writer = BoxMakeWriter::new(make_writer.and(MutexFileMakeWriter { file }));
        }

        let layer: Box<dyn tracing_subscriber::Layer<_> + Send + Sync> = if logging.json {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(make_writer)
                .with_ansi(false)
                .boxed()
        } else {
            tracing_subscriber::fmt::layer()
                .with_writer(make_writer)
                .with_ansi(false)
                .boxed()
        };

        let subscriber = tracing_subscriber::registry().with(filter).with(layer);
        if tracing::subscriber::set_global_default(subscriber).is_ok() && file_open_failed {
            if let Some(path) = logging.file.as_ref() {
                tracing::warn!(
                    target: "godot.config",
                    path = %path.display(),
                    "failed to open log file; file logging is disabled"
                );
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = DebuggerConfig::load_from_str("").unwrap();
        assert_eq!(config, DebuggerConfig::default());
        assert_eq!(config.logging.level, "info");
        assert!(config.logging.stderr);
        assert_eq!(
            config.session.object_fetch_timeout(),
            Some(Duration::from_secs(10))
        );
        assert_eq!(
            config.session.configuration_done_timeout(),
            Duration::from_secs(1)
        );
        assert_eq!(config.session.max_frame_bytes, 64 * 1024 * 1024);
        assert_eq!(config.session.max_message_bytes, 16 * 1024 * 1024);
        assert_eq!(config.session.protocol, ProtocolSetting::Auto);
    }

    #[test]
    fn parses_all_sections() {
        let config = DebuggerConfig::load_from_str(
            r#"
[logging]
level = "debug"
json = true
stderr = false
file = "/tmp/godot-dap.log"

[session]
object_fetch_timeout_ms = 0
configuration_done_timeout_ms = 250
max_frame_bytes = 4096
max_message_bytes = 2048
max_variant_depth = 8
protocol = "legacy"
"#,
        )
        .unwrap();

        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
        assert!(!config.logging.stderr);
        assert_eq!(
            config.logging.file.as_deref(),
            Some(Path::new("/tmp/godot-dap.log"))
        );
        assert_eq!(config.session.object_fetch_timeout(), None);
        assert_eq!(
            config.session.configuration_done_timeout(),
            Duration::from_millis(250)
        );
        assert_eq!(config.session.max_frame_bytes, 4096);
        assert_eq!(config.session.max_message_bytes, 2048);
        assert_eq!(config.session.max_variant_depth, 8);
        assert_eq!(config.session.protocol, ProtocolSetting::Legacy);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = DebuggerConfig::load_from_str("[session]\nbogus = 1\n").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)), "{err:?}");
    }

    #[test]
    fn toml_errors_do_not_echo_the_input() {
        let err = DebuggerConfig::load_from_str("[logging]\nlevel = 42\n").unwrap_err();
        let ConfigError::Toml(message) = err else {
            panic!("expected a toml error");
        };
        assert!(!message.contains("level = 42"), "{message}");
    }

    #[test]
    fn load_from_path_reads_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("godot-dap.toml");
        std::fs::write(&path, "[session]\nprotocol = \"threaded\"\n").unwrap();

        let config = DebuggerConfig::load_from_path(&path).unwrap();
        assert_eq!(config.session.protocol, ProtocolSetting::Threaded);

        let missing = dir.path().join("missing.toml");
        let err = DebuggerConfig::load_from_path(&missing).unwrap_err();
        match err {
            ConfigError::Io { path, .. } => assert!(path.ends_with("missing.toml")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn level_synonyms_are_normalized() {
        assert_eq!(LoggingConfig::normalize_level_directives("WARNING"), "warn");
        assert_eq!(LoggingConfig::normalize_level_directives("  "), "info");
        assert_eq!(
            LoggingConfig::normalize_level_directives("godot.wire=trace"),
            "godot.wire=trace"
        );
    }

    #[test]
    fn init_tracing_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let logging = LoggingConfig {
            stderr: false,
            file: Some(dir.path().join("adapter.log")),
            ..LoggingConfig::default()
        };
        init_tracing(&logging);
        init_tracing(&logging);
    }
}
