//! Client settings for `haatchat`.
//!
//! Each value is taken from the first layer that sets it:
//! 1. command-line flags
//! 2. `HAATCHAT_*` environment variables (through clap's `env`)
//! 3. `~/.config/haatchat/config.toml`
//! 4. built-in defaults
//!
//! The default file may be absent. A `--config` path must exist.

use std::path::PathBuf;
use std::time::Duration;

use haatchat_proto::message::MAX_MESSAGE_SIZE;

use crate::app::DEFAULT_TIMESTAMP_FORMAT;
use crate::chat::attachment::{AttachmentResolver, DEFAULT_ALLOWED_SCHEMES};
use crate::chat::retry::RetryConfig;
use crate::chat::{DEFAULT_QUICK_REPLIES, PipelineConfig};
use crate::transport::simulated::SimulatedConfig;

/// Failure while loading the config file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// File that was opened.
        path: PathBuf,
        /// I/O failure.
        source: std::io::Error,
    },

    /// The file is not valid TOML for [`ConfigFile`].
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// On-disk layout. Every field is optional so a file can set just a few.
// ---------------------------------------------------------------------------

/// Parsed `config.toml`.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    chat: ChatFileConfig,
    presence: PresenceFileConfig,
    transport: TransportFileConfig,
    attachment: AttachmentFileConfig,
    ui: UiFileConfig,
}

/// `[chat]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ChatFileConfig {
    max_retries: Option<u32>,
    delivery_timeout_ms: Option<u64>,
    max_message_size: Option<usize>,
    quick_replies: Option<Vec<String>>,
}

/// `[presence]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct PresenceFileConfig {
    typing_interval_ms: Option<u64>,
    enabled: Option<bool>,
}

/// `[transport]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct TransportFileConfig {
    latency_ms: Option<u64>,
    failure_rate: Option<f64>,
    ack_delay_ms: Option<u64>,
    /// `0` disables read receipts.
    read_delay_ms: Option<u64>,
    receipt_buffer: Option<usize>,
}

/// `[attachment]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct AttachmentFileConfig {
    allowed_schemes: Option<Vec<String>>,
}

/// `[ui]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct UiFileConfig {
    timestamp_format: Option<String>,
}

// ---------------------------------------------------------------------------
// Effective settings after layering
// ---------------------------------------------------------------------------

/// Settings the client runs with.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    // -- Chat --
    /// Explicit retries allowed per failed message.
    pub max_retries: u32,
    /// Timeout for one delivery attempt.
    pub delivery_timeout: Duration,
    /// Maximum text size in bytes.
    pub max_message_size: usize,
    /// Canned replies offered under the composer.
    pub quick_replies: Vec<String>,

    // -- Presence --
    /// Interval between typing indicator flips.
    pub typing_interval: Duration,
    /// Whether the simulated typing indicator runs at all.
    pub presence_enabled: bool,

    // -- Transport --
    /// Simulated transport tuning.
    pub transport: SimulatedConfig,

    // -- Attachment --
    /// URI schemes accepted for picked images.
    pub allowed_schemes: Vec<String>,

    // -- UI --
    /// `chrono` format for message timestamps.
    pub timestamp_format: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let retry = RetryConfig::default();
        Self {
            max_retries: retry.max_retries,
            delivery_timeout: retry.delivery_timeout,
            max_message_size: MAX_MESSAGE_SIZE,
            quick_replies: DEFAULT_QUICK_REPLIES.iter().map(ToString::to_string).collect(),
            typing_interval: Duration::from_millis(1500),
            presence_enabled: true,
            transport: SimulatedConfig::default(),
            allowed_schemes: DEFAULT_ALLOWED_SCHEMES.iter().map(ToString::to_string).collect(),
            timestamp_format: DEFAULT_TIMESTAMP_FORMAT.to_string(),
        }
    }
}

impl ClientConfig {
    /// Builds the settings from `cli` layered over the config file.
    ///
    /// A missing `--config` file is an error. A missing default file is not.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Flags win over the file, the file wins over defaults.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();
        let transport_defaults = &defaults.transport;

        let read_delay = match file.transport.read_delay_ms {
            Some(0) => None,
            Some(ms) => Some(Duration::from_millis(ms)),
            None => transport_defaults.read_delay,
        };

        Self {
            max_retries: cli
                .max_retries
                .or(file.chat.max_retries)
                .unwrap_or(defaults.max_retries),
            delivery_timeout: file
                .chat
                .delivery_timeout_ms
                .map_or(defaults.delivery_timeout, Duration::from_millis),
            max_message_size: file
                .chat
                .max_message_size
                .unwrap_or(defaults.max_message_size),
            quick_replies: file
                .chat
                .quick_replies
                .clone()
                .unwrap_or(defaults.quick_replies),
            typing_interval: file
                .presence
                .typing_interval_ms
                .map_or(defaults.typing_interval, Duration::from_millis),
            presence_enabled: !cli.no_typing
                && file.presence.enabled.unwrap_or(defaults.presence_enabled),
            transport: SimulatedConfig {
                latency: file
                    .transport
                    .latency_ms
                    .map_or(transport_defaults.latency, Duration::from_millis),
                failure_rate: cli
                    .failure_rate
                    .or(file.transport.failure_rate)
                    .unwrap_or(transport_defaults.failure_rate)
                    .clamp(0.0, 1.0),
                ack_delay: file
                    .transport
                    .ack_delay_ms
                    .map_or(transport_defaults.ack_delay, Duration::from_millis),
                read_delay,
                receipt_buffer: file
                    .transport
                    .receipt_buffer
                    .unwrap_or(transport_defaults.receipt_buffer),
            },
            allowed_schemes: file
                .attachment
                .allowed_schemes
                .clone()
                .unwrap_or(defaults.allowed_schemes),
            timestamp_format: cli
                .timestamp_format
                .clone()
                .or_else(|| file.ui.timestamp_format.clone())
                .unwrap_or(defaults.timestamp_format),
        }
    }

    /// Settings for the send pipeline.
    #[must_use]
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            retry: RetryConfig {
                max_retries: self.max_retries,
                delivery_timeout: self.delivery_timeout,
            },
            max_message_size: self.max_message_size,
            quick_replies: self.quick_replies.clone(),
        }
    }

    /// Settings for the simulated transport.
    #[must_use]
    pub fn simulated_config(&self) -> SimulatedConfig {
        self.transport.clone()
    }

    /// Attachment resolver accepting the configured schemes.
    #[must_use]
    pub fn attachment_resolver(&self) -> AttachmentResolver {
        AttachmentResolver::new(self.allowed_schemes.iter().map(String::as_str))
    }
}

/// Command-line flags.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Marketplace chat core, driven from the terminal")]
pub struct CliArgs {
    /// Path to config file (default: `~/.config/haatchat/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Explicit retries allowed per failed message.
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Probability in [0, 1] that a simulated delivery fails.
    #[arg(long)]
    pub failure_rate: Option<f64>,

    /// Disable the simulated typing indicator.
    #[arg(long)]
    pub no_typing: bool,

    /// `chrono` format for message timestamps.
    #[arg(long)]
    pub timestamp_format: Option<String>,

    /// `tracing` filter directive, e.g. `debug` or `haatchat=trace`.
    #[arg(long, default_value = "info", env = "HAATCHAT_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/haatchat.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Reads `explicit_path`, or the default location when it is `None`.
///
/// Only the default location may be missing; it then reads as an empty file.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let Some(config_dir) = dirs::config_dir() else {
        return Ok(ConfigFile::default());
    };
    let path = config_dir.join("haatchat").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
