//! Startup Settings
//!
//! Resolves the controller address and secret from the command line and the
//! Clash `config.yaml`, and validates the loop settings.

use crate::condition::ConditionKind;
use crate::debounce::DebouncePolicy;
use crate::notification::NotificationAction;
use crate::poller::PollOptions;
use clap::{ArgAction, Args};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Fatal startup errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read Clash config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Clash config {path} is not valid YAML: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("external-controller not set in {0} (use --controller)")]
    MissingController(PathBuf),

    #[error("invalid controller address {address:?}: {reason}")]
    InvalidController { address: String, reason: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("{0} is too large")]
    OutOfRange(&'static str),

    #[error("no home directory found, pass --config")]
    NoHomeDir,
}

/// Options shared by every run mode
#[derive(Args, Debug, Clone)]
pub struct Options {
    /// Clash config.yaml to read `external-controller` and `secret` from
    /// [default: ~/.config/clash/config.yaml]
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Controller address (`host:port` or URL), overrides the config file
    #[arg(long, global = true, value_name = "URL")]
    pub controller: Option<String>,

    /// Controller secret, overrides the config file
    #[arg(long, global = true, value_name = "SECRET")]
    pub secret: Option<String>,

    /// Poll interval in seconds
    #[arg(long, global = true, value_name = "SECS", default_value_t = 60)]
    pub interval: u64,

    /// Minimum minutes between two alerts for the same condition
    #[arg(long, global = true, value_name = "MINUTES", default_value_t = 19)]
    pub cooldown: u64,

    /// Maximum alerts per condition until it clears
    #[arg(long, global = true, value_name = "N", default_value_t = 3)]
    pub max_notifications: u32,

    /// Request timeout in seconds
    #[arg(long, global = true, value_name = "SECS", default_value_t = 10)]
    pub timeout: u64,

    /// Conditions to alert on [default: not-rule allow-lan]
    #[arg(long, global = true, value_enum, value_delimiter = ',', action = ArgAction::Append)]
    pub watch: Vec<ConditionKind>,

    /// Application identity shown with the alerts
    #[arg(long, global = true, default_value = "CFWHelper")]
    pub app_id: String,

    /// URL opened when an alert is clicked (e.g. the Clash dashboard)
    #[arg(long, global = true, value_name = "URL")]
    pub action_url: Option<String>,

    /// Number of daily log files to keep
    #[arg(long, global = true, value_name = "N", default_value_t = 3)]
    pub keep_logs: usize,
}

/// The two keys read from the Clash config; everything else is ignored
#[derive(Debug, Default, Deserialize)]
struct ClashConfig {
    #[serde(rename = "external-controller")]
    external_controller: Option<String>,
    secret: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    /// Full `/configs` URL
    pub endpoint: Url,
    pub secret: Option<String>,
    pub timeout: Duration,
    pub watch: Vec<ConditionKind>,
    pub poll: PollOptions,
}

impl Settings {
    pub fn from_options(options: &Options) -> Result<Self, ConfigError> {
        if options.interval == 0 {
            return Err(ConfigError::Zero("--interval"));
        }
        if options.timeout == 0 {
            return Err(ConfigError::Zero("--timeout"));
        }

        let cooldown_secs = options
            .cooldown
            .checked_mul(60)
            .ok_or(ConfigError::OutOfRange("--cooldown"))?;

        let config_path = match &options.config {
            Some(path) => path.clone(),
            None => default_config_path()?,
        };

        // An overridden controller makes the file optional
        let clash = match &options.controller {
            Some(_) if !config_path.exists() => ClashConfig::default(),
            _ => load_clash_config(&config_path)?,
        };

        let address = options
            .controller
            .clone()
            .or(clash.external_controller)
            .ok_or_else(|| ConfigError::MissingController(config_path.clone()))?;
        let endpoint = controller_endpoint(&address)?;

        let secret = options
            .secret
            .clone()
            .or(clash.secret)
            .filter(|s| !s.is_empty());

        let watch = if options.watch.is_empty() {
            ConditionKind::DEFAULT_SET.to_vec()
        } else {
            options.watch.clone()
        };

        let action = options.action_url.as_ref().map(|url| NotificationAction {
            label: "Open dashboard".to_string(),
            payload: url.clone(),
        });

        Ok(Self {
            endpoint,
            secret,
            timeout: Duration::from_secs(options.timeout),
            watch,
            poll: PollOptions {
                interval: Duration::from_secs(options.interval),
                policy: DebouncePolicy {
                    cooldown: Duration::from_secs(cooldown_secs),
                    max_notifications: options.max_notifications,
                },
                app_id: options.app_id.clone(),
                action,
            },
        })
    }
}

fn default_config_path() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|home| home.join(".config").join("clash").join("config.yaml"))
        .ok_or(ConfigError::NoHomeDir)
}

fn load_clash_config(path: &Path) -> Result<ClashConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    // An empty file parses as null
    let config: Option<ClashConfig> =
        serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(config.unwrap_or_default())
}

/// Turns `host:port`, `:port` or a full URL into the `/configs` endpoint
pub fn controller_endpoint(address: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidController {
        address: address.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = address.trim();
    if trimmed.is_empty() {
        return Err(invalid("empty address"));
    }

    let mut base = if trimmed.contains("://") {
        trimmed.to_string()
    } else if trimmed.starts_with(':') {
        format!("http://127.0.0.1{}", trimmed)
    } else {
        format!("http://{}", trimmed)
    };
    if !base.ends_with('/') {
        base.push('/');
    }

    let base = Url::parse(&base).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(base.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    if base.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host"));
    }

    base.join("configs").map_err(|e| invalid(&e.to_string()))
}
