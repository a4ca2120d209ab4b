use std::{str::FromStr, time::Duration};

use reqwest::Url;
use serde::{de::Error as DeError, Deserialize, Deserializer, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid bridge url: {0}")]
    InvalidBridgeUrl(String),
    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Base URL of the bridge REST API, e.g. `http://jvb.local:8080/`.
    pub bridge_url: String,
    /// Host substituted for private candidate addresses; defaults to the
    /// bridge URL host.
    pub public_host: Option<String>,
    pub request_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub log_format: LogFormat,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            bridge_url: "http://127.0.0.1:8080/".to_string(),
            public_host: None,
            request_timeout_ms: 30_000,
            poll_interval_ms: 1_000,
            log_format: LogFormat::Compact,
        }
    }
}

/// Values passed on the command line; they win over files and environment.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub bridge_url: Option<String>,
    pub public_host: Option<String>,
    pub request_timeout_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub log_format: Option<LogFormat>,
}

impl AgentConfig {
    const ENV_PREFIX: &'static str = "GROUPCALL_AGENT";

    pub fn load() -> Result<Self, ConfigError> {
        let defaults = AgentConfig::default();

        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/agent").required(false))
            .add_source(config::File::with_name("config/agent.local").required(false))
            .add_source(
                config::Environment::with_prefix(Self::ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .set_default("bridge_url", defaults.bridge_url.clone())?
            .set_default("request_timeout_ms", defaults.request_timeout_ms as i64)?
            .set_default("poll_interval_ms", defaults.poll_interval_ms as i64)?
            .set_default("log_format", defaults.log_format.as_str())?;

        let settings: AgentConfig = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn apply_overrides(&mut self, overrides: &CliOverrides) -> Result<(), ConfigError> {
        if let Some(url) = &overrides.bridge_url {
            self.bridge_url = url.clone();
        }
        if let Some(host) = &overrides.public_host {
            self.public_host = Some(host.clone());
        }
        if let Some(timeout) = overrides.request_timeout_ms {
            self.request_timeout_ms = timeout;
        }
        if let Some(interval) = overrides.poll_interval_ms {
            self.poll_interval_ms = interval;
        }
        if let Some(format) = overrides.log_format {
            self.log_format = format;
        }
        self.validate()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Host announced in place of private candidate addresses.
    pub fn public_host(&self) -> Result<String, ConfigError> {
        if let Some(host) = &self.public_host {
            return Ok(host.clone());
        }
        self.parsed_bridge_url()?
            .host_str()
            .map(str::to_owned)
            .ok_or_else(|| ConfigError::InvalidBridgeUrl(format!("{} has no host", self.bridge_url)))
    }

    fn parsed_bridge_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.bridge_url)
            .map_err(|_| ConfigError::InvalidBridgeUrl(self.bridge_url.clone()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidBridgeUrl(self.bridge_url.clone()));
        }
        Ok(url)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.parsed_bridge_url()?;
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::ZeroInterval("request_timeout_ms"));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval("poll_interval_ms"));
        }
        Ok(())
    }
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Compact => "compact",
            LogFormat::Json => "json",
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "compact" => Ok(LogFormat::Compact),
            other => Err(format!("unsupported log format '{other}'")),
        }
    }
}

impl<'de> Deserialize<'de> for LogFormat {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        LogFormat::from_str(&value).map_err(D::Error::custom)
    }
}
