use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:3000/api/";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_MAX_POLL_FAILURES: u32 = 5;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_STATE_FILE: &str = ".govern_state.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid API url {value:?}: {source}")]
    Url {
        value: String,
        source: url::ParseError,
    },

    #[error("{name} must be a positive integer, got {value:?}")]
    Number { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Always ends with `/` so resource paths join underneath it.
    pub base_url: Url,
    pub token: Option<String>,
    pub poll_interval: Duration,
    pub max_consecutive_failures: u32,
    pub request_timeout: Duration,
    pub state_file: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse(DEFAULT_API_URL).expect("default url is valid"),
            token: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_consecutive_failures: DEFAULT_MAX_POLL_FAILURES,
            request_timeout: DEFAULT_TIMEOUT,
            state_file: PathBuf::from(DEFAULT_STATE_FILE),
        }
    }
}

impl ClientConfig {
    /// Reads `GOVERN_*` variables, after loading a `.env` file if one exists.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = ClientConfig::default();

        if let Some(url) = lookup("GOVERN_API_URL") {
            config.base_url = parse_base_url(&url)?;
        }
        config.token = lookup("GOVERN_API_TOKEN").filter(|t| !t.trim().is_empty());
        if let Some(secs) = lookup("GOVERN_POLL_INTERVAL_SECS") {
            config.poll_interval = Duration::from_secs(parse_positive("GOVERN_POLL_INTERVAL_SECS", &secs)?);
        }
        if let Some(max) = lookup("GOVERN_MAX_POLL_FAILURES") {
            config.max_consecutive_failures = parse_positive("GOVERN_MAX_POLL_FAILURES", &max)? as u32;
        }
        if let Some(secs) = lookup("GOVERN_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(parse_positive("GOVERN_TIMEOUT_SECS", &secs)?);
        }
        if let Some(path) = lookup("GOVERN_STATE_FILE") {
            config.state_file = PathBuf::from(path);
        }

        Ok(config)
    }
}

pub fn parse_base_url(value: &str) -> Result<Url, ConfigError> {
    let mut normalized = value.trim().to_string();
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    Url::parse(&normalized).map_err(|source| ConfigError::Url {
        value: value.to_string(),
        source,
    })
}

fn parse_positive(name: &'static str, value: &str) -> Result<u64, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::Number {
            name,
            value: value.to_string(),
        }),
    }
}
