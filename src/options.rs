use std::time::Duration;

use crate::{rate_limit::DEFAULT_RATE_LIMIT_FALLBACK, LichessError, Result};

pub const DEFAULT_API_URL: &str = "https://lichess.org";
pub const DEFAULT_EXPLORER_URL: &str = "https://explorer.lichess.ovh";
pub const DEFAULT_TABLEBASE_URL: &str = "https://tablebase.lichess.ovh";

/// Retry, timeout and routing policy of a [`LichessClient`](crate::LichessClient).
///
/// The client keeps its own copy; build a new client to change policy.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientOptions {
    /// Retry automatically after a 429 response.
    pub auto_retry_on_rate_limit: bool,
    /// Maximum number of rate-limit retries after the initial attempt.
    pub max_rate_limit_retries: u32,
    /// Ignore `max_rate_limit_retries` and keep retrying until cancelled.
    pub unlimited_rate_limit_retries: bool,
    /// Retry transient network failures (timeouts, refused connections, DNS).
    pub enable_transient_retry: bool,
    /// Maximum number of transient retries after the initial attempt.
    pub max_transient_retries: u32,
    /// Delay before the first transient retry; doubles on each further one.
    pub transient_retry_base_delay: Duration,
    /// Upper bound of the transient retry delay.
    pub transient_retry_max_delay: Duration,
    /// Wait applied after a 429 without a usable `Retry-After` header.
    pub rate_limit_fallback_delay: Duration,
    /// Timeout of a non-streaming call, body included.
    pub default_timeout: Duration,
    /// Timeout of a streaming call. `None` keeps the stream open until the
    /// caller drops or cancels it.
    pub streaming_timeout: Option<Duration>,
    /// Longest NDJSON line the stream decoder buffers before giving up.
    pub max_line_bytes: usize,
    /// Main API host.
    pub api_base_url: String,
    /// Opening explorer host.
    pub explorer_base_url: String,
    /// Endgame tablebase host.
    pub tablebase_base_url: String,
    /// `User-Agent` header value. Defaults to the crate name and version.
    pub user_agent: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            auto_retry_on_rate_limit: true,
            max_rate_limit_retries: 3,
            unlimited_rate_limit_retries: false,
            enable_transient_retry: true,
            max_transient_retries: 3,
            transient_retry_base_delay: Duration::from_secs(1),
            transient_retry_max_delay: Duration::from_secs(30),
            rate_limit_fallback_delay: DEFAULT_RATE_LIMIT_FALLBACK,
            default_timeout: Duration::from_secs(30),
            streaming_timeout: None,
            max_line_bytes: 16 * 1024 * 1024,
            api_base_url: DEFAULT_API_URL.to_owned(),
            explorer_base_url: DEFAULT_EXPLORER_URL.to_owned(),
            tablebase_base_url: DEFAULT_TABLEBASE_URL.to_owned(),
            user_agent: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_owned(),
        }
    }
}

impl ClientOptions {
    /// Default options with host overrides read from the environment.
    ///
    /// Reads (all optional):
    /// - `LICHESS_API_URL`
    /// - `LICHESS_EXPLORER_URL`
    /// - `LICHESS_TABLEBASE_URL`
    ///
    /// A variable that is set but empty is an error.
    pub fn from_env() -> Result<Self> {
        let mut options = Self::default();
        if let Some(url) = env_override("LICHESS_API_URL")? {
            options.api_base_url = url;
        }
        if let Some(url) = env_override("LICHESS_EXPLORER_URL")? {
            options.explorer_base_url = url;
        }
        if let Some(url) = env_override("LICHESS_TABLEBASE_URL")? {
            options.tablebase_base_url = url;
        }
        Ok(options)
    }

    /// Points all three hosts at one base URL, e.g. a local mock server.
    pub fn with_single_host(mut self, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        self.api_base_url = base_url.clone();
        self.explorer_base_url = base_url.clone();
        self.tablebase_base_url = base_url;
        self
    }
}

pub(crate) fn env_override(name: &str) -> Result<Option<String>> {
    match std::env::var(name) {
        Ok(value) if value.trim().is_empty() => Err(LichessError::InvalidConfig(format!(
            "{name} is set but empty"
        ))),
        Ok(value) => Ok(Some(value.trim().to_owned())),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(LichessError::InvalidConfig(format!(
            "{name} is not valid unicode"
        ))),
    }
}
