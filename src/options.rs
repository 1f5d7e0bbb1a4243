use std::time::Duration;

use crate::{ContentstackError, Result};

/// Default Content Management API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.contentstack.io/";

/// Configures endpoint, credentials, rate limiting and retry behavior.
///
/// Every field has an environment-tunable default; see
/// [`ClientOptions::from_env`].
#[derive(Clone, PartialEq)]
pub struct ClientOptions {
    /// API endpoint, e.g. `https://eu-api.contentstack.com/`.
    pub base_url: String,
    /// User-specific read-write token, sent as `authtoken`.
    pub auth_token: Option<String>,
    /// Stack API key, sent as `api_key`.
    pub api_key: Option<String>,
    /// Stack-level management token, sent as `authorization`.
    pub management_token: Option<String>,
    /// Target content branch, sent as `branch`.
    pub branch: Option<String>,
    /// Sustained requests per second. `0` disables rate limiting.
    pub rate_limit: f64,
    /// Maximum number of requests admitted in a burst.
    pub rate_burst: u32,
    /// Maximum number of retries after the initial attempt.
    pub max_retries: u32,
    /// Backoff floor; the first retry waits this long.
    pub retry_wait_min: Duration,
    /// Backoff ceiling.
    pub retry_wait_max: Duration,
    /// Spread each backoff over `[wait, 1.5 * wait]`.
    pub retry_jitter: bool,
    /// Per-attempt HTTP timeout.
    pub timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            auth_token: None,
            api_key: None,
            management_token: None,
            branch: None,
            rate_limit: 10.0,
            rate_burst: 10,
            max_retries: 3,
            retry_wait_min: Duration::from_secs(1),
            retry_wait_max: Duration::from_secs(30),
            retry_jitter: false,
            timeout: Duration::from_secs(30),
        }
    }
}

impl std::fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |value: &Option<String>| value.as_ref().map(|_| "<redacted>");
        f.debug_struct("ClientOptions")
            .field("base_url", &self.base_url)
            .field("auth_token", &redact(&self.auth_token))
            .field("api_key", &self.api_key)
            .field("management_token", &redact(&self.management_token))
            .field("branch", &self.branch)
            .field("rate_limit", &self.rate_limit)
            .field("rate_burst", &self.rate_burst)
            .field("max_retries", &self.max_retries)
            .field("retry_wait_min", &self.retry_wait_min)
            .field("retry_wait_max", &self.retry_wait_max)
            .field("retry_jitter", &self.retry_jitter)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ClientOptions {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Sets the stack credentials used by every request.
    pub fn with_stack(
        mut self,
        api_key: impl Into<String>,
        management_token: impl Into<String>,
    ) -> Self {
        self.api_key = Some(api_key.into());
        self.management_token = Some(management_token.into());
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn with_rate_limit(mut self, rate: f64, burst: u32) -> Self {
        self.rate_limit = rate;
        self.rate_burst = burst;
        self
    }

    pub fn with_retries(
        mut self,
        max_retries: u32,
        wait_min: Duration,
        wait_max: Duration,
    ) -> Self {
        self.max_retries = max_retries;
        self.retry_wait_min = wait_min;
        self.retry_wait_max = wait_max;
        self
    }

    pub fn with_retry_jitter(mut self, jitter: bool) -> Self {
        self.retry_jitter = jitter;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Checks the options for values the client cannot run with.
    pub fn validate(&self) -> Result<()> {
        reqwest::Url::parse(&self.base_url).map_err(|err| {
            ContentstackError::Config(format!("invalid base_url '{}': {err}", self.base_url))
        })?;
        if !self.rate_limit.is_finite() || self.rate_limit < 0.0 {
            return Err(ContentstackError::Config(format!(
                "rate_limit must be a non-negative number, got {}",
                self.rate_limit
            )));
        }
        if self.rate_limit > 0.0 && self.rate_burst == 0 {
            return Err(ContentstackError::Config(
                "rate_burst must be at least 1 when rate limiting is enabled".to_owned(),
            ));
        }
        if self.retry_wait_min > self.retry_wait_max {
            return Err(ContentstackError::Config(format!(
                "retry_wait_min ({:?}) exceeds retry_wait_max ({:?})",
                self.retry_wait_min, self.retry_wait_max
            )));
        }
        if self.timeout.is_zero() {
            return Err(ContentstackError::Config("timeout must be non-zero".to_owned()));
        }
        Ok(())
    }

    /// Builds options from `CONTENTSTACK_*` environment variables.
    ///
    /// Reads:
    /// - `CONTENTSTACK_BASE_URL`
    /// - `CONTENTSTACK_AUTH_TOKEN`
    /// - `CONTENTSTACK_API_KEY`
    /// - `CONTENTSTACK_MANAGEMENT_TOKEN`
    /// - `CONTENTSTACK_BRANCH`
    /// - `CONTENTSTACK_RATE_LIMIT`: requests per second, `0` disables
    /// - `CONTENTSTACK_RATE_BURST`
    /// - `CONTENTSTACK_MAX_RETRIES`
    /// - `CONTENTSTACK_RETRY_WAIT_MIN` / `CONTENTSTACK_RETRY_WAIT_MAX`: seconds
    ///
    /// Unset or empty variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };

        let mut options = Self::default();
        if let Some(base_url) = get("CONTENTSTACK_BASE_URL") {
            options.base_url = base_url;
        }
        options.auth_token = get("CONTENTSTACK_AUTH_TOKEN");
        options.api_key = get("CONTENTSTACK_API_KEY");
        options.management_token = get("CONTENTSTACK_MANAGEMENT_TOKEN");
        options.branch = get("CONTENTSTACK_BRANCH");

        if let Some(value) = get("CONTENTSTACK_RATE_LIMIT") {
            options.rate_limit = parse_env("CONTENTSTACK_RATE_LIMIT", &value)?;
        }
        if let Some(value) = get("CONTENTSTACK_RATE_BURST") {
            options.rate_burst = parse_env("CONTENTSTACK_RATE_BURST", &value)?;
        }
        if let Some(value) = get("CONTENTSTACK_MAX_RETRIES") {
            options.max_retries = parse_env("CONTENTSTACK_MAX_RETRIES", &value)?;
        }
        if let Some(value) = get("CONTENTSTACK_RETRY_WAIT_MIN") {
            options.retry_wait_min = parse_seconds("CONTENTSTACK_RETRY_WAIT_MIN", &value)?;
        }
        if let Some(value) = get("CONTENTSTACK_RETRY_WAIT_MAX") {
            options.retry_wait_max = parse_seconds("CONTENTSTACK_RETRY_WAIT_MAX", &value)?;
        }

        options.validate()?;
        Ok(options)
    }
}

fn parse_env<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|err| ContentstackError::Config(format!("{key}='{value}': {err}")))
}

fn parse_seconds(key: &str, value: &str) -> Result<Duration> {
    let seconds: f64 = parse_env(key, value)?;
    Duration::try_from_secs_f64(seconds)
        .map_err(|err| ContentstackError::Config(format!("{key}='{value}': {err}")))
}
