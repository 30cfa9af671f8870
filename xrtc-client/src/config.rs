//! # Credential and Connection Configuration
//!
//! Purpose: Resolve a complete `Credentials` value and `ConnectionConfig`
//! before a session touches the network.
//!
//! ## Sources (lowest to highest priority)
//! 1. Built-in defaults.
//! 2. An env file (`xrtc.env` in the working directory unless another file
//!    is named) in `KEY=VALUE` form.
//! 3. The process environment.
//! 4. Values passed explicitly to `ConfigLoader`.
//!
//! Recognised keys: `ACCOUNT_ID`, `API_KEY`, `LOGIN_URL`, `SET_URL`,
//! `GET_URL`, `TIMEOUT_TOTAL`, `TIMEOUT_CONNECT`, `TIMEOUT_READ` (seconds,
//! fractional allowed), `LIMIT_CONNECTIONS`, `LIMIT_CONCURRENT_REQUESTS`.
//!
//! The older `AIOHTTP_TIMEOUT_TOTAL`, `AIOHTTP_TIMEOUT_CONNECT`,
//! `AIOHTTP_TIMEOUT_SOCK_READ`, `AIOHTTP_LIMIT_CONNECTIONS`,
//! `AIOHTTP_LIMIT_CONCURRENT_REQUESTS`, `REQUESTS_CONNECT` and
//! `REQUESTS_READ` keys are still read; the names above take precedence
//! when both are set.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use xrtc_common::{LoginRequest, ProtocolError, Result};

pub const DEFAULT_ENV_FILE: &str = "xrtc.env";
pub const DEFAULT_LOGIN_URL: &str = "https://api.xrtc.org/v1/auth/login";
pub const DEFAULT_SET_URL: &str = "https://api.xrtc.org/v1/item/set";
pub const DEFAULT_GET_URL: &str = "https://api.xrtc.org/v1/item/get";

const KNOWN_KEYS: &[&str] = &[
    "ACCOUNT_ID",
    "API_KEY",
    "LOGIN_URL",
    "SET_URL",
    "GET_URL",
    "TIMEOUT_TOTAL",
    "TIMEOUT_CONNECT",
    "TIMEOUT_READ",
    "LIMIT_CONNECTIONS",
    "LIMIT_CONCURRENT_REQUESTS",
    "AIOHTTP_TIMEOUT_TOTAL",
    "AIOHTTP_TIMEOUT_CONNECT",
    "AIOHTTP_TIMEOUT_SOCK_READ",
    "AIOHTTP_LIMIT_CONNECTIONS",
    "AIOHTTP_LIMIT_CONCURRENT_REQUESTS",
    "REQUESTS_CONNECT",
    "REQUESTS_READ",
];

/// Account identity presented at login.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    account_id: String,
    api_key: String,
}

impl Credentials {
    pub fn new(account_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        Credentials {
            account_id: account_id.into(),
            api_key: api_key.into(),
        }
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// # Errors
    /// Returns a `Configuration` error if either field is empty.
    pub fn validate(&self) -> Result<()> {
        if self.account_id.trim().is_empty() {
            return Err(ProtocolError::configuration("Account id is missing"));
        }
        if self.api_key.trim().is_empty() {
            return Err(ProtocolError::configuration("API key is missing"));
        }
        Ok(())
    }

    pub(crate) fn login_request(&self) -> LoginRequest {
        LoginRequest {
            accountid: self.account_id.clone(),
            apikey: self.api_key.clone(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("account_id", &self.account_id)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Per-phase time budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Whole exchange for login, set, probe and watch. Never applied to a
    /// stream get.
    pub total: Option<Duration>,
    pub connect: Duration,
    /// Longest allowed gap between two body reads.
    pub read: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            total: Some(Duration::from_secs(20)),
            connect: Duration::from_secs(5),
            read: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Idle pooled connections kept per host.
    pub connections: usize,
    /// Exchanges admitted by the session's gate at once.
    pub concurrent_requests: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            connections: 100,
            concurrent_requests: 6,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsOptions {
    /// PEM files trusted in addition to the bundled roots.
    pub extra_root_certificates: Vec<PathBuf>,
}

/// Endpoints and transport settings for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub login_url: String,
    pub set_url: String,
    pub get_url: String,
    pub timeouts: Timeouts,
    pub limits: Limits,
    pub tls: TlsOptions,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            login_url: DEFAULT_LOGIN_URL.to_string(),
            set_url: DEFAULT_SET_URL.to_string(),
            get_url: DEFAULT_GET_URL.to_string(),
            timeouts: Timeouts::default(),
            limits: Limits::default(),
            tls: TlsOptions::default(),
        }
    }
}

impl ConnectionConfig {
    /// Points all three endpoints at another host, keeping the standard
    /// paths.
    ///
    /// # Errors
    /// Returns a `Configuration` error if `base` is not an absolute URL.
    pub fn with_base_url(mut self, base: &str) -> Result<Self> {
        let base = parse_endpoint("base", base)?;
        let join = |path: &str| -> Result<String> {
            base.join(path).map(String::from).map_err(|err| {
                ProtocolError::configuration(format!("Invalid base URL {}", base)).with_source(err)
            })
        };
        self.login_url = join("/v1/auth/login")?;
        self.set_url = join("/v1/item/set")?;
        self.get_url = join("/v1/item/get")?;
        Ok(self)
    }

    /// # Errors
    /// Returns a `Configuration` error for a non-http(s) endpoint or a zero
    /// limit.
    pub fn validate(&self) -> Result<()> {
        parse_endpoint("login", &self.login_url)?;
        parse_endpoint("set", &self.set_url)?;
        parse_endpoint("get", &self.get_url)?;
        if self.limits.connections == 0 {
            return Err(ProtocolError::configuration(
                "LIMIT_CONNECTIONS must be at least 1",
            ));
        }
        if self.limits.concurrent_requests == 0 {
            return Err(ProtocolError::configuration(
                "LIMIT_CONCURRENT_REQUESTS must be at least 1",
            ));
        }
        Ok(())
    }
}

fn parse_endpoint(name: &str, value: &str) -> Result<Url> {
    let url = Url::parse(value).map_err(|err| {
        ProtocolError::configuration(format!("Invalid {} URL: {}", name, value)).with_source(err)
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(ProtocolError::configuration(format!(
            "Unsupported scheme {} in {} URL",
            scheme, name
        ))),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSettings {
    #[serde(alias = "ACCOUNT_ID")]
    account_id: Option<String>,
    #[serde(alias = "API_KEY")]
    api_key: Option<String>,
    #[serde(alias = "LOGIN_URL")]
    login_url: Option<String>,
    #[serde(alias = "SET_URL")]
    set_url: Option<String>,
    #[serde(alias = "GET_URL")]
    get_url: Option<String>,
    #[serde(alias = "TIMEOUT_TOTAL")]
    timeout_total: Option<f64>,
    #[serde(alias = "TIMEOUT_CONNECT")]
    timeout_connect: Option<f64>,
    #[serde(alias = "TIMEOUT_READ")]
    timeout_read: Option<f64>,
    #[serde(alias = "LIMIT_CONNECTIONS")]
    limit_connections: Option<usize>,
    #[serde(alias = "LIMIT_CONCURRENT_REQUESTS")]
    limit_concurrent_requests: Option<usize>,

    #[serde(alias = "AIOHTTP_TIMEOUT_TOTAL")]
    aiohttp_timeout_total: Option<f64>,
    #[serde(alias = "AIOHTTP_TIMEOUT_CONNECT")]
    aiohttp_timeout_connect: Option<f64>,
    #[serde(alias = "AIOHTTP_TIMEOUT_SOCK_READ")]
    aiohttp_timeout_sock_read: Option<f64>,
    #[serde(alias = "AIOHTTP_LIMIT_CONNECTIONS")]
    aiohttp_limit_connections: Option<usize>,
    #[serde(alias = "AIOHTTP_LIMIT_CONCURRENT_REQUESTS")]
    aiohttp_limit_concurrent_requests: Option<usize>,
    #[serde(alias = "REQUESTS_CONNECT")]
    requests_connect: Option<f64>,
    #[serde(alias = "REQUESTS_READ")]
    requests_read: Option<f64>,
}

/// Layered resolver for `Credentials` and `ConnectionConfig`.
#[derive(Clone, Default)]
pub struct ConfigLoader {
    credentials_file: Option<PathBuf>,
    connection_file: Option<PathBuf>,
    account_id: Option<String>,
    api_key: Option<String>,
    environment: Option<Vec<(String, String)>>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Env file holding `ACCOUNT_ID` / `API_KEY`. Must exist once named.
    pub fn credentials_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.credentials_file = Some(path.into());
        self
    }

    /// Env file holding endpoint, timeout and limit settings.
    pub fn connection_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.connection_file = Some(path.into());
        self
    }

    pub fn account_id(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Replaces the process environment as the variable source.
    pub fn environment<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.environment = Some(
            vars.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        );
        self
    }

    /// # Errors
    /// Returns a `Configuration` error if a named file is missing or
    /// unreadable, or the account id or API key cannot be resolved.
    pub fn load_credentials(&self) -> Result<Credentials> {
        let raw = self.settings(self.credentials_file.as_deref())?;
        let account_id = self
            .account_id
            .clone()
            .or(raw.account_id)
            .ok_or_else(|| ProtocolError::configuration("Account id is missing"))?;
        let api_key = self
            .api_key
            .clone()
            .or(raw.api_key)
            .ok_or_else(|| ProtocolError::configuration("API key is missing"))?;
        let credentials = Credentials::new(account_id, api_key);
        credentials.validate()?;
        Ok(credentials)
    }

    /// # Errors
    /// Returns a `Configuration` error for a missing named file, a value
    /// that does not parse, or a configuration that fails validation.
    pub fn load_connection(&self) -> Result<ConnectionConfig> {
        let raw = self.settings(self.connection_file.as_deref())?;
        let mut config = ConnectionConfig::default();

        if let Some(url) = raw.login_url {
            config.login_url = url;
        }
        if let Some(url) = raw.set_url {
            config.set_url = url;
        }
        if let Some(url) = raw.get_url {
            config.get_url = url;
        }
        if let Some(secs) = raw.timeout_total.or(raw.aiohttp_timeout_total) {
            config.timeouts.total = if secs > 0.0 {
                Some(seconds("TIMEOUT_TOTAL", secs)?)
            } else {
                None
            };
        }
        if let Some(secs) = raw
            .timeout_connect
            .or(raw.aiohttp_timeout_connect)
            .or(raw.requests_connect)
        {
            config.timeouts.connect = seconds("TIMEOUT_CONNECT", secs)?;
        }
        if let Some(secs) = raw
            .timeout_read
            .or(raw.aiohttp_timeout_sock_read)
            .or(raw.requests_read)
        {
            config.timeouts.read = seconds("TIMEOUT_READ", secs)?;
        }
        if let Some(n) = raw.limit_connections.or(raw.aiohttp_limit_connections) {
            config.limits.connections = n;
        }
        if let Some(n) = raw
            .limit_concurrent_requests
            .or(raw.aiohttp_limit_concurrent_requests)
        {
            config.limits.concurrent_requests = n;
        }

        config.validate()?;
        Ok(config)
    }

    /// Resolves both values.
    pub fn load(&self) -> Result<(Credentials, ConnectionConfig)> {
        Ok((self.load_credentials()?, self.load_connection()?))
    }

    fn settings(&self, named: Option<&Path>) -> Result<RawSettings> {
        let file_vars = match named {
            Some(path) => read_env_file(path)?,
            None => {
                let path = Path::new(DEFAULT_ENV_FILE);
                if path.is_file() {
                    read_env_file(path)?
                } else {
                    Vec::new()
                }
            }
        };
        let env_vars: Vec<(String, String)> = match &self.environment {
            Some(vars) => vars.clone(),
            None => std::env::vars().collect(),
        };

        let config = Config::builder()
            .add_source(Environment::default().source(Some(known(file_vars))))
            .add_source(Environment::default().source(Some(known(env_vars))))
            .build()
            .map_err(|err| {
                ProtocolError::configuration("Failed to assemble configuration").with_source(err)
            })?;
        config.try_deserialize().map_err(|err| {
            ProtocolError::configuration(format!("Invalid configuration value: {}", err))
                .with_source(err)
        })
    }
}

impl fmt::Debug for ConfigLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigLoader")
            .field("credentials_file", &self.credentials_file)
            .field("connection_file", &self.connection_file)
            .field("account_id", &self.account_id)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

fn known(vars: Vec<(String, String)>) -> config::Map<String, String> {
    vars.into_iter()
        .filter(|(key, _)| KNOWN_KEYS.contains(&key.to_ascii_uppercase().as_str()))
        .collect()
}

fn seconds(key: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|err| {
        ProtocolError::configuration(format!("{} must be a non-negative number of seconds", key))
            .with_source(err)
    })
}

fn read_env_file(path: &Path) -> Result<Vec<(String, String)>> {
    let contents = std::fs::read_to_string(path).map_err(|err| {
        ProtocolError::configuration(format!("Cannot read env file {}", path.display()))
            .with_source(err)
    })?;
    let vars = parse_env(&contents).map_err(|line| {
        ProtocolError::configuration(format!(
            "Malformed line {} in env file {}",
            line,
            path.display()
        ))
    })?;
    debug!(file = %path.display(), entries = vars.len(), "loaded env file");
    Ok(vars)
}

/// Parses `KEY=VALUE` lines. Returns the 1-based number of the first
/// malformed line on failure.
fn parse_env(contents: &str) -> std::result::Result<Vec<(String, String)>, usize> {
    let mut vars = Vec::new();
    for (idx, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let (key, value) = line.split_once('=').ok_or(idx + 1)?;
        let key = key.trim();
        if key.is_empty() {
            return Err(idx + 1);
        }
        vars.push((key.to_string(), unquote(value.trim()).to_string()));
    }
    Ok(vars)
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}
