use std::{
    env, fmt,
    net::{Ipv4Addr, SocketAddr},
    str::FromStr,
    time::Duration,
};

use anyhow::{Context, Result, anyhow, bail};
use url::Url;

/// Connection details for the GitHub contents API backing the relay.
#[derive(Clone)]
pub struct GithubConfig {
    pub token: String,
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub api_url: Url,
}

impl fmt::Debug for GithubConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GithubConfig")
            .field("token", &"<redacted>")
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .field("branch", &self.branch)
            .field("api_url", &self.api_url.as_str())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct KeepAliveConfig {
    pub endpoint: Url,
    pub path: String,
    pub interval: Duration,
    pub timeout: Duration,
}

impl KeepAliveConfig {
    /// Full URL pinged on every cycle: the companion endpoint joined with the path.
    pub fn target(&self) -> String {
        let base = self.endpoint.as_str().trim_end_matches('/');
        if self.path.is_empty() {
            return base.to_owned();
        }
        if self.path.starts_with('/') {
            format!("{base}{}", self.path)
        } else {
            format!("{base}/{}", self.path)
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub github: GithubConfig,
    pub keep_alive: KeepAliveConfig,
    pub bind_address: SocketAddr,
    pub allowed_origin: String,
    pub ledger_path: String,
    pub upload_dir: String,
    pub max_upload_bytes: usize,
    pub store_timeout: Duration,
    pub append_attempts: usize,
}

impl AppConfig {
    const GITHUB_TOKEN_ENV: &'static str = "GITHUB_TOKEN";
    const GITHUB_OWNER_ENV: &'static str = "GITHUB_OWNER";
    const GITHUB_REPO_ENV: &'static str = "GITHUB_REPO";
    const GITHUB_BRANCH_ENV: &'static str = "GITHUB_BRANCH";
    const GITHUB_API_URL_ENV: &'static str = "GITHUB_API_URL";
    const RENDER_ENDPOINT_ENV: &'static str = "RENDER_ENDPOINT";
    const KEEP_ALIVE_PATH_ENV: &'static str = "KEEP_ALIVE_PATH";
    const KEEP_ALIVE_INTERVAL_ENV: &'static str = "KEEP_ALIVE_INTERVAL_SECS";
    const KEEP_ALIVE_TIMEOUT_ENV: &'static str = "KEEP_ALIVE_TIMEOUT_SECS";
    const PORT_ENV: &'static str = "PORT";
    const CORS_ALLOWED_ORIGIN_ENV: &'static str = "CORS_ALLOWED_ORIGIN";
    const LEDGER_PATH_ENV: &'static str = "LEDGER_PATH";
    const UPLOAD_DIR_ENV: &'static str = "UPLOAD_DIR";
    const MAX_UPLOAD_BYTES_ENV: &'static str = "MAX_UPLOAD_BYTES";
    const STORE_TIMEOUT_ENV: &'static str = "STORE_TIMEOUT_SECS";
    const APPEND_ATTEMPTS_ENV: &'static str = "LEDGER_APPEND_ATTEMPTS";

    const REQUIRED: [&'static str; 4] = [
        Self::GITHUB_TOKEN_ENV,
        Self::GITHUB_OWNER_ENV,
        Self::GITHUB_REPO_ENV,
        Self::RENDER_ENDPOINT_ENV,
    ];

    /// Load configuration from the process environment.
    pub fn load() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    ///
    /// Every required variable is checked before anything else is parsed so a
    /// single error names all of the missing ones. Blank values count as
    /// missing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };

        let missing: Vec<&str> = Self::REQUIRED
            .iter()
            .copied()
            .filter(|&name| read(name).is_none())
            .collect();
        if !missing.is_empty() {
            bail!(
                "missing required environment variable(s): {}",
                missing.join(", ")
            );
        }

        let required = |name: &str| read(name).ok_or_else(|| anyhow!("missing {name}"));

        let api_url = match read(Self::GITHUB_API_URL_ENV) {
            Some(raw) => parse_url(Self::GITHUB_API_URL_ENV, &raw)?,
            None => parse_url(Self::GITHUB_API_URL_ENV, DEFAULT_GITHUB_API_URL)?,
        };

        let github = GithubConfig {
            token: required(Self::GITHUB_TOKEN_ENV)?,
            owner: required(Self::GITHUB_OWNER_ENV)?,
            repo: required(Self::GITHUB_REPO_ENV)?,
            branch: read(Self::GITHUB_BRANCH_ENV).unwrap_or_else(|| DEFAULT_BRANCH.to_owned()),
            api_url,
        };

        let keep_alive = KeepAliveConfig {
            endpoint: parse_url(
                Self::RENDER_ENDPOINT_ENV,
                &required(Self::RENDER_ENDPOINT_ENV)?,
            )?,
            path: read(Self::KEEP_ALIVE_PATH_ENV)
                .unwrap_or_else(|| DEFAULT_KEEP_ALIVE_PATH.to_owned()),
            interval: Duration::from_secs(positive(
                Self::KEEP_ALIVE_INTERVAL_ENV,
                parse_or(
                    Self::KEEP_ALIVE_INTERVAL_ENV,
                    read(Self::KEEP_ALIVE_INTERVAL_ENV),
                    DEFAULT_KEEP_ALIVE_INTERVAL_SECS,
                )?,
            )?),
            timeout: Duration::from_secs(positive(
                Self::KEEP_ALIVE_TIMEOUT_ENV,
                parse_or(
                    Self::KEEP_ALIVE_TIMEOUT_ENV,
                    read(Self::KEEP_ALIVE_TIMEOUT_ENV),
                    DEFAULT_KEEP_ALIVE_TIMEOUT_SECS,
                )?,
            )?),
        };

        let port: u16 = parse_or(Self::PORT_ENV, read(Self::PORT_ENV), DEFAULT_PORT)?;

        let allowed_origin = read(Self::CORS_ALLOWED_ORIGIN_ENV)
            .unwrap_or_else(|| DEFAULT_ALLOWED_ORIGIN.to_owned());
        parse_url(Self::CORS_ALLOWED_ORIGIN_ENV, &allowed_origin)?;

        let ledger_path = normalize_repo_path(
            &read(Self::LEDGER_PATH_ENV).unwrap_or_else(|| DEFAULT_LEDGER_PATH.to_owned()),
        );
        if ledger_path.is_empty() {
            bail!("{} must name a file", Self::LEDGER_PATH_ENV);
        }

        let upload_dir = normalize_repo_path(
            &read(Self::UPLOAD_DIR_ENV).unwrap_or_else(|| DEFAULT_UPLOAD_DIR.to_owned()),
        );

        let max_upload_bytes = positive(
            Self::MAX_UPLOAD_BYTES_ENV,
            parse_or(
                Self::MAX_UPLOAD_BYTES_ENV,
                read(Self::MAX_UPLOAD_BYTES_ENV),
                DEFAULT_MAX_UPLOAD_BYTES,
            )?,
        )?;

        let store_timeout = Duration::from_secs(positive(
            Self::STORE_TIMEOUT_ENV,
            parse_or(
                Self::STORE_TIMEOUT_ENV,
                read(Self::STORE_TIMEOUT_ENV),
                DEFAULT_STORE_TIMEOUT_SECS,
            )?,
        )?);

        let append_attempts = positive(
            Self::APPEND_ATTEMPTS_ENV,
            parse_or(
                Self::APPEND_ATTEMPTS_ENV,
                read(Self::APPEND_ATTEMPTS_ENV),
                DEFAULT_APPEND_ATTEMPTS,
            )?,
        )?;

        Ok(Self {
            github,
            keep_alive,
            bind_address: SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            allowed_origin,
            ledger_path,
            upload_dir,
            max_upload_bytes,
            store_timeout,
            append_attempts,
        })
    }
}

const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
const DEFAULT_BRANCH: &str = "main";
const DEFAULT_KEEP_ALIVE_PATH: &str = "/welcome";
const DEFAULT_KEEP_ALIVE_INTERVAL_SECS: u64 = 120;
const DEFAULT_KEEP_ALIVE_TIMEOUT_SECS: u64 = 5;
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_ALLOWED_ORIGIN: &str = "https://coodecrafters.github.io";
const DEFAULT_LEDGER_PATH: &str = "evaluations/evaluators.json";
const DEFAULT_UPLOAD_DIR: &str = "uploads";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;
const DEFAULT_STORE_TIMEOUT_SECS: u64 = 15;
const DEFAULT_APPEND_ATTEMPTS: usize = 3;

fn parse_url(name: &str, raw: &str) -> Result<Url> {
    Url::parse(raw).with_context(|| format!("invalid {name}: {raw}"))
}

fn parse_or<T>(name: &str, raw: Option<String>, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        Some(value) => value
            .parse::<T>()
            .with_context(|| format!("invalid {name}: {value}")),
        None => Ok(default),
    }
}

fn positive<T>(name: &str, value: T) -> Result<T>
where
    T: PartialOrd + Default + fmt::Display,
{
    if value <= T::default() {
        bail!("{name} must be greater than zero (got {value})");
    }
    Ok(value)
}

fn normalize_repo_path(raw: &str) -> String {
    raw.split('/')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}
