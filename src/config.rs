//! Client configuration loaded from the environment.
//!
//! `METERBILL_API_URL`      base URL of the billing API (default http://localhost:8000)
//! `METERBILL_SESSION_DIR`  directory holding the persisted session (default .meterbill)
//! `METERBILL_TIMEOUT_SECS` per-request timeout in seconds (default 30)

use std::path::PathBuf;
use std::time::Duration;

use reqwest::Url;

use crate::error::{AppError, AppResult};

pub const DEFAULT_API_URL: &str = "http://localhost:8000";
pub const DEFAULT_SESSION_DIR: &str = ".meterbill";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_base: Url,
    pub session_dir: PathBuf,
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(api_base: &str, session_dir: impl Into<PathBuf>) -> AppResult<Self> {
        Ok(Self {
            api_base: parse_base(api_base)?,
            session_dir: session_dir.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        })
    }

    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from an arbitrary key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api = lookup("METERBILL_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let dir = lookup("METERBILL_SESSION_DIR").unwrap_or_else(|| DEFAULT_SESSION_DIR.to_string());
        let timeout_secs = match lookup("METERBILL_TIMEOUT_SECS") {
            Some(raw) => raw.trim().parse::<u64>().ok().filter(|n| *n > 0).ok_or_else(|| {
                AppError::validation("invalid_config".to_string(), format!("METERBILL_TIMEOUT_SECS must be a positive integer, got '{}'", raw))
            })?,
            None => DEFAULT_TIMEOUT_SECS,
        };
        Ok(Self {
            api_base: parse_base(&api)?,
            session_dir: PathBuf::from(dir),
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    pub fn with_api_base(mut self, api_base: &str) -> AppResult<Self> {
        self.api_base = parse_base(api_base)?;
        Ok(self)
    }

    pub fn with_session_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.session_dir = dir.into();
        self
    }
}

// The base always ends in '/' so request paths are joined beneath it.
fn parse_base(raw: &str) -> AppResult<Url> {
    let mut url = Url::parse(raw.trim())
        .map_err(|e| AppError::validation("invalid_config".to_string(), format!("invalid API URL '{}': {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(AppError::validation("invalid_config".to_string(), format!("unsupported API URL scheme '{}'", other))),
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}
