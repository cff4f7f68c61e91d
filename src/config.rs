//! Session configuration parsed from environment variables.

use std::path::PathBuf;

pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8000/api/auth";
pub const DEFAULT_LOGIN_ROUTE: &str = "/auth/login";
pub const DEFAULT_STORE_PATH: &str = ".sessiongate.json";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self { request_secs: DEFAULT_REQUEST_TIMEOUT_SECS, connect_secs: DEFAULT_CONNECT_TIMEOUT_SECS }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Root of the auth API, without trailing slash.
    pub api_base_url: String,
    /// Route the UI shows for signing in; target of invalidation redirects.
    pub login_route: String,
    /// File used by native callers to persist the snapshot.
    pub store_path: PathBuf,
    pub timeouts: Timeouts,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_owned(),
            login_route: DEFAULT_LOGIN_ROUTE.to_owned(),
            store_path: PathBuf::from(DEFAULT_STORE_PATH),
            timeouts: Timeouts::default(),
        }
    }
}

impl SessionConfig {
    /// Build config from environment variables, falling back to defaults.
    ///
    /// - `SESSION_API_BASE_URL`: default `http://127.0.0.1:8000/api/auth`
    /// - `SESSION_LOGIN_ROUTE`: default `/auth/login`
    /// - `SESSION_STORE_PATH`: default `.sessiongate.json`
    /// - `SESSION_REQUEST_TIMEOUT_SECS`: default 30
    /// - `SESSION_CONNECT_TIMEOUT_SECS`: default 10
    #[must_use]
    pub fn from_env() -> Self {
        let api_base_url = std::env::var("SESSION_API_BASE_URL").unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_owned());
        let login_route = std::env::var("SESSION_LOGIN_ROUTE").unwrap_or_else(|_| DEFAULT_LOGIN_ROUTE.to_owned());
        let store_path = std::env::var("SESSION_STORE_PATH").unwrap_or_else(|_| DEFAULT_STORE_PATH.to_owned());
        let timeouts = Timeouts {
            request_secs: env_parse_u64("SESSION_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_secs: env_parse_u64("SESSION_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS),
        };
        Self { api_base_url: normalize_base_url(&api_base_url), login_route, store_path: store_path.into(), timeouts }
    }

    /// Replace the API base URL, normalizing trailing slashes.
    #[must_use]
    pub fn with_api_base_url(mut self, url: &str) -> Self {
        self.api_base_url = normalize_base_url(url);
        self
    }
}

fn normalize_base_url(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_owned()
}

fn env_parse_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .map_or(default, |v| v.trim().parse::<u64>().unwrap_or(default))
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
