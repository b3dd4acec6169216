//! Scan configuration, resolved once at startup and passed into the client.

use std::fmt;
use std::time::Duration;

use crate::pipeline::preprocess::NormalizeOptions;
use crate::pipeline::types::RecordKind;
use crate::pipeline::ScanError;

/// Application-level constants
pub const APP_NAME: &str = "precast-scan";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_TEMPERATURE: f32 = 0.1;
pub const SCHEDULE_MAX_TOKENS: u32 = 4096;
pub const PRODUCT_TAG_MAX_TOKENS: u32 = 1000;

// Environment variables read by `ScanConfig::from_env`
pub const ENV_PROXY_URL: &str = "PRECAST_SCAN_PROXY_URL";
pub const ENV_ENDPOINT: &str = "PRECAST_SCAN_ENDPOINT";
pub const ENV_API_KEY: &str = "PRECAST_SCAN_API_KEY";
pub const ENV_MODEL: &str = "PRECAST_SCAN_MODEL";
pub const ENV_TIMEOUT_SECS: &str = "PRECAST_SCAN_TIMEOUT_SECS";
pub const ENV_RECOMPRESS: &str = "PRECAST_SCAN_RECOMPRESS";

/// Default tracing filter when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "info,precast_scan=debug"
}

/// How requests to the extraction endpoint are authenticated.
#[derive(Clone, PartialEq, Eq)]
pub enum EndpointAuth {
    /// Direct call with a bearer token.
    Bearer(String),
    /// Trusted server-side proxy; no auth header.
    Proxy,
}

impl fmt::Debug for EndpointAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointAuth::Bearer(_) => f.write_str("Bearer(<redacted>)"),
            EndpointAuth::Proxy => f.write_str("Proxy"),
        }
    }
}

/// Everything the scanner needs to reach the vision model.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub endpoint: String,
    pub auth: EndpointAuth,
    pub model: String,
    /// Aborts the extraction call; 30s for schedule and tag scans.
    pub request_timeout: Duration,
    pub temperature: f32,
    pub schedule_max_tokens: u32,
    pub product_tag_max_tokens: u32,
    pub normalize: NormalizeOptions,
}

impl ScanConfig {
    pub fn new(endpoint: impl Into<String>, auth: EndpointAuth) -> Self {
        Self {
            endpoint: endpoint.into(),
            auth,
            model: DEFAULT_MODEL.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            temperature: DEFAULT_TEMPERATURE,
            schedule_max_tokens: SCHEDULE_MAX_TOKENS,
            product_tag_max_tokens: PRODUCT_TAG_MAX_TOKENS,
            normalize: NormalizeOptions::default(),
        }
    }

    /// Route through a trusted proxy (no credentials on the device).
    pub fn proxy(url: impl Into<String>) -> Self {
        Self::new(url, EndpointAuth::Proxy)
    }

    /// Call the provider directly with a bearer token.
    pub fn direct(api_key: impl Into<String>) -> Self {
        Self::new(DEFAULT_ENDPOINT, EndpointAuth::Bearer(api_key.into()))
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_normalize(mut self, normalize: NormalizeOptions) -> Self {
        self.normalize = normalize;
        self
    }

    pub fn max_tokens_for(&self, kind: RecordKind) -> u32 {
        match kind {
            RecordKind::Schedule => self.schedule_max_tokens,
            RecordKind::ProductTag => self.product_tag_max_tokens,
        }
    }

    /// Resolve from the process environment (and `.env`, if present).
    pub fn from_env() -> Result<Self, ScanError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ScanError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut config = if let Some(proxy) = get(ENV_PROXY_URL) {
            Self::proxy(proxy)
        } else {
            let key = get(ENV_API_KEY).ok_or_else(|| {
                ScanError::Config(format!("{ENV_API_KEY} or {ENV_PROXY_URL} must be set"))
            })?;
            let endpoint = get(ENV_ENDPOINT).unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
            Self::new(endpoint, EndpointAuth::Bearer(key))
        };

        if let Some(model) = get(ENV_MODEL) {
            config.model = model;
        }

        if let Some(secs) = get(ENV_TIMEOUT_SECS) {
            let secs: u64 = secs.parse().map_err(|_| {
                ScanError::Config(format!("{ENV_TIMEOUT_SECS} must be a whole number of seconds"))
            })?;
            if secs == 0 {
                return Err(ScanError::Config(format!(
                    "{ENV_TIMEOUT_SECS} must be greater than zero"
                )));
            }
            config.request_timeout = Duration::from_secs(secs);
        }

        if let Some(flag) = get(ENV_RECOMPRESS) {
            config.normalize.recompress = !matches!(
                flag.to_ascii_lowercase().as_str(),
                "0" | "false" | "no" | "off"
            );
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the endpoint is an http(s) URL with a host.
    pub fn validate(&self) -> Result<(), ScanError> {
        let after_scheme = self
            .endpoint
            .strip_prefix("http://")
            .or_else(|| self.endpoint.strip_prefix("https://"))
            .ok_or_else(|| {
                ScanError::Config(format!(
                    "Endpoint must start with http:// or https://: {}",
                    self.endpoint
                ))
            })?;

        let host = after_scheme
            .split(['/', '?', '#'])
            .next()
            .unwrap_or("");
        if host.is_empty() {
            return Err(ScanError::Config(format!(
                "Endpoint has no host: {}",
                self.endpoint
            )));
        }

        if self.model.trim().is_empty() {
            return Err(ScanError::Config("Model name is empty".into()));
        }
        Ok(())
    }
}
