use std::fmt;
use std::time::Duration;

use crate::error::{Result, StudioError};

/// How long success/error notices stay visible before they dismiss themselves.
pub const NOTICE_TTL: Duration = Duration::from_secs(5);

/// Identity parameters shared by every section. They cannot be removed.
pub const IDENTITY_PARAMS: [&str; 2] = ["employee_id", "month"];

/// Employee id used by the sample record and as a fallback for imported data.
pub const SAMPLE_EMPLOYEE_ID: &str = "TEST_001";

/// Month used by the sample record and as a fallback for imported data.
pub const SAMPLE_MONTH: &str = "2024-07";

/// Upper bound on attempts per idempotent request.
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// Connection settings for the rules backend.
///
/// `Debug` is implemented by hand so the token never ends up in logs.
#[derive(Clone)]
pub struct BackendConfig {
    pub api_base_url: String,
    pub api_token: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("api_base_url", &self.api_base_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "<redacted>"))
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl BackendConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let api_base_url = std::env::var("WAGEWATCH_API_BASE_URL")
            .map_err(|_| StudioError::Config("WAGEWATCH_API_BASE_URL not set".into()))?;

        let api_token = std::env::var("WAGEWATCH_API_TOKEN")
            .ok()
            .filter(|v| !v.trim().is_empty());

        let timeout_secs = std::env::var("WAGEWATCH_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        let max_retries = std::env::var("WAGEWATCH_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3);

        Ok(Self {
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            api_token,
            timeout_secs,
            max_retries: max_retries.clamp(1, MAX_RETRIES_LIMIT),
        })
    }

    /// Create a config builder for testing.
    pub fn builder(api_base_url: impl Into<String>) -> BackendConfigBuilder {
        BackendConfigBuilder {
            api_base_url: api_base_url.into(),
            api_token: None,
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

/// Builder for constructing `BackendConfig` in tests.
pub struct BackendConfigBuilder {
    api_base_url: String,
    api_token: Option<String>,
    timeout_secs: u64,
    max_retries: u32,
}

impl BackendConfigBuilder {
    pub fn api_token(mut self, api_token: impl Into<String>) -> Self {
        self.api_token = Some(api_token.into());
        self
    }

    pub fn timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn build(self) -> BackendConfig {
        BackendConfig {
            api_base_url: self.api_base_url.trim_end_matches('/').to_string(),
            api_token: self.api_token,
            timeout_secs: self.timeout_secs,
            max_retries: self.max_retries.clamp(1, MAX_RETRIES_LIMIT),
        }
    }
}
