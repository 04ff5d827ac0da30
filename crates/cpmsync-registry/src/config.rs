use serde::{Deserialize, Serialize};

/// NuGet v3 flat-container endpoint.
pub const DEFAULT_REGISTRY_URL: &str = "https://api.nuget.org/v3-flatcontainer";
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;
/// Environment variable consulted for a bearer token when none is configured.
pub const TOKEN_ENV_VAR: &str = "CPMSYNC_REGISTRY_TOKEN";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryConfig {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub auth_token: Option<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self::new(DEFAULT_REGISTRY_URL)
    }
}

impl RegistryConfig {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.trim_end_matches('/').to_owned(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            auth_token: None,
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: &str) -> Self {
        self.auth_token = Some(token.to_owned());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Configured token, falling back to `CPMSYNC_REGISTRY_TOKEN`.
    pub fn token(&self) -> Option<String> {
        self.auth_token
            .clone()
            .or_else(|| std::env::var(TOKEN_ENV_VAR).ok().filter(|t| !t.is_empty()))
    }
}

fn default_url() -> String {
    DEFAULT_REGISTRY_URL.to_owned()
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}
