use crate::{RegistryConfig, RegistryError, VersionIndex};
use serde::Deserialize;
use std::io::Read;
use std::time::Duration;

/// NuGet flat-container client.
///
/// Version listings live at `GET {url}/{lowercase-id}/index.json` and have
/// the shape `{"versions": ["1.0.0", ...]}`. A 404 means the package is not
/// published, which reads as an empty listing.
pub struct HttpRegistry {
    config: RegistryConfig,
    token: Option<String>,
    agent: ureq::Agent,
}

#[derive(Debug, Deserialize)]
struct VersionListing {
    #[serde(default)]
    versions: Vec<String>,
}

impl HttpRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_secs)))
            .build()
            .into();
        let token = config.token();
        Self {
            config,
            token,
            agent,
        }
    }

    fn index_url(&self, lookup_key: &str) -> String {
        format!("{}/{lookup_key}/index.json", self.config.url)
    }

    fn do_get(&self, url: &str) -> Result<Option<Vec<u8>>, RegistryError> {
        let mut req = self.agent.get(url).header("Accept", "application/json");
        if let Some(ref token) = self.token {
            req = req.header("Authorization", &format!("Bearer {token}"));
        }
        let resp = match req.call() {
            Ok(r) => r,
            Err(ureq::Error::StatusCode(404)) => return Ok(None),
            Err(ureq::Error::StatusCode(code)) => {
                return Err(RegistryError::Http(format!("HTTP {code} for {url}")));
            }
            Err(e) => return Err(RegistryError::Http(e.to_string())),
        };

        let mut reader = resp.into_body().into_reader();
        let mut body = Vec::new();
        reader.read_to_end(&mut body)?;
        Ok(Some(body))
    }
}

impl VersionIndex for HttpRegistry {
    fn versions(&self, lookup_key: &str) -> Result<Vec<String>, RegistryError> {
        let url = self.index_url(lookup_key);
        tracing::debug!("GET {url}");
        let Some(body) = self.do_get(&url)? else {
            tracing::debug!("{lookup_key} is not published at {}", self.config.url);
            return Ok(Vec::new());
        };
        let listing: VersionListing = serde_json::from_slice(&body)
            .map_err(|e| RegistryError::Serialization(format!("{url}: {e}")))?;
        Ok(listing.versions)
    }
}
