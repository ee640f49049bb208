use std::time::Duration;

use url::Url;

use crate::error::Error;

/// Where the hosted identity service and its REST table API live.
///
/// Required fields are constructor parameters; everything else has a default.
///
/// ```rust,ignore
/// use harmony_auth::GatewayConfig;
///
/// let config = GatewayConfig::new("https://project.example.co".parse()?, "public-anon-key")
///     .with_refresh_margin(std::time::Duration::from_secs(120));
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct GatewayConfig {
    pub(crate) base_url: Url,
    pub(crate) api_key: String,
    pub(crate) auth_path: String,
    pub(crate) rest_path: String,
    pub(crate) refresh_margin: Duration,
}

impl GatewayConfig {
    /// `base_url` is the project origin; a trailing slash is added if missing
    /// so relative endpoint paths join underneath it.
    #[must_use]
    pub fn new(mut base_url: Url, api_key: impl Into<String>) -> Self {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self {
            base_url,
            api_key: api_key.into(),
            auth_path: "auth/v1/".into(),
            rest_path: "rest/v1/".into(),
            refresh_margin: Duration::from_secs(60),
        }
    }

    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `AUTH_API_URL`: project origin
    /// - `AUTH_API_KEY`: public API key sent with every request
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a variable is missing or the URL is invalid.
    pub fn from_env() -> Result<Self, Error> {
        let raw = std::env::var("AUTH_API_URL")
            .map_err(|_| Error::Config("AUTH_API_URL is not set".into()))?;
        let base_url: Url = raw
            .parse()
            .map_err(|e| Error::Config(format!("AUTH_API_URL: {e}")))?;
        let api_key = std::env::var("AUTH_API_KEY")
            .map_err(|_| Error::Config("AUTH_API_KEY is not set".into()))?;
        Ok(Self::new(base_url, api_key))
    }

    /// Override the identity endpoints prefix (default: `auth/v1`).
    #[must_use]
    pub fn with_auth_path(mut self, path: impl Into<String>) -> Self {
        self.auth_path = directory(path.into());
        self
    }

    /// Override the table API prefix (default: `rest/v1`).
    #[must_use]
    pub fn with_rest_path(mut self, path: impl Into<String>) -> Self {
        self.rest_path = directory(path.into());
        self
    }

    /// Refresh the held session when it expires within this margin
    /// (default: 60 s).
    #[must_use]
    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    #[must_use]
    pub fn refresh_margin(&self) -> Duration {
        self.refresh_margin
    }

    /// Identity endpoint, e.g. `auth_url("token")`.
    pub(crate) fn auth_url(&self, endpoint: &str) -> Result<Url, Error> {
        self.join(&self.auth_path, endpoint)
    }

    /// Table endpoint, e.g. `rest_url("profiles")`.
    pub(crate) fn rest_url(&self, table: &str) -> Result<Url, Error> {
        self.join(&self.rest_path, table)
    }

    fn join(&self, prefix: &str, endpoint: &str) -> Result<Url, Error> {
        self.base_url
            .join(prefix)
            .and_then(|base| base.join(endpoint))
            .map_err(|e| Error::Config(format!("invalid endpoint {prefix}{endpoint}: {e}")))
    }
}

fn directory(path: String) -> String {
    let trimmed = path.trim_matches('/');
    format!("{trimmed}/")
}
