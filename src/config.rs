use std::time::Duration;

use url::Url;

use crate::error::Error;
use crate::routing::RoutePaths;

/// Client-side auth configuration.
///
/// Everything has a default, so [`AuthConfig::default`] is a working setup
/// for a client without absolute redirect URLs.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct AuthConfig {
    pub(crate) routes: RoutePaths,
    pub(crate) session_key: String,
    pub(crate) completeness_prefix: String,
    pub(crate) request_timeout: Duration,
    pub(crate) site_url: Option<Url>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            routes: RoutePaths::default(),
            session_key: "harmony.auth.session".into(),
            completeness_prefix: "harmony.auth.completeness.".into(),
            request_timeout: Duration::from_secs(30),
            site_url: None,
        }
    }
}

impl AuthConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create config from environment variables.
    ///
    /// # Optional env vars
    /// - `AUTH_SITE_URL`: public origin of the app, used for e-mail and
    ///   social sign-in redirect targets
    /// - `AUTH_REQUEST_TIMEOUT_SECS`: upper bound for every remote call
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a variable is set but unparsable.
    pub fn from_env() -> Result<Self, Error> {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("AUTH_SITE_URL") {
            let url: Url = raw
                .parse()
                .map_err(|e| Error::Config(format!("AUTH_SITE_URL: {e}")))?;
            config = config.with_site_url(url);
        }
        if let Ok(raw) = std::env::var("AUTH_REQUEST_TIMEOUT_SECS") {
            let secs: u64 = raw
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("AUTH_REQUEST_TIMEOUT_SECS: {e}")))?;
            if secs == 0 {
                return Err(Error::Config(
                    "AUTH_REQUEST_TIMEOUT_SECS must be greater than zero".into(),
                ));
            }
            config = config.with_request_timeout(Duration::from_secs(secs));
        }

        Ok(config)
    }

    #[must_use]
    pub fn with_routes(mut self, routes: RoutePaths) -> Self {
        self.routes = routes;
        self
    }

    #[must_use]
    pub fn with_session_key(mut self, key: impl Into<String>) -> Self {
        self.session_key = key.into();
        self
    }

    #[must_use]
    pub fn with_completeness_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.completeness_prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_site_url(mut self, url: Url) -> Self {
        self.site_url = Some(url);
        self
    }

    #[must_use]
    pub fn routes(&self) -> &RoutePaths {
        &self.routes
    }

    /// Storage key of the persisted session record.
    #[must_use]
    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    #[must_use]
    pub fn site_url(&self) -> Option<&Url> {
        self.site_url.as_ref()
    }

    /// Absolute URL for an in-app path, when a site URL is configured.
    #[must_use]
    pub fn absolute(&self, path: &str) -> Option<Url> {
        let base = self.site_url.as_ref()?;
        match base.join(path) {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::warn!(path, error = %e, "Cannot build redirect URL");
                None
            }
        }
    }
}
