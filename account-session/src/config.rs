//! Client configuration.
//!
//! Configuration is an explicit value handed to the facade at construction.
//! It can be loaded from `ACCOUNT_*` environment variables (with `.env`
//! support) or assembled with [`ClientConfiguration::builder`].

use crate::error::SessionError;
use crate::storage::check_namespace;
use account_common::{HttpConfig, RetryConfig};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;
use zeroize::Zeroizing;

/// Default storage service namespace.
pub const DEFAULT_SERVICE: &str = "account-session";
/// Default access token expiry safety margin.
pub const DEFAULT_EXPIRY_MARGIN: Duration = Duration::from_secs(60);
/// Default access token lifetime when the provider does not state one.
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(300);
/// Default key set cache lifetime.
pub const DEFAULT_JWKS_TTL: Duration = Duration::from_secs(3600);

/// Configuration of one OAuth2/OIDC client.
#[derive(Clone)]
pub struct ClientConfiguration {
    /// Issuer URL, compared verbatim with the `iss` claim
    pub issuer: String,
    /// OAuth2 client id, also the expected `aud`
    pub client_id: String,
    /// Client secret for `client_secret_post`, if the client is confidential
    pub client_secret: Option<Zeroizing<String>>,
    /// Redirect URI registered for the client
    pub redirect_uri: Option<String>,
    /// Token endpoint
    pub token_endpoint: String,
    /// JWKS endpoint
    pub jwks_endpoint: String,
    /// Userinfo endpoint
    pub userinfo_endpoint: String,
    /// Storage service namespace
    pub service: String,
    /// Root directory of the encrypted store
    pub storage_dir: PathBuf,
    /// Shared access group used for session hand-off
    pub shared_access_group: Option<String>,
    /// AES-256 key for data at rest
    pub encryption_key: Zeroizing<[u8; 32]>,
    /// Access tokens closer than this to expiry are refreshed
    pub expiry_margin: Duration,
    /// Lifetime assumed for a refreshed access token that comes without
    /// `expires_in` or a new identity token
    pub default_token_lifetime: Duration,
    /// Key set cache lifetime
    pub jwks_ttl: Duration,
    /// Retry strategy for token endpoint and key set calls
    pub retry: RetryConfig,
    /// HTTP client settings for the default transport
    pub http: HttpConfig,
}

impl ClientConfiguration {
    /// Start a builder. Endpoints default to paths under the issuer.
    #[must_use]
    pub fn builder(
        issuer: impl Into<String>,
        client_id: impl Into<String>,
    ) -> ClientConfigurationBuilder {
        ClientConfigurationBuilder::new(issuer.into(), client_id.into())
    }

    /// Load configuration from environment variables.
    ///
    /// `ACCOUNT_ISSUER`, `ACCOUNT_CLIENT_ID` and `ACCOUNT_ENCRYPTION_KEY`
    /// (base64, 32 bytes) are required.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if a variable is missing or invalid.
    pub fn from_env() -> Result<Self, SessionError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if a variable is missing or invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SessionError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name).ok_or_else(|| SessionError::Configuration(format!("{name} is required")))
        };

        let mut builder = Self::builder(required("ACCOUNT_ISSUER")?, required("ACCOUNT_CLIENT_ID")?)
            .with_encryption_key(parse_encryption_key(&required("ACCOUNT_ENCRYPTION_KEY")?)?)
            .with_expiry_margin(Duration::from_secs(parse_var(
                &lookup,
                "ACCOUNT_EXPIRY_MARGIN_SECS",
                DEFAULT_EXPIRY_MARGIN.as_secs(),
            )?))
            .with_default_token_lifetime(Duration::from_secs(parse_var(
                &lookup,
                "ACCOUNT_DEFAULT_TOKEN_LIFETIME_SECS",
                DEFAULT_TOKEN_LIFETIME.as_secs(),
            )?))
            .with_jwks_ttl(Duration::from_secs(parse_var(
                &lookup,
                "ACCOUNT_JWKS_TTL_SECS",
                DEFAULT_JWKS_TTL.as_secs(),
            )?))
            .with_retry(RetryConfig::default().with_max_retries(parse_var(
                &lookup,
                "ACCOUNT_MAX_RETRIES",
                3,
            )?))
            .with_http(HttpConfig::default().with_timeout(Duration::from_secs(parse_var(
                &lookup,
                "ACCOUNT_HTTP_TIMEOUT_SECS",
                30,
            )?)));

        if let Some(secret) = lookup("ACCOUNT_CLIENT_SECRET") {
            builder = builder.with_client_secret(secret);
        }
        if let Some(uri) = lookup("ACCOUNT_REDIRECT_URI") {
            builder = builder.with_redirect_uri(uri);
        }
        if let Some(url) = lookup("ACCOUNT_TOKEN_ENDPOINT") {
            builder = builder.with_token_endpoint(url);
        }
        if let Some(url) = lookup("ACCOUNT_JWKS_ENDPOINT") {
            builder = builder.with_jwks_endpoint(url);
        }
        if let Some(url) = lookup("ACCOUNT_USERINFO_ENDPOINT") {
            builder = builder.with_userinfo_endpoint(url);
        }
        if let Some(service) = lookup("ACCOUNT_SERVICE") {
            builder = builder.with_service(service);
        }
        if let Some(dir) = lookup("ACCOUNT_STORAGE_DIR") {
            builder = builder.with_storage_dir(dir);
        }
        if let Some(group) = lookup("ACCOUNT_SHARED_ACCESS_GROUP") {
            builder = builder.with_shared_access_group(group);
        }

        builder.build()
    }

    /// Storage key of sessions created by this configuration.
    #[must_use]
    pub fn account_key(&self) -> String {
        format!("{}@{}", self.client_id, self.issuer)
    }

    /// Check the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for an empty client id, a service or access
    /// group that is not a plain name, unparsable URLs, or a non-https
    /// issuer other than localhost.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.client_id.trim().is_empty() {
            return Err(SessionError::Configuration("client id is empty".to_string()));
        }
        check_namespace("service namespace", &self.service)?;

        let issuer = parse_url("issuer", &self.issuer)?;
        let is_local = matches!(issuer.host_str(), Some("localhost" | "127.0.0.1" | "[::1]"));
        if issuer.scheme() != "https" && !is_local {
            return Err(SessionError::Configuration(format!(
                "issuer must use https: {}",
                self.issuer
            )));
        }

        parse_url("token endpoint", &self.token_endpoint)?;
        parse_url("jwks endpoint", &self.jwks_endpoint)?;
        parse_url("userinfo endpoint", &self.userinfo_endpoint)?;

        if let Some(group) = &self.shared_access_group {
            check_namespace("shared access group", group)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ClientConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfiguration")
            .field("issuer", &self.issuer)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[REDACTED]"))
            .field("token_endpoint", &self.token_endpoint)
            .field("jwks_endpoint", &self.jwks_endpoint)
            .field("userinfo_endpoint", &self.userinfo_endpoint)
            .field("service", &self.service)
            .field("storage_dir", &self.storage_dir)
            .field("shared_access_group", &self.shared_access_group)
            .field("expiry_margin", &self.expiry_margin)
            .field("default_token_lifetime", &self.default_token_lifetime)
            .field("jwks_ttl", &self.jwks_ttl)
            .finish_non_exhaustive()
    }
}

/// Fluent builder for [`ClientConfiguration`].
#[must_use]
pub struct ClientConfigurationBuilder {
    issuer: String,
    client_id: String,
    client_secret: Option<String>,
    redirect_uri: Option<String>,
    token_endpoint: Option<String>,
    jwks_endpoint: Option<String>,
    userinfo_endpoint: Option<String>,
    service: String,
    storage_dir: PathBuf,
    shared_access_group: Option<String>,
    encryption_key: Option<Zeroizing<[u8; 32]>>,
    expiry_margin: Duration,
    default_token_lifetime: Duration,
    jwks_ttl: Duration,
    retry: RetryConfig,
    http: HttpConfig,
}

impl ClientConfigurationBuilder {
    fn new(issuer: String, client_id: String) -> Self {
        Self {
            issuer,
            client_id,
            client_secret: None,
            redirect_uri: None,
            token_endpoint: None,
            jwks_endpoint: None,
            userinfo_endpoint: None,
            service: DEFAULT_SERVICE.to_string(),
            storage_dir: PathBuf::from(".account-session"),
            shared_access_group: None,
            encryption_key: None,
            expiry_margin: DEFAULT_EXPIRY_MARGIN,
            default_token_lifetime: DEFAULT_TOKEN_LIFETIME,
            jwks_ttl: DEFAULT_JWKS_TTL,
            retry: RetryConfig::default(),
            http: HttpConfig::default(),
        }
    }

    /// Client secret for `client_secret_post`.
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    /// Registered redirect URI.
    pub fn with_redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(uri.into());
        self
    }

    /// Override the token endpoint.
    pub fn with_token_endpoint(mut self, url: impl Into<String>) -> Self {
        self.token_endpoint = Some(url.into());
        self
    }

    /// Override the JWKS endpoint.
    pub fn with_jwks_endpoint(mut self, url: impl Into<String>) -> Self {
        self.jwks_endpoint = Some(url.into());
        self
    }

    /// Override the userinfo endpoint.
    pub fn with_userinfo_endpoint(mut self, url: impl Into<String>) -> Self {
        self.userinfo_endpoint = Some(url.into());
        self
    }

    /// Storage service namespace.
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    /// Root directory of the encrypted store.
    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = dir.into();
        self
    }

    /// Shared access group for session hand-off.
    pub fn with_shared_access_group(mut self, group: impl Into<String>) -> Self {
        self.shared_access_group = Some(group.into());
        self
    }

    /// AES-256 key for data at rest.
    pub fn with_encryption_key(mut self, key: [u8; 32]) -> Self {
        self.encryption_key = Some(Zeroizing::new(key));
        self
    }

    /// Access token expiry safety margin.
    pub const fn with_expiry_margin(mut self, margin: Duration) -> Self {
        self.expiry_margin = margin;
        self
    }

    /// Lifetime assumed for refreshed access tokens without a stated expiry.
    pub const fn with_default_token_lifetime(mut self, lifetime: Duration) -> Self {
        self.default_token_lifetime = lifetime;
        self
    }

    /// Key set cache lifetime.
    pub const fn with_jwks_ttl(mut self, ttl: Duration) -> Self {
        self.jwks_ttl = ttl;
        self
    }

    /// Retry strategy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// HTTP client settings.
    pub fn with_http(mut self, http: HttpConfig) -> Self {
        self.http = http;
        self
    }

    /// Build and validate.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if no encryption key was set or validation fails.
    pub fn build(self) -> Result<ClientConfiguration, SessionError> {
        let encryption_key = self
            .encryption_key
            .ok_or_else(|| SessionError::Configuration("encryption key is required".to_string()))?;

        let base = self.issuer.trim_end_matches('/').to_string();
        let config = ClientConfiguration {
            token_endpoint: self
                .token_endpoint
                .unwrap_or_else(|| format!("{base}/oauth/token")),
            jwks_endpoint: self
                .jwks_endpoint
                .unwrap_or_else(|| format!("{base}/.well-known/jwks.json")),
            userinfo_endpoint: self
                .userinfo_endpoint
                .unwrap_or_else(|| format!("{base}/oauth/userinfo")),
            issuer: self.issuer,
            client_id: self.client_id,
            client_secret: self.client_secret.map(Zeroizing::new),
            redirect_uri: self.redirect_uri,
            service: self.service,
            storage_dir: self.storage_dir,
            shared_access_group: self.shared_access_group,
            encryption_key,
            expiry_margin: self.expiry_margin,
            default_token_lifetime: self.default_token_lifetime,
            jwks_ttl: self.jwks_ttl,
            retry: self.retry,
            http: self.http,
        };

        config.validate()?;
        Ok(config)
    }
}

fn parse_url(what: &str, value: &str) -> Result<Url, SessionError> {
    Url::parse(value).map_err(|e| SessionError::Configuration(format!("invalid {what} {value}: {e}")))
}

/// Parse an optional variable with a default value.
fn parse_var<F, T>(lookup: &F, name: &str, default: T) -> Result<T, SessionError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match lookup(name) {
        Some(val) => val
            .parse()
            .map_err(|e| SessionError::Configuration(format!("Invalid {name}: {e}"))),
        None => Ok(default),
    }
}

fn parse_encryption_key(encoded: &str) -> Result<[u8; 32], SessionError> {
    let bytes = Zeroizing::new(
        STANDARD
            .decode(encoded.trim())
            .map_err(|e| SessionError::Configuration(format!("Invalid ACCOUNT_ENCRYPTION_KEY: {e}")))?,
    );

    <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| {
        SessionError::Configuration(format!(
            "ACCOUNT_ENCRYPTION_KEY must be 32 bytes, got {}",
            bytes.len()
        ))
    })
}
