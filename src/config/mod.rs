//! Configuration management for authgrant
//!
//! Loads and manages configuration from authgrant.config.json (or YAML)

use crate::constants::*;
use crate::model::Client;
use crate::{AuthGrantError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Complete authgrant configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Storage configuration (required)
    pub storage: StorageConfig,

    /// Authorization server configuration
    #[serde(default)]
    pub oauth: OAuthConfig,

    /// Expired grant sweeping
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sweep: Option<SweepConfig>,

    /// Logging configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<LogConfig>,

    /// Clients seeded at startup when absent
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clients: Vec<StaticClientConfig>,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage driver (memory, sqlite)
    pub driver: String,

    /// Data source name (connection string)
    pub dsn: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            driver: "sqlite".to_string(),
            dsn: default_sqlite_path(),
        }
    }
}

/// Which implementation mints access tokens.
///
/// Grant rows written in one mode are not readable in another; switching
/// modes requires clearing the access token table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessTokenMode {
    /// Random value plus HMAC tag
    #[default]
    Opaque,
    /// Token issued by the host's identity system
    Identity,
    /// RS256-signed JWT
    Jwt,
}

impl AccessTokenMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessTokenMode::Opaque => "opaque",
            AccessTokenMode::Identity => "identity",
            AccessTokenMode::Jwt => "jwt",
        }
    }
}

/// Authorization server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthConfig {
    /// Public base URL, used as `iss`
    #[serde(default = "default_issuer")]
    pub issuer: String,

    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,

    /// Identity namespace end users must belong to
    #[serde(default = "default_user_collection")]
    pub user_collection: String,

    #[serde(default)]
    pub access_token_strategy: AccessTokenMode,

    #[serde(default = "default_access_token_lifespan")]
    pub access_token_lifespan_secs: i64,

    #[serde(default = "default_refresh_token_lifespan")]
    pub refresh_token_lifespan_secs: i64,

    #[serde(default = "default_authorize_code_lifespan")]
    pub authorize_code_lifespan_secs: i64,

    #[serde(default = "default_id_token_lifespan")]
    pub id_token_lifespan_secs: i64,

    /// Scope given to registered clients that request none
    #[serde(default = "default_scope")]
    pub default_scope: String,

    /// Require PKCE on every authorization code request
    #[serde(default)]
    pub enforce_pkce: bool,

    #[serde(default)]
    pub enable_dynamic_client_registration: bool,

    #[serde(default)]
    pub enable_protected_resource_metadata: bool,

    /// bcrypt cost for client secrets
    #[serde(default = "default_secret_hash_cost")]
    pub secret_hash_cost: u32,

    #[serde(default = "default_access_token_prefix")]
    pub access_token_prefix: String,

    #[serde(default = "default_refresh_token_prefix")]
    pub refresh_token_prefix: String,

    #[serde(default = "default_authorize_code_prefix")]
    pub authorize_code_prefix: String,
}

impl OAuthConfig {
    pub fn access_token_lifespan(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.access_token_lifespan_secs)
    }

    pub fn refresh_token_lifespan(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.refresh_token_lifespan_secs)
    }

    pub fn authorize_code_lifespan(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.authorize_code_lifespan_secs)
    }

    pub fn id_token_lifespan(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.id_token_lifespan_secs)
    }

    /// Absolute URL of an endpoint under the path prefix
    pub fn endpoint_url(&self, path: &str) -> String {
        format!(
            "{}{}/{}",
            self.issuer.trim_end_matches('/'),
            self.path_prefix,
            path.trim_start_matches('/')
        )
    }
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            issuer: default_issuer(),
            path_prefix: default_path_prefix(),
            user_collection: default_user_collection(),
            access_token_strategy: AccessTokenMode::default(),
            access_token_lifespan_secs: default_access_token_lifespan(),
            refresh_token_lifespan_secs: default_refresh_token_lifespan(),
            authorize_code_lifespan_secs: default_authorize_code_lifespan(),
            id_token_lifespan_secs: default_id_token_lifespan(),
            default_scope: default_scope(),
            enforce_pkce: false,
            enable_dynamic_client_registration: false,
            enable_protected_resource_metadata: false,
            secret_hash_cost: default_secret_hash_cost(),
            access_token_prefix: default_access_token_prefix(),
            refresh_token_prefix: default_refresh_token_prefix(),
            authorize_code_prefix: default_authorize_code_prefix(),
        }
    }
}

/// Expired grant sweeping
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Cron expression with a leading seconds field
    #[serde(default = "default_sweep_schedule")]
    pub schedule: String,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule: default_sweep_schedule(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Output format (text, json)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// Client defined in configuration rather than registered at runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticClientConfig {
    pub client_id: String,

    #[serde(default)]
    pub client_name: String,

    /// Plaintext secret, hashed when the client is seeded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    pub redirect_uris: Vec<String>,

    #[serde(default = "default_grant_types")]
    pub grant_types: Vec<String>,

    #[serde(default = "default_response_types")]
    pub response_types: Vec<String>,

    #[serde(default = "default_scope")]
    pub scope: String,

    #[serde(default = "default_auth_method")]
    pub token_endpoint_auth_method: String,
}

impl StaticClientConfig {
    /// Client record with the plaintext secret still in place
    pub fn to_client(&self, access_token_strategy: AccessTokenMode) -> Client {
        let now = chrono::Utc::now();
        Client {
            client_id: self.client_id.clone(),
            client_name: self.client_name.clone(),
            client_secret: self.client_secret.clone(),
            redirect_uris: self.redirect_uris.clone(),
            grant_types: self.grant_types.clone(),
            response_types: self.response_types.clone(),
            scope: self.scope.clone(),
            token_endpoint_auth_method: self.token_endpoint_auth_method.clone(),
            subject_type: "public".to_string(),
            access_token_strategy: access_token_strategy.as_str().to_string(),
            created_at: now,
            updated_at: now,
            ..Default::default()
        }
    }
}

fn default_true() -> bool {
    true
}

/// Get the default data directory (~/.authgrant)
fn default_data_dir() -> String {
    if let Some(home) = dirs::home_dir() {
        home.join(".authgrant").to_string_lossy().to_string()
    } else {
        ".authgrant".to_string()
    }
}

/// Get the default SQLite database path (~/.authgrant/authgrant.db)
fn default_sqlite_path() -> String {
    format!("{}/authgrant.db", default_data_dir())
}

fn default_issuer() -> String {
    "http://localhost:8080".to_string()
}

fn default_path_prefix() -> String {
    DEFAULT_PATH_PREFIX.to_string()
}

fn default_user_collection() -> String {
    DEFAULT_USER_COLLECTION.to_string()
}

fn default_access_token_lifespan() -> i64 {
    DEFAULT_ACCESS_TOKEN_LIFESPAN_SECS
}

fn default_refresh_token_lifespan() -> i64 {
    DEFAULT_REFRESH_TOKEN_LIFESPAN_SECS
}

fn default_authorize_code_lifespan() -> i64 {
    DEFAULT_AUTHORIZE_CODE_LIFESPAN_SECS
}

fn default_id_token_lifespan() -> i64 {
    DEFAULT_ID_TOKEN_LIFESPAN_SECS
}

fn default_scope() -> String {
    DEFAULT_CLIENT_SCOPE.to_string()
}

fn default_secret_hash_cost() -> u32 {
    DEFAULT_SECRET_HASH_COST
}

fn default_access_token_prefix() -> String {
    DEFAULT_ACCESS_TOKEN_PREFIX.to_string()
}

fn default_refresh_token_prefix() -> String {
    DEFAULT_REFRESH_TOKEN_PREFIX.to_string()
}

fn default_authorize_code_prefix() -> String {
    DEFAULT_AUTHORIZE_CODE_PREFIX.to_string()
}

fn default_sweep_schedule() -> String {
    DEFAULT_SWEEP_SCHEDULE.to_string()
}

fn default_grant_types() -> Vec<String> {
    vec![
        GRANT_AUTHORIZATION_CODE.to_string(),
        GRANT_REFRESH_TOKEN.to_string(),
    ]
}

fn default_response_types() -> Vec<String> {
    vec![RESPONSE_TYPE_CODE.to_string()]
}

fn default_auth_method() -> String {
    AUTH_METHOD_CLIENT_SECRET_POST.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            oauth: OAuthConfig::default(),
            sweep: Some(SweepConfig::default()),
            log: Some(LogConfig {
                level: Some("info".to_string()),
                format: None,
            }),
            clients: Vec::new(),
        }
    }
}

impl Config {
    /// Sweep settings (with defaults if not configured)
    pub fn get_sweep(&self) -> SweepConfig {
        self.sweep.clone().unwrap_or_default()
    }

    /// Load configuration from file
    pub fn load() -> Result<Self> {
        Self::load_from_path(CONFIG_FILE_NAME)
    }

    /// Load configuration from specific path
    ///
    /// Supports both JSON and YAML formats based on file extension. A missing
    /// file yields the default configuration. Environment overrides are
    /// applied before validation.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            match path.extension().and_then(|s| s.to_str()) {
                Some("yaml") | Some("yml") => serde_yaml::from_str(&content).map_err(|e| {
                    AuthGrantError::config(format!("Failed to parse YAML config: {}", e))
                })?,
                _ => serde_json::from_str(&content).map_err(|e| {
                    AuthGrantError::config(format!("Failed to parse JSON config: {}", e))
                })?,
            }
        } else {
            tracing::debug!(path = %path.display(), "Config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Override selected fields from the environment
    pub fn apply_env_overrides(&mut self) {
        if let Ok(issuer) = std::env::var(ENV_ISSUER)
            && !issuer.is_empty()
        {
            self.oauth.issuer = issuer;
        }
        if let Ok(dsn) = std::env::var(ENV_STORAGE_DSN)
            && !dsn.is_empty()
        {
            self.storage.dsn = dsn;
        }
    }

    /// Save configuration to specific path
    ///
    /// Supports both JSON and YAML formats based on file extension:
    /// - `.json` files are written as JSON
    /// - `.yaml` or `.yml` files are written as YAML
    /// - Files without extension default to JSON format
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path_ref = path.as_ref();

        if let Some(parent) = path_ref.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let content = match path_ref.extension().and_then(|s| s.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::to_string(self)?,
            _ => serde_json::to_string_pretty(self)?,
        };

        std::fs::write(path_ref, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.storage.driver.is_empty() {
            return Err(AuthGrantError::config("storage.driver is required"));
        }

        match self.storage.driver.as_str() {
            "memory" => {}
            "sqlite" => {
                if self.storage.dsn.is_empty() {
                    return Err(AuthGrantError::config("storage.dsn is required"));
                }
            }
            _ => {
                return Err(AuthGrantError::config(format!(
                    "Unsupported storage driver: '{}'. Supported: sqlite, memory",
                    self.storage.driver
                )));
            }
        }

        let oauth = &self.oauth;
        if url::Url::parse(&oauth.issuer).is_err() {
            return Err(AuthGrantError::config(format!(
                "oauth.issuer '{}' is not a valid URL",
                oauth.issuer
            )));
        }

        if !oauth.path_prefix.starts_with('/') || oauth.path_prefix.ends_with('/') {
            return Err(AuthGrantError::config(
                "oauth.pathPrefix must start with '/' and not end with '/'",
            ));
        }

        if oauth.user_collection.is_empty() {
            return Err(AuthGrantError::config("oauth.userCollection is required"));
        }

        let lifespans = [
            ("accessTokenLifespanSecs", oauth.access_token_lifespan_secs),
            ("refreshTokenLifespanSecs", oauth.refresh_token_lifespan_secs),
            ("authorizeCodeLifespanSecs", oauth.authorize_code_lifespan_secs),
            ("idTokenLifespanSecs", oauth.id_token_lifespan_secs),
        ];
        for (name, secs) in lifespans {
            if secs <= 0 {
                return Err(AuthGrantError::config(format!(
                    "oauth.{} must be positive",
                    name
                )));
            }
        }

        if !(BCRYPT_MIN_COST..=BCRYPT_MAX_COST).contains(&oauth.secret_hash_cost) {
            return Err(AuthGrantError::config(format!(
                "oauth.secretHashCost must be between {} and {}",
                BCRYPT_MIN_COST,
                BCRYPT_MAX_COST
            )));
        }

        // Prefixes must not contain '.', the HMAC signature separator
        let prefixes = [
            &oauth.access_token_prefix,
            &oauth.refresh_token_prefix,
            &oauth.authorize_code_prefix,
        ];
        if prefixes.iter().any(|p| p.contains('.')) {
            return Err(AuthGrantError::config("oauth token prefixes cannot contain '.'"));
        }

        if let Some(ref sweep) = self.sweep
            && sweep.enabled
        {
            sweep.schedule.parse::<cron::Schedule>().map_err(|e| {
                AuthGrantError::config(format!(
                    "Invalid sweep.schedule '{}': {}",
                    sweep.schedule, e
                ))
            })?;
        }

        for client in &self.clients {
            if client.client_id.is_empty() {
                return Err(AuthGrantError::config("clients[].clientId is required"));
            }
            if client.redirect_uris.is_empty() {
                return Err(AuthGrantError::config(format!(
                    "client '{}' needs at least one redirect URI",
                    client.client_id
                )));
            }
            if client.token_endpoint_auth_method != AUTH_METHOD_NONE
                && client.client_secret.is_none()
            {
                return Err(AuthGrantError::config(format!(
                    "client '{}' needs a clientSecret unless tokenEndpointAuthMethod is 'none'",
                    client.client_id
                )));
            }
        }

        Ok(())
    }
}
