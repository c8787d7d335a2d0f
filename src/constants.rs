//! Constants used throughout authgrant
//!
//! Table names, parameter keys, claim names and protocol defaults.

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration file name
pub const CONFIG_FILE_NAME: &str = "authgrant.config.json";

/// Environment variable overriding the configured issuer
pub const ENV_ISSUER: &str = "AUTHGRANT_ISSUER";

/// Environment variable overriding the storage DSN
pub const ENV_STORAGE_DSN: &str = "AUTHGRANT_STORAGE_DSN";

// ============================================================================
// STORAGE
// ============================================================================

pub const TABLE_CLIENTS: &str = "oauth2_clients";
pub const TABLE_AUTH_CODE: &str = "oauth2_auth_code";
pub const TABLE_ACCESS: &str = "oauth2_access";
pub const TABLE_REFRESH: &str = "oauth2_refresh";
pub const TABLE_PKCE: &str = "oauth2_pkce";
pub const TABLE_OPENID: &str = "oauth2_openid";
pub const TABLE_JTI: &str = "oauth2_jti";
pub const TABLE_PARAMS: &str = "oauth2_params";

/// Joins scope and audience lists in a single TEXT column
pub const LIST_DELIMITER: char = '|';

/// Param key for the persisted RSA signing key
pub const PARAM_RSA_KEY: &str = "oauth2_rsa_key";

/// Param key for the persisted HMAC global secret
pub const PARAM_GLOBAL_SECRET: &str = "oauth2_global_secret";

/// Length in bytes of a generated global secret
pub const GLOBAL_SECRET_LEN: usize = 32;

/// RSA modulus size for generated signing keys
pub const RSA_KEY_BITS: usize = 2048;

// ============================================================================
// PROTOCOL
// ============================================================================

/// Default OAuth path prefix
pub const DEFAULT_PATH_PREFIX: &str = "/oauth2";

/// Default identity namespace for end users
pub const DEFAULT_USER_COLLECTION: &str = "users";

/// Scope applied to registered clients that request none
pub const DEFAULT_CLIENT_SCOPE: &str = "openid profile mcp:read mcp:write";

pub const DEFAULT_ACCESS_TOKEN_PREFIX: &str = "ag_at_";
pub const DEFAULT_REFRESH_TOKEN_PREFIX: &str = "ag_rt_";
pub const DEFAULT_AUTHORIZE_CODE_PREFIX: &str = "ag_ac_";

/// Default access token lifetime (1 hour)
pub const DEFAULT_ACCESS_TOKEN_LIFESPAN_SECS: i64 = 3600;

/// Default refresh token lifetime (30 days)
pub const DEFAULT_REFRESH_TOKEN_LIFESPAN_SECS: i64 = 30 * 24 * 3600;

/// Default authorization code lifetime (15 minutes)
pub const DEFAULT_AUTHORIZE_CODE_LIFESPAN_SECS: i64 = 15 * 60;

/// Default ID token lifetime (6 hours)
pub const DEFAULT_ID_TOKEN_LIFESPAN_SECS: i64 = 6 * 3600;

/// Default sweep schedule (top of every hour, seconds field first)
pub const DEFAULT_SWEEP_SCHEDULE: &str = "0 0 * * * *";

/// Default bcrypt cost for client secrets
pub const DEFAULT_SECRET_HASH_COST: u32 = 12;

/// Accepted bcrypt cost range
pub const BCRYPT_MIN_COST: u32 = 4;
pub const BCRYPT_MAX_COST: u32 = 31;

pub const GRANT_AUTHORIZATION_CODE: &str = "authorization_code";
pub const GRANT_REFRESH_TOKEN: &str = "refresh_token";
pub const GRANT_CLIENT_CREDENTIALS: &str = "client_credentials";

pub const RESPONSE_TYPE_CODE: &str = "code";

pub const AUTH_METHOD_CLIENT_SECRET_POST: &str = "client_secret_post";
pub const AUTH_METHOD_CLIENT_SECRET_BASIC: &str = "client_secret_basic";
pub const AUTH_METHOD_NONE: &str = "none";

pub const SCOPE_OPENID: &str = "openid";

pub const PKCE_METHOD_S256: &str = "S256";
pub const PKCE_METHOD_PLAIN: &str = "plain";

/// Endpoint paths under the configured prefix
pub const ENDPOINT_AUTHORIZE: &str = "auth";
pub const ENDPOINT_LOGIN: &str = "login";
pub const ENDPOINT_TOKEN: &str = "token";
pub const ENDPOINT_REVOKE: &str = "revoke";
pub const ENDPOINT_INTROSPECT: &str = "introspect";
pub const ENDPOINT_USERINFO: &str = "userinfo";
pub const ENDPOINT_REGISTER: &str = "register";

/// JWKS document path relative to the issuer
pub const JWKS_PATH: &str = "/.well-known/jwks.json";

pub const TOKEN_TYPE_BEARER: &str = "bearer";

/// Maximum redirect URI length accepted at registration
pub const MAX_REDIRECT_URI_LENGTH: usize = 2048;

// ============================================================================
// CLAIMS
// ============================================================================

/// Claim carrying the identity namespace of the subject
pub const CLAIM_COLLECTION: &str = "collection";

/// Claim carrying the granted scopes of an access token
pub const CLAIM_SCOPE: &str = "scp";

pub const CLAIM_CLIENT_ID: &str = "client_id";

/// Form parameter recording the original request time
pub const FORM_REQUESTED_AT: &str = "rat";

pub const AMR_PASSWORD: &str = "pwd";
pub const AMR_OTP: &str = "otp";
pub const AMR_MFA: &str = "mfa";
