//! Core data models for authgrant
//!
//! Clients, grant rows as persisted, and the protocol request that a grant
//! row is reconstructed into.

use crate::constants::*;
use crate::session::SessionEnvelope;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Grants
// ============================================================================

/// One logical table per grant kind, each keyed by token signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantKind {
    AuthorizeCode,
    AccessToken,
    RefreshToken,
    Pkce,
    OpenIdConnect,
}

impl GrantKind {
    /// Every grant kind, in sweep order
    pub const ALL: [GrantKind; 5] = [
        GrantKind::AuthorizeCode,
        GrantKind::AccessToken,
        GrantKind::RefreshToken,
        GrantKind::Pkce,
        GrantKind::OpenIdConnect,
    ];

    pub fn table_name(&self) -> &'static str {
        match self {
            GrantKind::AuthorizeCode => TABLE_AUTH_CODE,
            GrantKind::AccessToken => TABLE_ACCESS,
            GrantKind::RefreshToken => TABLE_REFRESH,
            GrantKind::Pkce => TABLE_PKCE,
            GrantKind::OpenIdConnect => TABLE_OPENID,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GrantKind::AuthorizeCode => "authorize_code",
            GrantKind::AccessToken => "access_token",
            GrantKind::RefreshToken => "refresh_token",
            GrantKind::Pkce => "pkce",
            GrantKind::OpenIdConnect => "openid_connect",
        }
    }

    /// Session expiry that bounds a row of this kind.
    ///
    /// PKCE and OIDC rows live exactly as long as the authorization code
    /// they are keyed by.
    pub fn token_kind(&self) -> crate::session::TokenKind {
        use crate::session::TokenKind;
        match self {
            GrantKind::AuthorizeCode | GrantKind::Pkce | GrantKind::OpenIdConnect => {
                TokenKind::AuthorizeCode
            }
            GrantKind::AccessToken => TokenKind::AccessToken,
            GrantKind::RefreshToken => TokenKind::RefreshToken,
        }
    }
}

impl std::fmt::Display for GrantKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A grant row exactly as persisted.
///
/// List fields are delimiter-joined, the form is urlencoded and the session
/// is a JSON blob; see [`crate::storage::mapping`] for the conversions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantRow {
    pub signature: String,
    pub client_id: String,
    pub request_id: String,
    pub requested_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scopes: String,
    pub granted_scopes: String,
    pub requested_audience: String,
    pub granted_audience: String,
    pub form_data: String,
    pub session_data: String,
    /// Denormalized copy of the session subject, not authoritative
    pub subject: String,
}

// ============================================================================
// Form data
// ============================================================================

/// Ordered form parameters of the original protocol request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Form(Vec<(String, String)>);

impl Form {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// First value for `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// First non-empty value for `key`
    pub fn get_non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.is_empty())
    }

    pub fn has(&self, key: &str) -> bool {
        self.0.iter().any(|(k, _)| k == key)
    }

    /// Replace every value of `key` with a single value
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.remove(&key);
        self.0.push((key, value.into()));
    }

    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push((key.into(), value.into()));
    }

    pub fn remove(&mut self, key: &str) {
        self.0.retain(|(k, _)| k != key);
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `application/x-www-form-urlencoded` serialization, order preserved
    pub fn encode(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.0.iter())
            .finish()
    }
}

// ============================================================================
// Clients
// ============================================================================

/// Registered OAuth client.
///
/// `client_secret` is only ever the hash; the plaintext is returned once by
/// registration and never stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub client_id: String,

    #[serde(default)]
    pub client_name: String,

    /// Hashed client secret (None for public clients)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    /// 0 means the secret never expires
    #[serde(default)]
    pub client_secret_expires_at: i64,

    #[serde(default)]
    pub redirect_uris: Vec<String>,

    #[serde(default)]
    pub grant_types: Vec<String>,

    #[serde(default)]
    pub response_types: Vec<String>,

    /// Space-separated allowed scopes
    #[serde(default)]
    pub scope: String,

    #[serde(default)]
    pub audience: Vec<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub owner: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub policy_uri: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tos_uri: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_uri: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub logo_uri: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contacts: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_cors_origins: Vec<String>,

    #[serde(default)]
    pub subject_type: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sector_identifier_uri: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub jwks_uri: String,

    /// Inline JSON Web Key Set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub request_uris: Vec<String>,

    #[serde(default)]
    pub token_endpoint_auth_method: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub token_endpoint_auth_signing_alg: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub request_object_signing_alg: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub userinfo_signed_response_alg: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,

    /// Access token mode this client was registered under
    #[serde(default)]
    pub access_token_strategy: String,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Client {
    /// Public clients authenticate with no secret
    pub fn is_public(&self) -> bool {
        self.token_endpoint_auth_method == AUTH_METHOD_NONE
    }

    pub fn scopes(&self) -> Vec<String> {
        self.scope.split_whitespace().map(String::from).collect()
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scope.split_whitespace().any(|s| s == scope)
    }

    pub fn has_grant_type(&self, grant_type: &str) -> bool {
        self.grant_types.iter().any(|g| g == grant_type)
    }

    pub fn has_response_type(&self, response_type: &str) -> bool {
        self.response_types.iter().any(|r| r == response_type)
    }

    pub fn has_redirect_uri(&self, uri: &str) -> bool {
        self.redirect_uris.iter().any(|r| r == uri)
    }

    /// Copy safe to show to an operator
    #[must_use]
    pub fn without_secret(&self) -> Self {
        Self {
            client_secret: None,
            ..self.clone()
        }
    }
}

/// Dynamic client registration input (RFC 7591)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientMetadata {
    #[serde(default)]
    pub redirect_uris: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint_auth_method: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contacts: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_uri: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_uri: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_uri: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tos_uri: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub software_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub software_version: Option<String>,
}

/// Dynamic client registration response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRegistration {
    pub client_id: String,

    /// Plaintext secret, shown exactly once
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    pub client_id_issued_at: i64,
    pub client_secret_expires_at: i64,
    pub client_name: String,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    pub scope: String,
    pub token_endpoint_auth_method: String,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub contacts: Vec<String>,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub client_uri: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub logo_uri: String,
}

impl ClientRegistration {
    pub fn new(client: &Client, plaintext_secret: Option<String>) -> Self {
        Self {
            client_id: client.client_id.clone(),
            client_secret: plaintext_secret,
            client_id_issued_at: client.created_at.timestamp(),
            client_secret_expires_at: client.client_secret_expires_at,
            client_name: client.client_name.clone(),
            redirect_uris: client.redirect_uris.clone(),
            grant_types: client.grant_types.clone(),
            response_types: client.response_types.clone(),
            scope: client.scope.clone(),
            token_endpoint_auth_method: client.token_endpoint_auth_method.clone(),
            contacts: client.contacts.clone(),
            client_uri: client.client_uri.clone(),
            logo_uri: client.logo_uri.clone(),
        }
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Protocol request bound to a grant.
///
/// This is what the store writes on create and reconstructs on find, with the
/// client resolved and the session decoded into the caller's type `S`.
#[derive(Debug, Clone)]
pub struct Request<S> {
    /// Correlates the access and refresh rows of one grant
    pub id: String,
    pub requested_at: DateTime<Utc>,
    pub client: Client,
    pub requested_scopes: Vec<String>,
    pub granted_scopes: Vec<String>,
    pub requested_audience: Vec<String>,
    pub granted_audience: Vec<String>,
    pub form: Form,
    pub session: S,
}

impl<S> Request<S> {
    /// New request with a fresh id, requested now
    pub fn new(client: Client, session: S) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            requested_at: Utc::now(),
            client,
            requested_scopes: Vec::new(),
            granted_scopes: Vec::new(),
            requested_audience: Vec::new(),
            granted_audience: Vec::new(),
            form: Form::new(),
            session,
        }
    }

    pub fn grant_scope(&mut self, scope: &str) {
        if !self.has_granted_scope(scope) {
            self.granted_scopes.push(scope.to_string());
        }
    }

    pub fn has_granted_scope(&self, scope: &str) -> bool {
        self.granted_scopes.iter().any(|s| s == scope)
    }

    pub fn grant_audience(&mut self, audience: &str) {
        if !self.granted_audience.iter().any(|a| a == audience) {
            self.granted_audience.push(audience.to_string());
        }
    }
}

/// Read-only view of a request used by token strategies
pub trait Requester: Send + Sync {
    fn request_id(&self) -> &str;
    fn client(&self) -> &Client;
    fn requested_at(&self) -> DateTime<Utc>;
    fn granted_scopes(&self) -> &[String];
    fn form(&self) -> &Form;
    fn envelope(&self) -> &dyn SessionEnvelope;
}

impl<S: SessionEnvelope> Requester for Request<S> {
    fn request_id(&self) -> &str {
        &self.id
    }

    fn client(&self) -> &Client {
        &self.client
    }

    fn requested_at(&self) -> DateTime<Utc> {
        self.requested_at
    }

    fn granted_scopes(&self) -> &[String] {
        &self.granted_scopes
    }

    fn form(&self) -> &Form {
        &self.form
    }

    fn envelope(&self) -> &dyn SessionEnvelope {
        &self.session
    }
}

#[cfg(test)]
#[path = "model_test.rs"]
mod model_test;
