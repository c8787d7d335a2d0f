//! Session envelope
//!
//! The serializable payload attached to every grant: who the subject is,
//! which identity namespace they belong to, per-token expiries, and the
//! OpenID Connect claims used to mint ID tokens.
//!
//! All fields are owned, so `Clone` produces a fully independent copy. A
//! session handed to one pipeline stage can be mutated without affecting
//! the copy held by another.

use crate::constants::CLAIM_COLLECTION;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Token kinds that carry an independent expiry inside a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    AuthorizeCode,
    AccessToken,
    RefreshToken,
    IdToken,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::AuthorizeCode => "authorize_code",
            TokenKind::AccessToken => "access_token",
            TokenKind::RefreshToken => "refresh_token",
            TokenKind::IdToken => "id_token",
        }
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Behaviour the grant store and token strategies need from a session.
///
/// The store is generic over the concrete session type; callers pick the
/// shape they expect when reading a grant back.
pub trait SessionEnvelope: Send + Sync {
    /// Identity reference of the resource owner
    fn subject(&self) -> &str;

    /// Identity namespace the subject belongs to
    fn collection(&self) -> &str;

    fn expires_at(&self, kind: TokenKind) -> Option<DateTime<Utc>>;

    fn set_expires_at(&mut self, kind: TokenKind, at: DateTime<Utc>);

    /// Claims projected into signed access tokens.
    ///
    /// Implementations must include the identity namespace under
    /// [`CLAIM_COLLECTION`] so a verifier can recover it from the token alone.
    fn jwt_claims(&self) -> Map<String, Value>;
}

/// OpenID Connect ID token claims carried by a session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdTokenClaims {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub jti: String,

    #[serde(rename = "iss", default)]
    pub issuer: String,

    #[serde(rename = "sub", default)]
    pub subject: String,

    #[serde(rename = "aud", default, skip_serializing_if = "Vec::is_empty")]
    pub audience: Vec<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub nonce: String,

    #[serde(rename = "exp", default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    #[serde(rename = "iat", default, skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<DateTime<Utc>>,

    #[serde(rename = "rat", default, skip_serializing_if = "Option::is_none")]
    pub requested_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_time: Option<DateTime<Utc>>,

    /// Authentication context class reference (`loa1`, `loa2`)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub acr: String,

    /// Authentication methods references (`pwd`, `otp`, `mfa`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub amr: Vec<String>,

    /// Custom claims merged into the projected claim map
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl IdTokenClaims {
    /// Project the claims into a JWT claim map with numeric dates.
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        if !self.jti.is_empty() {
            map.insert("jti".into(), Value::from(self.jti.clone()));
        }
        if !self.issuer.is_empty() {
            map.insert("iss".into(), Value::from(self.issuer.clone()));
        }
        if !self.subject.is_empty() {
            map.insert("sub".into(), Value::from(self.subject.clone()));
        }
        if !self.audience.is_empty() {
            map.insert("aud".into(), Value::from(self.audience.clone()));
        }
        if !self.nonce.is_empty() {
            map.insert("nonce".into(), Value::from(self.nonce.clone()));
        }
        let dates = [
            ("exp", self.expires_at),
            ("iat", self.issued_at),
            ("rat", self.requested_at),
            ("auth_time", self.auth_time),
        ];
        for (name, at) in dates {
            if let Some(at) = at {
                map.insert(name.into(), Value::from(at.timestamp()));
            }
        }
        if !self.acr.is_empty() {
            map.insert("acr".into(), Value::from(self.acr.clone()));
        }
        if !self.amr.is_empty() {
            map.insert("amr".into(), Value::from(self.amr.clone()));
        }
        for (k, v) in &self.extra {
            map.insert(k.clone(), v.clone());
        }
        map
    }
}

/// Default session used by the provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub subject: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,

    #[serde(default)]
    pub collection: String,

    #[serde(default)]
    pub claims: IdTokenClaims,

    /// Extra JOSE headers for tokens minted from this session
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub headers: Map<String, Value>,

    #[serde(default)]
    pub expires_at: BTreeMap<TokenKind, DateTime<Utc>>,
}

impl Session {
    /// Create a session for `subject` in `collection`, issued now by `issuer`.
    pub fn new(issuer: &str, subject: &str, collection: &str, id_token_ttl: chrono::Duration) -> Self {
        let now = Utc::now();
        Self {
            subject: subject.to_string(),
            username: String::new(),
            collection: collection.to_string(),
            claims: IdTokenClaims {
                issuer: issuer.to_string(),
                subject: subject.to_string(),
                issued_at: Some(now),
                expires_at: Some(now + id_token_ttl),
                ..Default::default()
            },
            headers: Map::new(),
            expires_at: BTreeMap::new(),
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    /// True when the token kind carries an expiry that has passed
    pub fn is_expired(&self, kind: TokenKind, now: DateTime<Utc>) -> bool {
        self.expires_at.get(&kind).is_some_and(|at| *at < now)
    }
}

impl SessionEnvelope for Session {
    fn subject(&self) -> &str {
        &self.subject
    }

    fn collection(&self) -> &str {
        &self.collection
    }

    fn expires_at(&self, kind: TokenKind) -> Option<DateTime<Utc>> {
        self.expires_at.get(&kind).copied()
    }

    fn set_expires_at(&mut self, kind: TokenKind, at: DateTime<Utc>) {
        self.expires_at.insert(kind, at);
    }

    fn jwt_claims(&self) -> Map<String, Value> {
        let mut claims = self.claims.to_map();
        if !claims.contains_key("sub") && !self.subject.is_empty() {
            claims.insert("sub".into(), Value::from(self.subject.clone()));
        }
        claims.insert(CLAIM_COLLECTION.into(), Value::from(self.collection.clone()));
        claims
    }
}

#[cfg(test)]
mod session_test;
