//! Token strategies
//!
//! A strategy mints token material for each token kind and checks it on the
//! way back in. The grant store only ever sees the signature, so the
//! strategy can be swapped without touching stored rows of other kinds.
//!
//! The access-token mode is fixed at startup. Rows written under one mode
//! are not readable under another.

pub mod opaque;
pub mod identity;
pub mod jwt;

pub use opaque::{HmacStrategy, HmacTokenizer, TokenPrefixes};
pub use identity::{Hs256IdentityIssuer, IdentityBoundStrategy, IdentityClaims, IdentityTokenIssuer};
pub use jwt::{IdTokenStrategy, JwtStrategy};

use crate::config::{AccessTokenMode, OAuthConfig};
use crate::context::OpContext;
use crate::keys::KeyMaterial;
use crate::model::Requester;
use crate::session::TokenKind;
use crate::{AuthGrantError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// Token material and the signature it is stored under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub signature: String,
}

/// Lifetimes applied when a session carries no explicit expiry
#[derive(Debug, Clone, Copy)]
pub struct Lifespans {
    pub access_token: Duration,
    pub refresh_token: Duration,
    pub authorize_code: Duration,
}

impl Lifespans {
    pub fn from_config(config: &OAuthConfig) -> Self {
        Self {
            access_token: config.access_token_lifespan(),
            refresh_token: config.refresh_token_lifespan(),
            authorize_code: config.authorize_code_lifespan(),
        }
    }

    pub fn for_kind(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::AccessToken => self.access_token,
            TokenKind::RefreshToken => self.refresh_token,
            TokenKind::AuthorizeCode | TokenKind::IdToken => self.authorize_code,
        }
    }

    /// Expiry of a `kind` token minted for `request`
    pub fn expiry(&self, request: &dyn Requester, kind: TokenKind) -> DateTime<Utc> {
        request
            .envelope()
            .expires_at(kind)
            .unwrap_or_else(|| request.requested_at() + self.for_kind(kind))
    }
}

/// Mint and verify token material for every token kind
#[async_trait]
pub trait CoreStrategy: Send + Sync {
    fn mode(&self) -> AccessTokenMode;

    async fn generate_access_token(
        &self,
        ctx: &OpContext,
        request: &dyn Requester,
    ) -> Result<IssuedToken>;

    fn access_token_signature(&self, token: &str) -> Result<String>;

    async fn validate_access_token(
        &self,
        ctx: &OpContext,
        request: &dyn Requester,
        token: &str,
    ) -> Result<()>;

    async fn generate_refresh_token(
        &self,
        ctx: &OpContext,
        request: &dyn Requester,
    ) -> Result<IssuedToken>;

    fn refresh_token_signature(&self, token: &str) -> Result<String>;

    async fn validate_refresh_token(
        &self,
        ctx: &OpContext,
        request: &dyn Requester,
        token: &str,
    ) -> Result<()>;

    async fn generate_authorize_code(
        &self,
        ctx: &OpContext,
        request: &dyn Requester,
    ) -> Result<IssuedToken>;

    fn authorize_code_signature(&self, token: &str) -> Result<String>;

    async fn validate_authorize_code(
        &self,
        ctx: &OpContext,
        request: &dyn Requester,
        token: &str,
    ) -> Result<()>;
}

/// Third segment of a compact JWS
pub fn jws_signature(token: &str) -> Result<String> {
    let mut parts = token.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(_), Some(sig), None) if !sig.is_empty() => Ok(sig.to_string()),
        _ => Err(AuthGrantError::token_invalid(
            "token is not a compact JWS with three segments",
        )),
    }
}

/// Build the strategy for the configured access-token mode
pub fn build_strategy(
    config: &OAuthConfig,
    keys: Arc<KeyMaterial>,
    identity_issuer: Option<Arc<dyn IdentityTokenIssuer>>,
) -> Result<Arc<dyn CoreStrategy>> {
    let hmac = HmacStrategy::from_config(config, keys.global_secret());
    let strategy: Arc<dyn CoreStrategy> = match config.access_token_strategy {
        AccessTokenMode::Opaque => Arc::new(hmac),
        AccessTokenMode::Identity => {
            let issuer = identity_issuer.ok_or_else(|| {
                AuthGrantError::config(
                    "access token strategy 'identity' requires a host identity token issuer",
                )
            })?;
            Arc::new(IdentityBoundStrategy::new(
                hmac,
                issuer,
                config.access_token_lifespan(),
            ))
        }
        AccessTokenMode::Jwt => Arc::new(JwtStrategy::new(hmac, keys, config.issuer.clone())),
    };
    tracing::info!(mode = %config.access_token_strategy.as_str(), "Token strategy ready");
    Ok(strategy)
}
