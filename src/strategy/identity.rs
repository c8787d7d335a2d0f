//! Access tokens minted by the host's own identity token issuer
//!
//! The access token is a first-class host session credential. Its signature
//! is the third JWS segment. Refresh tokens and codes stay opaque.

use super::opaque::HmacStrategy;
use super::{CoreStrategy, IssuedToken, jws_signature};
use crate::config::AccessTokenMode;
use crate::context::OpContext;
use crate::model::Requester;
use crate::session::TokenKind;
use crate::telemetry;
use crate::{AuthGrantError, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What the host recovers from one of its identity tokens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaims {
    pub subject: String,
    pub collection: String,
}

/// Host identity token issuer and verifier
#[async_trait]
pub trait IdentityTokenIssuer: Send + Sync {
    /// Mint a compact JWS authenticating `subject` of `collection`
    async fn issue(
        &self,
        ctx: &OpContext,
        subject: &str,
        collection: &str,
        ttl: Duration,
    ) -> Result<String>;

    /// Verify a token previously minted by [`issue`](Self::issue)
    async fn verify(&self, ctx: &OpContext, token: &str) -> Result<IdentityClaims>;
}

#[derive(Debug, Serialize, Deserialize)]
struct HostAuthClaims {
    sub: String,
    collection: String,
    #[serde(rename = "type")]
    token_type: String,
    iat: i64,
    exp: i64,
}

const HOST_TOKEN_TYPE: &str = "auth";

/// HS256 identity issuer for hosts that sign their own session tokens with
/// a shared secret
#[derive(Clone)]
pub struct Hs256IdentityIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl Hs256IdentityIssuer {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        }
    }
}

#[async_trait]
impl IdentityTokenIssuer for Hs256IdentityIssuer {
    async fn issue(
        &self,
        _ctx: &OpContext,
        subject: &str,
        collection: &str,
        ttl: Duration,
    ) -> Result<String> {
        let now = Utc::now();
        let claims = HostAuthClaims {
            sub: subject.to_string(),
            collection: collection.to_string(),
            token_type: HOST_TOKEN_TYPE.to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthGrantError::crypto(format!("failed to sign identity token: {}", e)))
    }

    async fn verify(&self, _ctx: &OpContext, token: &str) -> Result<IdentityClaims> {
        let data = jsonwebtoken::decode::<HostAuthClaims>(
            token,
            &self.decoding_key,
            &Validation::new(Algorithm::HS256),
        )?;
        if data.claims.token_type != HOST_TOKEN_TYPE {
            return Err(AuthGrantError::token_invalid("not a host auth token"));
        }
        Ok(IdentityClaims {
            subject: data.claims.sub,
            collection: data.claims.collection,
        })
    }
}

pub struct IdentityBoundStrategy {
    hmac: HmacStrategy,
    issuer: Arc<dyn IdentityTokenIssuer>,
    access_lifespan: Duration,
}

impl IdentityBoundStrategy {
    pub fn new(
        hmac: HmacStrategy,
        issuer: Arc<dyn IdentityTokenIssuer>,
        access_lifespan: Duration,
    ) -> Self {
        Self {
            hmac,
            issuer,
            access_lifespan,
        }
    }
}

#[async_trait]
impl CoreStrategy for IdentityBoundStrategy {
    fn mode(&self) -> AccessTokenMode {
        AccessTokenMode::Identity
    }

    async fn generate_access_token(
        &self,
        ctx: &OpContext,
        request: &dyn Requester,
    ) -> Result<IssuedToken> {
        let session = request.envelope();
        let ttl = session
            .expires_at(TokenKind::AccessToken)
            .map(|at| at - Utc::now())
            .unwrap_or(self.access_lifespan);
        let token = ctx
            .run(self.issuer.issue(ctx, session.subject(), session.collection(), ttl))
            .await?;
        let signature = jws_signature(&token)
            .map_err(|_| AuthGrantError::crypto("host issued a token that is not a compact JWS"))?;
        Ok(IssuedToken { token, signature })
    }

    fn access_token_signature(&self, token: &str) -> Result<String> {
        jws_signature(token)
    }

    async fn validate_access_token(
        &self,
        ctx: &OpContext,
        request: &dyn Requester,
        token: &str,
    ) -> Result<()> {
        let result = match ctx.run(self.issuer.verify(ctx, token)).await {
            Ok(claims) => {
                let session = request.envelope();
                if claims.subject == session.subject() && claims.collection == session.collection() {
                    Ok(())
                } else {
                    Err(AuthGrantError::token_invalid(
                        "identity token does not belong to this grant",
                    ))
                }
            }
            Err(AuthGrantError::Canceled) => return Err(AuthGrantError::Canceled),
            Err(e) => Err(AuthGrantError::token_invalid(e.to_string())),
        };
        if result.is_err() {
            telemetry::record_validation_failure(TokenKind::AccessToken.as_str());
        }
        result
    }

    async fn generate_refresh_token(
        &self,
        ctx: &OpContext,
        request: &dyn Requester,
    ) -> Result<IssuedToken> {
        self.hmac.generate_refresh_token(ctx, request).await
    }

    fn refresh_token_signature(&self, token: &str) -> Result<String> {
        self.hmac.refresh_token_signature(token)
    }

    async fn validate_refresh_token(
        &self,
        ctx: &OpContext,
        request: &dyn Requester,
        token: &str,
    ) -> Result<()> {
        self.hmac.validate_refresh_token(ctx, request, token).await
    }

    async fn generate_authorize_code(
        &self,
        ctx: &OpContext,
        request: &dyn Requester,
    ) -> Result<IssuedToken> {
        self.hmac.generate_authorize_code(ctx, request).await
    }

    fn authorize_code_signature(&self, token: &str) -> Result<String> {
        self.hmac.authorize_code_signature(token)
    }

    async fn validate_authorize_code(
        &self,
        ctx: &OpContext,
        request: &dyn Requester,
        token: &str,
    ) -> Result<()> {
        self.hmac.validate_authorize_code(ctx, request, token).await
    }
}
