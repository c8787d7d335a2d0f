//! RS256 access tokens and OpenID Connect ID tokens

use super::opaque::HmacStrategy;
use super::{CoreStrategy, IssuedToken, jws_signature};
use crate::config::AccessTokenMode;
use crate::constants::*;
use crate::context::OpContext;
use crate::keys::KeyMaterial;
use crate::model::Requester;
use crate::session::TokenKind;
use crate::telemetry;
use crate::{AuthGrantError, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{Header, Validation};
use serde_json::{Map, Value};
use std::sync::Arc;
use uuid::Uuid;

fn signing_header(keys: &KeyMaterial) -> Header {
    let mut header = Header::new(keys.algorithm());
    header.kid = Some(keys.kid().to_string());
    header
}

fn sign(keys: &KeyMaterial, claims: &Map<String, Value>) -> Result<String> {
    jsonwebtoken::encode(&signing_header(keys), claims, keys.encoding_key())
        .map_err(|e| AuthGrantError::crypto(format!("failed to sign token: {}", e)))
}

/// Verify signature, expiry and issuer; audience is left to the caller
fn verify(keys: &KeyMaterial, issuer: &str, token: &str) -> Result<Map<String, Value>> {
    let mut validation = Validation::new(keys.algorithm());
    validation.set_issuer(&[issuer]);
    validation.validate_aud = false;
    let data = jsonwebtoken::decode::<Map<String, Value>>(token, keys.decoding_key(), &validation)?;
    Ok(data.claims)
}

pub struct JwtStrategy {
    hmac: HmacStrategy,
    keys: Arc<KeyMaterial>,
    issuer: String,
}

impl JwtStrategy {
    pub fn new(hmac: HmacStrategy, keys: Arc<KeyMaterial>, issuer: String) -> Self {
        Self { hmac, keys, issuer }
    }

    /// Decode a token minted by this strategy
    pub fn decode_access_token(&self, token: &str) -> Result<Map<String, Value>> {
        verify(&self.keys, &self.issuer, token)
    }

    fn access_claims(&self, request: &dyn Requester) -> Map<String, Value> {
        let now = Utc::now();
        let exp = self.hmac.lifespans().expiry(request, TokenKind::AccessToken);

        let mut claims = request.envelope().jwt_claims();
        // ID token leftovers that do not belong in an access token
        for name in ["nonce", "at_hash", "c_hash", "aud", "auth_time", "rat"] {
            claims.remove(name);
        }
        claims.insert("iss".into(), Value::from(self.issuer.clone()));
        claims.insert("sub".into(), Value::from(request.envelope().subject()));
        claims.insert("jti".into(), Value::from(Uuid::new_v4().to_string()));
        claims.insert("iat".into(), Value::from(now.timestamp()));
        claims.insert("exp".into(), Value::from(exp.timestamp()));
        claims.insert(
            CLAIM_CLIENT_ID.into(),
            Value::from(request.client().client_id.clone()),
        );
        claims.insert(
            CLAIM_SCOPE.into(),
            Value::from(request.granted_scopes().to_vec()),
        );
        claims
    }
}

#[async_trait]
impl CoreStrategy for JwtStrategy {
    fn mode(&self) -> AccessTokenMode {
        AccessTokenMode::Jwt
    }

    async fn generate_access_token(
        &self,
        _ctx: &OpContext,
        request: &dyn Requester,
    ) -> Result<IssuedToken> {
        let token = sign(&self.keys, &self.access_claims(request))?;
        let signature = jws_signature(&token)?;
        Ok(IssuedToken { token, signature })
    }

    fn access_token_signature(&self, token: &str) -> Result<String> {
        jws_signature(token)
    }

    async fn validate_access_token(
        &self,
        _ctx: &OpContext,
        request: &dyn Requester,
        token: &str,
    ) -> Result<()> {
        let result = verify(&self.keys, &self.issuer, token).and_then(|claims| {
            let client_id = claims.get(CLAIM_CLIENT_ID).and_then(Value::as_str);
            if client_id == Some(request.client().client_id.as_str()) {
                Ok(())
            } else {
                Err(AuthGrantError::token_invalid(
                    "access token was issued to another client",
                ))
            }
        });
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

/// Signs OpenID Connect ID tokens with the process signing key
#[derive(Clone)]
pub struct IdTokenStrategy {
    keys: Arc<KeyMaterial>,
    issuer: String,
    lifespan: Duration,
}

impl IdTokenStrategy {
    pub fn new(keys: Arc<KeyMaterial>, issuer: String, lifespan: Duration) -> Self {
        Self {
            keys,
            issuer,
            lifespan,
        }
    }

    /// Mint an ID token for `request`, audience-bound to its client
    pub fn generate(&self, request: &dyn Requester) -> Result<String> {
        let now = Utc::now();
        let session = request.envelope();
        let mut claims = session.jwt_claims();

        let exp = session
            .expires_at(TokenKind::IdToken)
            .unwrap_or(now + self.lifespan);
        claims.insert("iss".into(), Value::from(self.issuer.clone()));
        claims.insert("sub".into(), Value::from(session.subject()));
        claims.insert(
            "aud".into(),
            Value::from(vec![request.client().client_id.clone()]),
        );
        claims.insert("iat".into(), Value::from(now.timestamp()));
        claims.insert("exp".into(), Value::from(exp.timestamp()));
        claims
            .entry("jti")
            .or_insert_with(|| Value::from(Uuid::new_v4().to_string()));
        claims
            .entry(FORM_REQUESTED_AT)
            .or_insert_with(|| Value::from(request.requested_at().timestamp()));
        claims
            .entry("auth_time")
            .or_insert_with(|| Value::from(request.requested_at().timestamp()));
        if let Some(nonce) = request.form().get_non_empty("nonce") {
            claims.insert("nonce".into(), Value::from(nonce));
        }

        let token = sign(&self.keys, &claims)?;
        telemetry::record_token_issued(TokenKind::IdToken.as_str());
        Ok(token)
    }

    /// Verify an ID token minted here for `client_id`
    pub fn validate(&self, token: &str, client_id: &str) -> Result<Map<String, Value>> {
        let claims = verify(&self.keys, &self.issuer, token)?;
        let audience_matches = match claims.get("aud") {
            Some(Value::String(aud)) => aud == client_id,
            Some(Value::Array(auds)) => auds.iter().any(|a| a.as_str() == Some(client_id)),
            _ => false,
        };
        if !audience_matches {
            return Err(AuthGrantError::token_invalid(
                "id token audience does not match the client",
            ));
        }
        Ok(claims)
    }
}
