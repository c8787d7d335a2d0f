//! Opaque HMAC-SHA256 tokens
//!
//! `<prefix><key>.<tag>` where `key` is 32 random bytes and `tag` is
//! HMAC-SHA256 of the encoded key under the global secret, both base64url
//! without padding. The tag is the signature.

use super::{CoreStrategy, IssuedToken, Lifespans};
use crate::config::{AccessTokenMode, OAuthConfig};
use crate::context::OpContext;
use crate::model::Requester;
use crate::session::TokenKind;
use crate::telemetry;
use crate::{AuthGrantError, Result};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

const KEY_BYTES: usize = 32;

#[derive(Clone)]
pub struct HmacTokenizer {
    secret: Vec<u8>,
}

impl HmacTokenizer {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            secret: secret.to_vec(),
        }
    }

    fn tag(&self, key: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| AuthGrantError::crypto(format!("invalid HMAC key: {}", e)))?;
        mac.update(key.as_bytes());
        Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
    }

    pub fn generate(&self, prefix: &str) -> Result<IssuedToken> {
        let mut bytes = [0u8; KEY_BYTES];
        rand::rng().fill_bytes(&mut bytes);
        let key = URL_SAFE_NO_PAD.encode(bytes);
        let signature = self.tag(&key)?;
        Ok(IssuedToken {
            token: format!("{}{}.{}", prefix, key, signature),
            signature,
        })
    }

    /// Segment after the last `.`
    pub fn signature(&self, token: &str) -> Result<String> {
        match token.rsplit_once('.') {
            Some((_, sig)) if !sig.is_empty() => Ok(sig.to_string()),
            _ => Err(AuthGrantError::token_invalid("token has no signature segment")),
        }
    }

    /// Recompute the tag and compare in constant time
    pub fn validate(&self, prefix: &str, token: &str) -> Result<()> {
        let (head, signature) = token
            .rsplit_once('.')
            .ok_or_else(|| AuthGrantError::token_invalid("token has no signature segment"))?;
        let key = head
            .strip_prefix(prefix)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AuthGrantError::token_invalid("token has the wrong prefix"))?;

        let expected = self.tag(key)?;
        if bool::from(expected.as_bytes().ct_eq(signature.as_bytes())) {
            Ok(())
        } else {
            Err(AuthGrantError::token_invalid("token signature does not match"))
        }
    }
}

/// Token prefixes per kind
#[derive(Debug, Clone)]
pub struct TokenPrefixes {
    pub access_token: String,
    pub refresh_token: String,
    pub authorize_code: String,
}

#[derive(Clone)]
pub struct HmacStrategy {
    tokenizer: HmacTokenizer,
    prefixes: TokenPrefixes,
    lifespans: Lifespans,
}

impl HmacStrategy {
    pub fn new(secret: &[u8], prefixes: TokenPrefixes, lifespans: Lifespans) -> Self {
        Self {
            tokenizer: HmacTokenizer::new(secret),
            prefixes,
            lifespans,
        }
    }

    pub fn from_config(config: &OAuthConfig, secret: &[u8]) -> Self {
        Self::new(
            secret,
            TokenPrefixes {
                access_token: config.access_token_prefix.clone(),
                refresh_token: config.refresh_token_prefix.clone(),
                authorize_code: config.authorize_code_prefix.clone(),
            },
            Lifespans::from_config(config),
        )
    }

    pub fn lifespans(&self) -> &Lifespans {
        &self.lifespans
    }

    fn prefix(&self, kind: TokenKind) -> &str {
        match kind {
            TokenKind::AccessToken => &self.prefixes.access_token,
            TokenKind::RefreshToken => &self.prefixes.refresh_token,
            TokenKind::AuthorizeCode | TokenKind::IdToken => &self.prefixes.authorize_code,
        }
    }

    pub(crate) fn generate(&self, kind: TokenKind) -> Result<IssuedToken> {
        self.tokenizer.generate(self.prefix(kind))
    }

    /// Check the tag, then the expiry carried by the request's session
    pub(crate) fn validate(&self, request: &dyn Requester, kind: TokenKind, token: &str) -> Result<()> {
        let result = self
            .tokenizer
            .validate(self.prefix(kind), token)
            .and_then(|()| {
                let expires_at = self.lifespans.expiry(request, kind);
                if expires_at < Utc::now() {
                    return Err(AuthGrantError::token_invalid(format!("{} expired", kind)));
                }
                Ok(())
            });
        if result.is_err() {
            telemetry::record_validation_failure(kind.as_str());
        }
        result
    }
}

#[async_trait]
impl CoreStrategy for HmacStrategy {
    fn mode(&self) -> AccessTokenMode {
        AccessTokenMode::Opaque
    }

    async fn generate_access_token(
        &self,
        _ctx: &OpContext,
        _request: &dyn Requester,
    ) -> Result<IssuedToken> {
        self.generate(TokenKind::AccessToken)
    }

    fn access_token_signature(&self, token: &str) -> Result<String> {
        self.tokenizer.signature(token)
    }

    async fn validate_access_token(
        &self,
        _ctx: &OpContext,
        request: &dyn Requester,
        token: &str,
    ) -> Result<()> {
        self.validate(request, TokenKind::AccessToken, token)
    }

    async fn generate_refresh_token(
        &self,
        _ctx: &OpContext,
        _request: &dyn Requester,
    ) -> Result<IssuedToken> {
        self.generate(TokenKind::RefreshToken)
    }

    fn refresh_token_signature(&self, token: &str) -> Result<String> {
        self.tokenizer.signature(token)
    }

    async fn validate_refresh_token(
        &self,
        _ctx: &OpContext,
        request: &dyn Requester,
        token: &str,
    ) -> Result<()> {
        self.validate(request, TokenKind::RefreshToken, token)
    }

    async fn generate_authorize_code(
        &self,
        _ctx: &OpContext,
        _request: &dyn Requester,
    ) -> Result<IssuedToken> {
        self.generate(TokenKind::AuthorizeCode)
    }

    fn authorize_code_signature(&self, token: &str) -> Result<String> {
        self.tokenizer.signature(token)
    }

    async fn validate_authorize_code(
        &self,
        _ctx: &OpContext,
        request: &dyn Requester,
        token: &str,
    ) -> Result<()> {
        self.validate(request, TokenKind::AuthorizeCode, token)
    }
}
