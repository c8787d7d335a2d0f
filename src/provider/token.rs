//! Token, revocation, introspection and userinfo endpoints

use super::OAuthProvider;
use crate::constants::*;
use crate::context::OpContext;
use crate::model::{Client, Form, Request};
use crate::session::{Session, SessionEnvelope, TokenKind};
use crate::storage::clients::secure_eq;
use crate::config::AccessTokenMode;
use crate::strategy::Lifespans;
use crate::telemetry;
use crate::{AuthGrantError, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCredentials {
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

impl ClientCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: Option<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
        }
    }
}

/// Parsed token endpoint request
#[derive(Debug, Clone, Default)]
pub struct TokenRequest {
    pub grant_type: String,
    pub credentials: ClientCredentials,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
}

impl TokenRequest {
    /// Read a `client_secret_post` style form body
    pub fn from_form(form: &Form) -> Self {
        let owned = |key: &str| form.get_non_empty(key).map(str::to_string);
        Self {
            grant_type: form.get("grant_type").unwrap_or_default().to_string(),
            credentials: ClientCredentials {
                client_id: form.get("client_id").unwrap_or_default().to_string(),
                client_secret: owned("client_secret"),
            },
            code: owned("code"),
            redirect_uri: owned("redirect_uri"),
            code_verifier: owned("code_verifier"),
            refresh_token: owned("refresh_token"),
            scope: owned("scope"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub scope: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

/// RFC 7662 introspection response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntrospectionResponse {
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
}

impl IntrospectionResponse {
    pub fn inactive() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub sub: String,
    pub collection: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
}

impl OAuthProvider {
    /// Token endpoint
    pub async fn exchange_token(&self, ctx: &OpContext, request: TokenRequest) -> Result<TokenResponse> {
        let grant_type = request.grant_type.as_str();
        if grant_type.is_empty() {
            return Err(AuthGrantError::invalid_request("grant_type is required"));
        }
        if ![
            GRANT_AUTHORIZATION_CODE,
            GRANT_REFRESH_TOKEN,
            GRANT_CLIENT_CREDENTIALS,
        ]
        .contains(&grant_type)
        {
            return Err(AuthGrantError::protocol(
                "unsupported_grant_type",
                format!("grant_type '{}' is not supported", grant_type),
            ));
        }

        let client = self
            .clients()
            .authenticate_client(
                ctx,
                &request.credentials.client_id,
                request.credentials.client_secret.as_deref(),
            )
            .await?;
        if !client.has_grant_type(grant_type) {
            return Err(AuthGrantError::protocol(
                "unauthorized_client",
                format!("client may not use grant_type '{}'", grant_type),
            ));
        }

        let result = match grant_type {
            GRANT_AUTHORIZATION_CODE => self.exchange_authorization_code(ctx, client, &request).await,
            GRANT_REFRESH_TOKEN => self.exchange_refresh_token(ctx, client, &request).await,
            _ => self.exchange_client_credentials(ctx, client, &request).await,
        };
        if let Err(e) = &result {
            debug!(grant_type = %grant_type, client_id = %request.credentials.client_id, "Token request failed: {}", e);
        }
        result
    }

    async fn exchange_authorization_code(
        &self,
        ctx: &OpContext,
        client: Client,
        request: &TokenRequest,
    ) -> Result<TokenResponse> {
        let code = required(request.code.as_deref(), "code")?;
        let signature = self.strategy().authorize_code_signature(code)?;
        let grants = self.grants();

        let mut granted: Request<Session> = grants
            .consume_authorize_code_session(ctx, &signature)
            .await
            .map_err(|e| redeemed_or(e, "authorization code is invalid or was already used"))?;
        // Dependent rows go with the code whatever happens next
        let pkce: Option<Request<Session>> =
            optional(grants.consume_pkce_request_session(ctx, &signature).await)?;
        let openid: Option<Request<Session>> =
            optional(grants.consume_openid_connect_session(ctx, &signature).await)?;

        if let Err(e) = self
            .strategy()
            .validate_authorize_code(ctx, &granted, code)
            .await
        {
            telemetry::record_validation_failure(TokenKind::AuthorizeCode.as_str());
            return Err(e);
        }
        if granted.client.client_id != client.client_id {
            warn!(client_id = %client.client_id, "Authorization code presented by another client");
            return Err(invalid_grant("authorization code was issued to another client"));
        }
        if let Some(expected) = granted.form.get_non_empty("redirect_uri")
            && request.redirect_uri.as_deref() != Some(expected)
        {
            return Err(invalid_grant("redirect_uri does not match the authorization request"));
        }

        if granted.form.has("code_challenge") {
            let pkce = pkce.ok_or_else(|| invalid_grant("PKCE session is missing"))?;
            let verifier = request
                .code_verifier
                .as_deref()
                .ok_or_else(|| AuthGrantError::invalid_request("code_verifier is required"))?;
            verify_pkce(
                pkce.form
                    .get_non_empty("code_challenge_method")
                    .unwrap_or(PKCE_METHOD_PLAIN),
                pkce.form.get("code_challenge").unwrap_or_default(),
                verifier,
            )?;
        }

        let id_token = if granted.has_granted_scope(SCOPE_OPENID) {
            let session = openid.ok_or_else(|| invalid_grant("OpenID Connect session is missing"))?;
            Some(self.id_tokens().generate(&session)?)
        } else {
            None
        };

        let with_refresh = client.has_grant_type(GRANT_REFRESH_TOKEN);
        let mut response = self.issue_tokens(ctx, &mut granted, with_refresh).await?;
        response.id_token = id_token;
        info!(client_id = %client.client_id, request_id = %granted.id, "Authorization code redeemed");
        Ok(response)
    }

    async fn exchange_refresh_token(
        &self,
        ctx: &OpContext,
        client: Client,
        request: &TokenRequest,
    ) -> Result<TokenResponse> {
        let token = required(request.refresh_token.as_deref(), "refresh_token")?;
        let signature = self.strategy().refresh_token_signature(token)?;

        let previous: Request<Session> = self
            .grants()
            .consume_refresh_token_session(ctx, &signature)
            .await
            .map_err(|e| redeemed_or(e, "refresh token is invalid or was already used"))?;
        if let Err(e) = self
            .strategy()
            .validate_refresh_token(ctx, &previous, token)
            .await
        {
            telemetry::record_validation_failure(TokenKind::RefreshToken.as_str());
            return Err(e);
        }
        if previous.client.client_id != client.client_id {
            warn!(client_id = %client.client_id, "Refresh token presented by another client");
            return Err(invalid_grant("refresh token was issued to another client"));
        }

        let mut next = previous.clone();
        next.id = Uuid::new_v4().to_string();
        next.requested_at = Utc::now();
        next.form.remove("nonce");
        if let Some(scope) = request.scope.as_deref() {
            let mut narrowed = Vec::new();
            for s in scope.split_whitespace() {
                if !previous.has_granted_scope(s) {
                    return Err(AuthGrantError::protocol(
                        "invalid_scope",
                        format!("scope '{}' was not granted to this refresh token", s),
                    ));
                }
                if !narrowed.iter().any(|n: &String| n == s) {
                    narrowed.push(s.to_string());
                }
            }
            next.granted_scopes = narrowed;
        }

        let id_token = if next.has_granted_scope(SCOPE_OPENID) {
            next.session.set_expires_at(
                TokenKind::IdToken,
                next.requested_at + self.config().id_token_lifespan(),
            );
            Some(self.id_tokens().generate(&next)?)
        } else {
            None
        };

        let mut response = self.issue_tokens(ctx, &mut next, true).await?;
        response.id_token = id_token;
        self.grants()
            .rotate_refresh_token(ctx, &previous.id, &signature)
            .await?;
        info!(
            client_id = %client.client_id,
            previous_request_id = %previous.id,
            request_id = %next.id,
            "Refresh token rotated"
        );
        Ok(response)
    }

    async fn exchange_client_credentials(
        &self,
        ctx: &OpContext,
        client: Client,
        request: &TokenRequest,
    ) -> Result<TokenResponse> {
        if client.is_public() {
            return Err(AuthGrantError::protocol(
                "invalid_client",
                "public clients cannot use client_credentials",
            ));
        }
        if self.strategy().mode() == AccessTokenMode::Identity {
            return Err(AuthGrantError::protocol(
                "unauthorized_client",
                "client_credentials is unavailable with identity-bound access tokens",
            ));
        }

        let mut scopes: Vec<String> = Vec::new();
        for scope in request.scope.as_deref().unwrap_or_default().split_whitespace() {
            if !client.has_scope(scope) {
                return Err(AuthGrantError::protocol(
                    "invalid_scope",
                    format!("client may not request scope '{}'", scope),
                ));
            }
            if !scopes.iter().any(|s| s == scope) {
                scopes.push(scope.to_string());
            }
        }

        let config = self.config();
        let session = Session::new(&config.issuer, &client.client_id, "", config.id_token_lifespan());
        let mut granted = Request::new(client, session);
        granted.requested_scopes = scopes.clone();
        for scope in &scopes {
            granted.grant_scope(scope);
        }
        granted.form = Form::from_pairs([("grant_type", GRANT_CLIENT_CREDENTIALS)]);
        if !scopes.is_empty() {
            granted.form.set("scope", scopes.join(" "));
        }

        let response = self.issue_tokens(ctx, &mut granted, false).await?;
        info!(client_id = %granted.client.client_id, "Client credentials token issued");
        Ok(response)
    }

    /// Mint and store an access token, and a refresh token if asked, under
    /// `request.id`
    async fn issue_tokens(
        &self,
        ctx: &OpContext,
        request: &mut Request<Session>,
        with_refresh: bool,
    ) -> Result<TokenResponse> {
        let config = self.config();
        let now = Utc::now();
        request
            .session
            .set_expires_at(TokenKind::AccessToken, now + config.access_token_lifespan());
        if with_refresh {
            request
                .session
                .set_expires_at(TokenKind::RefreshToken, now + config.refresh_token_lifespan());
        }
        let request: &Request<Session> = request;

        let strategy = self.strategy();
        let access = strategy.generate_access_token(ctx, request).await?;
        let refresh = match with_refresh {
            true => Some(strategy.generate_refresh_token(ctx, request).await?),
            false => None,
        };

        let grants = self.grants();
        grants
            .create_access_token_session(ctx, &access.signature, request)
            .await?;
        if let Some(refresh) = &refresh
            && let Err(e) = grants
                .create_refresh_token_session(ctx, &refresh.signature, request)
                .await
        {
            if let Err(cleanup_err) = grants
                .delete_access_token_session(&OpContext::background(), &access.signature)
                .await
            {
                warn!(request_id = %request.id, "Failed to remove orphaned access token: {}", cleanup_err);
            }
            return Err(e);
        }

        telemetry::record_token_issued(TokenKind::AccessToken.as_str());
        if refresh.is_some() {
            telemetry::record_token_issued(TokenKind::RefreshToken.as_str());
        }

        Ok(TokenResponse {
            access_token: access.token,
            token_type: TOKEN_TYPE_BEARER.to_string(),
            expires_in: config.access_token_lifespan().num_seconds(),
            refresh_token: refresh.map(|r| r.token),
            scope: request.granted_scopes.join(" "),
            id_token: None,
        })
    }

    /// RFC 7009 revocation.
    ///
    /// Revoking either token of a grant removes every access and refresh row
    /// sharing its request id. Unknown tokens are not an error.
    pub async fn revoke_token(
        &self,
        ctx: &OpContext,
        credentials: &ClientCredentials,
        token: &str,
    ) -> Result<()> {
        let client = self
            .clients()
            .authenticate_client(
                ctx,
                &credentials.client_id,
                credentials.client_secret.as_deref(),
            )
            .await?;

        let found = match self.find_access_token(ctx, token).await? {
            Some(found) => Some(found),
            None => self.find_refresh_token(ctx, token).await?,
        };
        let Some(found) = found else {
            debug!(client_id = %client.client_id, "Revocation of unknown token ignored");
            return Ok(());
        };

        if found.client.client_id != client.client_id {
            warn!(client_id = %client.client_id, "Client tried to revoke another client's token");
            return Err(AuthGrantError::protocol(
                "unauthorized_client",
                "token was issued to another client",
            ));
        }

        let grants = self.grants();
        grants.revoke_access_token(ctx, &found.id).await?;
        grants.revoke_refresh_token(ctx, &found.id).await?;
        info!(client_id = %client.client_id, request_id = %found.id, "Grant revoked");
        Ok(())
    }

    /// Resolve a bearer token to its grant, for resource servers
    pub async fn validate_access_token(&self, ctx: &OpContext, token: &str) -> Result<Request<Session>> {
        let found = self
            .find_access_token(ctx, token)
            .await?
            .ok_or_else(|| AuthGrantError::token_invalid("access token is unknown or revoked"))?;
        if let Err(e) = self
            .strategy()
            .validate_access_token(ctx, &found, token)
            .await
        {
            telemetry::record_validation_failure(TokenKind::AccessToken.as_str());
            return Err(e);
        }
        Ok(found)
    }

    /// RFC 7662 introspection. Anything not currently valid is inactive;
    /// only storage and cancellation failures surface as errors.
    pub async fn introspect_token(&self, ctx: &OpContext, token: &str) -> Result<IntrospectionResponse> {
        let lifespans = Lifespans::from_config(self.config());

        if let Some(found) = self.find_access_token(ctx, token).await? {
            return match self.strategy().validate_access_token(ctx, &found, token).await {
                Ok(()) => Ok(active_response(&found, TokenKind::AccessToken, &lifespans)),
                Err(AuthGrantError::Canceled) => Err(AuthGrantError::Canceled),
                Err(_) => Ok(IntrospectionResponse::inactive()),
            };
        }
        if let Some(found) = self.find_refresh_token(ctx, token).await? {
            return match self.strategy().validate_refresh_token(ctx, &found, token).await {
                Ok(()) => Ok(active_response(&found, TokenKind::RefreshToken, &lifespans)),
                Err(AuthGrantError::Canceled) => Err(AuthGrantError::Canceled),
                Err(_) => Ok(IntrospectionResponse::inactive()),
            };
        }
        Ok(IntrospectionResponse::inactive())
    }

    /// OpenID Connect userinfo for a bearer token granted `openid`
    pub async fn userinfo(&self, ctx: &OpContext, access_token: &str) -> Result<UserInfo> {
        let granted = match self.validate_access_token(ctx, access_token).await {
            Ok(granted) => granted,
            Err(e @ (AuthGrantError::Canceled | AuthGrantError::Storage(_))) => return Err(e),
            Err(e) => {
                debug!("Userinfo rejected: {}", e);
                return Err(AuthGrantError::protocol(
                    "invalid_token",
                    "access token is invalid or expired",
                ));
            }
        };
        if !granted.has_granted_scope(SCOPE_OPENID) {
            return Err(AuthGrantError::protocol(
                "insufficient_scope",
                "the openid scope is required",
            ));
        }
        let session = granted.session;
        Ok(UserInfo {
            sub: session.subject,
            collection: session.collection,
            preferred_username: Some(session.username).filter(|u| !u.is_empty()),
        })
    }

    async fn find_access_token(&self, ctx: &OpContext, token: &str) -> Result<Option<Request<Session>>> {
        let Ok(signature) = self.strategy().access_token_signature(token) else {
            return Ok(None);
        };
        optional(self.grants().get_access_token_session(ctx, &signature).await)
    }

    async fn find_refresh_token(&self, ctx: &OpContext, token: &str) -> Result<Option<Request<Session>>> {
        let Ok(signature) = self.strategy().refresh_token_signature(token) else {
            return Ok(None);
        };
        optional(self.grants().get_refresh_token_session(ctx, &signature).await)
    }
}

fn active_response(found: &Request<Session>, kind: TokenKind, lifespans: &Lifespans) -> IntrospectionResponse {
    IntrospectionResponse {
        active: true,
        scope: Some(found.granted_scopes.join(" ")),
        client_id: Some(found.client.client_id.clone()),
        sub: Some(found.session.subject().to_string()),
        exp: Some(lifespans.expiry(found, kind).timestamp()),
        iat: Some(found.requested_at.timestamp()),
        token_type: Some(kind.as_str().to_string()),
        collection: Some(found.session.collection().to_string()).filter(|c| !c.is_empty()),
    }
}

/// Missing rows and rows of deleted clients become `None`
fn optional<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(AuthGrantError::NotFound(_) | AuthGrantError::UnknownClient(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

fn redeemed_or(e: AuthGrantError, description: &str) -> AuthGrantError {
    match e {
        AuthGrantError::NotFound(_) | AuthGrantError::UnknownClient(_) => {
            AuthGrantError::token_invalid(description)
        }
        other => other,
    }
}

fn required<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str> {
    value.ok_or_else(|| AuthGrantError::invalid_request(format!("{} is required", name)))
}

fn invalid_grant(description: &str) -> AuthGrantError {
    AuthGrantError::protocol("invalid_grant", description)
}

/// RFC 7636 verifier check
pub(crate) fn verify_pkce(method: &str, challenge: &str, verifier: &str) -> Result<()> {
    let well_formed = (43..=128).contains(&verifier.len())
        && verifier
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"-._~".contains(&b));
    if !well_formed {
        return Err(invalid_grant("code_verifier is malformed"));
    }

    let computed = match method {
        PKCE_METHOD_S256 => URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes())),
        PKCE_METHOD_PLAIN => verifier.to_string(),
        other => {
            return Err(invalid_grant(&format!(
                "code_challenge_method '{}' is not supported",
                other
            )));
        }
    };
    if !secure_eq(&computed, challenge) {
        return Err(invalid_grant("PKCE verification failed"));
    }
    Ok(())
}
