//! Authorization endpoint
//!
//! Without an authenticated identity the request is suspended: the whole
//! form travels to the login surface inside a [`PendingLogin`] state blob and
//! comes back as a new request. Nothing is kept server side in between.

use super::OAuthProvider;
use crate::constants::*;
use crate::context::OpContext;
use crate::model::{Client, Form, Request};
use crate::pending::PendingLogin;
use crate::session::{Session, SessionEnvelope, TokenKind};
use crate::telemetry;
use crate::{AuthGrantError, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

/// Identity established by the host's login surface
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthenticatedIdentity {
    pub subject: String,
    /// Identity namespace, checked against the configured user collection
    pub collection: String,
    pub username: String,
    /// When the user authenticated; defaults to the request time
    pub auth_time: Option<DateTime<Utc>>,
    pub password_auth: bool,
    pub otp: bool,
    pub mfa: bool,
}

impl AuthenticatedIdentity {
    pub fn new(subject: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            collection: collection.into(),
            ..Default::default()
        }
    }

    /// Authentication methods references
    pub fn amr(&self) -> Vec<String> {
        let mut amr = Vec::new();
        if self.password_auth {
            amr.push(AMR_PASSWORD.to_string());
        }
        if self.otp {
            amr.push(AMR_OTP.to_string());
        }
        if self.mfa {
            amr.push(AMR_MFA.to_string());
        }
        amr
    }

    /// Level of assurance: `loa1`, or `loa2` with MFA
    pub fn acr(&self) -> String {
        let loa = if self.mfa { 2 } else { 1 };
        format!("loa{}", loa)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizeOutcome {
    /// Send the user agent to the login surface
    LoginRequired { location: String },
    /// Send the user agent back to the client, with a code or an error
    Redirect { location: String },
}

impl AuthorizeOutcome {
    pub fn location(&self) -> &str {
        match self {
            AuthorizeOutcome::LoginRequired { location } | AuthorizeOutcome::Redirect { location } => {
                location
            }
        }
    }
}

/// Validated authorization parameters
#[derive(Debug)]
struct AuthorizeParams {
    scopes: Vec<String>,
    audience: Vec<String>,
    pkce: bool,
}

impl OAuthProvider {
    /// Handle an authorization request.
    ///
    /// Errors before the client and redirect URI are trusted come back as
    /// `Err`. Protocol errors after that point are delivered to the client
    /// as an error redirect.
    pub async fn authorize(
        &self,
        ctx: &OpContext,
        mut form: Form,
        identity: Option<AuthenticatedIdentity>,
    ) -> Result<AuthorizeOutcome> {
        let client = self.authorize_client(ctx, &form).await?;
        let redirect_uri = resolve_redirect_uri(&client, form.get_non_empty("redirect_uri"))?;
        let state = form.get("state").unwrap_or_default().to_string();

        let reject = |error: AuthGrantError| -> Result<AuthorizeOutcome> {
            match error {
                AuthGrantError::Protocol { code, description } => {
                    debug!(client_id = %client.client_id, error = code, "Authorization rejected: {}", description);
                    let location = redirect_location(
                        &redirect_uri,
                        &[
                            ("error", code),
                            ("error_description", &description),
                            ("state", &state),
                        ],
                    )?;
                    Ok(AuthorizeOutcome::Redirect { location })
                }
                other => Err(other),
            }
        };

        let params = match validate_params(&client, &form, self.config().enforce_pkce) {
            Ok(params) => params,
            Err(e) => return reject(e),
        };

        if let Some(error) = form.get_non_empty("error") {
            return reject(login_error(error));
        }

        let requested_at = form
            .get_non_empty(FORM_REQUESTED_AT)
            .and_then(|rat| rat.parse::<i64>().ok())
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .unwrap_or_else(Utc::now);
        if !form.has(FORM_REQUESTED_AT) {
            form.set(FORM_REQUESTED_AT, requested_at.timestamp().to_string());
        }

        let config = self.config();
        let Some(identity) = identity else {
            let pending = PendingLogin {
                collection: config.user_collection.clone(),
                client_id: client.client_id.clone(),
                client_name: client.client_name.clone(),
                client_uri: client.client_uri.clone(),
                prompt: form.get("prompt").unwrap_or_default().to_string(),
                max_age: form.get("max_age").unwrap_or_default().to_string(),
                login_hint: form.get("login_hint").unwrap_or_default().to_string(),
                requested_scopes: params.scopes.clone(),
                redirect_uri: format!("{}?{}", config.endpoint_url(ENDPOINT_AUTHORIZE), form.encode()),
            };
            debug!(client_id = %client.client_id, "No identity attached, suspending for login");
            return Ok(AuthorizeOutcome::LoginRequired {
                location: pending.login_location(&config.endpoint_url(ENDPOINT_LOGIN)),
            });
        };

        if identity.collection != config.user_collection {
            warn!(
                client_id = %client.client_id,
                collection = %identity.collection,
                "Identity outside the user collection at authorization"
            );
            return Err(AuthGrantError::invalid_request("invalid user collection"));
        }

        let now = Utc::now();
        let mut session = Session::new(
            &config.issuer,
            &identity.subject,
            &identity.collection,
            config.id_token_lifespan(),
        )
        .with_username(identity.username.clone());
        session.claims.auth_time = identity.auth_time;
        session.claims.requested_at = Some(requested_at);
        session.claims.amr = identity.amr();
        session.claims.acr = identity.acr();
        session.set_expires_at(TokenKind::AuthorizeCode, now + config.authorize_code_lifespan());

        let client_id = client.client_id.clone();
        let mut request = Request::new(client.clone(), session);
        request.requested_at = requested_at;
        request.requested_scopes = params.scopes.clone();
        for scope in &params.scopes {
            request.grant_scope(scope);
        }
        request.requested_audience = params.audience.clone();
        for audience in &params.audience {
            request.grant_audience(audience);
        }
        request.form = form;

        let code = match self.issue_authorize_code(ctx, &request, params.pkce).await {
            Ok(code) => code,
            Err(e) => return reject(e),
        };

        info!(client_id = %client_id, request_id = %request.id, "Authorization code issued");
        let scope = request.granted_scopes.join(" ");
        let location = redirect_location(
            &redirect_uri,
            &[("code", &code), ("scope", &scope), ("state", &state)],
        )?;
        Ok(AuthorizeOutcome::Redirect { location })
    }

    async fn authorize_client(&self, ctx: &OpContext, form: &Form) -> Result<Client> {
        let client_id = form
            .get_non_empty("client_id")
            .ok_or_else(|| AuthGrantError::invalid_request("client_id is required"))?;
        match self.clients().get_client(ctx, client_id).await {
            Ok(client) => Ok(client),
            Err(e) if e.is_not_found() => Err(AuthGrantError::protocol(
                "invalid_client",
                format!("unknown client '{}'", client_id),
            )),
            Err(e) => Err(e),
        }
    }

    /// Mint the code and store its rows.
    ///
    /// The PKCE and OIDC rows share the code's signature. If either fails
    /// the code row is removed again so no half-issued grant is redeemable.
    async fn issue_authorize_code(
        &self,
        ctx: &OpContext,
        request: &Request<Session>,
        with_pkce: bool,
    ) -> Result<String> {
        let code = self.strategy().generate_authorize_code(ctx, request).await?;
        let grants = self.grants();
        grants
            .create_authorize_code_session(ctx, &code.signature, request)
            .await?;

        let dependents = async {
            if with_pkce {
                grants
                    .create_pkce_request_session(ctx, &code.signature, request)
                    .await?;
            }
            if request.has_granted_scope(SCOPE_OPENID) {
                grants
                    .create_openid_connect_session(ctx, &code.signature, request)
                    .await?;
            }
            Ok::<(), AuthGrantError>(())
        }
        .await;

        if let Err(e) = dependents {
            // The caller's context may be the reason we failed
            let cleanup = OpContext::background();
            for result in [
                grants.invalidate_authorize_code_session(&cleanup, &code.signature).await,
                grants.delete_pkce_request_session(&cleanup, &code.signature).await,
            ] {
                if let Err(cleanup_err) = result {
                    warn!(request_id = %request.id, "Failed to remove partially issued code: {}", cleanup_err);
                }
            }
            return Err(e);
        }

        telemetry::record_token_issued(TokenKind::AuthorizeCode.as_str());
        Ok(code.token)
    }
}

/// The registered redirect URI the request names, or the only one registered
fn resolve_redirect_uri(client: &Client, requested: Option<&str>) -> Result<String> {
    match requested {
        Some(uri) if client.has_redirect_uri(uri) => Ok(uri.to_string()),
        Some(uri) => Err(AuthGrantError::invalid_request(format!(
            "redirect_uri '{}' is not registered for this client",
            uri
        ))),
        None => match client.redirect_uris.as_slice() {
            [only] => Ok(only.clone()),
            _ => Err(AuthGrantError::invalid_request("redirect_uri is required")),
        },
    }
}

fn validate_params(client: &Client, form: &Form, enforce_pkce: bool) -> Result<AuthorizeParams> {
    match form.get_non_empty("response_type") {
        Some(RESPONSE_TYPE_CODE) => {}
        Some(other) => {
            return Err(AuthGrantError::protocol(
                "unsupported_response_type",
                format!("response_type '{}' is not supported", other),
            ));
        }
        None => return Err(AuthGrantError::invalid_request("response_type is required")),
    }
    if !client.has_response_type(RESPONSE_TYPE_CODE)
        || !client.has_grant_type(GRANT_AUTHORIZATION_CODE)
    {
        return Err(AuthGrantError::protocol(
            "unauthorized_client",
            "client may not use the authorization code flow",
        ));
    }

    let mut scopes: Vec<String> = Vec::new();
    for scope in form.get("scope").unwrap_or_default().split_whitespace() {
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

    let mut audience: Vec<String> = Vec::new();
    for aud in form.get("audience").unwrap_or_default().split_whitespace() {
        if !client.audience.iter().any(|a| a == aud) {
            return Err(AuthGrantError::invalid_request(format!(
                "client may not request audience '{}'",
                aud
            )));
        }
        audience.push(aud.to_string());
    }

    let pkce = match form.get_non_empty("code_challenge") {
        Some(challenge) => {
            let method = form
                .get_non_empty("code_challenge_method")
                .unwrap_or(PKCE_METHOD_PLAIN);
            if method != PKCE_METHOD_S256 && method != PKCE_METHOD_PLAIN {
                return Err(AuthGrantError::invalid_request(format!(
                    "code_challenge_method '{}' is not supported",
                    method
                )));
            }
            if !(43..=128).contains(&challenge.len()) {
                return Err(AuthGrantError::invalid_request(
                    "code_challenge must be between 43 and 128 characters",
                ));
            }
            true
        }
        None if enforce_pkce => {
            return Err(AuthGrantError::invalid_request("code_challenge is required"));
        }
        None => false,
    };

    Ok(AuthorizeParams {
        scopes,
        audience,
        pkce,
    })
}

/// Map an `error` handed back by the login surface
fn login_error(error: &str) -> AuthGrantError {
    match error {
        "login_required" => {
            AuthGrantError::protocol("login_required", "the user must authenticate")
        }
        "account_selection_required" | "consent_required" | "interaction_required" => {
            AuthGrantError::protocol("interaction_required", "user interaction is required")
        }
        other => AuthGrantError::protocol("server_error", format!("unknown error: {}", other)),
    }
}

/// `redirect_uri` with `params` appended to its query; empty values skipped
fn redirect_location(redirect_uri: &str, params: &[(&str, &str)]) -> Result<String> {
    let mut url = url::Url::parse(redirect_uri).map_err(|e| {
        AuthGrantError::invalid_request(format!("redirect_uri is not a valid URL: {}", e))
    })?;
    {
        let mut query = url.query_pairs_mut();
        for (key, value) in params.iter().filter(|(_, v)| !v.is_empty()) {
            query.append_pair(key, value);
        }
    }
    Ok(url.into())
}
