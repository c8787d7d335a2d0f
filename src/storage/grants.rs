//! Typed grant repositories
//!
//! One set of operations per grant kind, all funnelled through the generic
//! [`GrantStorage`](super::GrantStorage) surface and the mapping layer.

use super::Storage;
use super::clients::ClientManager;
use super::mapping::{request_to_row, row_to_request};
use crate::context::OpContext;
use crate::model::{GrantKind, GrantRow, Request};
use crate::session::SessionEnvelope;
use crate::{AuthGrantError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, error};

#[derive(Clone)]
pub struct GrantStore {
    storage: Arc<dyn Storage>,
    clients: ClientManager,
}

impl GrantStore {
    pub fn new(storage: Arc<dyn Storage>, clients: ClientManager) -> Self {
        Self { storage, clients }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn clients(&self) -> &ClientManager {
        &self.clients
    }

    // ------------------------------------------------------------------------
    // Generic operations
    // ------------------------------------------------------------------------

    /// Persist `request` as a new row of `kind` keyed by `signature`
    pub async fn create<S>(
        &self,
        ctx: &OpContext,
        kind: GrantKind,
        signature: &str,
        request: &Request<S>,
    ) -> Result<()>
    where
        S: SessionEnvelope + Serialize,
    {
        let row = request_to_row(kind, signature, request)?;
        ctx.run(self.storage.insert_grant(kind, &row))
            .await
            .inspect_err(|e| {
                if matches!(e, AuthGrantError::Storage(_)) {
                    error!(kind = %kind, request_id = %request.id, "Failed to persist grant: {}", e);
                }
            })?;
        debug!(kind = %kind, client_id = %row.client_id, request_id = %row.request_id, "Grant created");
        Ok(())
    }

    /// Reconstruct the request stored under `signature`
    pub async fn find<S>(&self, ctx: &OpContext, kind: GrantKind, signature: &str) -> Result<Request<S>>
    where
        S: DeserializeOwned,
    {
        let row = ctx
            .run(self.storage.get_grant(kind, signature))
            .await?
            .ok_or_else(|| AuthGrantError::not_found(kind.as_str(), signature))?;
        self.hydrate(ctx, row).await
    }

    /// Atomically remove the row under `signature` and reconstruct it.
    ///
    /// Of several concurrent callers at most one gets the request; the rest
    /// see `NotFound`.
    pub async fn take<S>(&self, ctx: &OpContext, kind: GrantKind, signature: &str) -> Result<Request<S>>
    where
        S: DeserializeOwned,
    {
        let row = ctx
            .run(self.storage.take_grant(kind, signature))
            .await?
            .ok_or_else(|| AuthGrantError::not_found(kind.as_str(), signature))?;
        debug!(kind = %kind, request_id = %row.request_id, "Grant consumed");
        self.hydrate(ctx, row).await
    }

    /// Delete by signature; an absent row is not an error
    pub async fn delete(&self, ctx: &OpContext, kind: GrantKind, signature: &str) -> Result<()> {
        let existed = ctx.run(self.storage.delete_grant(kind, signature)).await?;
        debug!(kind = %kind, existed, "Grant deleted");
        Ok(())
    }

    /// Delete every row of `kind` sharing `request_id`
    pub async fn delete_by_request_id(
        &self,
        ctx: &OpContext,
        kind: GrantKind,
        request_id: &str,
    ) -> Result<()> {
        let removed = ctx
            .run(self.storage.delete_grants_by_request_id(kind, request_id))
            .await?;
        debug!(kind = %kind, request_id = %request_id, removed, "Grants deleted by request id");
        Ok(())
    }

    async fn hydrate<S: DeserializeOwned>(&self, ctx: &OpContext, row: GrantRow) -> Result<Request<S>> {
        let client = match self.clients.get_client(ctx, &row.client_id).await {
            Ok(client) => client,
            Err(e) if e.is_not_found() => {
                return Err(AuthGrantError::UnknownClient(row.client_id));
            }
            Err(e) => return Err(e),
        };
        row_to_request(row, client)
    }

    // ------------------------------------------------------------------------
    // Authorization codes
    // ------------------------------------------------------------------------

    pub async fn create_authorize_code_session<S>(
        &self,
        ctx: &OpContext,
        signature: &str,
        request: &Request<S>,
    ) -> Result<()>
    where
        S: SessionEnvelope + Serialize,
    {
        self.create(ctx, GrantKind::AuthorizeCode, signature, request).await
    }

    pub async fn get_authorize_code_session<S: DeserializeOwned>(
        &self,
        ctx: &OpContext,
        signature: &str,
    ) -> Result<Request<S>> {
        self.find(ctx, GrantKind::AuthorizeCode, signature).await
    }

    /// Single-use redemption of a code
    pub async fn consume_authorize_code_session<S: DeserializeOwned>(
        &self,
        ctx: &OpContext,
        signature: &str,
    ) -> Result<Request<S>> {
        self.take(ctx, GrantKind::AuthorizeCode, signature).await
    }

    pub async fn invalidate_authorize_code_session(
        &self,
        ctx: &OpContext,
        signature: &str,
    ) -> Result<()> {
        self.delete(ctx, GrantKind::AuthorizeCode, signature).await
    }

    // ------------------------------------------------------------------------
    // Access tokens
    // ------------------------------------------------------------------------

    pub async fn create_access_token_session<S>(
        &self,
        ctx: &OpContext,
        signature: &str,
        request: &Request<S>,
    ) -> Result<()>
    where
        S: SessionEnvelope + Serialize,
    {
        self.create(ctx, GrantKind::AccessToken, signature, request).await
    }

    pub async fn get_access_token_session<S: DeserializeOwned>(
        &self,
        ctx: &OpContext,
        signature: &str,
    ) -> Result<Request<S>> {
        self.find(ctx, GrantKind::AccessToken, signature).await
    }

    pub async fn delete_access_token_session(&self, ctx: &OpContext, signature: &str) -> Result<()> {
        self.delete(ctx, GrantKind::AccessToken, signature).await
    }

    /// Revoke every access token of a grant
    pub async fn revoke_access_token(&self, ctx: &OpContext, request_id: &str) -> Result<()> {
        self.delete_by_request_id(ctx, GrantKind::AccessToken, request_id)
            .await
    }

    // ------------------------------------------------------------------------
    // Refresh tokens
    // ------------------------------------------------------------------------

    pub async fn create_refresh_token_session<S>(
        &self,
        ctx: &OpContext,
        signature: &str,
        request: &Request<S>,
    ) -> Result<()>
    where
        S: SessionEnvelope + Serialize,
    {
        self.create(ctx, GrantKind::RefreshToken, signature, request).await
    }

    pub async fn get_refresh_token_session<S: DeserializeOwned>(
        &self,
        ctx: &OpContext,
        signature: &str,
    ) -> Result<Request<S>> {
        self.find(ctx, GrantKind::RefreshToken, signature).await
    }

    /// Single-use redemption of a refresh token ahead of rotation
    pub async fn consume_refresh_token_session<S: DeserializeOwned>(
        &self,
        ctx: &OpContext,
        signature: &str,
    ) -> Result<Request<S>> {
        self.take(ctx, GrantKind::RefreshToken, signature).await
    }

    pub async fn delete_refresh_token_session(&self, ctx: &OpContext, signature: &str) -> Result<()> {
        self.delete(ctx, GrantKind::RefreshToken, signature).await
    }

    /// Revoke every refresh token of a grant
    pub async fn revoke_refresh_token(&self, ctx: &OpContext, request_id: &str) -> Result<()> {
        self.delete_by_request_id(ctx, GrantKind::RefreshToken, request_id)
            .await
    }

    /// Drop the old refresh row and the access rows of its grant in one unit.
    ///
    /// Callers issue the replacement pair under a new request id first.
    pub async fn rotate_refresh_token(
        &self,
        ctx: &OpContext,
        request_id: &str,
        refresh_signature: &str,
    ) -> Result<()> {
        ctx.run(self.storage.rotate_refresh(request_id, refresh_signature))
            .await?;
        debug!(request_id = %request_id, "Refresh token rotated");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // PKCE
    // ------------------------------------------------------------------------

    pub async fn create_pkce_request_session<S>(
        &self,
        ctx: &OpContext,
        signature: &str,
        request: &Request<S>,
    ) -> Result<()>
    where
        S: SessionEnvelope + Serialize,
    {
        self.create(ctx, GrantKind::Pkce, signature, request).await
    }

    pub async fn get_pkce_request_session<S: DeserializeOwned>(
        &self,
        ctx: &OpContext,
        signature: &str,
    ) -> Result<Request<S>> {
        self.find(ctx, GrantKind::Pkce, signature).await
    }

    pub async fn consume_pkce_request_session<S: DeserializeOwned>(
        &self,
        ctx: &OpContext,
        signature: &str,
    ) -> Result<Request<S>> {
        self.take(ctx, GrantKind::Pkce, signature).await
    }

    pub async fn delete_pkce_request_session(&self, ctx: &OpContext, signature: &str) -> Result<()> {
        self.delete(ctx, GrantKind::Pkce, signature).await
    }

    // ------------------------------------------------------------------------
    // OpenID Connect sessions
    // ------------------------------------------------------------------------

    pub async fn create_openid_connect_session<S>(
        &self,
        ctx: &OpContext,
        signature: &str,
        request: &Request<S>,
    ) -> Result<()>
    where
        S: SessionEnvelope + Serialize,
    {
        self.create(ctx, GrantKind::OpenIdConnect, signature, request)
            .await
    }

    pub async fn get_openid_connect_session<S: DeserializeOwned>(
        &self,
        ctx: &OpContext,
        signature: &str,
    ) -> Result<Request<S>> {
        self.find(ctx, GrantKind::OpenIdConnect, signature).await
    }

    pub async fn consume_openid_connect_session<S: DeserializeOwned>(
        &self,
        ctx: &OpContext,
        signature: &str,
    ) -> Result<Request<S>> {
        self.take(ctx, GrantKind::OpenIdConnect, signature).await
    }

    pub async fn delete_openid_connect_session(
        &self,
        ctx: &OpContext,
        signature: &str,
    ) -> Result<()> {
        self.delete(ctx, GrantKind::OpenIdConnect, signature).await
    }

    // ------------------------------------------------------------------------
    // Client assertion JTIs
    // ------------------------------------------------------------------------

    /// Fails with `TokenInvalid` if `jti` was already used and has not expired
    pub async fn client_assertion_jwt_valid(&self, ctx: &OpContext, jti: &str) -> Result<()> {
        match ctx.run(self.storage.get_jti(jti)).await? {
            Some(expires_at) if expires_at > Utc::now() => Err(AuthGrantError::token_invalid(
                format!("client assertion jti '{}' has already been used", jti),
            )),
            _ => Ok(()),
        }
    }

    /// Record `jti` as used until `expires_at`
    pub async fn set_client_assertion_jwt(
        &self,
        ctx: &OpContext,
        jti: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let now = Utc::now();
        ctx.run(self.storage.delete_expired_jtis(now)).await?;
        if ctx
            .run(self.storage.insert_jti_if_unused(jti, expires_at, now))
            .await?
        {
            Ok(())
        } else {
            Err(AuthGrantError::token_invalid(format!(
                "client assertion jti '{}' has already been used",
                jti
            )))
        }
    }
}
