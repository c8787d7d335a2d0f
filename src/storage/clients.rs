//! Client resolver and registration
//!
//! Secrets are hashed exactly once, in [`ClientManager::create_client`].
//! Updates store whatever hash the client already carries.

use super::Storage;
use crate::config::{AccessTokenMode, StaticClientConfig};
use crate::constants::*;
use crate::context::OpContext;
use crate::hasher::SecretHasher;
use crate::model::{Client, ClientMetadata};
use crate::{AuthGrantError, Result};
use base64::Engine;
use chrono::Utc;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Defaults applied to dynamically registered clients
#[derive(Debug, Clone)]
pub struct RegistrationDefaults {
    pub scope: String,
    pub access_token_strategy: AccessTokenMode,
}

impl Default for RegistrationDefaults {
    fn default() -> Self {
        Self {
            scope: DEFAULT_CLIENT_SCOPE.to_string(),
            access_token_strategy: AccessTokenMode::default(),
        }
    }
}

#[derive(Clone)]
pub struct ClientManager {
    storage: Arc<dyn Storage>,
    hasher: Arc<dyn SecretHasher>,
    defaults: RegistrationDefaults,
}

impl ClientManager {
    pub fn new(
        storage: Arc<dyn Storage>,
        hasher: Arc<dyn SecretHasher>,
        defaults: RegistrationDefaults,
    ) -> Self {
        Self {
            storage,
            hasher,
            defaults,
        }
    }

    /// Resolve a client. An absent client is `NotFound`.
    pub async fn get_client(&self, ctx: &OpContext, client_id: &str) -> Result<Client> {
        ctx.run(self.storage.get_client(client_id))
            .await?
            .ok_or_else(|| AuthGrantError::not_found("client", client_id))
    }

    pub async fn list_clients(&self, ctx: &OpContext) -> Result<Vec<Client>> {
        ctx.run(self.storage.list_clients()).await
    }

    /// Insert a new client, hashing its plaintext secret.
    ///
    /// Returns the stored client, whose `client_secret` is the hash.
    pub async fn create_client(&self, ctx: &OpContext, mut client: Client) -> Result<Client> {
        if let Some(plaintext) = client.client_secret.take() {
            client.client_secret = Some(self.hash_secret(plaintext).await?);
        }
        ctx.run(self.storage.insert_client(&client)).await?;
        info!(client_id = %client.client_id, "OAuth client created");
        Ok(client)
    }

    /// Replace a client as-is; the stored secret hash is never recomputed
    pub async fn update_client(&self, ctx: &OpContext, client: &Client) -> Result<()> {
        let mut client = client.clone();
        client.updated_at = Utc::now();
        ctx.run(self.storage.update_client(&client)).await
    }

    pub async fn delete_client(&self, ctx: &OpContext, client_id: &str) -> Result<()> {
        ctx.run(self.storage.delete_client(client_id)).await?;
        Ok(())
    }

    /// Dynamic client registration (RFC 7591).
    ///
    /// Returns the stored client and the plaintext secret, which is not
    /// retrievable again. Public clients get no secret.
    pub async fn register_client(
        &self,
        ctx: &OpContext,
        metadata: ClientMetadata,
    ) -> Result<(Client, Option<String>)> {
        validate_registration(&metadata)?;

        let auth_method = metadata
            .token_endpoint_auth_method
            .clone()
            .unwrap_or_else(|| AUTH_METHOD_CLIENT_SECRET_POST.to_string());
        match auth_method.as_str() {
            AUTH_METHOD_CLIENT_SECRET_POST | AUTH_METHOD_CLIENT_SECRET_BASIC | AUTH_METHOD_NONE => {}
            other => {
                return Err(AuthGrantError::protocol(
                    "invalid_client_metadata",
                    format!("unsupported token_endpoint_auth_method '{}'", other),
                ));
            }
        }

        let plaintext = (auth_method != AUTH_METHOD_NONE).then(generate_client_secret);
        let scope = metadata
            .scope
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| self.defaults.scope.clone());

        let now = Utc::now();
        let client = Client {
            client_id: Uuid::new_v4().to_string(),
            client_name: metadata.client_name.unwrap_or_default(),
            client_secret: plaintext.clone(),
            client_secret_expires_at: 0,
            redirect_uris: metadata.redirect_uris,
            grant_types: vec![
                GRANT_AUTHORIZATION_CODE.to_string(),
                GRANT_REFRESH_TOKEN.to_string(),
            ],
            response_types: vec![RESPONSE_TYPE_CODE.to_string()],
            scope,
            contacts: metadata.contacts,
            client_uri: metadata.client_uri.unwrap_or_default(),
            logo_uri: metadata.logo_uri.unwrap_or_default(),
            policy_uri: metadata.policy_uri.unwrap_or_default(),
            tos_uri: metadata.tos_uri.unwrap_or_default(),
            jwks_uri: metadata.jwks_uri.unwrap_or_default(),
            jwks: metadata.jwks,
            subject_type: "public".to_string(),
            token_endpoint_auth_method: auth_method,
            access_token_strategy: self.defaults.access_token_strategy.as_str().to_string(),
            created_at: now,
            updated_at: now,
            ..Default::default()
        };

        let stored = self.create_client(ctx, client).await?;
        Ok((stored, plaintext))
    }

    /// Authenticate a client at the token endpoint
    pub async fn authenticate_client(
        &self,
        ctx: &OpContext,
        client_id: &str,
        secret: Option<&str>,
    ) -> Result<Client> {
        let client = match self.get_client(ctx, client_id).await {
            Ok(client) => client,
            Err(e) if e.is_not_found() => {
                return Err(AuthGrantError::protocol(
                    "invalid_client",
                    "client authentication failed",
                ));
            }
            Err(e) => return Err(e),
        };

        if client.is_public() {
            return Ok(client);
        }

        let (Some(secret), Some(hash)) = (secret, client.client_secret.as_deref()) else {
            warn!(client_id = %client_id, "Client authentication without secret");
            return Err(AuthGrantError::protocol(
                "invalid_client",
                "client authentication failed",
            ));
        };

        if client.client_secret_expires_at > 0
            && client.client_secret_expires_at < Utc::now().timestamp()
        {
            return Err(AuthGrantError::protocol(
                "invalid_client",
                "client secret has expired",
            ));
        }

        if !self.verify_secret(secret.to_string(), hash.to_string()).await? {
            warn!(client_id = %client_id, "Client secret mismatch");
            return Err(AuthGrantError::protocol(
                "invalid_client",
                "client authentication failed",
            ));
        }
        Ok(client)
    }

    /// Insert configured clients that are not stored yet.
    ///
    /// Existing clients are left alone so their secrets are not rehashed.
    pub async fn seed_static_clients(
        &self,
        ctx: &OpContext,
        clients: &[StaticClientConfig],
    ) -> Result<usize> {
        let mut created = 0;
        for static_client in clients {
            if ctx.run(self.storage.get_client(&static_client.client_id)).await?.is_some() {
                debug!(client_id = %static_client.client_id, "Static client already present");
                continue;
            }
            let client = static_client.to_client(self.defaults.access_token_strategy);
            self.create_client(ctx, client).await?;
            created += 1;
        }
        Ok(created)
    }

    async fn hash_secret(&self, plaintext: String) -> Result<String> {
        let hasher = Arc::clone(&self.hasher);
        tokio::task::spawn_blocking(move || hasher.hash(plaintext.as_bytes()))
            .await
            .map_err(|e| AuthGrantError::crypto(format!("secret hashing task failed: {}", e)))?
    }

    async fn verify_secret(&self, plaintext: String, hash: String) -> Result<bool> {
        let hasher = Arc::clone(&self.hasher);
        tokio::task::spawn_blocking(move || hasher.verify(plaintext.as_bytes(), &hash))
            .await
            .map_err(|e| AuthGrantError::crypto(format!("secret verification task failed: {}", e)))?
    }
}

/// Generate secure client secret (using cryptographically secure RNG)
pub fn generate_client_secret() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Validate client registration metadata
fn validate_registration(metadata: &ClientMetadata) -> Result<()> {
    if metadata.redirect_uris.is_empty() {
        return Err(AuthGrantError::protocol(
            "invalid_redirect_uri",
            "at least one redirect_uri is required",
        ));
    }

    for uri in &metadata.redirect_uris {
        if !is_valid_redirect_uri(uri) {
            return Err(AuthGrantError::protocol(
                "invalid_redirect_uri",
                format!("redirect_uri '{}' is not allowed", uri),
            ));
        }
    }

    if let Some(scope) = &metadata.scope
        && scope.contains(LIST_DELIMITER)
    {
        return Err(AuthGrantError::protocol(
            "invalid_client_metadata",
            format!("scope cannot contain '{}'", LIST_DELIMITER),
        ));
    }

    Ok(())
}

/// HTTPS, or plain HTTP on a loopback host, with no fragment
pub fn is_valid_redirect_uri(uri: &str) -> bool {
    if uri.is_empty() || uri.len() > MAX_REDIRECT_URI_LENGTH {
        return false;
    }

    let Ok(parsed) = url::Url::parse(uri) else {
        return false;
    };

    let loopback = matches!(
        parsed.host_str(),
        Some("localhost") | Some("127.0.0.1") | Some("[::1]")
    );
    if parsed.scheme() != "https" && !(parsed.scheme() == "http" && loopback) {
        return false;
    }

    parsed.fragment().is_none()
}

/// Constant-time equality for secrets that are not hashed (PKCE plain)
pub(crate) fn secure_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
