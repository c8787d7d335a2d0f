//! Protocol engine
//!
//! [`OAuthProvider`] is built once at startup and passed by handle to every
//! request handler. It owns the only process-wide state: configuration, the
//! key material, the selected token strategy and the protected resource
//! registry. Two providers over two storages never see each other.

pub mod authorize;
pub mod metadata;
pub mod token;

pub use authorize::{AuthenticatedIdentity, AuthorizeOutcome};
pub use metadata::{AuthorizationServerMetadata, OpenIdProviderMetadata};
pub use token::{
    ClientCredentials, IntrospectionResponse, TokenRequest, TokenResponse, UserInfo,
};

use crate::config::{Config, OAuthConfig};
use crate::constants::*;
use crate::context::OpContext;
use crate::hasher::BcryptHasher;
use crate::keys::KeyMaterial;
use crate::model::{ClientMetadata, ClientRegistration};
use crate::pending::PendingLogin;
use crate::resource::{ProtectedResourceMetadata, ProtectedResourceRegistry};
use crate::storage::clients::RegistrationDefaults;
use crate::storage::{ClientManager, GrantStore, Storage};
use crate::strategy::{CoreStrategy, IdTokenStrategy, IdentityTokenIssuer, build_strategy};
use crate::{AuthGrantError, Result};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

pub struct OAuthProvider {
    config: OAuthConfig,
    storage: Arc<dyn Storage>,
    keys: Arc<KeyMaterial>,
    clients: ClientManager,
    grants: GrantStore,
    strategy: Arc<dyn CoreStrategy>,
    id_tokens: IdTokenStrategy,
    resources: ProtectedResourceRegistry,
}

impl OAuthProvider {
    /// Load or generate the key material, seed static clients and register
    /// the userinfo resource.
    ///
    /// `identity_issuer` is required when the access token strategy is
    /// `identity` and ignored otherwise.
    pub async fn bootstrap(
        ctx: &OpContext,
        config: &Config,
        storage: Arc<dyn Storage>,
        identity_issuer: Option<Arc<dyn IdentityTokenIssuer>>,
    ) -> Result<Self> {
        let keys = Arc::new(KeyMaterial::load_or_generate(ctx, storage.as_ref()).await?);
        let provider = Self::from_parts(&config.oauth, storage, keys, identity_issuer)?;

        let seeded = provider
            .clients
            .seed_static_clients(ctx, &config.clients)
            .await?;
        if seeded > 0 {
            info!(count = seeded, "Seeded static OAuth clients");
        }

        info!(
            issuer = %provider.config.issuer,
            kid = %provider.keys.kid(),
            strategy = %provider.strategy.mode().as_str(),
            "OAuth provider ready"
        );
        Ok(provider)
    }

    /// Assemble a provider from already-loaded key material
    pub fn from_parts(
        config: &OAuthConfig,
        storage: Arc<dyn Storage>,
        keys: Arc<KeyMaterial>,
        identity_issuer: Option<Arc<dyn IdentityTokenIssuer>>,
    ) -> Result<Self> {
        let hasher = BcryptHasher::new(config.secret_hash_cost)?;
        let clients = ClientManager::new(
            Arc::clone(&storage),
            Arc::new(hasher),
            RegistrationDefaults {
                scope: config.default_scope.clone(),
                access_token_strategy: config.access_token_strategy,
            },
        );
        let grants = GrantStore::new(Arc::clone(&storage), clients.clone());
        let strategy = build_strategy(config, Arc::clone(&keys), identity_issuer)?;
        let id_tokens = IdTokenStrategy::new(
            Arc::clone(&keys),
            config.issuer.clone(),
            config.id_token_lifespan(),
        );

        let provider = Self {
            config: config.clone(),
            storage,
            keys,
            clients,
            grants,
            strategy,
            id_tokens,
            resources: ProtectedResourceRegistry::new(),
        };

        provider.register_protected_resource(ProtectedResourceMetadata {
            resource: config.endpoint_url(ENDPOINT_USERINFO),
            authorization_servers: vec![config.issuer.clone()],
            bearer_methods_supported: vec!["header".to_string()],
            scopes_supported: vec![
                SCOPE_OPENID.to_string(),
                "profile".to_string(),
                "email".to_string(),
            ],
            ..Default::default()
        })?;

        Ok(provider)
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn keys(&self) -> &Arc<KeyMaterial> {
        &self.keys
    }

    pub fn clients(&self) -> &ClientManager {
        &self.clients
    }

    pub fn grants(&self) -> &GrantStore {
        &self.grants
    }

    pub fn strategy(&self) -> &Arc<dyn CoreStrategy> {
        &self.strategy
    }

    pub fn id_tokens(&self) -> &IdTokenStrategy {
        &self.id_tokens
    }

    pub fn resources(&self) -> &ProtectedResourceRegistry {
        &self.resources
    }

    /// Register a protected resource. A no-op returning `false` unless
    /// protected resource metadata is enabled.
    pub fn register_protected_resource(&self, metadata: ProtectedResourceMetadata) -> Result<bool> {
        if !self.config.enable_protected_resource_metadata {
            return Ok(false);
        }
        self.resources.register(metadata)?;
        Ok(true)
    }

    /// Public signing keys
    pub fn jwks(&self) -> Value {
        self.keys.jwks()
    }

    /// Dynamic client registration, if enabled
    pub async fn register_client(
        &self,
        ctx: &OpContext,
        metadata: ClientMetadata,
    ) -> Result<ClientRegistration> {
        if !self.config.enable_dynamic_client_registration {
            return Err(AuthGrantError::protocol(
                "access_denied",
                "dynamic client registration is disabled",
            ));
        }
        let (client, secret) = self.clients.register_client(ctx, metadata).await?;
        Ok(ClientRegistration::new(&client, secret))
    }

    /// Decode the state blob the login surface hands back.
    ///
    /// `None` means the state was unreadable and the caller should start over
    /// as a fresh, unauthenticated authorization request.
    pub fn resume_login(&self, state: &str) -> Option<PendingLogin> {
        PendingLogin::decode(state)
    }
}
