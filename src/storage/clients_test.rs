use super::clients::{RegistrationDefaults, generate_client_secret, is_valid_redirect_uri};
use super::*;
use crate::config::{AccessTokenMode, StaticClientConfig};
use crate::context::OpContext;
use crate::hasher::{BcryptHasher, SecretHasher};

fn manager_with(storage: Arc<dyn Storage>, mode: AccessTokenMode) -> ClientManager {
    let hasher = Arc::new(BcryptHasher::new(crate::constants::BCRYPT_MIN_COST).expect("cost should be valid"));
    ClientManager::new(
        storage,
        hasher,
        RegistrationDefaults {
            scope: "openid profile".to_string(),
            access_token_strategy: mode,
        },
    )
}

fn manager() -> (ClientManager, Arc<dyn Storage>) {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    (manager_with(Arc::clone(&storage), AccessTokenMode::Opaque), storage)
}

fn metadata() -> ClientMetadata {
    ClientMetadata {
        redirect_uris: vec!["https://app.example.com/callback".to_string()],
        client_name: Some("My App".to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_register_applies_defaults() {
    let (clients, _) = manager();
    let ctx = OpContext::background();

    let (client, secret) = clients
        .register_client(&ctx, metadata())
        .await
        .expect("registration should succeed");

    assert!(uuid::Uuid::parse_str(&client.client_id).is_ok());
    assert_eq!(client.client_name, "My App");
    assert_eq!(client.scope, "openid profile");
    assert!(!client.scopes().is_empty());
    assert_eq!(
        client.grant_types,
        vec!["authorization_code".to_string(), "refresh_token".to_string()]
    );
    assert_eq!(client.response_types, vec!["code".to_string()]);
    assert_eq!(client.token_endpoint_auth_method, "client_secret_post");
    assert_eq!(client.client_secret_expires_at, 0);
    assert_eq!(client.subject_type, "public");
    assert_eq!(client.access_token_strategy, "opaque");

    let secret = secret.expect("confidential client gets a secret");
    assert_eq!(secret.len(), 43, "32 bytes base64url without padding");
    assert_ne!(client.client_secret.as_deref(), Some(secret.as_str()));
}

#[tokio::test]
async fn test_registered_mode_follows_configuration() {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let clients = manager_with(storage, AccessTokenMode::Jwt);
    let (client, _) = clients
        .register_client(&OpContext::background(), metadata())
        .await
        .unwrap();
    assert_eq!(client.access_token_strategy, "jwt");
}

#[tokio::test]
async fn test_stored_secret_is_hashed_once() {
    let (clients, storage) = manager();
    let ctx = OpContext::background();
    let (client, secret) = clients.register_client(&ctx, metadata()).await.unwrap();
    let secret = secret.unwrap();

    let stored = storage.get_client(&client.client_id).await.unwrap().unwrap();
    let hash = stored.client_secret.clone().expect("hash is stored");
    assert!(
        BcryptHasher::default()
            .verify(secret.as_bytes(), &hash)
            .unwrap()
    );

    // Update must not rehash the stored hash
    let mut renamed = stored.clone();
    renamed.client_name = "Renamed".to_string();
    clients.update_client(&ctx, &renamed).await.unwrap();
    let after = clients.get_client(&ctx, &client.client_id).await.unwrap();
    assert_eq!(after.client_secret.as_deref(), Some(hash.as_str()));
    assert_eq!(after.client_name, "Renamed");

    clients
        .authenticate_client(&ctx, &client.client_id, Some(&secret))
        .await
        .expect("secret should still verify after update");
}

#[tokio::test]
async fn test_public_registration_has_no_secret() {
    let (clients, _) = manager();
    let mut meta = metadata();
    meta.token_endpoint_auth_method = Some("none".to_string());
    meta.scope = Some("openid".to_string());

    let (client, secret) = clients
        .register_client(&OpContext::background(), meta)
        .await
        .unwrap();
    assert!(secret.is_none());
    assert!(client.client_secret.is_none());
    assert!(client.is_public());
    assert_eq!(client.scope, "openid");
}

#[tokio::test]
async fn test_registration_validation() {
    let (clients, _) = manager();
    let ctx = OpContext::background();

    let mut meta = metadata();
    meta.redirect_uris.clear();
    let err = clients.register_client(&ctx, meta).await.unwrap_err();
    assert_eq!(err.protocol_code(), Some("invalid_redirect_uri"));

    let mut meta = metadata();
    meta.redirect_uris = vec!["http://evil.example.com/cb".to_string()];
    let err = clients.register_client(&ctx, meta).await.unwrap_err();
    assert_eq!(err.protocol_code(), Some("invalid_redirect_uri"));

    let mut meta = metadata();
    meta.token_endpoint_auth_method = Some("private_key_jwt".to_string());
    let err = clients.register_client(&ctx, meta).await.unwrap_err();
    assert_eq!(err.protocol_code(), Some("invalid_client_metadata"));

    let mut meta = metadata();
    meta.scope = Some("openid|admin".to_string());
    let err = clients.register_client(&ctx, meta).await.unwrap_err();
    assert_eq!(err.protocol_code(), Some("invalid_client_metadata"));
}

#[tokio::test]
async fn test_authenticate_client() {
    let (clients, _) = manager();
    let ctx = OpContext::background();
    let (client, secret) = clients.register_client(&ctx, metadata()).await.unwrap();
    let secret = secret.unwrap();

    clients
        .authenticate_client(&ctx, &client.client_id, Some(&secret))
        .await
        .expect("correct secret should authenticate");

    for attempt in [Some("wrong"), None] {
        let err = clients
            .authenticate_client(&ctx, &client.client_id, attempt)
            .await
            .unwrap_err();
        assert_eq!(err.protocol_code(), Some("invalid_client"));
    }

    let err = clients
        .authenticate_client(&ctx, "missing", Some(&secret))
        .await
        .unwrap_err();
    assert_eq!(err.protocol_code(), Some("invalid_client"));
}

#[tokio::test]
async fn test_get_missing_client_is_not_found() {
    let (clients, _) = manager();
    let err = clients
        .get_client(&OpContext::background(), "nope")
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_seed_static_clients_is_idempotent() {
    let (clients, _) = manager();
    let ctx = OpContext::background();
    let configured = vec![StaticClientConfig {
        client_id: "svc".to_string(),
        client_name: "Service".to_string(),
        client_secret: Some("s3cret".to_string()),
        redirect_uris: vec!["https://svc.example.com/cb".to_string()],
        grant_types: vec!["client_credentials".to_string()],
        response_types: vec![],
        scope: "mcp:read".to_string(),
        token_endpoint_auth_method: "client_secret_basic".to_string(),
    }];

    assert_eq!(clients.seed_static_clients(&ctx, &configured).await.unwrap(), 1);
    let first = clients.get_client(&ctx, "svc").await.unwrap();
    assert_eq!(clients.seed_static_clients(&ctx, &configured).await.unwrap(), 0);
    let second = clients.get_client(&ctx, "svc").await.unwrap();
    assert_eq!(first.client_secret, second.client_secret);

    clients
        .authenticate_client(&ctx, "svc", Some("s3cret"))
        .await
        .expect("seeded secret should verify");

    assert_eq!(clients.list_clients(&ctx).await.unwrap().len(), 1);
    clients.delete_client(&ctx, "svc").await.unwrap();
    assert!(clients.list_clients(&ctx).await.unwrap().is_empty());
}

#[test]
fn test_redirect_uri_rules() {
    assert!(is_valid_redirect_uri("https://app.example.com/cb"));
    assert!(is_valid_redirect_uri("http://localhost:8080/cb"));
    assert!(is_valid_redirect_uri("http://127.0.0.1/cb"));
    assert!(!is_valid_redirect_uri("http://app.example.com/cb"));
    assert!(!is_valid_redirect_uri("https://app.example.com/cb#frag"));
    assert!(!is_valid_redirect_uri("javascript:alert(1)"));
    assert!(!is_valid_redirect_uri(""));
    let long = format!("https://app.example.com/{}", "a".repeat(2048));
    assert!(!is_valid_redirect_uri(&long));
}

#[test]
fn test_generated_secrets_are_unique() {
    let a = generate_client_secret();
    let b = generate_client_secret();
    assert_ne!(a, b);
    assert!(!a.contains('='));
}
