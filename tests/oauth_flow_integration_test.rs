//! End-to-end OAuth flows against SQLite storage
//!
//! Configuration is loaded from a file, clients are seeded from it and the
//! signing key is generated on first bootstrap.

use authgrant::config::Config;
use authgrant::context::OpContext;
use authgrant::model::Form;
use authgrant::provider::{
    AuthenticatedIdentity, AuthorizeOutcome, ClientCredentials, OAuthProvider, TokenRequest,
};
use authgrant::storage::create_storage_from_config;
use authgrant::sweep::sweep_expired;
use std::collections::HashMap;
use tempfile::TempDir;

const REDIRECT: &str = "https://app.example.com/callback";

fn write_config(dir: &TempDir) -> Config {
    let path = dir.path().join("authgrant.config.yaml");
    let db = dir.path().join("authgrant.db");
    let yaml = format!(
        r#"
storage:
  driver: sqlite
  dsn: "{}"
oauth:
  issuer: https://auth.example.com
  secretHashCost: 4
  enableDynamicClientRegistration: true
clients:
  - clientId: dashboard
    clientName: Dashboard
    clientSecret: dashboard-secret
    redirectUris: ["{}"]
    grantTypes: [authorization_code, refresh_token]
    scope: openid profile mcp:read
"#,
        db.display(),
        REDIRECT
    );
    std::fs::write(&path, yaml).unwrap();
    Config::load_from_path(&path).unwrap()
}

async fn bootstrap(config: &Config) -> OAuthProvider {
    let storage = create_storage_from_config(&config.storage).await.unwrap();
    OAuthProvider::bootstrap(&OpContext::background(), config, storage, None)
        .await
        .unwrap()
}

fn query(location: &str) -> HashMap<String, String> {
    url::Url::parse(location)
        .unwrap()
        .query_pairs()
        .into_owned()
        .collect()
}

fn credentials() -> ClientCredentials {
    ClientCredentials::new("dashboard", Some("dashboard-secret".to_string()))
}

#[tokio::test]
async fn test_login_code_refresh_revoke() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir);
    let provider = bootstrap(&config).await;
    let ctx = OpContext::background();

    let form = Form::from_pairs([
        ("response_type", "code"),
        ("client_id", "dashboard"),
        ("redirect_uri", REDIRECT),
        ("scope", "openid mcp:read"),
        ("state", "s-1"),
    ]);

    // First pass has no identity and is sent to login
    let outcome = provider.authorize(&ctx, form, None).await.unwrap();
    let AuthorizeOutcome::LoginRequired { location } = outcome else {
        panic!("expected login redirect");
    };
    let pending = provider
        .resume_login(&query(&location)["state"])
        .expect("pending login should decode");

    // The login surface replays the stored request with an identity attached
    let replay = Form::from_pairs(query(&pending.redirect_uri));
    let identity = AuthenticatedIdentity {
        username: "alice".to_string(),
        password_auth: true,
        ..AuthenticatedIdentity::new("user-42", "users")
    };
    let outcome = provider.authorize(&ctx, replay, Some(identity)).await.unwrap();
    let params = query(outcome.location());
    assert_eq!(params["state"], "s-1");

    let tokens = provider
        .exchange_token(
            &ctx,
            TokenRequest::from_form(&Form::from_pairs([
                ("grant_type", "authorization_code"),
                ("client_id", "dashboard"),
                ("client_secret", "dashboard-secret"),
                ("code", params["code"].as_str()),
                ("redirect_uri", REDIRECT),
            ])),
        )
        .await
        .unwrap();
    assert!(tokens.id_token.is_some());
    let userinfo = provider.userinfo(&ctx, &tokens.access_token).await.unwrap();
    assert_eq!(userinfo.sub, "user-42");

    let refreshed = provider
        .exchange_token(
            &ctx,
            TokenRequest {
                grant_type: "refresh_token".to_string(),
                credentials: credentials(),
                refresh_token: tokens.refresh_token.clone(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(!provider.introspect_token(&ctx, &tokens.access_token).await.unwrap().active);
    assert!(provider.introspect_token(&ctx, &refreshed.access_token).await.unwrap().active);

    provider
        .revoke_token(&ctx, &credentials(), &refreshed.access_token)
        .await
        .unwrap();
    assert!(!provider.introspect_token(&ctx, &refreshed.access_token).await.unwrap().active);
    let err = provider
        .exchange_token(
            &ctx,
            TokenRequest {
                grant_type: "refresh_token".to_string(),
                credentials: credentials(),
                refresh_token: refreshed.refresh_token.clone(),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.protocol_code(), Some("invalid_grant"));

    // Nothing has expired yet
    let report = sweep_expired(provider.storage().as_ref(), chrono::Utc::now()).await;
    assert_eq!(report.failures, 0);
    assert_eq!(report.total_deleted(), 0);
}

#[tokio::test]
async fn test_key_and_clients_survive_restart() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir);
    let ctx = OpContext::background();

    let first = bootstrap(&config).await;
    let kid = first.keys().kid().to_string();
    let registration = first
        .register_client(
            &ctx,
            authgrant::model::ClientMetadata {
                redirect_uris: vec!["https://tool.example.com/cb".to_string()],
                ..Default::default()
            },
        )
        .await
        .unwrap();
    drop(first);

    let second = bootstrap(&config).await;
    assert_eq!(second.keys().kid(), kid);
    assert_eq!(second.clients().list_clients(&ctx).await.unwrap().len(), 2);
    second
        .clients()
        .authenticate_client(
            &ctx,
            &registration.client_id,
            registration.client_secret.as_deref(),
        )
        .await
        .unwrap();
    // Seeded clients keep their original secret hash
    second
        .clients()
        .authenticate_client(&ctx, "dashboard", Some("dashboard-secret"))
        .await
        .unwrap();
}
