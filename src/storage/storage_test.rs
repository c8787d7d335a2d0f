use super::*;
use crate::model::Request;
use crate::session::Session;
use chrono::{Duration, SubsecRound, Utc};

pub(super) fn sample_client(client_id: &str) -> Client {
    Client {
        client_id: client_id.to_string(),
        client_name: "Sample".to_string(),
        client_secret: Some("$2b$04$not-a-real-hash".to_string()),
        redirect_uris: vec!["https://app.example.com/cb".to_string()],
        grant_types: vec!["authorization_code".to_string(), "refresh_token".to_string()],
        response_types: vec!["code".to_string()],
        scope: "openid profile".to_string(),
        audience: vec!["https://api.example.com".to_string()],
        contacts: vec!["ops@example.com".to_string()],
        subject_type: "public".to_string(),
        jwks: Some(serde_json::json!({"keys": []})),
        metadata: Some(serde_json::json!({"tier": "gold"})),
        token_endpoint_auth_method: "client_secret_post".to_string(),
        access_token_strategy: "opaque".to_string(),
        ..Default::default()
    }
}

pub(super) fn sample_row(signature: &str, client_id: &str, request_id: &str) -> GrantRow {
    GrantRow {
        signature: signature.to_string(),
        client_id: client_id.to_string(),
        request_id: request_id.to_string(),
        // Rows reaching a backend carry whole seconds, as the mapping layer produces
        requested_at: Utc::now().trunc_subsecs(0),
        expires_at: Some((Utc::now() + Duration::hours(1)).trunc_subsecs(0)),
        scopes: "openid|profile".to_string(),
        granted_scopes: "openid".to_string(),
        requested_audience: String::new(),
        granted_audience: String::new(),
        form_data: "redirect_uri=https%3A%2F%2Fapp.example.com%2Fcb&state=xyz".to_string(),
        session_data: r#"{"subject":"u1","collection":"users"}"#.to_string(),
        subject: "u1".to_string(),
    }
}

fn with_expiry(mut row: GrantRow, expires_at: Option<DateTime<Utc>>) -> GrantRow {
    row.expires_at = expires_at;
    row
}

/// Runs the same grant assertions against any backend
async fn test_grant_operations<S: Storage>(storage: Arc<S>) {
    for kind in GrantKind::ALL {
        let sig = format!("{}-sig", kind);
        let row = sample_row(&sig, "c1", "r1");

        storage
            .insert_grant(kind, &row)
            .await
            .expect("InsertGrant should succeed");

        let found = storage
            .get_grant(kind, &sig)
            .await
            .expect("GetGrant should succeed")
            .expect("Row should exist");
        assert_eq!(found.client_id, "c1");
        assert_eq!(found.scopes, row.scopes);
        assert_eq!(found.form_data, row.form_data);
        assert_eq!(found.session_data, row.session_data);
        assert_eq!(found.requested_at, row.requested_at);
        assert_eq!(found.expires_at, row.expires_at);

        // Duplicate signature within a kind is rejected
        assert!(storage.insert_grant(kind, &row).await.is_err());

        // Kinds are isolated from each other
        for other in GrantKind::ALL.into_iter().filter(|k| *k != kind) {
            let missing = storage
                .get_grant(other, &sig)
                .await
                .expect("GetGrant should not error");
            assert!(missing.is_none(), "{} row leaked into {}", kind, other);
        }

        // Idempotent delete
        assert!(storage.delete_grant(kind, &sig).await.expect("Delete should succeed"));
        assert!(!storage.delete_grant(kind, &sig).await.expect("Second delete should succeed"));
        assert!(
            !storage
                .delete_grant(kind, "never-existed")
                .await
                .expect("Delete of absent row should succeed")
        );
    }
}

async fn test_take_operations<S: Storage>(storage: Arc<S>) {
    let row = sample_row("code-1", "c1", "r1");
    storage
        .insert_grant(GrantKind::AuthorizeCode, &row)
        .await
        .expect("InsertGrant should succeed");

    let taken = storage
        .take_grant(GrantKind::AuthorizeCode, "code-1")
        .await
        .expect("TakeGrant should succeed");
    assert_eq!(taken.map(|r| r.signature), Some("code-1".to_string()));

    let again = storage
        .take_grant(GrantKind::AuthorizeCode, "code-1")
        .await
        .expect("Second TakeGrant should not error");
    assert!(again.is_none(), "A taken row is gone");
}

async fn test_request_id_operations<S: Storage>(storage: Arc<S>) {
    storage
        .insert_grant(GrantKind::AccessToken, &sample_row("at-1", "c1", "R1"))
        .await
        .expect("Insert access should succeed");
    storage
        .insert_grant(GrantKind::AccessToken, &sample_row("at-2", "c1", "R2"))
        .await
        .expect("Insert access should succeed");
    storage
        .insert_grant(GrantKind::RefreshToken, &sample_row("rt-1", "c1", "R1"))
        .await
        .expect("Insert refresh should succeed");

    let removed = storage
        .delete_grants_by_request_id(GrantKind::AccessToken, "R1")
        .await
        .expect("DeleteByRequestId should succeed");
    assert_eq!(removed, 1);

    assert!(storage.get_grant(GrantKind::AccessToken, "at-1").await.unwrap().is_none());
    assert!(storage.get_grant(GrantKind::AccessToken, "at-2").await.unwrap().is_some());
    assert!(
        storage.get_grant(GrantKind::RefreshToken, "rt-1").await.unwrap().is_some(),
        "Refresh row survives until deleted separately"
    );

    let removed = storage
        .delete_grants_by_request_id(GrantKind::AccessToken, "unknown")
        .await
        .expect("DeleteByRequestId on absent id should succeed");
    assert_eq!(removed, 0);
}

async fn test_rotation<S: Storage>(storage: Arc<S>) {
    // Old pair
    storage
        .insert_grant(GrantKind::AccessToken, &sample_row("old-at", "c1", "old"))
        .await
        .unwrap();
    storage
        .insert_grant(GrantKind::RefreshToken, &sample_row("old-rt", "c1", "old"))
        .await
        .unwrap();
    // New pair issued before rotation
    storage
        .insert_grant(GrantKind::AccessToken, &sample_row("new-at", "c1", "new"))
        .await
        .unwrap();
    storage
        .insert_grant(GrantKind::RefreshToken, &sample_row("new-rt", "c1", "new"))
        .await
        .unwrap();

    storage
        .rotate_refresh("old", "old-rt")
        .await
        .expect("Rotation should succeed");

    assert!(storage.get_grant(GrantKind::AccessToken, "old-at").await.unwrap().is_none());
    assert!(storage.get_grant(GrantKind::RefreshToken, "old-rt").await.unwrap().is_none());
    assert!(storage.get_grant(GrantKind::AccessToken, "new-at").await.unwrap().is_some());
    assert!(storage.get_grant(GrantKind::RefreshToken, "new-rt").await.unwrap().is_some());

    // Rotating an already-rotated grant is a no-op
    storage
        .rotate_refresh("old", "old-rt")
        .await
        .expect("Repeated rotation should succeed");
}

async fn test_expiry_listing<S: Storage>(storage: Arc<S>) {
    let now = Utc::now();
    for kind in GrantKind::ALL {
        storage
            .insert_grant(
                kind,
                &with_expiry(sample_row("expired", "c1", "r"), Some(now - Duration::minutes(5))),
            )
            .await
            .unwrap();
        storage
            .insert_grant(
                kind,
                &with_expiry(sample_row("live", "c1", "r"), Some(now + Duration::minutes(5))),
            )
            .await
            .unwrap();
        storage
            .insert_grant(kind, &with_expiry(sample_row("forever", "c1", "r"), None))
            .await
            .unwrap();

        let expired = storage
            .list_expired_grants(kind, now)
            .await
            .expect("ListExpired should succeed");
        assert_eq!(expired, vec!["expired".to_string()], "kind {}", kind);
    }
}

async fn test_client_operations<S: Storage>(storage: Arc<S>) {
    let client = sample_client("c1");
    storage
        .insert_client(&client)
        .await
        .expect("InsertClient should succeed");
    assert!(storage.insert_client(&client).await.is_err(), "Duplicate id is rejected");

    let found = storage
        .get_client("c1")
        .await
        .expect("GetClient should succeed")
        .expect("Client should exist");
    assert_eq!(found.redirect_uris, client.redirect_uris);
    assert_eq!(found.grant_types, client.grant_types);
    assert_eq!(found.audience, client.audience);
    assert_eq!(found.jwks, client.jwks);
    assert_eq!(found.metadata, client.metadata);
    assert_eq!(found.client_secret, client.client_secret);

    let mut updated = found.clone();
    updated.client_name = "Renamed".to_string();
    storage
        .update_client(&updated)
        .await
        .expect("UpdateClient should succeed");
    let found = storage.get_client("c1").await.unwrap().unwrap();
    assert_eq!(found.client_name, "Renamed");

    let ghost = sample_client("ghost");
    let err = storage.update_client(&ghost).await.unwrap_err();
    assert!(err.is_not_found());

    storage.insert_client(&sample_client("c2")).await.unwrap();
    let ids: Vec<String> = storage
        .list_clients()
        .await
        .expect("ListClients should succeed")
        .into_iter()
        .map(|c| c.client_id)
        .collect();
    assert_eq!(ids, vec!["c1".to_string(), "c2".to_string()]);

    assert!(storage.delete_client("c1").await.unwrap());
    assert!(!storage.delete_client("c1").await.unwrap());
    assert!(storage.get_client("c1").await.unwrap().is_none());
}

async fn test_param_and_jti_operations<S: Storage>(storage: Arc<S>) {
    assert!(storage.get_param("k").await.unwrap().is_none());
    storage.set_param("k", "v1").await.expect("SetParam should succeed");
    storage.set_param("k", "v2").await.expect("SetParam should overwrite");
    assert_eq!(storage.get_param("k").await.unwrap().as_deref(), Some("v2"));

    let now = Utc::now();
    assert!(
        storage
            .insert_jti_if_unused("old", now - Duration::minutes(1), now)
            .await
            .expect("InsertJti should succeed")
    );
    assert!(
        storage
            .insert_jti_if_unused("fresh", now + Duration::minutes(10), now)
            .await
            .expect("InsertJti should succeed")
    );
    assert!(
        !storage
            .insert_jti_if_unused("fresh", now + Duration::minutes(20), now)
            .await
            .unwrap(),
        "A live jti must not be accepted twice"
    );

    let purged = storage
        .delete_expired_jtis(now)
        .await
        .expect("DeleteExpiredJtis should succeed");
    assert_eq!(purged, 1);
    assert!(storage.get_jti("old").await.unwrap().is_none());
    assert!(storage.get_jti("fresh").await.unwrap().is_some());
}

/// A mapped request reads back identically whichever backend stores it
async fn test_mapped_request_timestamps<S: Storage>(storage: Arc<S>) {
    let client = sample_client("c1");
    let session = Session::new("https://issuer", "u1", "users", Duration::hours(1));
    let request = Request::new(client.clone(), session);

    let row = mapping::request_to_row(GrantKind::AccessToken, "mapped", &request).unwrap();
    storage.insert_grant(GrantKind::AccessToken, &row).await.unwrap();
    let found = storage
        .get_grant(GrantKind::AccessToken, "mapped")
        .await
        .unwrap()
        .expect("Row should exist");
    let restored: Request<Session> = mapping::row_to_request(found, client).unwrap();
    assert_eq!(restored.requested_at, request.requested_at.trunc_subsecs(0));
}

async fn run_parity_suite<S: Storage>(make: impl AsyncFn() -> Arc<S>) {
    test_grant_operations(make().await).await;
    test_take_operations(make().await).await;
    test_request_id_operations(make().await).await;
    test_rotation(make().await).await;
    test_expiry_listing(make().await).await;
    test_client_operations(make().await).await;
    test_param_and_jti_operations(make().await).await;
    test_mapped_request_timestamps(make().await).await;
}

#[tokio::test]
async fn test_memory_storage_parity() {
    run_parity_suite(async || Arc::new(MemoryStorage::new())).await;
}

#[tokio::test]
async fn test_sqlite_storage_parity() {
    run_parity_suite(async || {
        Arc::new(
            SqliteStorage::new(":memory:")
                .await
                .expect("SQLite creation should succeed"),
        )
    })
    .await;
}

async fn test_concurrent_jti_use<S: Storage + 'static>(storage: Arc<S>) {
    for round in 0..20 {
        let jti = format!("jti-{round}");
        let now = Utc::now();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let storage = Arc::clone(&storage);
                let jti = jti.clone();
                tokio::spawn(async move {
                    storage
                        .insert_jti_if_unused(&jti, now + Duration::minutes(5), now)
                        .await
                        .expect("InsertJti should succeed")
                })
            })
            .collect();

        let mut accepted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1, "jti {jti} must be accepted exactly once");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_memory_concurrent_jti_use() {
    test_concurrent_jti_use(Arc::new(MemoryStorage::new())).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sqlite_concurrent_jti_use() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let db_path = temp_dir.path().join("jti.db");
    let storage = SqliteStorage::new(db_path.to_str().unwrap())
        .await
        .expect("SQLite creation should succeed");
    test_concurrent_jti_use(Arc::new(storage)).await;
}
