use super::*;
use crate::model::{Client, GrantRow};
use crate::storage::{ClientStorage, GrantStorage, JtiStorage, MemoryStorage, ParamStorage};
use crate::{AuthGrantError, Result};
use async_trait::async_trait;
use chrono::Duration;

fn row(signature: &str, expires_at: Option<DateTime<Utc>>) -> GrantRow {
    GrantRow {
        signature: signature.to_string(),
        client_id: "C1".to_string(),
        request_id: format!("req-{}", signature),
        requested_at: Utc::now(),
        expires_at,
        scopes: "openid".to_string(),
        granted_scopes: "openid".to_string(),
        requested_audience: String::new(),
        granted_audience: String::new(),
        form_data: String::new(),
        session_data: "{}".to_string(),
        subject: "user-1".to_string(),
    }
}

#[tokio::test]
async fn test_sweep_deletes_exactly_the_expired_rows() {
    let storage = MemoryStorage::new();
    let now = Utc::now();
    let past = Some(now - Duration::minutes(1));
    let future = Some(now + Duration::minutes(1));

    for kind in GrantKind::ALL {
        storage.insert_grant(kind, &row("old", past)).await.unwrap();
        storage.insert_grant(kind, &row("fresh", future)).await.unwrap();
        storage.insert_grant(kind, &row("forever", None)).await.unwrap();
    }
    storage
        .insert_jti_if_unused("jti-old", now - Duration::seconds(5), now)
        .await
        .unwrap();
    storage
        .insert_jti_if_unused("jti-new", now + Duration::hours(1), now)
        .await
        .unwrap();

    let report = sweep_expired(&storage, now).await;
    assert_eq!(report.failures, 0);
    assert_eq!(report.total_deleted(), GrantKind::ALL.len() as u64);
    assert_eq!(report.jtis_deleted, 1);

    for kind in GrantKind::ALL {
        assert!(storage.get_grant(kind, "old").await.unwrap().is_none());
        assert!(storage.get_grant(kind, "fresh").await.unwrap().is_some());
        assert!(storage.get_grant(kind, "forever").await.unwrap().is_some());
        assert_eq!(report.deleted[kind.as_str()], 1);
    }
    assert!(storage.get_jti("jti-new").await.unwrap().is_some());
}

#[tokio::test]
async fn test_sweep_on_empty_storage() {
    let storage = MemoryStorage::new();
    let report = sweep_expired(&storage, Utc::now()).await;
    assert_eq!(report.total_deleted(), 0);
    assert_eq!(report.failures, 0);
}

/// Memory storage that refuses to delete one signature and to list one kind
struct FlakyStorage {
    inner: MemoryStorage,
    bad_signature: &'static str,
    bad_kind: GrantKind,
}

#[async_trait]
impl GrantStorage for FlakyStorage {
    async fn insert_grant(&self, kind: GrantKind, row: &GrantRow) -> Result<()> {
        self.inner.insert_grant(kind, row).await
    }

    async fn get_grant(&self, kind: GrantKind, signature: &str) -> Result<Option<GrantRow>> {
        self.inner.get_grant(kind, signature).await
    }

    async fn take_grant(&self, kind: GrantKind, signature: &str) -> Result<Option<GrantRow>> {
        self.inner.take_grant(kind, signature).await
    }

    async fn delete_grant(&self, kind: GrantKind, signature: &str) -> Result<bool> {
        if signature == self.bad_signature {
            return Err(AuthGrantError::storage("disk I/O error"));
        }
        self.inner.delete_grant(kind, signature).await
    }

    async fn delete_grants_by_request_id(&self, kind: GrantKind, request_id: &str) -> Result<u64> {
        self.inner.delete_grants_by_request_id(kind, request_id).await
    }

    async fn rotate_refresh(&self, request_id: &str, refresh_signature: &str) -> Result<()> {
        self.inner.rotate_refresh(request_id, refresh_signature).await
    }

    async fn list_expired_grants(
        &self,
        kind: GrantKind,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        if kind == self.bad_kind {
            return Err(AuthGrantError::storage("no such table"));
        }
        self.inner.list_expired_grants(kind, now).await
    }
}

#[async_trait]
impl ClientStorage for FlakyStorage {
    async fn insert_client(&self, client: &Client) -> Result<()> {
        self.inner.insert_client(client).await
    }

    async fn update_client(&self, client: &Client) -> Result<()> {
        self.inner.update_client(client).await
    }

    async fn get_client(&self, client_id: &str) -> Result<Option<Client>> {
        self.inner.get_client(client_id).await
    }

    async fn list_clients(&self) -> Result<Vec<Client>> {
        self.inner.list_clients().await
    }

    async fn delete_client(&self, client_id: &str) -> Result<bool> {
        self.inner.delete_client(client_id).await
    }
}

#[async_trait]
impl ParamStorage for FlakyStorage {
    async fn get_param(&self, key: &str) -> Result<Option<String>> {
        self.inner.get_param(key).await
    }

    async fn set_param(&self, key: &str, value: &str) -> Result<()> {
        self.inner.set_param(key, value).await
    }
}

#[async_trait]
impl JtiStorage for FlakyStorage {
    async fn get_jti(&self, jti: &str) -> Result<Option<DateTime<Utc>>> {
        self.inner.get_jti(jti).await
    }

    async fn insert_jti_if_unused(
        &self,
        jti: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.inner.insert_jti_if_unused(jti, expires_at, now).await
    }

    async fn delete_expired_jtis(&self, now: DateTime<Utc>) -> Result<u64> {
        self.inner.delete_expired_jtis(now).await
    }
}

#[tokio::test]
async fn test_failures_are_isolated_per_row_and_kind() {
    let storage = FlakyStorage {
        inner: MemoryStorage::new(),
        bad_signature: "poison",
        bad_kind: GrantKind::Pkce,
    };
    let now = Utc::now();
    let past = Some(now - Duration::minutes(1));

    for kind in GrantKind::ALL {
        storage.insert_grant(kind, &row("poison", past)).await.unwrap();
        storage.insert_grant(kind, &row("stale", past)).await.unwrap();
    }

    let report = sweep_expired(&storage, now).await;

    // Four kinds each fail one row, PKCE fails to list at all
    assert_eq!(report.failures, 5);
    assert_eq!(report.total_deleted(), 4);
    assert!(!report.deleted.contains_key(GrantKind::Pkce.as_str()));

    for kind in GrantKind::ALL {
        let stale_left = storage.get_grant(kind, "stale").await.unwrap().is_some();
        assert_eq!(stale_left, kind == GrantKind::Pkce, "kind {}", kind);
        assert!(storage.get_grant(kind, "poison").await.unwrap().is_some());
    }
}

#[tokio::test]
async fn test_sweeper_runs_on_schedule_and_stops_on_cancel() {
    let memory = Arc::new(MemoryStorage::new());
    memory
        .insert_grant(
            GrantKind::AccessToken,
            &row("old", Some(Utc::now() - Duration::minutes(5))),
        )
        .await
        .unwrap();

    let storage: Arc<dyn Storage> = Arc::clone(&memory) as Arc<dyn Storage>;
    let schedule: Schedule = "* * * * * *".parse().unwrap();
    let cancel = CancellationToken::new();
    let handle = spawn_sweeper(storage, schedule, cancel.clone());

    let mut swept = false;
    for _ in 0..40 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if memory
            .get_grant(GrantKind::AccessToken, "old")
            .await
            .unwrap()
            .is_none()
        {
            swept = true;
            break;
        }
    }
    assert!(swept, "sweeper should have removed the expired row");

    cancel.cancel();
    tokio::time::timeout(std::time::Duration::from_secs(2), handle)
        .await
        .expect("sweeper should stop after cancel")
        .unwrap();
}
