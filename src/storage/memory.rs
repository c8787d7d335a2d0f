//! In-memory storage implementation
//!
//! Fast, non-persistent storage for development and testing.
//! Uses DashMap for concurrent access; `take_grant` relies on
//! `DashMap::remove` so at most one caller observes a removed row.
//!
//! **WARNING:** MemoryStorage is NOT recommended for production use:
//! - Data is lost on process restart
//! - Does not coordinate state across multiple process instances
//!
//! For production deployments, use SqliteStorage.

use super::*;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// In-memory storage implementation
#[derive(Clone, Default)]
pub struct MemoryStorage {
    auth_codes: Arc<DashMap<String, GrantRow>>,
    access_tokens: Arc<DashMap<String, GrantRow>>,
    refresh_tokens: Arc<DashMap<String, GrantRow>>,
    pkce_requests: Arc<DashMap<String, GrantRow>>,
    openid_sessions: Arc<DashMap<String, GrantRow>>,
    clients: Arc<DashMap<String, Client>>,
    params: Arc<DashMap<String, String>>,
    jtis: Arc<DashMap<String, DateTime<Utc>>>,
}

impl MemoryStorage {
    /// Create a new in-memory storage
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, kind: GrantKind) -> &DashMap<String, GrantRow> {
        match kind {
            GrantKind::AuthorizeCode => &self.auth_codes,
            GrantKind::AccessToken => &self.access_tokens,
            GrantKind::RefreshToken => &self.refresh_tokens,
            GrantKind::Pkce => &self.pkce_requests,
            GrantKind::OpenIdConnect => &self.openid_sessions,
        }
    }
}

#[async_trait]
impl GrantStorage for MemoryStorage {
    async fn insert_grant(&self, kind: GrantKind, row: &GrantRow) -> Result<()> {
        match self.table(kind).entry(row.signature.clone()) {
            Entry::Occupied(_) => Err(AuthGrantError::storage(format!(
                "duplicate {} signature",
                kind
            ))),
            Entry::Vacant(entry) => {
                entry.insert(row.clone());
                Ok(())
            }
        }
    }

    async fn get_grant(&self, kind: GrantKind, signature: &str) -> Result<Option<GrantRow>> {
        Ok(self
            .table(kind)
            .get(signature)
            .map(|entry| entry.value().clone()))
    }

    async fn take_grant(&self, kind: GrantKind, signature: &str) -> Result<Option<GrantRow>> {
        Ok(self.table(kind).remove(signature).map(|(_, row)| row))
    }

    async fn delete_grant(&self, kind: GrantKind, signature: &str) -> Result<bool> {
        Ok(self.table(kind).remove(signature).is_some())
    }

    async fn delete_grants_by_request_id(
        &self,
        kind: GrantKind,
        request_id: &str,
    ) -> Result<u64> {
        let mut removed = 0u64;
        self.table(kind).retain(|_, row| {
            let keep = row.request_id != request_id;
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }

    async fn rotate_refresh(&self, request_id: &str, refresh_signature: &str) -> Result<()> {
        // Two maps cannot change as one unit. Access rows go first so a reader
        // that sees the refresh row gone never finds its access tokens alive.
        self.access_tokens
            .retain(|_, row| row.request_id != request_id);
        self.refresh_tokens.remove(refresh_signature);
        Ok(())
    }

    async fn list_expired_grants(
        &self,
        kind: GrantKind,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        Ok(self
            .table(kind)
            .iter()
            .filter(|entry| entry.value().expires_at.is_some_and(|at| at < now))
            .map(|entry| entry.key().clone())
            .collect())
    }
}

#[async_trait]
impl ClientStorage for MemoryStorage {
    async fn insert_client(&self, client: &Client) -> Result<()> {
        match self.clients.entry(client.client_id.clone()) {
            Entry::Occupied(_) => Err(AuthGrantError::storage(format!(
                "client '{}' already exists",
                client.client_id
            ))),
            Entry::Vacant(entry) => {
                entry.insert(client.clone());
                Ok(())
            }
        }
    }

    async fn update_client(&self, client: &Client) -> Result<()> {
        match self.clients.get_mut(&client.client_id) {
            Some(mut existing) => {
                *existing = client.clone();
                Ok(())
            }
            None => Err(AuthGrantError::not_found("client", &client.client_id)),
        }
    }

    async fn get_client(&self, client_id: &str) -> Result<Option<Client>> {
        Ok(self.clients.get(client_id).map(|c| c.value().clone()))
    }

    async fn list_clients(&self) -> Result<Vec<Client>> {
        let mut clients: Vec<Client> = self.clients.iter().map(|c| c.value().clone()).collect();
        clients.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        Ok(clients)
    }

    async fn delete_client(&self, client_id: &str) -> Result<bool> {
        Ok(self.clients.remove(client_id).is_some())
    }
}

#[async_trait]
impl ParamStorage for MemoryStorage {
    async fn get_param(&self, key: &str) -> Result<Option<String>> {
        Ok(self.params.get(key).map(|v| v.value().clone()))
    }

    async fn set_param(&self, key: &str, value: &str) -> Result<()> {
        self.params.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[async_trait]
impl JtiStorage for MemoryStorage {
    async fn get_jti(&self, jti: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.jtis.get(jti).map(|v| *v.value()))
    }

    async fn insert_jti_if_unused(
        &self,
        jti: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        // The entry guard holds the shard lock across the check and the write
        match self.jtis.entry(jti.to_string()) {
            Entry::Occupied(mut entry) => {
                if *entry.get() > now {
                    return Ok(false);
                }
                entry.insert(expires_at);
                Ok(true)
            }
            Entry::Vacant(entry) => {
                entry.insert(expires_at);
                Ok(true)
            }
        }
    }

    async fn delete_expired_jtis(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut removed = 0u64;
        self.jtis.retain(|_, expires_at| {
            let keep = *expires_at >= now;
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }
}
