//! Storage backends for authgrant
//!
//! Backends implement a small generic CRUD surface over grant rows, clients,
//! persisted parameters and client-assertion JTIs. The typed repositories in
//! [`grants`] and [`clients`] sit on top and own all (de)serialization.

pub mod clients;
pub mod grants;
pub mod mapping;
pub mod memory;
pub mod sqlite;

use crate::{AuthGrantError, Result, model::*};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Grant rows, one table per [`GrantKind`], keyed by signature
#[async_trait]
pub trait GrantStorage: Send + Sync {
    /// Insert a new row. A signature already live in the table is an error.
    async fn insert_grant(&self, kind: GrantKind, row: &GrantRow) -> Result<()>;

    /// Get a row by signature
    async fn get_grant(&self, kind: GrantKind, signature: &str) -> Result<Option<GrantRow>>;

    /// Atomically delete a row and return what was deleted.
    ///
    /// Concurrent callers racing on one signature see it at most once.
    async fn take_grant(&self, kind: GrantKind, signature: &str) -> Result<Option<GrantRow>>;

    /// Delete a row by signature. Returns whether a row existed.
    async fn delete_grant(&self, kind: GrantKind, signature: &str) -> Result<bool>;

    /// Delete every row in the kind's table sharing `request_id`
    async fn delete_grants_by_request_id(&self, kind: GrantKind, request_id: &str)
    -> Result<u64>;

    /// Delete the refresh row `refresh_signature` and every access row of
    /// `request_id` as one unit
    async fn rotate_refresh(&self, request_id: &str, refresh_signature: &str) -> Result<()>;

    /// Signatures of rows whose `expires_at` is before `now`
    async fn list_expired_grants(&self, kind: GrantKind, now: DateTime<Utc>)
    -> Result<Vec<String>>;
}

/// Registered clients
#[async_trait]
pub trait ClientStorage: Send + Sync {
    /// Insert a new client. An existing id is an error.
    async fn insert_client(&self, client: &Client) -> Result<()>;

    /// Replace an existing client
    async fn update_client(&self, client: &Client) -> Result<()>;

    async fn get_client(&self, client_id: &str) -> Result<Option<Client>>;

    async fn list_clients(&self) -> Result<Vec<Client>>;

    /// Returns whether a client existed
    async fn delete_client(&self, client_id: &str) -> Result<bool>;
}

/// Process parameters persisted across restarts (signing key, global secret)
#[async_trait]
pub trait ParamStorage: Send + Sync {
    async fn get_param(&self, key: &str) -> Result<Option<String>>;

    async fn set_param(&self, key: &str, value: &str) -> Result<()>;
}

/// JTIs of client assertion JWTs already seen
#[async_trait]
pub trait JtiStorage: Send + Sync {
    async fn get_jti(&self, jti: &str) -> Result<Option<DateTime<Utc>>>;

    /// Record `jti` as used until `expires_at` unless an entry still live at
    /// `now` exists. Returns `false` when the jti was already in use.
    ///
    /// The check and the write are a single atomic step.
    async fn insert_jti_if_unused(
        &self,
        jti: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    async fn delete_expired_jtis(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// Complete storage trait combining all storage capabilities
pub trait Storage: GrantStorage + ClientStorage + ParamStorage + JtiStorage {}

impl<T> Storage for T where T: GrantStorage + ClientStorage + ParamStorage + JtiStorage {}

pub use clients::ClientManager;
pub use grants::GrantStore;
pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

/// Create a storage backend from configuration
pub async fn create_storage_from_config(
    config: &crate::config::StorageConfig,
) -> Result<Arc<dyn Storage>> {
    match config.driver.as_str() {
        "memory" => Ok(Arc::new(MemoryStorage::new())),
        "sqlite" => Ok(Arc::new(SqliteStorage::new(&config.dsn).await?)),
        _ => Err(AuthGrantError::config(format!(
            "Unknown storage driver: {}. Supported: memory, sqlite",
            config.driver
        ))),
    }
}

#[cfg(test)]
mod clients_test;
#[cfg(test)]
mod storage_test;
