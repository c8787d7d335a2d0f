//! SQLite storage implementation
//!
//! Provides persistent storage for grants, clients, params and JTIs using
//! SQLite. Each grant kind has its own table with the shared row shape from
//! `migrations/sqlite`.

use super::*;
use crate::constants::{TABLE_CLIENTS, TABLE_JTI, TABLE_PARAMS};
use crate::error::StorageError;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Decode a unix-seconds column
fn timestamp(column: &str, secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| {
        AuthGrantError::malformed_request(format!(
            "column {} holds out-of-range timestamp {}",
            column, secs
        ))
    })
}

const GRANT_COLUMNS: &str = "signature, client_id, request_id, requested_at, expires_at, scopes, \
     granted_scopes, requested_audience, granted_audience, form_data, session_data, subject";

const CLIENT_COLUMNS: &str = "client_id, client_name, client_secret, client_secret_expires_at, \
     redirect_uris, grant_types, response_types, scope, audience, owner, policy_uri, tos_uri, \
     client_uri, logo_uri, contacts, allowed_cors_origins, subject_type, sector_identifier_uri, \
     jwks_uri, jwks, request_uris, token_endpoint_auth_method, token_endpoint_auth_signing_alg, \
     request_object_signing_alg, userinfo_signed_response_alg, metadata, access_token_strategy, \
     created_at, updated_at";

/// SQLite storage backend
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage
    ///
    /// # Arguments
    /// * `dsn` - Database path (e.g., ".authgrant/authgrant.db" or ":memory:" for in-memory)
    pub async fn new(dsn: &str) -> Result<Self> {
        let file_path = dsn
            .strip_prefix("sqlite://")
            .or_else(|| dsn.strip_prefix("sqlite:"))
            .unwrap_or(dsn);

        // Validate path to prevent directory traversal attacks
        if file_path.contains("..") {
            return Err(AuthGrantError::config(
                "Database path cannot contain '..' (path traversal not allowed)",
            ));
        }

        let in_memory = file_path == ":memory:";

        let base = if in_memory {
            SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| StorageError::Connection(e.to_string()))?
        } else {
            if let Some(parent) = Path::new(file_path).parent()
                && !parent.as_os_str().is_empty()
            {
                tokio::fs::create_dir_all(parent).await?;
            }
            SqliteConnectOptions::new()
                .filename(file_path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
        };
        let options = base
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        // Every connection to ":memory:" is its own database, so pin one
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(8)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection(format!("Failed to connect to SQLite: {}", e)))?;

        sqlx::migrate!("./migrations/sqlite").run(&pool).await?;

        tracing::debug!(dsn = %file_path, "SQLite storage ready");
        Ok(Self { pool })
    }

    fn parse_grant(row: &SqliteRow) -> Result<GrantRow> {
        Ok(GrantRow {
            signature: row.try_get("signature")?,
            client_id: row.try_get("client_id")?,
            request_id: row.try_get("request_id")?,
            requested_at: timestamp("requested_at", row.try_get("requested_at")?)?,
            expires_at: row
                .try_get::<Option<i64>, _>("expires_at")?
                .map(|ts| timestamp("expires_at", ts))
                .transpose()?,
            scopes: row.try_get("scopes")?,
            granted_scopes: row.try_get("granted_scopes")?,
            requested_audience: row.try_get("requested_audience")?,
            granted_audience: row.try_get("granted_audience")?,
            form_data: row.try_get("form_data")?,
            session_data: row.try_get("session_data")?,
            subject: row.try_get("subject")?,
        })
    }

    fn parse_client(row: &SqliteRow) -> Result<Client> {
        let json_list = |column: &str| -> Result<Vec<String>> {
            let text: String = row.try_get(column)?;
            Ok(serde_json::from_str(&text)?)
        };
        let json_value = |column: &str| -> Result<Option<serde_json::Value>> {
            match row.try_get::<Option<String>, _>(column)? {
                Some(text) => Ok(Some(serde_json::from_str(&text)?)),
                None => Ok(None),
            }
        };

        Ok(Client {
            client_id: row.try_get("client_id")?,
            client_name: row.try_get("client_name")?,
            client_secret: row.try_get("client_secret")?,
            client_secret_expires_at: row.try_get("client_secret_expires_at")?,
            redirect_uris: json_list("redirect_uris")?,
            grant_types: json_list("grant_types")?,
            response_types: json_list("response_types")?,
            scope: row.try_get("scope")?,
            audience: json_list("audience")?,
            owner: row.try_get("owner")?,
            policy_uri: row.try_get("policy_uri")?,
            tos_uri: row.try_get("tos_uri")?,
            client_uri: row.try_get("client_uri")?,
            logo_uri: row.try_get("logo_uri")?,
            contacts: json_list("contacts")?,
            allowed_cors_origins: json_list("allowed_cors_origins")?,
            subject_type: row.try_get("subject_type")?,
            sector_identifier_uri: row.try_get("sector_identifier_uri")?,
            jwks_uri: row.try_get("jwks_uri")?,
            jwks: json_value("jwks")?,
            request_uris: json_list("request_uris")?,
            token_endpoint_auth_method: row.try_get("token_endpoint_auth_method")?,
            token_endpoint_auth_signing_alg: row.try_get("token_endpoint_auth_signing_alg")?,
            request_object_signing_alg: row.try_get("request_object_signing_alg")?,
            userinfo_signed_response_alg: row.try_get("userinfo_signed_response_alg")?,
            metadata: json_value("metadata")?,
            access_token_strategy: row.try_get("access_token_strategy")?,
            created_at: timestamp("created_at", row.try_get("created_at")?)?,
            updated_at: timestamp("updated_at", row.try_get("updated_at")?)?,
        })
    }

    /// Insert or replace a client row with all columns bound in order
    async fn write_client(&self, verb: &str, client: &Client) -> Result<u64> {
        let sql = format!(
            "{verb} INTO {TABLE_CLIENTS} ({CLIENT_COLUMNS}) VALUES \
             (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        let jwks = client.jwks.as_ref().map(serde_json::to_string).transpose()?;
        let metadata = client
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(&sql)
            .bind(&client.client_id)
            .bind(&client.client_name)
            .bind(&client.client_secret)
            .bind(client.client_secret_expires_at)
            .bind(serde_json::to_string(&client.redirect_uris)?)
            .bind(serde_json::to_string(&client.grant_types)?)
            .bind(serde_json::to_string(&client.response_types)?)
            .bind(&client.scope)
            .bind(serde_json::to_string(&client.audience)?)
            .bind(&client.owner)
            .bind(&client.policy_uri)
            .bind(&client.tos_uri)
            .bind(&client.client_uri)
            .bind(&client.logo_uri)
            .bind(serde_json::to_string(&client.contacts)?)
            .bind(serde_json::to_string(&client.allowed_cors_origins)?)
            .bind(&client.subject_type)
            .bind(&client.sector_identifier_uri)
            .bind(&client.jwks_uri)
            .bind(jwks)
            .bind(serde_json::to_string(&client.request_uris)?)
            .bind(&client.token_endpoint_auth_method)
            .bind(&client.token_endpoint_auth_signing_alg)
            .bind(&client.request_object_signing_alg)
            .bind(&client.userinfo_signed_response_alg)
            .bind(metadata)
            .bind(&client.access_token_strategy)
            .bind(client.created_at.timestamp())
            .bind(client.updated_at.timestamp())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

// Table names are interpolated only from GrantKind::table_name, never from input
#[async_trait]
impl GrantStorage for SqliteStorage {
    async fn insert_grant(&self, kind: GrantKind, row: &GrantRow) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} ({GRANT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            kind.table_name()
        );
        sqlx::query(&sql)
            .bind(&row.signature)
            .bind(&row.client_id)
            .bind(&row.request_id)
            .bind(row.requested_at.timestamp())
            .bind(row.expires_at.map(|at| at.timestamp()))
            .bind(&row.scopes)
            .bind(&row.granted_scopes)
            .bind(&row.requested_audience)
            .bind(&row.granted_audience)
            .bind(&row.form_data)
            .bind(&row.session_data)
            .bind(&row.subject)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_grant(&self, kind: GrantKind, signature: &str) -> Result<Option<GrantRow>> {
        let sql = format!(
            "SELECT {GRANT_COLUMNS} FROM {} WHERE signature = ?",
            kind.table_name()
        );
        let row = sqlx::query(&sql)
            .bind(signature)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::parse_grant).transpose()
    }

    async fn take_grant(&self, kind: GrantKind, signature: &str) -> Result<Option<GrantRow>> {
        let sql = format!(
            "DELETE FROM {} WHERE signature = ? RETURNING {GRANT_COLUMNS}",
            kind.table_name()
        );
        let row = sqlx::query(&sql)
            .bind(signature)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::parse_grant).transpose()
    }

    async fn delete_grant(&self, kind: GrantKind, signature: &str) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE signature = ?", kind.table_name());
        let result = sqlx::query(&sql)
            .bind(signature)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_grants_by_request_id(
        &self,
        kind: GrantKind,
        request_id: &str,
    ) -> Result<u64> {
        let sql = format!("DELETE FROM {} WHERE request_id = ?", kind.table_name());
        let result = sqlx::query(&sql)
            .bind(request_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn rotate_refresh(&self, request_id: &str, refresh_signature: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "DELETE FROM {} WHERE signature = ?",
            GrantKind::RefreshToken.table_name()
        );
        sqlx::query(&sql)
            .bind(refresh_signature)
            .execute(&mut *tx)
            .await?;

        let sql = format!(
            "DELETE FROM {} WHERE request_id = ?",
            GrantKind::AccessToken.table_name()
        );
        sqlx::query(&sql)
            .bind(request_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_expired_grants(
        &self,
        kind: GrantKind,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT signature FROM {} WHERE expires_at IS NOT NULL AND expires_at < ?",
            kind.table_name()
        );
        let rows = sqlx::query(&sql)
            .bind(now.timestamp())
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("signature")
                    .map_err(AuthGrantError::from)
            })
            .collect()
    }
}

#[async_trait]
impl ClientStorage for SqliteStorage {
    async fn insert_client(&self, client: &Client) -> Result<()> {
        self.write_client("INSERT", client).await?;
        Ok(())
    }

    async fn update_client(&self, client: &Client) -> Result<()> {
        if self.get_client(&client.client_id).await?.is_none() {
            return Err(AuthGrantError::not_found("client", &client.client_id));
        }
        self.write_client("INSERT OR REPLACE", client).await?;
        Ok(())
    }

    async fn get_client(&self, client_id: &str) -> Result<Option<Client>> {
        let sql = format!("SELECT {CLIENT_COLUMNS} FROM {TABLE_CLIENTS} WHERE client_id = ?");
        let row = sqlx::query(&sql)
            .bind(client_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::parse_client).transpose()
    }

    async fn list_clients(&self) -> Result<Vec<Client>> {
        let sql = format!("SELECT {CLIENT_COLUMNS} FROM {TABLE_CLIENTS} ORDER BY client_id");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(Self::parse_client).collect()
    }

    async fn delete_client(&self, client_id: &str) -> Result<bool> {
        let sql = format!("DELETE FROM {TABLE_CLIENTS} WHERE client_id = ?");
        let result = sqlx::query(&sql)
            .bind(client_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ParamStorage for SqliteStorage {
    async fn get_param(&self, key: &str) -> Result<Option<String>> {
        let sql = format!("SELECT value FROM {TABLE_PARAMS} WHERE key = ?");
        let row = sqlx::query(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(row.try_get("value")?)),
            None => Ok(None),
        }
    }

    async fn set_param(&self, key: &str, value: &str) -> Result<()> {
        let now = Utc::now().timestamp();
        let sql = format!(
            "INSERT INTO {TABLE_PARAMS} (key, value, created_at, updated_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at"
        );
        sqlx::query(&sql)
            .bind(key)
            .bind(value)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl JtiStorage for SqliteStorage {
    async fn get_jti(&self, jti: &str) -> Result<Option<DateTime<Utc>>> {
        let sql = format!("SELECT expires_at FROM {TABLE_JTI} WHERE jti = ?");
        let row = sqlx::query(&sql)
            .bind(jti)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(timestamp("expires_at", row.try_get("expires_at")?)?)),
            None => Ok(None),
        }
    }

    async fn insert_jti_if_unused(
        &self,
        jti: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        // A live row makes the upsert a no-op, so zero rows means replay
        let sql = format!(
            "INSERT INTO {TABLE_JTI} (jti, expires_at) VALUES (?, ?)
             ON CONFLICT(jti) DO UPDATE SET expires_at = excluded.expires_at
             WHERE {TABLE_JTI}.expires_at <= ?"
        );
        let result = sqlx::query(&sql)
            .bind(jti)
            .bind(expires_at.timestamp())
            .bind(now.timestamp())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_expired_jtis(&self, now: DateTime<Utc>) -> Result<u64> {
        let sql = format!("DELETE FROM {TABLE_JTI} WHERE expires_at < ?");
        let result = sqlx::query(&sql)
            .bind(now.timestamp())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
