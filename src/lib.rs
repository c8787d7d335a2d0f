//! authgrant - OAuth 2.0 / OpenID Connect grants for embedded authorization servers
//!
//! This library persists authorization grants and mints the tokens that
//! reference them. It can be:
//! - Embedded in a host application that owns user login
//! - Run as a CLI tool (`authgrant` binary) for client management and sweeping
//!
//! # Architecture
//!
//! - [`storage`]: grant, client, parameter and JTI persistence (memory, SQLite)
//! - [`strategy`]: opaque HMAC, identity-bound and JWT access tokens, ID tokens
//! - [`provider`]: the authorization, token, revocation and introspection flows
//! - [`sweep`]: scheduled deletion of expired grants
//!
//! # Example
//!
//! ```rust,no_run
//! use authgrant::config::Config;
//! use authgrant::context::OpContext;
//! use authgrant::provider::OAuthProvider;
//! use authgrant::storage::create_storage_from_config;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load()?;
//!     let storage = create_storage_from_config(&config.storage).await?;
//!     let ctx = OpContext::background();
//!     let provider = OAuthProvider::bootstrap(&ctx, &config, storage, None).await?;
//!     println!("{}", serde_json::to_string_pretty(&provider.openid_configuration())?);
//!     Ok(())
//! }
//! ```

// Core modules
pub mod constants;
pub mod context;
pub mod error;
pub mod model;
pub mod session;

// Infrastructure
pub mod config;
pub mod hasher;
pub mod keys;
pub mod storage;
pub mod telemetry;

// Protocol
pub mod pending;
pub mod provider;
pub mod resource;
pub mod strategy;
pub mod sweep;

pub mod cli;

pub use error::{AuthGrantError, Result};
pub use provider::OAuthProvider;

/// Initialize logging for the application.
///
/// `RUST_LOG` wins over the configured level. Safe to call more than once;
/// later calls are ignored.
pub fn init_logging(log: Option<&config::LogConfig>) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let level = log.and_then(|l| l.level.as_deref()).unwrap_or("info");
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("authgrant={}", level)));
    let json = log.and_then(|l| l.format.as_deref()) == Some("json");

    let registry = tracing_subscriber::registry().with(filter);
    let _ = if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
}
