//! Protected resource metadata (RFC 9728)
//!
//! Resources register once at startup; metadata endpoints read on every
//! request. Entries are keyed by the resource URL path with surrounding
//! slashes trimmed, so `https://api.example.com/mcp/` is found under `mcp`.

use crate::{AuthGrantError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Well-known path prefix the metadata documents are served under
pub const WELL_KNOWN_PATH: &str = "/.well-known/oauth-protected-resource";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedResourceMetadata {
    pub resource: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authorization_servers: Vec<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub jwks_uri: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes_supported: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bearer_methods_supported: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_signing_alg_values_supported: Vec<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_documentation: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_policy_uri: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_tos_uri: String,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub tls_client_certificate_bound_access_tokens: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authorization_details_types_supported: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dpop_signing_alg_values_supported: Vec<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub dpop_bound_access_tokens_required: bool,
}

impl ProtectedResourceMetadata {
    /// Registry key for this resource
    pub fn path_key(&self) -> Result<String> {
        let url = url::Url::parse(&self.resource).map_err(|e| {
            AuthGrantError::config(format!("resource '{}' is not a URL: {}", self.resource, e))
        })?;
        Ok(url.path().trim_matches('/').to_string())
    }
}

#[derive(Debug, Default)]
pub struct ProtectedResourceRegistry {
    entries: RwLock<HashMap<String, ProtectedResourceMetadata>>,
}

impl ProtectedResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the metadata for a resource. Returns its key.
    pub fn register(&self, metadata: ProtectedResourceMetadata) -> Result<String> {
        let key = metadata.path_key()?;
        tracing::debug!(path = %key, resource = %metadata.resource, "Protected resource registered");
        self.entries.write().insert(key.clone(), metadata);
        Ok(key)
    }

    /// Metadata for a request path, with or without surrounding slashes
    pub fn get(&self, path: &str) -> Option<ProtectedResourceMetadata> {
        self.entries.read().get(path.trim_matches('/')).cloned()
    }

    /// Registered keys, sorted
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.entries.read().keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Where clients discover the metadata of the resource at `path`
pub fn metadata_url(app_url: &str, path: &str) -> String {
    format!(
        "{}{}/{}",
        app_url.trim_end_matches('/'),
        WELL_KNOWN_PATH,
        path.trim_matches('/')
    )
}

/// `WWW-Authenticate` challenge for an unauthenticated call to `path`
pub fn www_authenticate(app_url: &str, path: &str) -> String {
    format!(
        "Bearer error=\"invalid_token\", error_description=\"The access token provided is expired, revoked, malformed, or invalid for other reasons.\", resource_metadata=\"{}\"",
        metadata_url(app_url, path)
    )
}

#[cfg(test)]
mod resource_test {
    use super::*;
    use std::sync::Arc;

    fn metadata(resource: &str) -> ProtectedResourceMetadata {
        ProtectedResourceMetadata {
            resource: resource.to_string(),
            authorization_servers: vec!["https://auth.example.com".to_string()],
            scopes_supported: vec!["mcp:read".to_string()],
            bearer_methods_supported: vec!["header".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_register_keys_by_trimmed_path() {
        let registry = ProtectedResourceRegistry::new();
        let key = registry
            .register(metadata("https://api.example.com/mcp/v1/"))
            .unwrap();
        assert_eq!(key, "mcp/v1");
        assert!(registry.get("/mcp/v1").is_some());
        assert!(registry.get("mcp/v1/").is_some());
        assert!(registry.get("mcp").is_none());
    }

    #[test]
    fn test_register_replaces_and_lists_sorted() {
        let registry = ProtectedResourceRegistry::new();
        registry.register(metadata("https://a.example.com/zeta")).unwrap();
        registry.register(metadata("https://a.example.com/alpha")).unwrap();

        let mut updated = metadata("https://a.example.com/alpha");
        updated.resource_name = "Alpha".to_string();
        registry.register(updated).unwrap();

        assert_eq!(registry.paths(), vec!["alpha", "zeta"]);
        assert_eq!(registry.get("alpha").unwrap().resource_name, "Alpha");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_register_rejects_non_url() {
        let registry = ProtectedResourceRegistry::new();
        let err = registry.register(metadata("not a url")).unwrap_err();
        assert!(matches!(err, AuthGrantError::Config(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_serialization_omits_empty_fields() {
        let json = serde_json::to_value(metadata("https://api.example.com/mcp")).unwrap();
        assert_eq!(json["resource"], "https://api.example.com/mcp");
        assert!(json.get("jwks_uri").is_none());
        assert!(json.get("dpop_bound_access_tokens_required").is_none());
    }

    #[test]
    fn test_www_authenticate_points_at_metadata() {
        let header = www_authenticate("https://app.example.com/", "/api/mcp/");
        assert!(header.starts_with("Bearer error=\"invalid_token\""));
        assert!(header.ends_with(
            "resource_metadata=\"https://app.example.com/.well-known/oauth-protected-resource/api/mcp\""
        ));
    }

    #[test]
    fn test_concurrent_readers_see_registered_entry() {
        let registry = Arc::new(ProtectedResourceRegistry::new());
        registry.register(metadata("https://api.example.com/mcp")).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.get("mcp").is_some())
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
    }
}
