//! Discovery documents (RFC 8414, OpenID Connect Discovery)

use super::OAuthProvider;
use crate::constants::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationServerMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_endpoint: Option<String>,
    pub revocation_endpoint: String,
    pub introspection_endpoint: String,
    pub response_types_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
    pub code_challenge_methods_supported: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenIdProviderMetadata {
    #[serde(flatten)]
    pub authorization_server: AuthorizationServerMetadata,
    pub userinfo_endpoint: String,
    pub jwks_uri: String,
    pub subject_types_supported: Vec<String>,
    pub id_token_signing_alg_values_supported: Vec<String>,
    pub claims_supported: Vec<String>,
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

impl OAuthProvider {
    /// `/.well-known/oauth-authorization-server`
    pub fn authorization_server_metadata(&self) -> AuthorizationServerMetadata {
        let config = self.config();
        AuthorizationServerMetadata {
            issuer: config.issuer.clone(),
            authorization_endpoint: config.endpoint_url(ENDPOINT_AUTHORIZE),
            token_endpoint: config.endpoint_url(ENDPOINT_TOKEN),
            registration_endpoint: config
                .enable_dynamic_client_registration
                .then(|| config.endpoint_url(ENDPOINT_REGISTER)),
            revocation_endpoint: config.endpoint_url(ENDPOINT_REVOKE),
            introspection_endpoint: config.endpoint_url(ENDPOINT_INTROSPECT),
            response_types_supported: strings(&[RESPONSE_TYPE_CODE]),
            grant_types_supported: strings(&[
                GRANT_AUTHORIZATION_CODE,
                GRANT_REFRESH_TOKEN,
                GRANT_CLIENT_CREDENTIALS,
            ]),
            token_endpoint_auth_methods_supported: strings(&[
                AUTH_METHOD_CLIENT_SECRET_POST,
                AUTH_METHOD_CLIENT_SECRET_BASIC,
                AUTH_METHOD_NONE,
            ]),
            code_challenge_methods_supported: strings(&[PKCE_METHOD_S256, PKCE_METHOD_PLAIN]),
        }
    }

    /// `/.well-known/openid-configuration`
    pub fn openid_configuration(&self) -> OpenIdProviderMetadata {
        let config = self.config();
        OpenIdProviderMetadata {
            authorization_server: self.authorization_server_metadata(),
            userinfo_endpoint: config.endpoint_url(ENDPOINT_USERINFO),
            jwks_uri: format!("{}{}", config.issuer.trim_end_matches('/'), JWKS_PATH),
            subject_types_supported: strings(&["public"]),
            id_token_signing_alg_values_supported: strings(&["RS256"]),
            claims_supported: strings(&[
                "sub",
                "iss",
                "aud",
                "exp",
                "iat",
                "auth_time",
                "nonce",
                "acr",
                "amr",
                CLAIM_COLLECTION,
            ]),
        }
    }
}
