//! Stateless pending-login state
//!
//! When an authorization request arrives without an authenticated identity
//! the whole request is packed into a base64url JSON blob and handed to the
//! login surface. Nothing is kept server side; the login surface sends the
//! user back to `redirect_uri`, which replays the original request.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingLogin {
    pub collection: String,
    pub client_id: String,
    pub client_name: String,
    #[serde(default)]
    pub client_uri: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub max_age: String,
    #[serde(default)]
    pub login_hint: String,
    #[serde(default)]
    pub requested_scopes: Vec<String>,
    /// Authorization endpoint URL carrying the original form, to resume at
    pub redirect_uri: String,
}

impl PendingLogin {
    pub fn encode(&self) -> String {
        // Serializing a struct of strings cannot fail
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    /// Decode a state blob. Anything unreadable yields `None` and the caller
    /// starts over as an unauthenticated request.
    pub fn decode(state: &str) -> Option<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(state.trim())
            .inspect_err(|e| debug!("Pending login state is not base64url: {}", e))
            .ok()?;
        serde_json::from_slice(&bytes)
            .inspect_err(|e| debug!("Pending login state is not valid JSON: {}", e))
            .ok()
    }

    /// Login surface URL for this state under `login_url`
    pub fn login_location(&self, login_url: &str) -> String {
        let mut url = login_url.to_string();
        url.push(if login_url.contains('?') { '&' } else { '?' });
        url.push_str("state=");
        url.push_str(&self.encode());
        url
    }
}
