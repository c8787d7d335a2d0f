//! Grant row mapping
//!
//! The only place where requests become rows and rows become requests.
//! List fields are `|`-joined, form data is urlencoded and the session is a
//! JSON blob. Keeping every conversion here means the empty-list boundary
//! (`""` must split to `[]`, never `[""]`) is handled once.

use crate::constants::LIST_DELIMITER;
use crate::model::{Client, Form, GrantKind, GrantRow, Request};
use crate::session::SessionEnvelope;
use crate::{AuthGrantError, Result};
use chrono::SubsecRound;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Join a scope or audience list for storage.
///
/// Values that are empty or contain the delimiter cannot survive a round
/// trip and are rejected.
pub fn join_list(values: &[String], field: &str) -> Result<String> {
    if let Some(bad) = values
        .iter()
        .find(|v| v.is_empty() || v.contains(LIST_DELIMITER))
    {
        return Err(AuthGrantError::malformed_request(format!(
            "{} value {:?} is empty or contains '{}'",
            field, bad, LIST_DELIMITER
        )));
    }
    Ok(values.join(&LIST_DELIMITER.to_string()))
}

/// Split a stored list. An empty string is an empty list.
pub fn split_list(stored: &str) -> Vec<String> {
    if stored.is_empty() {
        return Vec::new();
    }
    stored.split(LIST_DELIMITER).map(String::from).collect()
}

pub fn encode_form(form: &Form) -> String {
    form.encode()
}

/// Parse `application/x-www-form-urlencoded` data, rejecting bad escapes.
///
/// `form_urlencoded::parse` passes malformed escapes through untouched, so
/// each component is validated before decoding.
pub fn decode_form(data: &str) -> Result<Form> {
    let mut form = Form::new();
    for pair in data.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        form.append(decode_component(key)?, decode_component(value)?);
    }
    Ok(form)
}

fn decode_component(raw: &str) -> Result<String> {
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes.len() >= i + 3
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit();
            if !valid {
                return Err(AuthGrantError::malformed_request(format!(
                    "invalid percent escape in form data at byte {}",
                    i
                )));
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|decoded| decoded.into_owned())
        .map_err(|e| AuthGrantError::malformed_request(format!("form data is not UTF-8: {}", e)))
}

pub fn encode_session<S: Serialize>(session: &S) -> Result<String> {
    serde_json::to_string(session)
        .map_err(|e| AuthGrantError::malformed_session(format!("failed to encode session: {}", e)))
}

pub fn decode_session<S: DeserializeOwned>(data: &str) -> Result<S> {
    serde_json::from_str(data)
        .map_err(|e| AuthGrantError::malformed_session(format!("failed to decode session: {}", e)))
}

/// Serialize `request` into a row of `kind` keyed by `signature`.
///
/// `expires_at` is taken from the session's expiry for the token kind that
/// bounds this grant kind, when one is set.
pub fn request_to_row<S>(kind: GrantKind, signature: &str, request: &Request<S>) -> Result<GrantRow>
where
    S: SessionEnvelope + Serialize,
{
    Ok(GrantRow {
        signature: signature.to_string(),
        client_id: request.client.client_id.clone(),
        request_id: request.id.clone(),
        // Rows carry whole seconds on every backend
        requested_at: request.requested_at.trunc_subsecs(0),
        expires_at: request
            .session
            .expires_at(kind.token_kind())
            .map(|at| at.trunc_subsecs(0)),
        scopes: join_list(&request.requested_scopes, "scope")?,
        granted_scopes: join_list(&request.granted_scopes, "granted scope")?,
        requested_audience: join_list(&request.requested_audience, "audience")?,
        granted_audience: join_list(&request.granted_audience, "granted audience")?,
        form_data: encode_form(&request.form),
        session_data: encode_session(&request.session)?,
        subject: request.session.subject().to_string(),
    })
}

/// Rebuild a request from a row and its already-resolved client
pub fn row_to_request<S: DeserializeOwned>(row: GrantRow, client: Client) -> Result<Request<S>> {
    let session = decode_session(&row.session_data)?;
    let form = decode_form(&row.form_data)?;
    Ok(Request {
        id: row.request_id,
        requested_at: row.requested_at,
        client,
        requested_scopes: split_list(&row.scopes),
        granted_scopes: split_list(&row.granted_scopes),
        requested_audience: split_list(&row.requested_audience),
        granted_audience: split_list(&row.granted_audience),
        form,
        session,
    })
}
