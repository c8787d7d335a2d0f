use super::*;
use chrono::Duration;

fn sample_session() -> Session {
    let mut session = Session::new("https://auth.example.com", "user_1", "users", Duration::hours(6));
    session.claims.amr = vec!["pwd".to_string()];
    session.claims.acr = "loa1".to_string();
    session
        .claims
        .extra
        .insert("tenant".to_string(), Value::from("acme"));
    session
}

#[test]
fn test_new_session_populates_claims() {
    let session = sample_session();
    assert_eq!(session.subject(), "user_1");
    assert_eq!(session.collection(), "users");
    assert_eq!(session.claims.issuer, "https://auth.example.com");
    assert_eq!(session.claims.subject, "user_1");
    let iat = session.claims.issued_at.expect("iat should be set");
    let exp = session.claims.expires_at.expect("exp should be set");
    assert_eq!((exp - iat).num_hours(), 6);
}

#[test]
fn test_jwt_claims_inject_collection() {
    let session = sample_session();
    let claims = session.jwt_claims();
    assert_eq!(claims.get(CLAIM_COLLECTION), Some(&Value::from("users")));
    assert_eq!(claims.get("sub"), Some(&Value::from("user_1")));
    assert_eq!(claims.get("acr"), Some(&Value::from("loa1")));
    assert_eq!(claims.get("tenant"), Some(&Value::from("acme")));
    assert!(claims.get("exp").and_then(Value::as_i64).is_some());
}

#[test]
fn test_jwt_claims_collection_overrides_extra() {
    let mut session = sample_session();
    session
        .claims
        .extra
        .insert(CLAIM_COLLECTION.to_string(), Value::from("spoofed"));
    let claims = session.jwt_claims();
    assert_eq!(claims.get(CLAIM_COLLECTION), Some(&Value::from("users")));
}

#[test]
fn test_clone_is_independent() {
    let original = sample_session();
    let mut copy = original.clone();

    copy.claims.amr.push("mfa".to_string());
    copy.claims
        .extra
        .insert("tenant".to_string(), Value::from("other"));
    copy.set_expires_at(TokenKind::AccessToken, Utc::now());
    copy.subject = "user_2".to_string();

    assert_eq!(original.claims.amr, vec!["pwd".to_string()]);
    assert_eq!(original.claims.extra.get("tenant"), Some(&Value::from("acme")));
    assert!(original.expires_at(TokenKind::AccessToken).is_none());
    assert_eq!(original.subject, "user_1");
}

#[test]
fn test_expiry_per_token_kind() {
    let mut session = sample_session();
    let now = Utc::now();
    session.set_expires_at(TokenKind::AuthorizeCode, now - Duration::seconds(1));
    session.set_expires_at(TokenKind::AccessToken, now + Duration::hours(1));

    assert!(session.is_expired(TokenKind::AuthorizeCode, now));
    assert!(!session.is_expired(TokenKind::AccessToken, now));
    assert!(!session.is_expired(TokenKind::RefreshToken, now));
}

#[test]
fn test_session_json_roundtrip_preserves_expiries() {
    let mut session = sample_session();
    let at = DateTime::from_timestamp(1_900_000_000, 0).expect("valid timestamp");
    session.set_expires_at(TokenKind::RefreshToken, at);

    let json = serde_json::to_string(&session).expect("serialize should succeed");
    assert!(json.contains("refresh_token"));
    let decoded: Session = serde_json::from_str(&json).expect("deserialize should succeed");
    assert_eq!(decoded, session);
}
