use jsonwebtoken::{EncodingKey, Header, encode};
use tungstenite::handshake::server::Request;

use super::{Authenticator, Claims, Credential, CredentialSource, extract_credential, offered_protocol};
use crate::config::{AuthSettings, Settings};
use crate::utils::GatewayError;

fn auth_settings(secrets: &[&str]) -> AuthSettings {
    AuthSettings {
        secrets: secrets.iter().map(|s| s.to_string()).collect(),
        ..Settings::default().auth
    }
}

fn token(secret: &str, sub: &str, valid_for: chrono::Duration) -> String {
    let claims = Claims {
        sub: Some(sub.to_string()),
        exp: (chrono::Utc::now() + valid_for).timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

fn credential(token: String) -> Credential {
    Credential {
        token,
        source: CredentialSource::Query,
    }
}

fn request(uri: &str, headers: &[(&str, &str)]) -> Request {
    let mut builder = Request::builder().uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(()).unwrap()
}

#[test]
fn test_authenticate_accepts_any_configured_secret() {
    let auth = Authenticator::from_settings(&auth_settings(&["current", "previous"]));
    assert_eq!(auth.len(), 2);

    let claims = auth
        .authenticate(Some(&credential(token("current", "alice", chrono::Duration::hours(1)))))
        .unwrap();
    assert_eq!(claims.sub.as_deref(), Some("alice"));

    let claims = auth
        .authenticate(Some(&credential(token("previous", "bob", chrono::Duration::hours(1)))))
        .unwrap();
    assert_eq!(claims.sub.as_deref(), Some("bob"));
}

#[test]
fn test_authenticate_rejects_unknown_secret() {
    let auth = Authenticator::from_settings(&auth_settings(&["current"]));
    let result = auth.authenticate(Some(&credential(token("stranger", "eve", chrono::Duration::hours(1)))));
    assert!(matches!(result, Err(GatewayError::AuthFailure(_))));
}

#[test]
fn test_authenticate_rejects_expired_token() {
    let auth = Authenticator::from_settings(&auth_settings(&["current"]));
    let result = auth.authenticate(Some(&credential(token("current", "alice", chrono::Duration::hours(-2)))));
    assert!(matches!(result, Err(GatewayError::AuthFailure(_))));
}

#[test]
fn test_authenticate_rejects_missing_and_garbage() {
    let auth = Authenticator::from_settings(&auth_settings(&["current"]));
    assert!(matches!(auth.authenticate(None), Err(GatewayError::AuthFailure(_))));
    assert!(matches!(
        auth.authenticate(Some(&credential("not-a-jwt".into()))),
        Err(GatewayError::AuthFailure(_))
    ));
}

#[test]
fn test_authenticate_without_secrets_rejects_everything() {
    let auth = Authenticator::from_settings(&auth_settings(&[]));
    assert!(auth.is_empty());
    let result = auth.authenticate(Some(&credential(token("any", "alice", chrono::Duration::hours(1)))));
    assert!(matches!(result, Err(GatewayError::AuthFailure(_))));
}

#[test]
fn test_extract_from_query() {
    let settings = auth_settings(&[]);
    let req = request("/ws?league=1&token=abc%2Edef", &[]);
    assert_eq!(
        extract_credential(&req, &settings),
        Some(Credential {
            token: "abc.def".into(),
            source: CredentialSource::Query,
        })
    );
}

#[test]
fn test_extract_from_cookie() {
    let settings = auth_settings(&[]);
    let req = request("/ws", &[("Cookie", "theme=dark; token=from-cookie; lang=en")]);
    let found = extract_credential(&req, &settings).unwrap();
    assert_eq!(found.token, "from-cookie");
    assert_eq!(found.source, CredentialSource::Cookie);
}

#[test]
fn test_extract_from_bearer_header() {
    let settings = auth_settings(&[]);
    let req = request("/ws", &[("Authorization", "Bearer from-header")]);
    let found = extract_credential(&req, &settings).unwrap();
    assert_eq!(found.token, "from-header");
    assert_eq!(found.source, CredentialSource::Bearer);

    let req = request("/ws", &[("Authorization", "Basic dXNlcjpwYXNz")]);
    assert_eq!(extract_credential(&req, &settings), None);
}

#[test]
fn test_extract_from_protocol_header() {
    let settings = auth_settings(&[]);
    let req = request("/ws", &[("Sec-WebSocket-Protocol", "from-protocol, json")]);
    let found = extract_credential(&req, &settings).unwrap();
    assert_eq!(found.token, "from-protocol");
    assert_eq!(found.source, CredentialSource::Protocol);
    assert_eq!(offered_protocol(&req).as_deref(), Some("from-protocol"));
}

#[test]
fn test_extract_follows_source_priority() {
    let settings = auth_settings(&[]);
    let all = [
        ("Cookie", "token=cookie"),
        ("Authorization", "Bearer bearer"),
        ("Sec-WebSocket-Protocol", "protocol"),
    ];

    let req = request("/ws?token=query", &all);
    assert_eq!(extract_credential(&req, &settings).unwrap().source, CredentialSource::Query);

    let req = request("/ws?token=", &all);
    assert_eq!(extract_credential(&req, &settings).unwrap().source, CredentialSource::Cookie);

    let req = request("/ws", &all[1..]);
    assert_eq!(extract_credential(&req, &settings).unwrap().source, CredentialSource::Bearer);

    let req = request("/ws", &all[2..]);
    assert_eq!(extract_credential(&req, &settings).unwrap().source, CredentialSource::Protocol);

    assert_eq!(extract_credential(&request("/ws", &[]), &settings), None);
}

#[test]
fn test_extract_honours_configured_names() {
    let settings = AuthSettings {
        query_param: "access_token".into(),
        cookie_name: "session".into(),
        ..auth_settings(&[])
    };

    let req = request("/ws?token=ignored&access_token=custom", &[]);
    assert_eq!(extract_credential(&req, &settings).unwrap().token, "custom");

    let req = request("/ws", &[("Cookie", "token=ignored; session=cookie")]);
    assert_eq!(extract_credential(&req, &settings).unwrap().token, "cookie");
}
