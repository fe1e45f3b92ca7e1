//! Credential extraction from the WebSocket upgrade request.

use tungstenite::handshake::server::Request;
use tungstenite::http::header::{AUTHORIZATION, COOKIE, SEC_WEBSOCKET_PROTOCOL};
use url::form_urlencoded;

use crate::config::AuthSettings;

/// Where a token was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Query,
    Cookie,
    Bearer,
    Protocol,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub source: CredentialSource,
}

/// Look for a token in the query string, the auth cookie, the
/// `Authorization: Bearer` header and the `Sec-WebSocket-Protocol` header,
/// in that order. The first non-empty one wins.
pub fn extract_credential(request: &Request, settings: &AuthSettings) -> Option<Credential> {
    let found = |token: String, source| Some(Credential { token, source });

    if let Some(token) = from_query(request, &settings.query_param) {
        return found(token, CredentialSource::Query);
    }
    if let Some(token) = from_cookie(request, &settings.cookie_name) {
        return found(token, CredentialSource::Cookie);
    }
    if let Some(token) = from_bearer(request) {
        return found(token, CredentialSource::Bearer);
    }
    offered_protocol(request).and_then(|token| found(token, CredentialSource::Protocol))
}

/// First value offered in `Sec-WebSocket-Protocol`. This is also the value
/// the server echoes back, otherwise browsers abort the upgrade.
pub fn offered_protocol(request: &Request) -> Option<String> {
    request
        .headers()
        .get(SEC_WEBSOCKET_PROTOCOL)?
        .to_str()
        .ok()?
        .split(',')
        .map(str::trim)
        .find(|p| !p.is_empty())
        .map(str::to_string)
}

fn from_query(request: &Request, param: &str) -> Option<String> {
    let query = request.uri().query()?;
    form_urlencoded::parse(query.as_bytes())
        .find(|(key, value)| key == param && !value.is_empty())
        .map(|(_, value)| value.into_owned())
}

fn from_cookie(request: &Request, name: &str) -> Option<String> {
    request
        .headers()
        .get_all(COOKIE)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(|header| header.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, value)| *key == name && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

fn from_bearer(request: &Request) -> Option<String> {
    let header = request.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then(|| token.to_string())
}
