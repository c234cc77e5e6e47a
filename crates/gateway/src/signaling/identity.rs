//! Session identity carried in a cookie

use crate::session::SessionId;
use axum::http::{header, HeaderMap};
use uuid::Uuid;

/// Longest session id accepted from a cookie
pub const MAX_SESSION_ID_LEN: usize = 128;

/// Identity resolved at WebSocket upgrade time
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionIdentity {
    /// Taken from the request cookie
    Existing(SessionId),
    /// Freshly generated; must be returned with `Set-Cookie`
    Issued(SessionId),
    /// Cookie present but unusable
    Undetermined,
}

impl ConnectionIdentity {
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            ConnectionIdentity::Existing(id) | ConnectionIdentity::Issued(id) => Some(id),
            ConnectionIdentity::Undetermined => None,
        }
    }
}

/// Resolve the identity for a request from its `Cookie` headers
pub fn resolve(headers: &HeaderMap, cookie_name: &str) -> ConnectionIdentity {
    let value = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(|cookies| cookie_value(cookies, cookie_name));

    match value {
        None => ConnectionIdentity::Issued(generate_session_id()),
        Some(value) if is_valid_session_id(value) => ConnectionIdentity::Existing(SessionId::from(value)),
        Some(_) => ConnectionIdentity::Undetermined,
    }
}

/// Value of cookie `name` in a `Cookie` header
fn cookie_value<'a>(cookies: &'a str, name: &str) -> Option<&'a str> {
    cookies.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key.trim() == name).then(|| value.trim().trim_matches('"'))
    })
}

pub fn is_valid_session_id(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_SESSION_ID_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
}

pub fn generate_session_id() -> SessionId {
    SessionId::new(Uuid::new_v4().to_string())
}

/// `Set-Cookie` header value for an issued id
pub fn set_cookie_value(cookie_name: &str, id: &SessionId) -> String {
    format!("{}={}; Path=/; HttpOnly; SameSite=Lax", cookie_name, id)
}
