//! Passcode login and session cookies.
//!
//! Staff users are configured with a slug, a display name and a passcode
//! (see [`crate::config`]). Logging in with a passcode yields a session
//! token of the form `slug:hex(sha256(passcode + secret))`, stored in the
//! `auth_session` cookie. Validating a session recomputes the hash for the
//! named user and compares it in constant time.
//!
//! # Example
//!
//! ```rust
//! use studio_server::auth::{parse_session, validate_passcode, StaffUser};
//!
//! let users = vec![StaffUser {
//!     slug: "cody".to_string(),
//!     name: "Cody".to_string(),
//!     passcode: "1234".to_string(),
//! }];
//!
//! let login = validate_passcode(&users, "secret", " 1234 ").unwrap();
//! let user = parse_session(&users, "secret", &login.token).unwrap();
//! assert_eq!(user.slug, "cody");
//! ```

use axum::http::header::COOKIE;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "auth_session";

/// Session lifetime in seconds (7 days).
pub const SESSION_MAX_AGE_SECS: u64 = 60 * 60 * 24 * 7;

/// Header that may carry the passcode secret for log access.
pub const PASSCODE_HEADER: &str = "x-passcode";

/// Errors that can occur during login or session validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No user has the supplied passcode.
    #[error("Invalid passcode")]
    InvalidPasscode,

    /// The cookie value is not `slug:hash`.
    #[error("malformed session")]
    MalformedSession,

    /// The session names a user that is not configured.
    #[error("unknown user: {0}")]
    UnknownUser(String),

    /// The session hash does not match.
    #[error("invalid session")]
    InvalidSession,
}

/// A configured staff user.
#[derive(Clone, PartialEq, Eq)]
pub struct StaffUser {
    pub slug: String,
    pub name: String,
    pub passcode: String,
}

impl std::fmt::Debug for StaffUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaffUser")
            .field("slug", &self.slug)
            .field("name", &self.name)
            .field("passcode", &"<redacted>")
            .finish()
    }
}

/// The public identity of a logged-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub slug: String,
    pub name: String,
}

impl From<&StaffUser> for AuthenticatedUser {
    fn from(user: &StaffUser) -> Self {
        Self {
            slug: user.slug.clone(),
            name: user.name.clone(),
        }
    }
}

/// A successful login.
#[derive(Debug, Clone)]
pub struct Login {
    pub user: AuthenticatedUser,
    /// Value for the session cookie.
    pub token: String,
}

/// Constant-time string comparison.
pub fn secrets_match(provided: &str, expected: &str) -> bool {
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Hex-encoded SHA-256 of `passcode` followed by `secret`.
pub fn hash_passcode(passcode: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(passcode.as_bytes());
    hasher.update(secret.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Session token for `user`.
pub fn session_token(user: &StaffUser, secret: &str) -> String {
    format!("{}:{}", user.slug, hash_passcode(&user.passcode, secret))
}

/// Finds the user with `passcode` (surrounding whitespace ignored) and
/// issues a session token.
///
/// # Errors
///
/// Returns [`AuthError::InvalidPasscode`] if no user matches.
pub fn validate_passcode(
    users: &[StaffUser],
    secret: &str,
    passcode: &str,
) -> Result<Login, AuthError> {
    let passcode = passcode.trim();
    if passcode.is_empty() {
        return Err(AuthError::InvalidPasscode);
    }

    let user = users
        .iter()
        .find(|u| secrets_match(passcode, &u.passcode))
        .ok_or(AuthError::InvalidPasscode)?;

    Ok(Login {
        user: user.into(),
        token: session_token(user, secret),
    })
}

/// Validates a session cookie value.
///
/// # Errors
///
/// Returns an [`AuthError`] describing why the session is not valid.
pub fn parse_session(
    users: &[StaffUser],
    secret: &str,
    cookie_value: &str,
) -> Result<AuthenticatedUser, AuthError> {
    let (slug, token) = cookie_value
        .split_once(':')
        .filter(|(slug, token)| !slug.is_empty() && !token.is_empty())
        .ok_or(AuthError::MalformedSession)?;

    let user = users
        .iter()
        .find(|u| u.slug == slug)
        .ok_or_else(|| AuthError::UnknownUser(slug.to_string()))?;

    if !secrets_match(token, &hash_passcode(&user.passcode, secret)) {
        return Err(AuthError::InvalidSession);
    }

    Ok(user.into())
}

/// Extracts a cookie value from request headers.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

/// `Set-Cookie` value establishing a session.
pub fn session_cookie(token: &str) -> String {
    format!(
        "{SESSION_COOKIE}={token}; HttpOnly; SameSite=Lax; Path=/; Max-Age={SESSION_MAX_AGE_SECS}"
    )
}

/// `Set-Cookie` value clearing the session.
pub fn expired_session_cookie() -> String {
    format!("{SESSION_COOKIE}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0")
}
