use std::sync::Arc;

use axum::http::header::COOKIE;
use axum::http::HeaderMap;

use mailwire_core::Identity;
use mailwire_store::{SessionRepo, StoreError, UserRepo};

use crate::cookie::{CredentialCodec, SESSION_COOKIE};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The identity store holds zero or multiple records for a principal
    /// the session store vouched for. Fatal for the request; never resolved
    /// by silently picking one.
    #[error("identity store returned {matches} records for {principal}")]
    IdentityLookup { principal: String, matches: usize },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Resolves the identity behind a request's session cookie.
///
/// Pure lookup; no side effects, safe to call repeatedly. `Ok(None)` is the
/// normal unauthenticated outcome (absent cookie, tampered cookie, expired
/// or unknown session), not an error.
pub struct SessionAuthenticator {
    codec: Arc<CredentialCodec>,
    sessions: Arc<SessionRepo>,
    users: Arc<UserRepo>,
}

impl SessionAuthenticator {
    pub fn new(
        codec: Arc<CredentialCodec>,
        sessions: Arc<SessionRepo>,
        users: Arc<UserRepo>,
    ) -> Self {
        Self {
            codec,
            sessions,
            users,
        }
    }

    pub fn authenticate(&self, headers: &HeaderMap) -> Result<Option<Identity>, AuthError> {
        let Some(token) = self.session_token(headers) else {
            return Ok(None);
        };

        let Some(session) = self.sessions.lookup(&token)? else {
            return Ok(None);
        };

        let mut matches = self.users.find_by_principal(&session.principal)?;
        if matches.len() != 1 {
            tracing::error!(
                principal = %session.principal,
                matches = matches.len(),
                "identity store integrity violation"
            );
            return Err(AuthError::IdentityLookup {
                principal: session.principal,
                matches: matches.len(),
            });
        }

        let user = matches.remove(0);
        Ok(Some(Identity::new(user.id, user.email)))
    }

    /// The raw session token from the request, if the cookie is present and
    /// decodes. Used by logout to delete the session row.
    pub fn session_token(&self, headers: &HeaderMap) -> Option<String> {
        let raw = cookie_value(headers, SESSION_COOKIE)?;
        self.codec.decode(SESSION_COOKIE, &raw)
    }
}

/// Extract a cookie value from request headers.
pub(crate) fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(raw) = header.to_str() else { continue };
        for pair in raw.split(';') {
            let Some((key, value)) = pair.trim().split_once('=') else {
                continue;
            };
            if key == name {
                return Some(value.to_string());
            }
        }
    }
    None
}
