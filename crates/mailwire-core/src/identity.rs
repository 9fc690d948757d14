use serde::{Deserialize, Serialize};

use crate::ids::UserId;

/// An authenticated user principal.
///
/// Resolved once per connection at connect time and immutable for the
/// connection's lifetime. The principal is the user's canonical email
/// address as stored in the identity store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: UserId,
    pub principal: String,
}

impl Identity {
    pub fn new(user_id: UserId, principal: impl Into<String>) -> Self {
        Self {
            user_id,
            principal: principal.into(),
        }
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.principal)
    }
}

/// Syntactic email validation. One `@`, non-empty local part, dotted
/// domain, no whitespace. Deliverability (MX records etc.) is not checked.
pub fn validate_email(addr: &str) -> bool {
    if addr.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = addr.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    let Some((host, tld)) = domain.rsplit_once('.') else {
        return false;
    };
    !host.is_empty() && !tld.is_empty()
}
