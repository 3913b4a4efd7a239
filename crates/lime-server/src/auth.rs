//! Client authentication
//!
//! The server channel hands each credential presentation to an
//! `Authenticator`; the in-memory implementation covers the guest, plain
//! and key schemes against a static account store.

use dashmap::DashMap;

use lime_common::channel::AuthenticationResult;
use lime_common::protocol::Authentication;
use lime_common::types::{reason_codes, Identity, Reason};

/// Judges the credentials presented during session establishment
pub trait Authenticator: Send + Sync {
    fn authenticate(
        &self,
        identity: &Identity,
        authentication: &Authentication,
    ) -> AuthenticationResult;
}

/// Static in-memory account store
///
/// Accounts are keyed by the identity's name; the stored secret serves
/// both the `plain` and the `key` schemes.
#[derive(Debug, Default)]
pub struct MemoryAuthenticator {
    accounts: DashMap<String, String>,
    allow_guest: bool,
}

impl MemoryAuthenticator {
    pub fn new(allow_guest: bool) -> Self {
        Self {
            accounts: DashMap::new(),
            allow_guest,
        }
    }

    /// Register an account with a clear-text secret
    pub fn add_account(&self, name: impl Into<String>, secret: impl Into<String>) {
        self.accounts.insert(name.into(), secret.into());
    }

    fn verify_secret(&self, identity: &Identity, presented: &str) -> AuthenticationResult {
        match self.accounts.get(&identity.name) {
            Some(secret) if *secret == presented => AuthenticationResult::Success,
            _ => AuthenticationResult::Failure(Reason::new(
                reason_codes::GENERAL_ERROR,
                "invalid credentials",
            )),
        }
    }
}

impl Authenticator for MemoryAuthenticator {
    fn authenticate(
        &self,
        identity: &Identity,
        authentication: &Authentication,
    ) -> AuthenticationResult {
        match authentication {
            Authentication::Guest => {
                if self.allow_guest {
                    AuthenticationResult::Success
                } else {
                    AuthenticationResult::Failure(Reason::new(
                        reason_codes::GENERAL_ERROR,
                        "guest authentication is not enabled",
                    ))
                }
            }
            Authentication::Plain(plain) => match plain.clear_text() {
                Ok(password) => self.verify_secret(identity, &password),
                Err(_) => AuthenticationResult::Failure(Reason::new(
                    reason_codes::GENERAL_ERROR,
                    "invalid credentials",
                )),
            },
            Authentication::Key(key) => match key.clear_text() {
                Ok(key) => self.verify_secret(identity, &key),
                Err(_) => AuthenticationResult::Failure(Reason::new(
                    reason_codes::GENERAL_ERROR,
                    "invalid credentials",
                )),
            },
            Authentication::Transport | Authentication::External(_) => {
                AuthenticationResult::Failure(Reason::new(
                    reason_codes::GENERAL_ERROR,
                    "authentication scheme is not supported by this server",
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lime_common::protocol::PlainAuthentication;

    #[test]
    fn test_plain_authentication() {
        let authenticator = MemoryAuthenticator::new(false);
        authenticator.add_account("andreb", "123456");

        let identity = Identity::new("andreb", "msging.net");
        let good = Authentication::Plain(PlainAuthentication::from_clear_text("123456"));
        assert!(matches!(
            authenticator.authenticate(&identity, &good),
            AuthenticationResult::Success
        ));

        let bad = Authentication::Plain(PlainAuthentication::from_clear_text("wrong"));
        assert!(matches!(
            authenticator.authenticate(&identity, &bad),
            AuthenticationResult::Failure(_)
        ));

        let unknown = Identity::new("nobody", "msging.net");
        assert!(matches!(
            authenticator.authenticate(&unknown, &good),
            AuthenticationResult::Failure(_)
        ));
    }

    #[test]
    fn test_guest_authentication() {
        let open = MemoryAuthenticator::new(true);
        let closed = MemoryAuthenticator::new(false);
        let identity = Identity::new("visitor", "msging.net");

        assert!(matches!(
            open.authenticate(&identity, &Authentication::Guest),
            AuthenticationResult::Success
        ));
        assert!(matches!(
            closed.authenticate(&identity, &Authentication::Guest),
            AuthenticationResult::Failure(_)
        ));
    }
}
