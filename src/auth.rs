//! Authorization gate for token mutations.
//!
//! The registry asks three questions and nothing more: may this user manage
//! a token, administer it, or run services as some target user. Deployments
//! with an external entitlement system implement [`Authorizer`] against it;
//! the built-in [`PlatformAuthorizer`] covers the owner-plus-admins model.

use std::collections::BTreeSet;

use crate::registry::TokenMetadata;

pub trait Authorizer: Send + Sync {
    /// May `user` perform administrative operations (hard delete, system
    /// metadata writes) on the token?
    fn administer_token(&self, user: &str, token: &str, metadata: &TokenMetadata) -> bool;

    /// May `user` manage the token: update it, transfer it, delete it?
    fn manage_token(&self, user: &str, token: &str, metadata: &TokenMetadata) -> bool;

    /// May `user` run services as `target`?
    fn run_as(&self, user: &str, target: &str) -> bool;
}

/// Owner-or-admin authorization: owners manage their own tokens, configured
/// administrators manage and administer everything, users run as themselves.
pub struct PlatformAuthorizer {
    admins: BTreeSet<String>,
}

impl PlatformAuthorizer {
    pub fn new(admins: BTreeSet<String>) -> Self {
        Self { admins }
    }

    fn is_admin(&self, user: &str) -> bool {
        self.admins.contains(user)
    }
}

impl Authorizer for PlatformAuthorizer {
    fn administer_token(&self, user: &str, _token: &str, _metadata: &TokenMetadata) -> bool {
        self.is_admin(user)
    }

    fn manage_token(&self, user: &str, _token: &str, metadata: &TokenMetadata) -> bool {
        metadata.owner.as_deref() == Some(user) || self.is_admin(user)
    }

    fn run_as(&self, user: &str, target: &str) -> bool {
        user == target || self.is_admin(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authz() -> PlatformAuthorizer {
        PlatformAuthorizer::new(["admin".to_string()].into_iter().collect())
    }

    fn owned_by(owner: &str) -> TokenMetadata {
        TokenMetadata {
            owner: Some(owner.to_string()),
            ..TokenMetadata::default()
        }
    }

    #[test]
    fn test_owner_manages_own_token() {
        let authz = authz();
        assert!(authz.manage_token("alice", "t1", &owned_by("alice")));
        assert!(!authz.manage_token("bob", "t1", &owned_by("alice")));
    }

    #[test]
    fn test_admin_manages_and_administers_everything() {
        let authz = authz();
        assert!(authz.manage_token("admin", "t1", &owned_by("alice")));
        assert!(authz.administer_token("admin", "t1", &owned_by("alice")));
        assert!(!authz.administer_token("alice", "t1", &owned_by("alice")));
    }

    #[test]
    fn test_run_as_self_or_admin() {
        let authz = authz();
        assert!(authz.run_as("alice", "alice"));
        assert!(!authz.run_as("alice", "bob"));
        assert!(authz.run_as("admin", "bob"));
    }

    #[test]
    fn test_ownerless_metadata_is_admin_only() {
        let authz = authz();
        let metadata = TokenMetadata::default();
        assert!(!authz.manage_token("alice", "t1", &metadata));
        assert!(authz.manage_token("admin", "t1", &metadata));
    }
}
