use crate::database::models::Owner;
use crate::services::error::ReconciliationResult;
use async_trait::async_trait;
use std::collections::HashMap;

/// Read-only view of the user directory needed for referral bonuses.
#[async_trait]
pub trait IdentityLookup: Send + Sync {
    /// Referral code of whoever referred `owner`, if anyone.
    async fn referrer_code(&self, owner: &Owner) -> ReconciliationResult<Option<String>>;

    /// Owner whose own referral code is `code`.
    async fn by_referral_code(&self, code: &str) -> ReconciliationResult<Option<Owner>>;
}

#[derive(Debug, Clone)]
struct Profile {
    referral_code: Option<String>,
    referrer_code: Option<String>,
}

/// Fixed in-process directory, loaded at startup or built in tests.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentityLookup {
    profiles: HashMap<Owner, Profile>,
}

impl StaticIdentityLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(
        mut self,
        owner: Owner,
        referral_code: Option<&str>,
        referrer_code: Option<&str>,
    ) -> Self {
        self.profiles.insert(
            owner,
            Profile {
                referral_code: referral_code.map(str::to_string),
                referrer_code: referrer_code.map(str::to_string),
            },
        );
        self
    }
}

#[async_trait]
impl IdentityLookup for StaticIdentityLookup {
    async fn referrer_code(&self, owner: &Owner) -> ReconciliationResult<Option<String>> {
        Ok(self
            .profiles
            .get(owner)
            .and_then(|p| p.referrer_code.clone())
            .filter(|c| !c.is_empty()))
    }

    async fn by_referral_code(&self, code: &str) -> ReconciliationResult<Option<Owner>> {
        Ok(self
            .profiles
            .iter()
            .find(|(_, p)| p.referral_code.as_deref() == Some(code))
            .map(|(owner, _)| *owner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn referrer_is_resolved_through_its_code() {
        let referrer = Owner::User(Uuid::new_v4());
        let referred = Owner::User(Uuid::new_v4());
        let lookup = StaticIdentityLookup::new()
            .with_user(referrer, Some("ABC123"), None)
            .with_user(referred, Some("XYZ999"), Some("ABC123"));

        let code = lookup.referrer_code(&referred).await.unwrap();
        assert_eq!(code.as_deref(), Some("ABC123"));
        assert_eq!(lookup.by_referral_code("ABC123").await.unwrap(), Some(referrer));
        assert_eq!(lookup.referrer_code(&referrer).await.unwrap(), None);
    }
}
