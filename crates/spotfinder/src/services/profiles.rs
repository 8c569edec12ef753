use std::sync::Arc;

use serde_json::{json, Map};

use super::users_collection;
use crate::{
    auth::{AuthUser, Identity},
    db::models::{Record, UserProfile},
    error::{AppError, Result},
    store::DocumentStore,
};

/// Username for a new profile: the email's local part.
pub fn default_username(email: &str) -> String {
    match email.split('@').next() {
        Some(prefix) if !prefix.is_empty() => prefix.to_string(),
        _ => "User".to_string(),
    }
}

#[derive(Clone)]
pub struct ProfileService {
    store: Arc<dyn DocumentStore>,
    identity: Arc<dyn Identity>,
}

impl ProfileService {
    pub fn new(store: Arc<dyn DocumentStore>, identity: Arc<dyn Identity>) -> Self {
        Self { store, identity }
    }

    pub async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>> {
        self.store
            .get_document(&users_collection().doc(user_id))
            .await?
            .map(UserProfile::from_snapshot)
            .transpose()
    }

    /// Display name for `user`, creating their profile on first use.
    /// Never fails: store errors fall back to the email prefix.
    pub async fn resolve_username(&self, user: &AuthUser) -> String {
        if user.email.is_empty() {
            return "Anonymous".to_string();
        }

        match self.get_or_create(user).await {
            Ok(profile) => profile.username,
            Err(e) => {
                tracing::warn!(user_id = %user.id, error = %e, "Error fetching username");
                default_username(&user.email)
            }
        }
    }

    pub async fn set_username(&self, user_id: &str, username: &str) -> Result<()> {
        let user = self
            .identity
            .current_user()
            .ok_or(AppError::Unauthenticated)?;
        if user.id != user_id {
            return Err(AppError::PermissionDenied(
                "You can only change your own username".to_string(),
            ));
        }

        let username = username.trim();
        if username.is_empty() {
            return Err(AppError::Validation("Username is required".to_string()));
        }

        self.get_or_create(&user).await?;

        let mut fields = Map::new();
        fields.insert("username".to_string(), json!(username));
        self.store
            .update_fields(&users_collection().doc(user_id), fields)
            .await?;

        tracing::info!(%user_id, "Username updated");
        Ok(())
    }

    async fn get_or_create(&self, user: &AuthUser) -> Result<UserProfile> {
        let doc = users_collection().doc(&user.id);

        if let Some(existing) = self.store.get_document(&doc).await? {
            return UserProfile::from_snapshot(existing);
        }

        // Concurrent first comments race here; whichever insert lands first
        // is what everybody reads back.
        let profile = UserProfile::new(&user.id, default_username(&user.email), &user.email);
        let stored = self.store.create_if_absent(&doc, profile.to_data()?).await?;
        tracing::debug!(user_id = %user.id, "Profile ensured");
        UserProfile::from_snapshot(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_username_uses_email_prefix() {
        assert_eq!(default_username("tony@hawk.com"), "tony");
        assert_eq!(default_username("a@b@c"), "a");
        assert_eq!(default_username("@example.com"), "User");
        assert_eq!(default_username("no-at-sign"), "no-at-sign");
    }
}
