use std::{collections::HashMap, sync::Mutex};

use dynrender_engine::UserDirectory;
use dynrender_model::{UserId, UserProfile};

/// Profiles learned from the requests the chat bot sends us.
///
/// The bot always names the acting user, so anyone who can appear as a
/// canceller has been seen before the render task needs to resolve them.
#[derive(Default)]
pub struct KnownUsers {
    users: Mutex<HashMap<UserId, UserProfile>>,
}

impl KnownUsers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remember(&self, profile: &UserProfile) {
        let mut users = self.users.lock().unwrap_or_else(|e| e.into_inner());
        users.insert(profile.id.clone(), profile.clone());
    }

    pub fn get(&self, id: &UserId) -> Option<UserProfile> {
        if id.0 == UserProfile::SYSTEM_ID {
            return Some(UserProfile::system());
        }
        let users = self.users.lock().unwrap_or_else(|e| e.into_inner());
        users.get(id).cloned()
    }
}

#[async_trait::async_trait]
impl UserDirectory for KnownUsers {
    async fn resolve(&self, id: &UserId) -> anyhow::Result<Option<UserProfile>> {
        Ok(self.get(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_profile_wins() {
        let users = KnownUsers::new();
        let id = UserId("42".into());
        assert_eq!(users.get(&id), None);

        users.remember(&UserProfile {
            id: id.clone(),
            display_name: "old".into(),
        });
        users.remember(&UserProfile {
            id: id.clone(),
            display_name: "new".into(),
        });
        assert_eq!(users.get(&id).map(|u| u.display_name), Some("new".to_string()));
        assert_eq!(
            users.get(&UserId(UserProfile::SYSTEM_ID.into())),
            Some(UserProfile::system())
        );
    }
}
