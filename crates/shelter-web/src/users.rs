use dashmap::DashMap;

use crate::config::UserConfig;

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub username: String,
    pub email: Option<String>,
    pub password_hash: String,
}

impl From<&UserConfig> for UserRecord {
    fn from(user: &UserConfig) -> Self {
        Self {
            username: user.username.clone(),
            email: user.email.clone(),
            password_hash: user.password_hash.clone(),
        }
    }
}

/// In-memory account table, seeded from `[[users]]` at startup.
///
/// Password resets update the stored hash; changes last until restart.
pub struct UserStore {
    users: DashMap<String, UserRecord>,
}

impl UserStore {
    pub fn from_config(users: &[UserConfig]) -> Self {
        let users = users
            .iter()
            .map(|u| (u.username.clone(), UserRecord::from(u)))
            .collect();
        Self { users }
    }

    pub fn get(&self, username: &str) -> Option<UserRecord> {
        self.users.get(username).map(|entry| entry.clone())
    }

    /// Replaces the password hash. Returns `false` if the user does not exist.
    pub fn set_password_hash(&self, username: &str, password_hash: String) -> bool {
        match self.users.get_mut(username) {
            Some(mut user) => {
                user.password_hash = password_hash;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }
}
