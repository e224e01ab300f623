use bunstone::prelude::*;
use serde::Serialize;
use std::sync::RwLock;

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: u64,
    pub name: String,
    pub email: String,
}

pub trait UserRepository: Send + Sync {
    fn insert(&self, name: String, email: String) -> User;
    fn find(&self, id: u64) -> Option<User>;
    fn all(&self) -> Vec<User>;
}

#[derive(Injectable, Default)]
pub struct InMemoryUserRepository {
    users: RwLock<Vec<User>>,
}

impl UserRepository for InMemoryUserRepository {
    fn insert(&self, name: String, email: String) -> User {
        let mut users = self.users.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let user = User {
            id: users.len() as u64 + 1,
            name,
            email,
        };
        users.push(user.clone());
        user
    }

    fn find(&self, id: u64) -> Option<User> {
        let users = self.users.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        users.iter().find(|user| user.id == id).cloned()
    }

    fn all(&self) -> Vec<User> {
        self.users
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}
