//! Persistence contract for accounts and scores
//!
//! States talk to storage only through the [`Store`] trait. [`MemoryStore`]
//! is the implementation the server binary runs with.

use crate::error::StoreError;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerRecord {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub best_score: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreRow {
    pub name: String,
    pub best_score: i64,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_user_by_username(&self, username: &str) -> Result<User, StoreError>;

    async fn create_user(&self, username: &str, password_hash: &str) -> Result<User, StoreError>;

    async fn get_player_by_user_id(&self, user_id: i64) -> Result<PlayerRecord, StoreError>;

    async fn create_player(&self, user_id: i64, name: &str) -> Result<PlayerRecord, StoreError>;

    async fn update_player_best_score(&self, player_id: i64, best_score: i64)
        -> Result<(), StoreError>;

    /// Best scores in descending order, skipping the first `offset` rows.
    async fn get_top_scores(&self, limit: usize, offset: usize) -> Result<Vec<ScoreRow>, StoreError>;
}

#[derive(Default)]
struct Tables {
    users: HashMap<i64, User>,
    players: HashMap<i64, PlayerRecord>,
    next_user_id: i64,
    next_player_id: i64,
}

/// Mutex-guarded in-process tables with auto-increment ids and a unique
/// username constraint.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn user_count(&self) -> usize {
        self.tables().users.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_user_by_username(&self, username: &str) -> Result<User, StoreError> {
        self.tables()
            .users
            .values()
            .find(|user| user.username == username)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("user {}", username)))
    }

    async fn create_user(&self, username: &str, password_hash: &str) -> Result<User, StoreError> {
        let mut tables = self.tables();
        if tables.users.values().any(|user| user.username == username) {
            return Err(StoreError::AlreadyExists(format!("user {}", username)));
        }

        tables.next_user_id += 1;
        let user = User {
            id: tables.next_user_id,
            username: username.to_string(),
            password_hash: password_hash.to_string(),
        };
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_player_by_user_id(&self, user_id: i64) -> Result<PlayerRecord, StoreError> {
        self.tables()
            .players
            .values()
            .find(|player| player.user_id == user_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("player for user {}", user_id)))
    }

    async fn create_player(&self, user_id: i64, name: &str) -> Result<PlayerRecord, StoreError> {
        let mut tables = self.tables();
        if !tables.users.contains_key(&user_id) {
            return Err(StoreError::NotFound(format!("user {}", user_id)));
        }

        tables.next_player_id += 1;
        let player = PlayerRecord {
            id: tables.next_player_id,
            user_id,
            name: name.to_string(),
            best_score: 0,
        };
        tables.players.insert(player.id, player.clone());
        Ok(player)
    }

    async fn update_player_best_score(
        &self,
        player_id: i64,
        best_score: i64,
    ) -> Result<(), StoreError> {
        match self.tables().players.get_mut(&player_id) {
            Some(player) => {
                player.best_score = best_score;
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("player {}", player_id))),
        }
    }

    async fn get_top_scores(&self, limit: usize, offset: usize) -> Result<Vec<ScoreRow>, StoreError> {
        let tables = self.tables();
        let mut players: Vec<&PlayerRecord> = tables.players.values().collect();
        players.sort_by(|a, b| b.best_score.cmp(&a.best_score).then(a.id.cmp(&b.id)));

        Ok(players
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|player| ScoreRow {
                name: player.name.clone(),
                best_score: player.best_score,
            })
            .collect())
    }
}

/// Salted Argon2 hash of `password` in PHC string form.
///
/// Runs on the blocking pool; hashing is deliberately slow.
pub async fn hash_password(password: &str) -> Result<String, StoreError> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| StoreError::Hash(e.to_string()))
    })
    .await
    .map_err(|e| StoreError::Hash(e.to_string()))?
}

/// Checks `password` against a hash produced by [`hash_password`].
pub async fn verify_password(password: &str, password_hash: &str) -> bool {
    let password = password.to_string();
    let password_hash = password_hash.to_string();
    tokio::task::spawn_blocking(move || match PasswordHash::new(&password_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    })
    .await
    .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_create_and_lookup_user() {
        let store = MemoryStore::new();
        let user = store.create_user("alice", "hash").await.unwrap();

        let found = assert_ok!(store.get_user_by_username("alice").await);
        assert_eq!(found, user);
        assert!(matches!(
            store.get_user_by_username("bob").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_username_rejected() {
        let store = MemoryStore::new();
        store.create_user("alice", "hash").await.unwrap();

        assert!(matches!(
            store.create_user("alice", "other").await,
            Err(StoreError::AlreadyExists(_))
        ));
        assert_eq!(store.user_count(), 1);
    }

    #[tokio::test]
    async fn test_top_scores_ordered_desc_with_offset() {
        let store = MemoryStore::new();
        for (name, score) in [("a", 5), ("b", 50), ("c", 20), ("d", 50)] {
            let user = store.create_user(name, "hash").await.unwrap();
            let player = store.create_player(user.id, name).await.unwrap();
            store.update_player_best_score(player.id, score).await.unwrap();
        }

        let top = store.get_top_scores(3, 0).await.unwrap();
        let names: Vec<&str> = top.iter().map(|row| row.name.as_str()).collect();
        assert_eq!(names, vec!["b", "d", "c"]);

        let rest = store.get_top_scores(10, 3).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].name, "a");
    }

    #[tokio::test]
    async fn test_player_requires_user() {
        let store = MemoryStore::new();
        assert_err!(store.create_player(42, "ghost").await);
    }

    #[tokio::test]
    async fn test_password_hash_roundtrip() {
        let hash = hash_password("hunter2").await.unwrap();

        assert_ne!(hash, "hunter2");
        assert!(verify_password("hunter2", &hash).await);
        assert!(!verify_password("hunter3", &hash).await);
        assert!(!verify_password("hunter2", "not a hash").await);
    }
}
