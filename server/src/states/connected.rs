use super::{log_prefix, BrowsingHiscores, InGame};
use crate::client::{ClientInterfacer, ClientStateHandler};
use crate::error::StoreError;
use crate::objects::Player;
use crate::store::{hash_password, verify_password};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use shared::Msg;
use std::sync::Arc;

const MAX_USERNAME_CHARS: usize = 20;

const REGISTER_FAILED: &str =
    "Error registering user (internal server error) - please try again later";

/// Post-handshake state: the session knows its id and may log in, register
/// or look at the hiscore board.
#[derive(Default)]
pub struct Connected {
    client: Option<Arc<dyn ClientInterfacer>>,
    log_prefix: String,
}

impl Connected {
    pub fn new() -> Self {
        Self::default()
    }

    async fn handle_login(&self, client: &Arc<dyn ClientInterfacer>, username: String, password: String) {
        if let Err(reason) = validate_username(&username) {
            info!("{} Invalid username: {}", self.log_prefix, reason);
            client.socket_send(Msg::deny("Invalid username"));
            return;
        }

        let store = client.store();
        let key = username.to_lowercase();
        let user = match store.get_user_by_username(&key).await {
            Ok(user) => user,
            Err(e) => {
                info!("{} Error getting user {}: {}", self.log_prefix, key, e);
                client.socket_send(Msg::deny("User not found"));
                return;
            }
        };

        if !verify_password(&password, &user.password_hash).await {
            info!("{} User entered wrong password: {}", self.log_prefix, key);
            client.socket_send(Msg::deny("Incorrect username or password"));
            return;
        }

        let record = match store.get_player_by_user_id(user.id).await {
            Ok(record) => record,
            Err(e) => {
                error!("{} Error getting player for user {}: {}", self.log_prefix, key, e);
                client.socket_send(Msg::deny("Error getting player"));
                return;
            }
        };

        client.set_state(Box::new(InGame::new(Player::new(
            record.name,
            record.id,
            record.best_score,
        ))));
        info!("{} User {} logged in successfully", self.log_prefix, key);
        client.socket_send(Msg::OkResponse);
    }

    async fn handle_register(&self, client: &Arc<dyn ClientInterfacer>, username: String, password: String) {
        if let Err(reason) = validate_username(&username) {
            let reason = format!("Invalid username: {}", reason);
            info!("{} {}", self.log_prefix, reason);
            client.socket_send(Msg::deny(reason));
            return;
        }

        let store = client.store();
        let key = username.to_lowercase();
        match store.get_user_by_username(&key).await {
            Ok(_) => {
                info!("{} User already exists: {}", self.log_prefix, key);
                client.socket_send(Msg::deny("User already exists"));
                return;
            }
            Err(StoreError::NotFound(_)) => {}
            Err(e) => {
                error!("{} Error checking for user {}: {}", self.log_prefix, key, e);
                client.socket_send(Msg::deny(REGISTER_FAILED));
                return;
            }
        }

        let password_hash = match hash_password(&password).await {
            Ok(hash) => hash,
            Err(e) => {
                error!("{} Failed to hash password for {}: {}", self.log_prefix, key, e);
                client.socket_send(Msg::deny(REGISTER_FAILED));
                return;
            }
        };

        let user = match store.create_user(&key, &password_hash).await {
            Ok(user) => user,
            Err(e) => {
                error!("{} Failed to create user {}: {}", self.log_prefix, key, e);
                client.socket_send(Msg::deny(REGISTER_FAILED));
                return;
            }
        };

        if let Err(e) = store.create_player(user.id, &username).await {
            error!("{} Failed to create player for user {}: {}", self.log_prefix, key, e);
            client.socket_send(Msg::deny(REGISTER_FAILED));
            return;
        }

        client.socket_send(Msg::OkResponse);
        info!("{} User {} registered successfully", self.log_prefix, key);
    }
}

#[async_trait]
impl ClientStateHandler for Connected {
    fn name(&self) -> &'static str {
        "Connected"
    }

    fn set_client(&mut self, client: Arc<dyn ClientInterfacer>) {
        self.log_prefix = log_prefix(client.as_ref(), self.name());
        self.client = Some(client);
    }

    async fn on_enter(&mut self) {
        if let Some(client) = &self.client {
            client.socket_send(Msg::ClientId { id: client.id() });
        }
    }

    async fn handle_message(&mut self, sender_id: u64, message: Msg) {
        let Some(client) = self.client.clone() else {
            return;
        };

        match message {
            Msg::LoginRequest { username, password } => {
                if sender_id != client.id() {
                    warn!("{} Received login message from another client (Id {})", self.log_prefix, sender_id);
                    return;
                }
                self.handle_login(&client, username, password).await;
            }
            Msg::RegisterRequest { username, password } => {
                if sender_id != client.id() {
                    warn!("{} Received register message from another client (Id {})", self.log_prefix, sender_id);
                    return;
                }
                self.handle_register(&client, username, password).await;
            }
            Msg::HiscoreBoardRequest => {
                if sender_id != client.id() {
                    warn!("{} Received hiscore board request from another client (Id {})", self.log_prefix, sender_id);
                    return;
                }
                client.set_state(Box::new(BrowsingHiscores::new()));
            }
            other => {
                debug!("{} Ignoring {} from {}", self.log_prefix, other.kind(), sender_id);
            }
        }
    }

    async fn on_exit(&mut self) {}
}

/// Checks the shape of a username; the error names what is wrong with it.
pub fn validate_username(username: &str) -> Result<(), &'static str> {
    if username.is_empty() {
        return Err("empty");
    }
    if username.chars().count() > MAX_USERNAME_CHARS {
        return Err("too long");
    }
    if username != username.trim() {
        return Err("leading or trailing whitespace");
    }
    Ok(())
}
