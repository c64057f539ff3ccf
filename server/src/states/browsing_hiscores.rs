use super::{log_prefix, Connected};
use crate::client::{ClientInterfacer, ClientStateHandler};
use async_trait::async_trait;
use log::{debug, error};
use shared::{HiscoreEntry, Msg};
use std::sync::Arc;

#[derive(Default)]
pub struct BrowsingHiscores {
    client: Option<Arc<dyn ClientInterfacer>>,
    log_prefix: String,
}

impl BrowsingHiscores {
    pub fn new() -> Self {
        Self::default()
    }

    async fn send_board(&self, client: &Arc<dyn ClientInterfacer>) {
        let limit = client.config().hiscore_page_size;
        let offset = 0;

        let rows = match client.store().get_top_scores(limit, offset).await {
            Ok(rows) => rows,
            Err(e) => {
                error!(
                    "{} Error getting top {} scores from rank {}: {}",
                    self.log_prefix,
                    limit,
                    offset + 1,
                    e
                );
                client.socket_send(Msg::deny("Failed to get top scores - please try again later"));
                return;
            }
        };

        let hiscores = rows
            .into_iter()
            .enumerate()
            .map(|(i, row)| HiscoreEntry {
                rank: (offset + i + 1) as u64,
                name: row.name,
                score: row.best_score.max(0) as u64,
            })
            .collect();
        client.socket_send(Msg::HiscoreBoard { hiscores });
    }
}

#[async_trait]
impl ClientStateHandler for BrowsingHiscores {
    fn name(&self) -> &'static str {
        "BrowsingHiscores"
    }

    fn set_client(&mut self, client: Arc<dyn ClientInterfacer>) {
        self.log_prefix = log_prefix(client.as_ref(), self.name());
        self.client = Some(client);
    }

    async fn on_enter(&mut self) {
        if let Some(client) = self.client.clone() {
            self.send_board(&client).await;
        }
    }

    async fn handle_message(&mut self, sender_id: u64, message: Msg) {
        let Some(client) = self.client.clone() else {
            return;
        };
        if sender_id != client.id() {
            debug!("{} Ignoring {} from {}", self.log_prefix, message.kind(), sender_id);
            return;
        }

        match message {
            Msg::HiscoreBoardRequest => self.send_board(&client).await,
            Msg::FinishedBrowsingHiscores => client.set_state(Box::new(Connected::new())),
            other => debug!("{} Ignoring {}", self.log_prefix, other.kind()),
        }
    }

    async fn on_exit(&mut self) {}
}
