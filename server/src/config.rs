//! Server tunables
//!
//! Every timing and sizing knob of the hub and the sessions lives here so the
//! binary can override them from the command line and tests can shrink them.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Number of live spores the world is kept at.
    pub max_spores: usize,
    /// How often the replenishment task checks the spore count.
    pub replenish_interval: Duration,
    /// Upper bound on spores spawned in a single replenishment pass.
    pub replenish_batch: usize,
    /// Pause between two spores of the same replenishment pass.
    pub replenish_spawn_delay: Duration,
    /// Period of the per-player physics loop.
    pub player_tick: Duration,
    /// Spores per batch when streaming the world to a player entering the game.
    pub initial_spore_batch: usize,
    /// Pause between those batches.
    pub initial_spore_batch_delay: Duration,
    /// Rows on the hiscore board.
    pub hiscore_page_size: usize,
    /// Capacity of each session's outbound queue.
    pub outbound_queue_size: usize,
    /// Capacity of each session's inbox.
    pub inbound_queue_size: usize,
    /// Capacity of the hub's register/unregister/broadcast channels.
    pub hub_channel_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_spores: 1000,
            replenish_interval: Duration::from_secs(2),
            replenish_batch: 10,
            replenish_spawn_delay: Duration::from_millis(50),
            player_tick: Duration::from_millis(50),
            initial_spore_batch: 20,
            initial_spore_batch_delay: Duration::from_millis(50),
            hiscore_page_size: 10,
            outbound_queue_size: 256,
            inbound_queue_size: 256,
            hub_channel_size: 1024,
        }
    }
}
