//! Session states
//!
//! A session is always in exactly one of these. Each state receives its
//! session through `set_client` and reaches the world, the store and the
//! config only through it.

mod browsing_hiscores;
mod connected;
mod ingame;

pub use browsing_hiscores::BrowsingHiscores;
pub use connected::{validate_username, Connected};
pub use ingame::{
    drop_probability, dropped_spore_radius, integrate_position, validate_close_to_object,
    validate_drop_cooldown, validate_mass_dominance, InGame,
};

use crate::client::ClientInterfacer;

/// `Client <id> [<state>]:` prefix used on every session-scoped log line.
fn log_prefix(client: &dyn ClientInterfacer, state: &str) -> String {
    format!("Client {} [{}]:", client.id(), state)
}
