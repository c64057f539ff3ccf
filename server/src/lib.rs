//! # Arena Game Server Library
//!
//! This library provides the authoritative server core for a multiplayer arena
//! game where players roam an open field, eat spores and each other, and grow
//! by area. Clients report what they ate; the server re-checks every claim
//! before it becomes part of the shared world.
//!
//! ## Core Responsibilities
//!
//! ### Session Lifecycle
//! Every connection becomes a session that moves through three states:
//! - `Connected`: learns its id, logs in, registers or asks for the hiscores
//! - `InGame`: owns a player in the shared world and runs its physics
//! - `BrowsingHiscores`: views the leaderboard
//!
//! ### Authoritative World
//! Players and spores live in shared collections readable by every session.
//! Consumption claims are validated for existence, proximity, drop cooldown
//! and mass dominance; implausible claims are logged and dropped.
//!
//! ### Relay
//! A single hub loop orders all registrations, unregistrations and broadcasts.
//! It never performs socket I/O itself: it only enqueues into sessions.
//!
//! ## Architecture Design
//!
//! ### Task Per Concern
//! Each session runs a read pump, a write pump and a message processor. An
//! `InGame` session adds a physics loop once its client first steers. The hub
//! runs its event loop plus a spore replenishment task.
//!
//! ### Bounded Queues
//! Session inboxes and outboxes are bounded. Producers that must not block
//! (the hub, peers, physics) drop on overflow and log a warning.
//!
//! ## Module Organization
//!
//! ### Collection Module (`collection`)
//! Thread-safe id-keyed map with monotonically assigned ids.
//!
//! ### Objects Module (`objects`)
//! Players, spores, spawn placement and spore sizing.
//!
//! ### Hub Module (`hub`)
//! Session registry, broadcast relay, world initialisation and replenishment.
//!
//! ### Client Module (`client`)
//! The session type and the contracts between sessions and their states.
//!
//! ### States Module (`states`)
//! `Connected`, `InGame` and `BrowsingHiscores`.
//!
//! ### Store Module (`store`)
//! Persistence contract for accounts and scores plus password hashing.
//!
//! ### Transport Module (`transport`)
//! Packet reader/writer contracts with TCP and in-memory implementations.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::client::{Client, ClientInterfacer};
//! use server::config::ServerConfig;
//! use server::hub::Hub;
//! use server::store::MemoryStore;
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let hub = Hub::new(ServerConfig::default(), Arc::new(MemoryStore::new()));
//!     let handle = hub.handle();
//!     tokio::spawn(hub.run());
//!
//!     let listener = TcpListener::bind("127.0.0.1:8080").await?;
//!     loop {
//!         let (stream, _) = listener.accept().await?;
//!         handle
//!             .serve(|hub| Ok(Client::tcp(hub, stream) as Arc<dyn ClientInterfacer>))
//!             .await;
//!     }
//! }
//! ```

pub mod client;
pub mod collection;
pub mod config;
pub mod error;
pub mod hub;
pub mod objects;
pub mod states;
pub mod store;
pub mod transport;
