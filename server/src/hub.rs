//! The hub: session registry, broadcast relay and world owner
//!
//! All registry changes and every broadcast pass through one event loop
//! ([`Hub::run`]), which gives them a single total order. Sessions and
//! background tasks talk to the loop through a cloneable [`HubHandle`].

use crate::client::ClientInterfacer;
use crate::collection::SharedCollection;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::objects::{random_spore_radius, spawn_coords, SharedGameObjects, Spore};
use crate::store::Store;
use log::{debug, error, info};
use shared::{Msg, Packet, SYSTEM_SENDER_ID};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, MissedTickBehavior};

pub type ClientRegistry = SharedCollection<Arc<dyn ClientInterfacer>>;

/// Everything a session or background task needs to reach the hub.
#[derive(Clone)]
pub struct HubHandle {
    clients: Arc<ClientRegistry>,
    game_objects: Arc<SharedGameObjects>,
    store: Arc<dyn Store>,
    config: Arc<ServerConfig>,
    register_tx: mpsc::Sender<Arc<dyn ClientInterfacer>>,
    unregister_tx: mpsc::Sender<Arc<dyn ClientInterfacer>>,
    broadcast_tx: mpsc::Sender<Packet>,
}

impl HubHandle {
    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    pub fn game_objects(&self) -> &Arc<SharedGameObjects> {
        &self.game_objects
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub async fn register(&self, client: Arc<dyn ClientInterfacer>) -> Result<(), ServerError> {
        self.register_tx
            .send(client)
            .await
            .map_err(|_| ServerError::Internal("hub register channel closed".to_string()))
    }

    pub async fn unregister(&self, client: Arc<dyn ClientInterfacer>) -> Result<(), ServerError> {
        self.unregister_tx
            .send(client)
            .await
            .map_err(|_| ServerError::Internal("hub unregister channel closed".to_string()))
    }

    /// Queues `packet` for every registered session except its sender.
    pub async fn broadcast(&self, packet: Packet) -> Result<(), ServerError> {
        self.broadcast_tx
            .send(packet)
            .await
            .map_err(|_| ServerError::Internal("hub broadcast channel closed".to_string()))
    }

    /// Builds a session for a freshly accepted connection, registers it and
    /// starts its pumps. Returns without waiting for the pumps.
    pub async fn serve<F>(&self, new_client: F)
    where
        F: FnOnce(&HubHandle) -> Result<Arc<dyn ClientInterfacer>, ServerError>,
    {
        let client = match new_client(self) {
            Ok(client) => client,
            Err(e) => {
                error!("Error obtaining client for new connection: {}", e);
                return;
            }
        };

        if let Err(e) = self.register(client.clone()).await {
            error!("Error registering new client: {}", e);
            return;
        }

        tokio::spawn(client.clone().write_pump());
        tokio::spawn(client.read_pump());
    }
}

pub struct Hub {
    handle: HubHandle,
    register_rx: mpsc::Receiver<Arc<dyn ClientInterfacer>>,
    unregister_rx: mpsc::Receiver<Arc<dyn ClientInterfacer>>,
    broadcast_rx: mpsc::Receiver<Packet>,
}

impl Hub {
    pub fn new(config: ServerConfig, store: Arc<dyn Store>) -> Self {
        let (register_tx, register_rx) = mpsc::channel(config.hub_channel_size);
        let (unregister_tx, unregister_rx) = mpsc::channel(config.hub_channel_size);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(config.hub_channel_size);

        Hub {
            handle: HubHandle {
                clients: Arc::new(SharedCollection::new()),
                game_objects: Arc::new(SharedGameObjects {
                    players: SharedCollection::new(),
                    spores: SharedCollection::with_capacity(config.max_spores),
                }),
                store,
                config: Arc::new(config),
                register_tx,
                unregister_tx,
                broadcast_tx,
            },
            register_rx,
            unregister_rx,
            broadcast_rx,
        }
    }

    pub fn handle(&self) -> HubHandle {
        self.handle.clone()
    }

    /// Fills the world with spores, starts replenishment and then serves
    /// registrations, unregistrations and broadcasts one at a time.
    pub async fn run(mut self) {
        let game_objects = Arc::clone(&self.handle.game_objects);
        for _ in 0..self.handle.config.max_spores {
            game_objects.spores.add(Arc::new(new_spore(&game_objects)));
        }
        info!("Placing spores done");

        tokio::spawn(replenish_spores_loop(self.handle.clone()));

        loop {
            tokio::select! {
                Some(client) = self.register_rx.recv() => {
                    let id = self.handle.clients.add(client.clone());
                    info!("Client {} registered", id);
                    client.initialize(id);
                },
                Some(client) = self.unregister_rx.recv() => {
                    let id = client.id();
                    if self.handle.clients.remove(id).is_some() {
                        info!("Client {} unregistered", id);
                    }
                },
                Some(packet) = self.broadcast_rx.recv() => {
                    self.relay(packet);
                },
                else => break,
            }
        }

        info!("Hub shutting down");
    }

    fn relay(&self, packet: Packet) {
        let Packet { sender_id, msg } = packet;
        self.handle.clients.for_each(|id, client| {
            if id != sender_id {
                client.process_message(sender_id, msg.clone());
            }
        });
    }
}

fn new_spore(game_objects: &SharedGameObjects) -> Spore {
    let radius = random_spore_radius(&mut rand::thread_rng());
    let (x, y) = spawn_coords(radius, &game_objects.players, Some(&game_objects.spores));
    Spore::new(x, y, radius)
}

/// Number of spores one replenishment pass may add.
pub fn replenish_count(live: usize, target: usize, cap: usize) -> usize {
    target.saturating_sub(live).min(cap)
}

/// Runs one replenishment pass and returns how many spores it added.
///
/// Spores are spawned one by one with a short pause in between and each is
/// broadcast on its own, so clients never receive a burst.
pub async fn replenish_spores(hub: &HubHandle) -> usize {
    let config = hub.config();
    let spores = &hub.game_objects().spores;

    let live = spores.len();
    let count = replenish_count(live, config.max_spores, config.replenish_batch);
    if count == 0 {
        return 0;
    }
    info!(
        "{} spores remain - going to replenish {} spores",
        live, count
    );

    let mut added = 0;
    for i in 0..count {
        if spores.len() >= config.max_spores {
            break;
        }
        if i > 0 && !config.replenish_spawn_delay.is_zero() {
            sleep(config.replenish_spawn_delay).await;
        }

        let spore = Arc::new(new_spore(hub.game_objects()));
        let spore_id = spores.add(spore.clone());
        let packet = Packet::new(SYSTEM_SENDER_ID, Msg::Spore(spore.to_message(spore_id)));
        if let Err(e) = hub.broadcast(packet).await {
            error!("Failed to broadcast replenished spore: {}", e);
            break;
        }
        added += 1;
    }

    debug!("Replenished {} spores", added);
    added
}

async fn replenish_spores_loop(hub: HubHandle) {
    let mut ticker = interval(hub.config().replenish_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // Skip the first tick since it fires immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        replenish_spores(&hub).await;
    }
}
