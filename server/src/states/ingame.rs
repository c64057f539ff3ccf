use super::{log_prefix, Connected};
use crate::client::{ClientInterfacer, ClientStateHandler};
use crate::error::ValidationError;
use crate::objects::{
    new_shared_player, read_player, spawn_coords, write_player, Player, SharedPlayer, Spore,
};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use shared::{
    next_radius, rad_to_mass, Msg, SporeMessage, CONSUME_BUFFER, INITIAL_PLAYER_RADIUS,
    INITIAL_PLAYER_SPEED, MASS_DOMINANCE_RATIO, MIN_DROP_RADIUS,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};

/// Active gameplay. The session's player lives in the shared player
/// collection under the session id for as long as this state is active.
pub struct InGame {
    client: Option<Arc<dyn ClientInterfacer>>,
    log_prefix: String,
    player: SharedPlayer,
    cancel_player_update_loop: Option<oneshot::Sender<()>>,
    player_update_task: Option<JoinHandle<()>>,
    initial_spores_task: Option<JoinHandle<()>>,
}

impl InGame {
    pub fn new(player: Player) -> Self {
        Self {
            client: None,
            log_prefix: String::new(),
            player: new_shared_player(player),
            cancel_player_update_loop: None,
            player_update_task: None,
            initial_spores_task: None,
        }
    }

    fn handle_player_direction(&mut self, client: &Arc<dyn ClientInterfacer>, direction: f64) {
        if !direction.is_finite() {
            warn!("{} Received non-finite direction {}, ignoring", self.log_prefix, direction);
            return;
        }
        write_player(&self.player).direction = direction;

        // The first direction from our own client starts the physics loop
        if self.cancel_player_update_loop.is_none() {
            let (cancel_tx, cancel_rx) = oneshot::channel();
            self.cancel_player_update_loop = Some(cancel_tx);
            self.player_update_task = Some(tokio::spawn(player_update_loop(
                Arc::clone(client),
                Arc::clone(&self.player),
                cancel_rx,
            )));
        }
    }

    async fn handle_own_spore_consumed(&self, client: &Arc<dyn ClientInterfacer>, spore_id: u64) {
        let game_objects = client.game_objects();

        let validated = game_objects
            .spores
            .get(spore_id)
            .ok_or(ValidationError::SporeMissing(spore_id))
            .and_then(|spore| {
                let player = read_player(&self.player);
                validate_close_to_object(&player, spore.x, spore.y, spore.radius, CONSUME_BUFFER)?;
                validate_drop_cooldown(&spore, &self.player, &player, CONSUME_BUFFER)?;
                Ok(spore)
            });
        let spore = match validated {
            Ok(spore) => spore,
            Err(e) => {
                warn!("{} Could not verify spore consumption: {}", self.log_prefix, e);
                return;
            }
        };

        // Someone else may have claimed it since the lookup
        if game_objects.spores.remove(spore_id).is_none() {
            warn!(
                "{} Could not verify spore consumption: {}",
                self.log_prefix,
                ValidationError::SporeMissing(spore_id)
            );
            return;
        }
        {
            let mut player = write_player(&self.player);
            player.radius = next_radius(player.radius, rad_to_mass(spore.radius));
        }

        client.broadcast(Msg::SporeConsumed { spore_id }).await;
        self.sync_best_score(client).await;
    }

    async fn handle_own_player_consumed(&self, client: &Arc<dyn ClientInterfacer>, other_id: u64) {
        if other_id == client.id() {
            warn!("{} Client claimed to consume itself, ignoring", self.log_prefix);
            return;
        }
        let game_objects = client.game_objects();

        let validated = game_objects
            .players
            .get(other_id)
            .ok_or(ValidationError::PlayerMissing(other_id))
            .and_then(|other| {
                let (other_x, other_y, other_radius) = {
                    let other = read_player(&other);
                    (other.x, other.y, other.radius)
                };
                let player = read_player(&self.player);
                validate_close_to_object(&player, other_x, other_y, other_radius, CONSUME_BUFFER)?;
                let other_mass = rad_to_mass(other_radius);
                validate_mass_dominance(rad_to_mass(player.radius), other_mass)?;
                Ok(other_mass)
            });
        let other_mass = match validated {
            Ok(mass) => mass,
            Err(e) => {
                warn!("{} Could not verify player consumption: {}", self.log_prefix, e);
                return;
            }
        };

        if game_objects.players.remove(other_id).is_none() {
            warn!(
                "{} Could not verify player consumption: {}",
                self.log_prefix,
                ValidationError::PlayerMissing(other_id)
            );
            return;
        }
        {
            let mut player = write_player(&self.player);
            player.radius = next_radius(player.radius, other_mass);
        }

        client
            .broadcast(Msg::PlayerConsumed {
                player_id: other_id,
            })
            .await;
        self.sync_best_score(client).await;
    }

    /// Replaces this state with a fresh one for the same account.
    fn respawn(&self, client: &Arc<dyn ClientInterfacer>) {
        let player = {
            let player = read_player(&self.player);
            Player::new(
                player.name.clone(),
                player.db_id,
                player.best_score.max(score(player.radius)),
            )
        };
        info!("{} Player was consumed, respawning", self.log_prefix);
        client.set_state(Box::new(InGame::new(player)));
    }

    fn in_world(&self, client: &Arc<dyn ClientInterfacer>) -> bool {
        in_world(client.as_ref(), &self.player)
    }

    async fn sync_best_score(&self, client: &Arc<dyn ClientInterfacer>) {
        let update = {
            let mut player = write_player(&self.player);
            let current = score(player.radius);
            if current > player.best_score {
                player.best_score = current;
                Some((player.db_id, current))
            } else {
                None
            }
        };

        if let Some((db_id, best_score)) = update {
            if let Err(e) = client.store().update_player_best_score(db_id, best_score).await {
                error!("{} Error updating player best score: {}", self.log_prefix, e);
            }
        }
    }
}

#[async_trait]
impl ClientStateHandler for InGame {
    fn name(&self) -> &'static str {
        "InGame"
    }

    fn set_client(&mut self, client: Arc<dyn ClientInterfacer>) {
        self.log_prefix = log_prefix(client.as_ref(), self.name());
        self.client = Some(client);
    }

    async fn on_enter(&mut self) {
        let Some(client) = self.client.clone() else {
            return;
        };
        let game_objects = client.game_objects();

        let (x, y) = spawn_coords(INITIAL_PLAYER_RADIUS, &game_objects.players, None);
        let message = {
            let mut player = write_player(&self.player);
            player.x = x;
            player.y = y;
            player.speed = INITIAL_PLAYER_SPEED;
            player.radius = INITIAL_PLAYER_RADIUS;
            info!("{} Adding player {} to the shared collection", self.log_prefix, player.name);
            player.to_message(client.id())
        };
        game_objects
            .players
            .add_with_id(Arc::clone(&self.player), client.id());

        client.socket_send(Msg::Player(message));

        let config = client.config();
        self.initial_spores_task = Some(tokio::spawn(send_initial_spores(
            Arc::clone(&client),
            config.initial_spore_batch,
            config.initial_spore_batch_delay,
        )));
    }

    async fn handle_message(&mut self, sender_id: u64, message: Msg) {
        let Some(client) = self.client.clone() else {
            return;
        };
        let own = sender_id == client.id();

        // Whoever consumed us has already removed our player; the relayed
        // notice may have been dropped on a full inbox
        if !self.in_world(&client) {
            self.respawn(&client);
            if own && !matches!(message, Msg::Disconnect { .. }) {
                debug!("{} Ignoring {} for a consumed player", self.log_prefix, message.kind());
                return;
            }
        }

        match message {
            Msg::Player(player) => {
                if own {
                    debug!("{} Received player message from our own client, ignoring", self.log_prefix);
                    return;
                }
                client.socket_send_as(Msg::Player(player), sender_id);
            }
            Msg::PlayerDirection { direction } => {
                if !own {
                    debug!(
                        "{} Received player direction message from a different client, ignoring",
                        self.log_prefix
                    );
                    return;
                }
                self.handle_player_direction(&client, direction);
            }
            Msg::Chat { msg } => {
                if own {
                    client.broadcast(Msg::Chat { msg }).await;
                } else {
                    client.socket_send_as(Msg::Chat { msg }, sender_id);
                }
            }
            Msg::SporeConsumed { spore_id } => {
                if own {
                    self.handle_own_spore_consumed(&client, spore_id).await;
                } else {
                    client.socket_send_as(Msg::SporeConsumed { spore_id }, sender_id);
                }
            }
            Msg::PlayerConsumed { player_id } => {
                if own {
                    self.handle_own_player_consumed(&client, player_id).await;
                    return;
                }
                client.socket_send_as(Msg::PlayerConsumed { player_id }, sender_id);
            }
            Msg::Spore(spore) => {
                if !own {
                    client.socket_send_as(Msg::Spore(spore), sender_id);
                }
            }
            Msg::Disconnect { reason } => {
                if own {
                    client.broadcast(Msg::Disconnect { reason }).await;
                    client.set_state(Box::new(Connected::new()));
                } else {
                    client.socket_send_as(Msg::Disconnect { reason }, sender_id);
                }
            }
            other => {
                debug!("{} Ignoring {} from {}", self.log_prefix, other.kind(), sender_id);
            }
        }
    }

    async fn on_exit(&mut self) {
        if let Some(cancel) = self.cancel_player_update_loop.take() {
            let _ = cancel.send(());
        }
        // A tick in flight must not publish the old body after we leave
        if let Some(task) = self.player_update_task.take() {
            if let Err(e) = task.await {
                error!("{} Player update loop failed: {}", self.log_prefix, e);
            }
        }
        if let Some(task) = self.initial_spores_task.take() {
            task.abort();
        }

        let Some(client) = self.client.clone() else {
            return;
        };
        client.game_objects().players.remove(client.id());
        self.sync_best_score(&client).await;
    }
}

fn score(radius: f64) -> i64 {
    rad_to_mass(radius).round() as i64
}

/// Streams a snapshot of the spore set to the session in fixed-size batches.
async fn send_initial_spores(client: Arc<dyn ClientInterfacer>, batch_size: usize, delay: Duration) {
    let spores = client.game_objects().spores.snapshot();
    let mut batches = spores.chunks(batch_size.max(1)).peekable();

    while let Some(batch) = batches.next() {
        let spores: Vec<SporeMessage> = batch
            .iter()
            .map(|(id, spore)| spore.to_message(*id))
            .collect();
        client.socket_send(Msg::SporesBatch { spores });

        if batches.peek().is_some() && !delay.is_zero() {
            sleep(delay).await;
        }
    }
}

async fn player_update_loop(
    client: Arc<dyn ClientInterfacer>,
    player: SharedPlayer,
    mut cancel: oneshot::Receiver<()>,
) {
    let tick = client.config().player_tick;
    let delta = tick.as_secs_f64();
    let mut ticker = interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // Skip the first tick since it fires immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = &mut cancel => break,
            _ = ticker.tick() => {
                let roll: f64 = rand::random();
                sync_player(client.as_ref(), &player, delta, roll).await;
            }
        }
    }
}

/// One physics step: move, maybe shed a spore, then publish the new state to
/// everyone including our own client.
async fn sync_player(client: &dyn ClientInterfacer, player: &SharedPlayer, delta: f64, roll: f64) {
    if !in_world(client, player) {
        return;
    }
    let max_spores = client.config().max_spores;

    let (dropped, state) = {
        let mut p = write_player(player);
        let (x, y) = integrate_position(p.x, p.y, p.speed, p.direction, delta);
        p.x = x;
        p.y = y;

        let dropped = if p.radius > MIN_DROP_RADIUS && roll < drop_probability(p.radius, max_spores) {
            let radius = dropped_spore_radius(p.radius);
            p.radius = next_radius(p.radius, -rad_to_mass(radius));
            Some(Spore::dropped(player, x, y, radius))
        } else {
            None
        };
        (dropped, p.to_message(client.id()))
    };

    if let Some(spore) = dropped {
        let spore = Arc::new(spore);
        let spore_id = client.game_objects().spores.add(Arc::clone(&spore));
        let message = Msg::Spore(spore.to_message(spore_id));
        client.broadcast(message.clone()).await;
        client.socket_send(message);
    }

    let message = Msg::Player(state);
    client.broadcast(message.clone()).await;
    client.socket_send(message);
}

/// Whether `player` is still the body registered under the session id.
fn in_world(client: &dyn ClientInterfacer, player: &SharedPlayer) -> bool {
    client
        .game_objects()
        .players
        .get(client.id())
        .is_some_and(|registered| Arc::ptr_eq(&registered, player))
}

/// Rejects the claim when the player's centre is farther from the object
/// than the sum of both radii plus `buffer`.
pub fn validate_close_to_object(
    player: &Player,
    x: f64,
    y: f64,
    radius: f64,
    buffer: f64,
) -> Result<(), ValidationError> {
    let dx = player.x - x;
    let dy = player.y - y;
    let dist_sq = dx * dx + dy * dy;

    let threshold = player.radius + buffer + radius;
    let threshold_sq = threshold * threshold;

    // NaN compares false against everything
    if !dist_sq.is_finite() || !threshold_sq.is_finite() || dist_sq > threshold_sq {
        return Err(ValidationError::TooFar {
            dist_sq,
            threshold_sq,
        });
    }
    Ok(())
}

/// A player may not eat a spore it dropped itself before it could have
/// travelled clear of it.
pub fn validate_drop_cooldown(
    spore: &Spore,
    owner: &SharedPlayer,
    player: &Player,
    buffer: f64,
) -> Result<(), ValidationError> {
    let Some(dropped_at) = spore.dropped_at else {
        return Ok(());
    };
    if !spore.was_dropped_by(owner) {
        return Ok(());
    }

    let min_distance = spore.radius + player.radius + buffer;
    let min = Duration::try_from_secs_f64(min_distance / player.speed).unwrap_or(Duration::MAX);
    let elapsed = dropped_at.elapsed();
    if elapsed < min {
        return Err(ValidationError::DroppedTooRecently { elapsed, min });
    }
    Ok(())
}

/// Our mass must strictly exceed the other's by the dominance ratio.
pub fn validate_mass_dominance(our_mass: f64, other_mass: f64) -> Result<(), ValidationError> {
    if !our_mass.is_finite()
        || !other_mass.is_finite()
        || our_mass <= other_mass * MASS_DOMINANCE_RATIO
    {
        return Err(ValidationError::NotMassiveEnough {
            ours: our_mass,
            other: other_mass,
        });
    }
    Ok(())
}

pub fn integrate_position(x: f64, y: f64, speed: f64, direction: f64, dt: f64) -> (f64, f64) {
    (
        x + speed * direction.cos() * dt,
        y + speed * direction.sin() * dt,
    )
}

/// Per-tick chance of shedding a spore.
pub fn drop_probability(radius: f64, max_spores: usize) -> f64 {
    radius / (max_spores.max(1) as f64 * 5.0)
}

pub fn dropped_spore_radius(player_radius: f64) -> f64 {
    (5.0 + player_radius / 50.0).min(15.0)
}
