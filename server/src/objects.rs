//! Live world objects and their placement
//!
//! Players are shared between the owning session (which mutates them) and
//! every other session (which reads them for validation), so they sit behind
//! a lock. Spores never change after creation and are shared as plain `Arc`s.
//!
//! Lock order: a collection's lock may be held while locking a player, never
//! the other way round.

use crate::collection::SharedCollection;
use rand::Rng;
use shared::{PlayerMessage, SporeMessage, SPAWN_BOUND};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Instant;

#[derive(Debug, Clone, Default)]
pub struct Player {
    pub name: String,
    pub best_score: i64,
    /// Id of the persisted player row.
    pub db_id: i64,
    pub x: f64,
    pub y: f64,
    /// Heading in radians.
    pub direction: f64,
    pub speed: f64,
    pub radius: f64,
}

impl Player {
    pub fn new(name: impl Into<String>, db_id: i64, best_score: i64) -> Self {
        Self {
            name: name.into(),
            db_id,
            best_score,
            ..Default::default()
        }
    }

    pub fn to_message(&self, id: u64) -> PlayerMessage {
        PlayerMessage {
            id,
            name: self.name.clone(),
            x: self.x,
            y: self.y,
            radius: self.radius,
            direction: self.direction,
            speed: self.speed,
        }
    }
}

pub type SharedPlayer = Arc<RwLock<Player>>;

pub fn new_shared_player(player: Player) -> SharedPlayer {
    Arc::new(RwLock::new(player))
}

pub fn read_player(player: &SharedPlayer) -> RwLockReadGuard<'_, Player> {
    player.read().unwrap_or_else(PoisonError::into_inner)
}

pub fn write_player(player: &SharedPlayer) -> RwLockWriteGuard<'_, Player> {
    player.write().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Default)]
pub struct Spore {
    pub x: f64,
    pub y: f64,
    pub radius: f64,
    /// Player that shed this spore. Only used for the re-consumption cooldown;
    /// it does not keep the player alive.
    pub dropped_by: Option<Weak<RwLock<Player>>>,
    pub dropped_at: Option<Instant>,
}

impl Spore {
    pub fn new(x: f64, y: f64, radius: f64) -> Self {
        Self {
            x,
            y,
            radius,
            ..Default::default()
        }
    }

    /// A spore shed by `player` at its current position.
    pub fn dropped(player: &SharedPlayer, x: f64, y: f64, radius: f64) -> Self {
        Self {
            x,
            y,
            radius,
            dropped_by: Some(Arc::downgrade(player)),
            dropped_at: Some(Instant::now()),
        }
    }

    pub fn was_dropped_by(&self, player: &SharedPlayer) -> bool {
        self.dropped_by
            .as_ref()
            .is_some_and(|dropper| std::ptr::eq(dropper.as_ptr(), Arc::as_ptr(player)))
    }

    pub fn to_message(&self, id: u64) -> SporeMessage {
        SporeMessage {
            id,
            x: self.x,
            y: self.y,
            radius: self.radius,
        }
    }
}

/// The mutable world every in-game session reads and writes.
pub struct SharedGameObjects {
    /// Keyed by the owning session's id.
    pub players: SharedCollection<SharedPlayer>,
    pub spores: SharedCollection<Arc<Spore>>,
}

impl SharedGameObjects {
    pub fn new() -> Self {
        Self {
            players: SharedCollection::new(),
            spores: SharedCollection::new(),
        }
    }
}

impl Default for SharedGameObjects {
    fn default() -> Self {
        Self::new()
    }
}

/// Radius of a naturally spawned spore: normally distributed around 10 with a
/// standard deviation of 3, never below 5.
pub fn random_spore_radius<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    (standard_normal(rng) * 3.0 + 10.0).max(5.0)
}

fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    // Box-Muller; u1 is kept away from zero so ln() stays finite
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Picks a position for a circle of `radius` that does not overlap any live
/// player, nor any live spore when `spores` is given.
///
/// Candidates are sampled uniformly from a square around the origin; after a
/// run of failed attempts the square doubles in size so placement always
/// terminates even in a crowded world.
pub fn spawn_coords(
    radius: f64,
    players: &SharedCollection<SharedPlayer>,
    spores: Option<&SharedCollection<Arc<Spore>>>,
) -> (f64, f64) {
    const MAX_TRIES: usize = 25;

    let mut obstacles = Vec::with_capacity(players.len());
    players.for_each(|_, player| {
        let player = read_player(player);
        obstacles.push((player.x, player.y, player.radius));
    });
    if let Some(spores) = spores {
        spores.for_each(|_, spore| obstacles.push((spore.x, spore.y, spore.radius)));
    }

    let mut rng = rand::thread_rng();
    let mut bound = SPAWN_BOUND;
    let mut tries = 0;
    loop {
        let x = rng.gen_range(-bound..bound);
        let y = rng.gen_range(-bound..bound);

        if !overlaps_any(x, y, radius, &obstacles) {
            return (x, y);
        }

        tries += 1;
        if tries >= MAX_TRIES {
            bound *= 2.0;
            tries = 0;
        }
    }
}

fn overlaps_any(x: f64, y: f64, radius: f64, obstacles: &[(f64, f64, f64)]) -> bool {
    obstacles.iter().any(|&(ox, oy, oradius)| {
        let dx = x - ox;
        let dy = y - oy;
        let min_dist = radius + oradius;
        dx * dx + dy * dy <= min_dist * min_dist
    })
}
