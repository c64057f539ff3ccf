use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Movement speed every freshly spawned player starts with, in units/second.
pub const INITIAL_PLAYER_SPEED: f64 = 150.0;
/// Radius every freshly spawned player starts with.
pub const INITIAL_PLAYER_RADIUS: f64 = 20.0;
/// Slack added to proximity checks on consumption claims.
pub const CONSUME_BUFFER: f64 = 10.0;
/// A player must be strictly more than this many times as massive as its prey.
pub const MASS_DOMINANCE_RATIO: f64 = 1.5;
/// Players at or below this radius never shed spores.
pub const MIN_DROP_RADIUS: f64 = 10.0;
/// Half-width of the square region new objects are first placed in.
pub const SPAWN_BOUND: f64 = 3000.0;
/// Sender id used for packets originating from the server itself.
pub const SYSTEM_SENDER_ID: u64 = 0;

/// Every message travelling between a client and the server, tagged with the
/// id of the session it originated from.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Packet {
    pub sender_id: u64,
    pub msg: Msg,
}

impl Packet {
    pub fn new(sender_id: u64, msg: Msg) -> Self {
        Self { sender_id, msg }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Msg {
    // Session setup
    ClientId {
        id: u64,
    },
    LoginRequest {
        username: String,
        password: String,
    },
    RegisterRequest {
        username: String,
        password: String,
    },
    OkResponse,
    DenyResponse {
        reason: String,
    },

    // Leaderboard
    HiscoreBoardRequest,
    FinishedBrowsingHiscores,
    HiscoreBoard {
        hiscores: Vec<HiscoreEntry>,
    },

    // Gameplay
    Player(PlayerMessage),
    PlayerDirection {
        direction: f64,
    },
    Chat {
        msg: String,
    },
    Spore(SporeMessage),
    SporesBatch {
        spores: Vec<SporeMessage>,
    },
    SporeConsumed {
        spore_id: u64,
    },
    PlayerConsumed {
        player_id: u64,
    },
    Disconnect {
        reason: String,
    },
}

impl Msg {
    pub fn deny(reason: impl Into<String>) -> Self {
        Msg::DenyResponse {
            reason: reason.into(),
        }
    }

    /// Short variant name, used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::ClientId { .. } => "ClientId",
            Msg::LoginRequest { .. } => "LoginRequest",
            Msg::RegisterRequest { .. } => "RegisterRequest",
            Msg::OkResponse => "OkResponse",
            Msg::DenyResponse { .. } => "DenyResponse",
            Msg::HiscoreBoardRequest => "HiscoreBoardRequest",
            Msg::FinishedBrowsingHiscores => "FinishedBrowsingHiscores",
            Msg::HiscoreBoard { .. } => "HiscoreBoard",
            Msg::Player(_) => "Player",
            Msg::PlayerDirection { .. } => "PlayerDirection",
            Msg::Chat { .. } => "Chat",
            Msg::Spore(_) => "Spore",
            Msg::SporesBatch { .. } => "SporesBatch",
            Msg::SporeConsumed { .. } => "SporeConsumed",
            Msg::PlayerConsumed { .. } => "PlayerConsumed",
            Msg::Disconnect { .. } => "Disconnect",
        }
    }
}

/// Full state of one player as seen by clients.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PlayerMessage {
    pub id: u64,
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub radius: f64,
    pub direction: f64,
    pub speed: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SporeMessage {
    pub id: u64,
    pub x: f64,
    pub y: f64,
    pub radius: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct HiscoreEntry {
    pub rank: u64,
    pub name: String,
    pub score: u64,
}

/// Area of a circle with the given radius.
pub fn rad_to_mass(radius: f64) -> f64 {
    PI * radius * radius
}

/// Radius of a circle with the given area.
pub fn mass_to_rad(mass: f64) -> f64 {
    (mass / PI).sqrt()
}

/// Radius after adding `mass_diff` (negative to shrink) to a circle of `radius`.
///
/// Growth is applied in mass space so that eating the same object adds the
/// same area no matter how large the eater already is.
pub fn next_radius(radius: f64, mass_diff: f64) -> f64 {
    mass_to_rad(rad_to_mass(radius) + mass_diff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_mass_radius_roundtrip() {
        for radius in [0.5, 5.0, 20.0, 137.25] {
            assert_approx_eq!(mass_to_rad(rad_to_mass(radius)), radius, 1e-9);
            assert_approx_eq!(next_radius(radius, 0.0), radius, 1e-9);
        }
    }

    #[test]
    fn test_next_radius_monotonic_in_mass_diff() {
        let radius = 20.0;
        let mut previous = next_radius(radius, -500.0);
        for step in -4..=10 {
            let current = next_radius(radius, step as f64 * 100.0);
            assert!(current > previous);
            previous = current;
        }
    }

    #[test]
    fn test_growth_adds_area_not_radius() {
        let small = next_radius(10.0, rad_to_mass(10.0));
        let large = next_radius(100.0, rad_to_mass(10.0));
        assert!(small - 10.0 > large - 100.0);
        assert_approx_eq!(rad_to_mass(small), 2.0 * rad_to_mass(10.0), 1e-6);
    }

    #[test]
    fn test_packet_serialization_player() {
        let packet = Packet::new(
            7,
            Msg::Player(PlayerMessage {
                id: 7,
                name: "Alice".to_string(),
                x: 12.5,
                y: -3.0,
                radius: 20.0,
                direction: 1.25,
                speed: INITIAL_PLAYER_SPEED,
            }),
        );

        let serialized = bincode::serialize(&packet).unwrap();
        let deserialized: Packet = bincode::deserialize(&serialized).unwrap();

        assert_eq!(deserialized, packet);
    }

    #[test]
    fn test_truncated_packet_rejected() {
        let packet = Packet::new(1, Msg::deny("Invalid username"));
        let serialized = bincode::serialize(&packet).unwrap();

        let result: Result<Packet, _> = bincode::deserialize(&serialized[..serialized.len() / 2]);
        assert!(result.is_err());
    }

    #[test]
    fn test_msg_kind() {
        assert_eq!(Msg::OkResponse.kind(), "OkResponse");
        assert_eq!(Msg::deny("x").kind(), "DenyResponse");
        assert_eq!(Msg::SporeConsumed { spore_id: 3 }.kind(), "SporeConsumed");
    }
}
