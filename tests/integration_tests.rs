//! Integration tests for the hub, sessions and states
//!
//! These tests run a real hub and drive sessions end to end over in-memory
//! transports.

use server::client::{Client, ClientInterfacer};
use server::config::ServerConfig;
use server::hub::{replenish_spores, Hub, HubHandle};
use server::store::{hash_password, MemoryStore, Store};
use server::transport::{ChannelPeer, ChannelTransport};
use assert_approx_eq::assert_approx_eq;
use shared::{Msg, Packet, INITIAL_PLAYER_RADIUS, SYSTEM_SENDER_ID};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tokio_test::assert_ok;

const RECV_TIMEOUT: Duration = Duration::from_secs(10);

fn test_config(max_spores: usize) -> ServerConfig {
    ServerConfig {
        max_spores,
        // Long enough that the background loop never fires during a test
        replenish_interval: Duration::from_secs(600),
        replenish_spawn_delay: Duration::ZERO,
        player_tick: Duration::from_millis(20),
        initial_spore_batch_delay: Duration::ZERO,
        ..ServerConfig::default()
    }
}

fn start_hub(config: ServerConfig) -> (HubHandle, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let hub = Hub::new(config, store.clone());
    let handle = hub.handle();
    tokio::spawn(hub.run());
    (handle, store)
}

struct TestClient {
    id: u64,
    peer: ChannelPeer,
    session: Arc<Client>,
}

impl TestClient {
    async fn connect(hub: &HubHandle) -> Self {
        let (reader, writer, mut peer) = ChannelTransport::pair(1024);
        let session = Client::new(hub, reader, writer);
        let registered = session.clone();
        hub.serve(move |_| Ok(registered as Arc<dyn ClientInterfacer>))
            .await;

        let packet = recv(&mut peer).await;
        let id = match packet.msg {
            Msg::ClientId { id } => id,
            other => panic!("Expected client id, got {:?}", other),
        };
        assert_eq!(packet.sender_id, id);

        Self { id, peer, session }
    }

    async fn send(&self, msg: Msg) {
        self.peer
            .to_server
            .send(Packet::new(self.id, msg))
            .await
            .unwrap();
    }

    async fn recv(&mut self) -> Packet {
        recv(&mut self.peer).await
    }

    /// Skips packets until one matches.
    async fn recv_until(&mut self, matches: impl Fn(&Packet) -> bool) -> Packet {
        loop {
            let packet = self.recv().await;
            if matches(&packet) {
                return packet;
            }
        }
    }

    /// Everything that arrives within `window`.
    async fn collect_for(&mut self, window: Duration) -> Vec<Packet> {
        let mut packets = Vec::new();
        let deadline = tokio::time::Instant::now() + window;
        while let Ok(Some(packet)) =
            tokio::time::timeout_at(deadline, self.peer.from_server.recv()).await
        {
            packets.push(packet);
        }
        packets
    }

    async fn login(&mut self, username: &str, password: &str) -> Msg {
        self.send(Msg::LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        })
        .await;
        self.recv_until(|p| matches!(p.msg, Msg::OkResponse | Msg::DenyResponse { .. }))
            .await
            .msg
    }

    async fn wait_for_state(&self, name: &str) {
        for _ in 0..500 {
            if self.session.state_name() == name {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "Client {} never reached state {} (still in {})",
            self.id,
            name,
            self.session.state_name()
        );
    }
}

async fn recv(peer: &mut ChannelPeer) -> Packet {
    timeout(RECV_TIMEOUT, peer.from_server.recv())
        .await
        .expect("timed out waiting for the server")
        .expect("server closed the channel")
}

async fn seed_account(store: &MemoryStore, username: &str, password_hash: &str) -> i64 {
    let user = store
        .create_user(&username.to_lowercase(), password_hash)
        .await
        .unwrap();
    store.create_player(user.id, username).await.unwrap().id
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("Condition not reached in time");
}

/// SESSION LIFECYCLE TESTS
mod lifecycle_tests {
    use super::*;

    #[tokio::test]
    async fn connect_assigns_distinct_ids() {
        let (hub, _store) = start_hub(test_config(10));

        let a = TestClient::connect(&hub).await;
        let b = TestClient::connect(&hub).await;

        assert_ne!(a.id, b.id);
        assert_ne!(a.id, SYSTEM_SENDER_ID);
        a.wait_for_state("Connected").await;
        assert_eq!(hub.clients().len(), 2);
    }

    #[tokio::test]
    async fn dropped_connection_unregisters() {
        let (hub, store) = start_hub(test_config(10));
        let hash = hash_password("pw").await.unwrap();
        seed_account(&store, "leaver", &hash).await;

        let mut client = TestClient::connect(&hub).await;
        assert_eq!(client.login("leaver", "pw").await, Msg::OkResponse);
        client.wait_for_state("InGame").await;
        let id = client.id;
        assert!(hub.game_objects().players.contains(id));

        let session = client.session.clone();
        drop(client);

        wait_until(|| hub.clients().is_empty()).await;
        assert!(session.is_closed());
        assert!(!hub.game_objects().players.contains(id));
    }
}

/// CONNECTED STATE TESTS
mod connected_tests {
    use super::*;

    #[tokio::test]
    async fn wrong_password_denied_and_stays_connected() {
        let (hub, store) = start_hub(test_config(10));
        let hash = hash_password("right").await.unwrap();
        seed_account(&store, "erin", &hash).await;
        let mut client = TestClient::connect(&hub).await;

        let reply = client.login("erin", "wrong").await;

        assert_eq!(reply, Msg::deny("Incorrect username or password"));
        assert_eq!(client.session.state_name(), "Connected");

        assert_eq!(client.login("erin", "right").await, Msg::OkResponse);
        client.wait_for_state("InGame").await;
    }

    #[tokio::test]
    async fn register_long_username_denied() {
        let (hub, store) = start_hub(test_config(10));
        let mut client = TestClient::connect(&hub).await;

        client
            .send(Msg::RegisterRequest {
                username: "a".repeat(21),
                password: "pw".to_string(),
            })
            .await;

        match client.recv().await.msg {
            Msg::DenyResponse { reason } => assert!(reason.contains("too long"), "{}", reason),
            other => panic!("Expected deny, got {:?}", other),
        }
        assert_eq!(store.user_count(), 0);
        assert_eq!(client.session.state_name(), "Connected");
    }

    #[tokio::test]
    async fn register_then_login_with_other_casing() {
        let (hub, store) = start_hub(test_config(10));
        let mut client = TestClient::connect(&hub).await;

        client
            .send(Msg::RegisterRequest {
                username: "Frank".to_string(),
                password: "pw".to_string(),
            })
            .await;
        assert_eq!(client.recv().await.msg, Msg::OkResponse);
        assert_eq!(store.user_count(), 1);

        assert_eq!(client.login("FRANK", "pw").await, Msg::OkResponse);
        let own = client
            .recv_until(|p| matches!(&p.msg, Msg::Player(_)))
            .await;
        match own.msg {
            Msg::Player(player) => {
                assert_eq!(player.id, client.id);
                assert_eq!(player.name, "Frank");
                assert_approx_eq!(player.radius, INITIAL_PLAYER_RADIUS);
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn hiscore_browsing_roundtrip() {
        let (hub, store) = start_hub(test_config(10));
        for (name, score) in [("gina", 500), ("hank", 1500)] {
            let player_id = seed_account(&store, name, "unused").await;
            assert_ok!(store.update_player_best_score(player_id, score).await);
        }
        let mut client = TestClient::connect(&hub).await;

        client.send(Msg::HiscoreBoardRequest).await;
        match client.recv().await.msg {
            Msg::HiscoreBoard { hiscores } => {
                assert_eq!(hiscores.len(), 2);
                assert_eq!((hiscores[0].rank, hiscores[0].name.as_str()), (1, "hank"));
                assert_eq!((hiscores[1].rank, hiscores[1].score), (2, 500));
            }
            other => panic!("Expected hiscore board, got {:?}", other),
        }
        client.wait_for_state("BrowsingHiscores").await;

        client.send(Msg::FinishedBrowsingHiscores).await;
        client.wait_for_state("Connected").await;
    }
}

/// IN-GAME TESTS
mod ingame_tests {
    use super::*;

    async fn two_players(hub: &HubHandle, store: &MemoryStore) -> (TestClient, TestClient) {
        let hash = hash_password("pw").await.unwrap();
        seed_account(store, "alpha", &hash).await;
        seed_account(store, "beta", &hash).await;

        let mut a = TestClient::connect(hub).await;
        let mut b = TestClient::connect(hub).await;
        assert_eq!(a.login("alpha", "pw").await, Msg::OkResponse);
        assert_eq!(b.login("beta", "pw").await, Msg::OkResponse);
        a.wait_for_state("InGame").await;
        b.wait_for_state("InGame").await;
        (a, b)
    }

    #[tokio::test]
    async fn direction_updates_reach_peers_only_as_player_state() {
        let (hub, store) = start_hub(test_config(30));
        let (a, mut b) = two_players(&hub, &store).await;
        b.collect_for(Duration::from_millis(100)).await;

        a.send(Msg::PlayerDirection { direction: 0.5 }).await;
        let seen = b.collect_for(Duration::from_millis(400)).await;

        assert!(seen
            .iter()
            .any(|p| p.sender_id == a.id && matches!(&p.msg, Msg::Player(player) if player.id == a.id)));
        assert!(!seen
            .iter()
            .any(|p| matches!(p.msg, Msg::PlayerDirection { .. })));
    }

    #[tokio::test]
    async fn chat_is_relayed_to_peers() {
        let (hub, store) = start_hub(test_config(10));
        let (a, mut b) = two_players(&hub, &store).await;

        a.send(Msg::Chat {
            msg: "hello".to_string(),
        })
        .await;

        let packet = b
            .recv_until(|p| matches!(p.msg, Msg::Chat { .. }))
            .await;
        assert_eq!(packet.sender_id, a.id);
        assert_eq!(
            packet.msg,
            Msg::Chat {
                msg: "hello".to_string()
            }
        );
    }

    #[tokio::test]
    async fn disconnect_returns_to_connected() {
        let (hub, store) = start_hub(test_config(10));
        let (a, mut b) = two_players(&hub, &store).await;

        a.send(Msg::Disconnect {
            reason: "bye".to_string(),
        })
        .await;

        let packet = b
            .recv_until(|p| matches!(p.msg, Msg::Disconnect { .. }))
            .await;
        assert_eq!(packet.sender_id, a.id);
        a.wait_for_state("Connected").await;
        assert!(!hub.game_objects().players.contains(a.id));
        assert!(hub.game_objects().players.contains(b.id));
    }

    #[tokio::test]
    async fn far_spore_claim_is_ignored() {
        let (hub, store) = start_hub(test_config(10));
        let (a, mut b) = two_players(&hub, &store).await;
        let spore_ids: Vec<u64> = hub
            .game_objects()
            .spores
            .snapshot()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        b.collect_for(Duration::from_millis(100)).await;

        // Players spawn at radius 20, far from almost every spore
        let own_x_y = {
            let player = hub.game_objects().players.get(a.id).unwrap();
            let player = player.read().unwrap();
            (player.x, player.y)
        };
        let far = spore_ids
            .into_iter()
            .find(|id| {
                let spore = hub.game_objects().spores.get(*id).unwrap();
                let (dx, dy) = (spore.x - own_x_y.0, spore.y - own_x_y.1);
                dx * dx + dy * dy > 100.0 * 100.0
            })
            .unwrap();

        a.send(Msg::SporeConsumed { spore_id: far }).await;
        let seen = b.collect_for(Duration::from_millis(200)).await;

        assert!(hub.game_objects().spores.contains(far));
        assert!(!seen
            .iter()
            .any(|p| matches!(p.msg, Msg::SporeConsumed { .. })));
    }

    #[tokio::test]
    async fn replenished_spores_reach_players() {
        let (hub, store) = start_hub(test_config(20));
        wait_until(|| hub.game_objects().spores.len() == 20).await;
        let (mut a, _b) = two_players(&hub, &store).await;

        let ids: Vec<u64> = hub
            .game_objects()
            .spores
            .snapshot()
            .into_iter()
            .map(|(id, _)| id)
            .take(3)
            .collect();
        for id in ids {
            hub.game_objects().spores.remove(id);
        }

        assert_eq!(replenish_spores(&hub).await, 3);
        let packet = a
            .recv_until(|p| matches!(p.msg, Msg::Spore(_)))
            .await;
        assert_eq!(packet.sender_id, SYSTEM_SENDER_ID);
    }
}

/// SPORE REPLENISHMENT TESTS
mod replenish_tests {
    use super::*;

    #[tokio::test]
    async fn hub_fills_world_and_replenishes_in_capped_steps() {
        let (hub, _store) = start_hub(test_config(40));
        wait_until(|| hub.game_objects().spores.len() == 40).await;

        let ids: Vec<u64> = hub
            .game_objects()
            .spores
            .snapshot()
            .into_iter()
            .map(|(id, _)| id)
            .take(25)
            .collect();
        for id in ids {
            hub.game_objects().spores.remove(id);
        }
        assert_eq!(hub.game_objects().spores.len(), 15);

        assert_eq!(replenish_spores(&hub).await, 10);
        assert_eq!(hub.game_objects().spores.len(), 25);
        assert_eq!(replenish_spores(&hub).await, 10);
        assert_eq!(replenish_spores(&hub).await, 5);
        assert_eq!(replenish_spores(&hub).await, 0);
        assert_eq!(hub.game_objects().spores.len(), 40);
    }
}

/// WIRE PROTOCOL TESTS
mod wire_tests {
    use super::*;
    use bincode::{deserialize, serialize};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    async fn read_frame(stream: &mut TcpStream) -> Packet {
        let len = stream.read_u32().await.unwrap() as usize;
        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).await.unwrap();
        deserialize(&body).unwrap()
    }

    async fn write_frame(stream: &mut TcpStream, packet: &Packet) {
        let body = serialize(packet).unwrap();
        stream.write_u32(body.len() as u32).await.unwrap();
        stream.write_all(&body).await.unwrap();
    }

    /// Tests a raw TCP client speaking length-prefixed bincode frames
    #[tokio::test]
    async fn tcp_session_skips_undecodable_frames() {
        let (hub, store) = start_hub(test_config(10));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept_hub = hub.clone();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            accept_hub
                .serve(|hub| Ok(Client::tcp(hub, stream) as Arc<dyn ClientInterfacer>))
                .await;
        });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let packet = timeout(RECV_TIMEOUT, read_frame(&mut stream)).await.unwrap();
        let id = match packet.msg {
            Msg::ClientId { id } => id,
            other => panic!("Expected client id, got {:?}", other),
        };

        // Too short to hold a packet; the server logs it and keeps reading
        stream.write_u32(3).await.unwrap();
        stream.write_all(&[0xff, 0xff, 0xff]).await.unwrap();

        write_frame(
            &mut stream,
            &Packet::new(
                id,
                Msg::RegisterRequest {
                    username: " padded".to_string(),
                    password: "pw".to_string(),
                },
            ),
        )
        .await;

        let reply = timeout(RECV_TIMEOUT, read_frame(&mut stream)).await.unwrap();
        assert_eq!(
            reply.msg,
            Msg::deny("Invalid username: leading or trailing whitespace")
        );
        assert_eq!(store.user_count(), 0);
    }
}
