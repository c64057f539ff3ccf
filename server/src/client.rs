//! Server-side sessions and the contracts between sessions, states and the hub
//!
//! Every connection is represented by a [`Client`]. A client owns:
//! - an inbox drained by a single processor task, which owns the active
//!   [`ClientStateHandler`] and therefore never handles two messages at once
//! - a bounded outbound queue drained by the write pump
//! - the read pump, which feeds decoded packets from the transport into the inbox
//!
//! Other sessions and the hub only ever enqueue into a client; nothing outside
//! the processor touches the active state.

use crate::config::ServerConfig;
use crate::error::TransportError;
use crate::hub::HubHandle;
use crate::objects::SharedGameObjects;
use crate::states::Connected;
use crate::store::Store;
use crate::transport::{PacketReader, PacketWriter, TcpTransport};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use shared::{Msg, Packet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};

/// Behaviour of a session in one phase of its life.
///
/// The processor calls `set_client` then `on_enter` when a state becomes
/// active, `handle_message` for every message while it is active, and
/// `on_exit` exactly once when it is replaced or the connection closes.
#[async_trait]
pub trait ClientStateHandler: Send {
    fn name(&self) -> &'static str;

    fn set_client(&mut self, client: Arc<dyn ClientInterfacer>);

    async fn on_enter(&mut self);

    async fn handle_message(&mut self, sender_id: u64, message: Msg);

    async fn on_exit(&mut self);
}

/// What states and the hub may do with a session.
#[async_trait]
pub trait ClientInterfacer: Send + Sync + 'static {
    fn id(&self) -> u64;

    /// Queues a message for this session's active state. Never blocks.
    fn process_message(&self, sender_id: u64, message: Msg);

    /// Requests a transition; it takes effect before the next message is handled.
    fn set_state(&self, state: Box<dyn ClientStateHandler>);

    /// Assigns the session id and starts message processing in the Connected state.
    fn initialize(self: Arc<Self>, id: u64);

    /// Queues a message originating from this session to its own socket.
    fn socket_send(&self, message: Msg) {
        self.socket_send_as(message, self.id());
    }

    /// Queues a message originating from `sender_id` to this session's socket.
    fn socket_send_as(&self, message: Msg, sender_id: u64);

    /// Hands a message to another session for processing.
    fn pass_to_peer(&self, message: Msg, peer_id: u64);

    /// Hands a message to every other session for processing.
    async fn broadcast(&self, message: Msg);

    async fn read_pump(self: Arc<Self>);

    async fn write_pump(self: Arc<Self>);

    fn close(&self, reason: &str);

    fn store(&self) -> Arc<dyn Store>;

    fn game_objects(&self) -> Arc<SharedGameObjects>;

    fn config(&self) -> &ServerConfig;
}

enum Inbound {
    /// Read from this session's own socket; stamped with our id when processed.
    Socket(Msg),
    Peer { sender_id: u64, msg: Msg },
}

pub struct Client {
    id: AtomicU64,
    hub: HubHandle,
    inbox_tx: mpsc::Sender<Inbound>,
    inbox_rx: Mutex<Option<mpsc::Receiver<Inbound>>>,
    outbound_tx: mpsc::Sender<Packet>,
    outbound_rx: Mutex<Option<mpsc::Receiver<Packet>>>,
    reader: Mutex<Option<Box<dyn PacketReader>>>,
    writer: Mutex<Option<Box<dyn PacketWriter>>>,
    pending_state: Mutex<Option<Box<dyn ClientStateHandler>>>,
    state_name: Mutex<&'static str>,
    closed: watch::Sender<bool>,
}

fn take<T>(slot: &Mutex<Option<T>>) -> Option<T> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    loop {
        let is_closed = *closed.borrow_and_update();
        if is_closed || closed.changed().await.is_err() {
            return;
        }
    }
}

impl Client {
    pub fn new(
        hub: &HubHandle,
        reader: impl PacketReader,
        writer: impl PacketWriter,
    ) -> Arc<Self> {
        let config = hub.config();
        let (inbox_tx, inbox_rx) = mpsc::channel(config.inbound_queue_size);
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_queue_size);
        let (closed, _) = watch::channel(false);

        Arc::new(Self {
            id: AtomicU64::new(0),
            hub: hub.clone(),
            inbox_tx,
            inbox_rx: Mutex::new(Some(inbox_rx)),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            reader: Mutex::new(Some(Box::new(reader))),
            writer: Mutex::new(Some(Box::new(writer))),
            pending_state: Mutex::new(None),
            state_name: Mutex::new("None"),
            closed,
        })
    }

    pub fn tcp(hub: &HubHandle, stream: TcpStream) -> Arc<Self> {
        let (reader, writer) = TcpTransport::split(stream);
        Self::new(hub, reader, writer)
    }

    /// Name of the state currently handling messages.
    pub fn state_name(&self) -> &'static str {
        *self.state_name.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    async fn process_messages(self: Arc<Self>, mut inbox: mpsc::Receiver<Inbound>) {
        let mut closed = self.closed.subscribe();
        let mut state: Option<Box<dyn ClientStateHandler>> = None;

        loop {
            self.apply_pending_state(&mut state).await;

            let inbound = tokio::select! {
                biased;
                _ = wait_closed(&mut closed) => break,
                inbound = inbox.recv() => match inbound {
                    Some(inbound) => inbound,
                    None => break,
                },
            };

            let (sender_id, msg) = match inbound {
                Inbound::Socket(msg) => (self.id(), msg),
                Inbound::Peer { sender_id, msg } => (sender_id, msg),
            };
            if let Some(state) = state.as_mut() {
                state.handle_message(sender_id, msg).await;
            }
        }

        if let Some(mut state) = state.take() {
            state.on_exit().await;
        }
        *self.state_name.lock().unwrap_or_else(PoisonError::into_inner) = "None";

        if let Err(e) = self.hub.unregister(self.clone()).await {
            error!("Client {}: failed to unregister: {}", self.id(), e);
        }
    }

    async fn apply_pending_state(self: &Arc<Self>, state: &mut Option<Box<dyn ClientStateHandler>>) {
        while let Some(mut next) = take(&self.pending_state) {
            let previous_name = match state.take() {
                Some(mut previous) => {
                    previous.on_exit().await;
                    previous.name()
                }
                None => "None",
            };
            info!(
                "Client {}: switching from state {} to {}",
                self.id(),
                previous_name,
                next.name()
            );

            let client: Arc<dyn ClientInterfacer> = self.clone();
            next.set_client(client);
            next.on_enter().await;
            *self.state_name.lock().unwrap_or_else(PoisonError::into_inner) = next.name();
            *state = Some(next);
        }
    }
}

#[async_trait]
impl ClientInterfacer for Client {
    fn id(&self) -> u64 {
        self.id.load(Ordering::Acquire)
    }

    fn process_message(&self, sender_id: u64, message: Msg) {
        let kind = message.kind();
        if let Err(e) = self.inbox_tx.try_send(Inbound::Peer {
            sender_id,
            msg: message,
        }) {
            match e {
                mpsc::error::TrySendError::Full(_) => {
                    warn!("Client {}: inbox full, dropping {} from {}", self.id(), kind, sender_id)
                }
                mpsc::error::TrySendError::Closed(_) => {
                    debug!("Client {}: inbox closed, dropping {}", self.id(), kind)
                }
            }
        }
    }

    fn set_state(&self, state: Box<dyn ClientStateHandler>) {
        *self
            .pending_state
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(state);
    }

    fn initialize(self: Arc<Self>, id: u64) {
        self.id.store(id, Ordering::Release);
        self.set_state(Box::new(Connected::new()));

        match take(&self.inbox_rx) {
            Some(inbox) => {
                tokio::spawn(self.clone().process_messages(inbox));
            }
            None => warn!("Client {}: initialized twice", id),
        }
    }

    fn socket_send_as(&self, message: Msg, sender_id: u64) {
        let kind = message.kind();
        if let Err(e) = self.outbound_tx.try_send(Packet::new(sender_id, message)) {
            match e {
                mpsc::error::TrySendError::Full(_) => {
                    warn!("Client {}: send channel full, dropping {}", self.id(), kind)
                }
                mpsc::error::TrySendError::Closed(_) => {
                    debug!("Client {}: send channel closed, dropping {}", self.id(), kind)
                }
            }
        }
    }

    fn pass_to_peer(&self, message: Msg, peer_id: u64) {
        match self.hub.clients().get(peer_id) {
            Some(peer) => peer.process_message(self.id(), message),
            None => debug!("Client {}: peer {} not found", self.id(), peer_id),
        }
    }

    async fn broadcast(&self, message: Msg) {
        if let Err(e) = self.hub.broadcast(Packet::new(self.id(), message)).await {
            error!("Client {}: broadcast failed: {}", self.id(), e);
        }
    }

    async fn read_pump(self: Arc<Self>) {
        let Some(mut reader) = take(&self.reader) else {
            return;
        };
        let mut closed = self.closed.subscribe();

        loop {
            let result = tokio::select! {
                biased;
                _ = wait_closed(&mut closed) => break,
                result = reader.read_packet() => result,
            };

            match result {
                Ok(Some(packet)) => {
                    if self.inbox_tx.send(Inbound::Socket(packet.msg)).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    self.close("client disconnected");
                    break;
                }
                Err(TransportError::Codec(e)) => {
                    warn!("Client {}: error unmarshalling packet: {}", self.id(), e);
                }
                Err(e) => {
                    self.close(&format!("read error: {}", e));
                    break;
                }
            }
        }
    }

    async fn write_pump(self: Arc<Self>) {
        let (Some(mut writer), Some(mut outbound)) = (take(&self.writer), take(&self.outbound_rx))
        else {
            return;
        };
        let mut closed = self.closed.subscribe();

        loop {
            let packet = tokio::select! {
                biased;
                _ = wait_closed(&mut closed) => break,
                packet = outbound.recv() => match packet {
                    Some(packet) => packet,
                    None => break,
                },
            };

            if let Err(e) = writer.write_packet(&packet).await {
                self.close(&format!("write error: {}", e));
                break;
            }
        }

        writer.shutdown().await;
    }

    fn close(&self, reason: &str) {
        if self.closed.send_replace(true) {
            return;
        }
        info!("Client {}: closing connection because: {}", self.id(), reason);
    }

    fn store(&self) -> Arc<dyn Store> {
        Arc::clone(self.hub.store())
    }

    fn game_objects(&self) -> Arc<SharedGameObjects> {
        Arc::clone(self.hub.game_objects())
    }

    fn config(&self) -> &ServerConfig {
        self.hub.config()
    }
}
