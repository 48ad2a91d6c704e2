// A running multiplayer node: one `Session` plus its sockets.
//
// `SyncNode` is what a host embeds. It owns the `TransportEvent` receiver
// that the listener and reader threads feed, one `PeerWriter` per open
// connection, and the session. The host calls `tick(now)` once per frame
// from a single thread; everything session-related happens inside that
// call, so there are no locks around game state.
//
// Tick order:
// 1. `Session::begin_tick` advances replica predictions to `now`.
// 2. Drain the channel without blocking. `Connected` registers the writer,
//    `Message` goes to `Session::handle_message` (refusals are logged and
//    the message dropped), `Closed` drops the writer and tells the session.
// 3. `Session::end_tick` runs lost-player expiry and periodic sends.
// 4. Flush the session's outbox to the writers.
//
// A send that fails is only logged: the same socket's reader thread will
// report the failure as `Closed`, which is the single removal path.
//
// See also: `session.rs` (all protocol logic), `server.rs` and `client.rs`
// (where the transport events come from).

use std::collections::BTreeMap;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::mpsc::{self, Receiver, TryRecvError};

use log::{debug, warn};
use railsync_protocol::{Message, PeerId};
use railsync_sim::{CarLoader, World};

use crate::client::{UPSTREAM_PEER, connect};
use crate::config::NodeConfig;
use crate::connection::{PeerWriter, TransportEvent};
use crate::error::NetError;
use crate::server::{ListenerHandle, start_listener};
use crate::session::{LocalPlayer, Outbound, Role, Session, SessionEvent, Target};

pub struct SyncNode {
    session: Session,
    events: Receiver<TransportEvent>,
    peers: BTreeMap<PeerId, PeerWriter>,
    listener: Option<ListenerHandle>,
}

impl SyncNode {
    /// Start a server node listening on the configured address. Returns the
    /// node and the bound address.
    pub fn host(
        config: &NodeConfig,
        local: LocalPlayer,
        world: World,
        loader: Box<dyn CarLoader>,
    ) -> Result<(Self, SocketAddr), NetError> {
        let (tx, rx) = mpsc::channel();
        let (listener, addr) = start_listener(config, tx)?;
        let node = Self {
            session: Session::new(Role::Server, local, world, loader, config),
            events: rx,
            peers: BTreeMap::new(),
            listener: Some(listener),
        };
        Ok((node, addr))
    }

    /// Connect to a server and send our join.
    pub fn join(
        addr: impl ToSocketAddrs,
        config: &NodeConfig,
        local: LocalPlayer,
        world: World,
        loader: Box<dyn CarLoader>,
    ) -> Result<Self, NetError> {
        let (tx, rx) = mpsc::channel();
        let writer = connect(addr, config.wire_format, tx)?;
        let mut node = Self {
            session: Session::new(Role::Client, local, world, loader, config),
            events: rx,
            peers: BTreeMap::from([(UPSTREAM_PEER, writer)]),
            listener: None,
        };
        node.session.start()?;
        node.flush_outbox();
        Ok(node)
    }

    /// A node with no network at all.
    pub fn standalone(
        config: &NodeConfig,
        local: LocalPlayer,
        world: World,
        loader: Box<dyn CarLoader>,
    ) -> Self {
        let (_tx, rx) = mpsc::channel();
        Self {
            session: Session::new(Role::Standalone, local, world, loader, config),
            events: rx,
            peers: BTreeMap::new(),
            listener: None,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Host actions (`throw_switch`, `uncouple`, ...) go through here; their
    /// messages are sent on the next `tick` or `flush`.
    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        self.session.drain_events()
    }

    /// Number of open connections.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Run one session step at session time `now` (seconds).
    pub fn tick(&mut self, now: f64) {
        self.session.begin_tick(now);
        loop {
            match self.events.try_recv() {
                Ok(event) => self.handle_transport(event),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        self.session.end_tick();
        self.flush_outbox();
    }

    /// Send whatever host actions queued since the last tick.
    pub fn flush(&mut self) {
        self.flush_outbox();
    }

    /// Leave the session cleanly, close every connection and stop
    /// listening.
    pub fn shutdown(mut self) {
        self.session.quit();
        self.flush_outbox();
        self.close_all();
    }

    fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected { peer, writer } => {
                self.peers.insert(peer, writer);
                self.session.connection_opened(peer);
            }
            TransportEvent::Message { peer, message } => {
                let verb = message.verb();
                if let Err(e) = self.session.handle_message(peer, message) {
                    warn!("{peer}: dropped {verb}: {e}");
                }
            }
            TransportEvent::Closed { peer, reason } => {
                debug!("{peer} closed: {reason:?}");
                if let Some(writer) = self.peers.remove(&peer) {
                    writer.close();
                }
                self.session.connection_closed(peer);
            }
        }
    }

    fn flush_outbox(&mut self) {
        for out in self.session.drain_outbox() {
            match out {
                Outbound::Send { target, message } => self.deliver(target, &message),
                Outbound::Close(peer) => {
                    if let Some(writer) = self.peers.remove(&peer) {
                        writer.close();
                    }
                }
            }
        }
        if self.session.role() == Role::Standalone {
            self.close_all();
        }
    }

    fn close_all(&mut self) {
        for (_, writer) in std::mem::take(&mut self.peers) {
            writer.close();
        }
        if let Some(listener) = self.listener.take() {
            listener.stop();
        }
    }

    fn deliver(&mut self, target: Target, message: &Message) {
        let payload = message.encode();
        for (peer, writer) in &mut self.peers {
            if !target.includes(*peer) {
                continue;
            }
            if let Err(e) = writer.send(&payload) {
                warn!("{peer}: send of {} failed: {e}", message.verb());
            }
        }
    }
}

/// Dropping a node without `shutdown` closes its sockets without a quit, so
/// peers see a lost connection.
impl Drop for SyncNode {
    fn drop(&mut self) {
        self.close_all();
    }
}
