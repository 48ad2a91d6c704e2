// Session state for one multiplayer node.
//
// `Session` is the context object every message handler and host action runs
// against. It owns the `World` (trains, switches, signals, environment), the
// roster of remote players, the lost-player retention list and the session
// timers. It never touches a socket: handlers queue `Outbound` sends and
// closes, and `SessionEvent`s for the host, and `SyncNode` (see `node.rs`)
// flushes both after each tick. This keeps all business logic
// single-threaded and makes the whole protocol testable without TCP.
//
// Roles:
// - **Server**: binds each connection to a player name on its first join,
//   validates joins, allocates permanent train numbers, echoes changes to
//   the other peers, and broadcasts move batches, switch snapshots and
//   signal snapshots on a fixed cadence. Coupling and signal aspects are
//   decided here only.
// - **Client**: one upstream peer (the server). Applies whatever the server
//   relays, sends its own train's moves, and renumbers its trains when the
//   server confirms permanent numbers.
// - **Standalone**: after the server is lost or the session is terminated.
//   Inbound messages are ignored and nothing is sent.
//
// Tick protocol (driven by `SyncNode::tick`):
// 1. `begin_tick(now)`: advance every replica's prediction to `now` and
//    clear the per-tick fresh-sample flags.
// 2. `handle_message` / `connection_opened` / `connection_closed` for each
//    queued transport event. Samples applied here land on already-advanced
//    replicas.
// 3. `end_tick()`: expire lost players, then the role's periodic sends.
//
// Ownership guard: a peer may only act as the name it joined with, and only
// on its own player train or trains it uncoupled. Everything else comes back
// as `SessionError::OwnershipViolation` and the message is dropped. Replica
// trains refuse local writes at the `Train` level as well.
//
// Removal is idempotent: a connection is unbound as soon as its player quits
// or is rejected, so the `Closed` event that follows finds nothing to do.
//
// See also: `node.rs` (transport glue), `railsync_sim::World` (the state
// mutated here), `railsync_protocol::message` (the verbs).

use std::collections::BTreeMap;

use log::{debug, info, warn};
use railsync_protocol::{
    ALL_PLAYERS, CarDescriptor, ControlEvent, CoupleRecord, EventKind, JoinRecord, Kinematics,
    Message, MoveSample, MoveSource, PeerId, PlayerSide, QuitNotice, SignalChange, SignalKey,
    SignalRequest, SignalSnapshot, SignalState, SwitchChange, SwitchKey, SwitchSnapshot,
    TextLevel, TextMessage, TrainNumber, TrainRecord, UncoupleRecord,
    types::is_valid_player_name,
};
use railsync_sim::{
    CarLoader, Environment, Ownership, ReconcileConfig, SignalError, Train, World, WorldError,
    load_consist,
};

use crate::config::{NodeConfig, SyncConfig};
use crate::error::SessionError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
    Standalone,
}

/// Identity of the player at this node.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LocalPlayer {
    pub name: String,
    pub credential: String,
    /// The player's own train. Must already be in the `World` as a local
    /// train owned by `name`.
    pub train: Option<TrainNumber>,
    pub lead_car_id: String,
    pub consist: String,
    pub path: String,
}

impl LocalPlayer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_train(mut self, number: TrainNumber, lead_car_id: impl Into<String>) -> Self {
        self.train = Some(number);
        self.lead_car_id = lead_car_id.into();
        self
    }
}

/// A remote player known to this node.
#[derive(Clone, Debug, PartialEq)]
pub struct Player {
    pub name: String,
    pub credential: String,
    pub train: TrainNumber,
    pub lead_car_id: String,
    pub consist: String,
    pub path: String,
    /// Session clock of the last message from this player.
    pub last_activity: f64,
    /// Connection the player joined on (server role only).
    pub peer: Option<PeerId>,
}

#[derive(Clone, Debug)]
struct LostPlayer {
    player: Player,
    lost_at: f64,
}

/// Who an outbound message goes to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    Peer(PeerId),
    AllPeers,
    AllExcept(PeerId),
}

impl Target {
    pub fn includes(self, peer: PeerId) -> bool {
        match self {
            Target::Peer(p) => p == peer,
            Target::AllPeers => true,
            Target::AllExcept(p) => p != peer,
        }
    }
}

/// Work for the transport, queued by the session.
#[derive(Clone, Debug, PartialEq)]
pub enum Outbound {
    Send { target: Target, message: Message },
    Close(PeerId),
}

/// Changes that arrived from the network, for the host to react to (spawn
/// or despawn visuals, play a horn, show a chat line). A host's own actions
/// are not reported back.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    PlayerJoined { name: String },
    /// Connection dropped; the player's train is kept for the grace period.
    PlayerLost { name: String },
    PlayerRemoved { name: String },
    TrainAdded(TrainNumber),
    TrainRemoved(TrainNumber),
    TrainRenumbered { from: TrainNumber, to: TrainNumber },
    /// `absorbed` no longer exists; its cars are now part of `number`.
    TrainsCoupled { number: TrainNumber, absorbed: TrainNumber },
    SwitchChanged(SwitchKey),
    SwitchesReplaced { changed: usize },
    SignalsReplaced { changed: usize },
    /// Server role: a signal helper asked for a signal change. The host's
    /// signalling engine answers through `Session::set_signal`.
    SignalRequested { user: String, key: SignalKey, request: SignalRequest },
    Control { train: TrainNumber, kind: EventKind, state: i32 },
    Text(TextMessage),
    /// The server ended this node's session with a fatal message.
    Terminated { reason: String },
    /// The server went away; the node continues standalone.
    ServerLost { reason: String },
}

/// Fixed-cadence timer on the session clock.
#[derive(Clone, Debug)]
struct Interval {
    every: f64,
    last: Option<f64>,
}

impl Interval {
    fn new(every: f64) -> Self {
        Self { every, last: None }
    }

    /// The first call arms the timer; afterwards fires once per `every`.
    fn due(&mut self, now: f64) -> bool {
        match self.last {
            Some(last) if now - last < self.every => false,
            Some(_) => {
                self.last = Some(now);
                true
            }
            None => {
                self.last = Some(now);
                false
            }
        }
    }
}

pub struct Session {
    role: Role,
    local: LocalPlayer,
    world: World,
    loader: Box<dyn CarLoader>,

    // Policy
    route: String,
    max_players: usize,
    allow_manual_switch: bool,
    signal_helpers: Vec<String>,
    sync: SyncConfig,
    reconcile: ReconcileConfig,

    // Roster
    players: BTreeMap<String, Player>,
    lost: BTreeMap<String, LostPlayer>,
    /// Server role: every open connection and the name it joined as.
    peers: BTreeMap<PeerId, Option<String>>,
    joined: bool,

    // Clock and cadence
    now: f64,
    last_tick: Option<f64>,
    move_timer: Interval,
    switch_timer: Interval,
    last_sent: f64,
    last_join_at: Option<f64>,
    last_snapshot: Option<SwitchSnapshot>,
    last_signal_snapshot: Option<SignalSnapshot>,
    /// Client role: move samples seen for trains this node doesn't have.
    missing: BTreeMap<TrainNumber, u32>,

    rng: fastrand::Rng,
    outbox: Vec<Outbound>,
    events: Vec<SessionEvent>,
}

impl Session {
    pub fn new(
        role: Role,
        local: LocalPlayer,
        world: World,
        loader: Box<dyn CarLoader>,
        config: &NodeConfig,
    ) -> Self {
        Self {
            role,
            local,
            world,
            loader,
            route: config.route.clone(),
            max_players: config.max_players,
            allow_manual_switch: config.allow_manual_switch,
            signal_helpers: config.signal_helpers.clone(),
            sync: config.sync.clone(),
            reconcile: config.reconcile.clone(),
            players: BTreeMap::new(),
            lost: BTreeMap::new(),
            peers: BTreeMap::new(),
            joined: role == Role::Server,
            now: 0.0,
            last_tick: None,
            move_timer: Interval::new(config.sync.move_interval_secs),
            switch_timer: Interval::new(config.sync.switch_interval_secs),
            last_sent: 0.0,
            last_join_at: None,
            last_snapshot: None,
            last_signal_snapshot: None,
            missing: BTreeMap::new(),
            rng: fastrand::Rng::new(),
            outbox: Vec::new(),
            events: Vec::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn local(&self) -> &LocalPlayer {
        &self.local
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    /// Host-side access for physics results and environment updates.
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn now(&self) -> f64 {
        self.now
    }

    pub fn player(&self, name: &str) -> Option<&Player> {
        self.players.get(name)
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Whether `name` is in the lost-player grace period.
    pub fn is_lost(&self, name: &str) -> bool {
        self.lost.contains_key(name)
    }

    /// Client role: whether the server has acknowledged our join.
    pub fn is_joined(&self) -> bool {
        self.joined
    }

    pub fn drain_outbox(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbox)
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    /// Move the session clock to `now` and advance replica predictions.
    pub fn begin_tick(&mut self, now: f64) {
        let dt = self.last_tick.map_or(0.0, |last| (now - last).max(0.0));
        self.last_tick = Some(now);
        self.now = now;
        for train in self.world.trains_mut() {
            train.clear_fresh_sample();
        }
        self.world.advance_replicas(dt as f32);
    }

    /// Expire lost players and run the role's periodic sends.
    pub fn end_tick(&mut self) {
        self.expire_lost_players();
        match self.role {
            Role::Server => self.server_periodic(),
            Role::Client => self.client_periodic(),
            Role::Standalone => {}
        }
    }

    /// `begin_tick` and `end_tick` with no messages in between.
    pub fn tick(&mut self, now: f64) {
        self.begin_tick(now);
        self.end_tick();
    }

    fn server_periodic(&mut self) {
        if self.move_timer.due(self.now) {
            let samples = self.collect_moves();
            if !samples.is_empty() {
                self.send(Target::AllPeers, Message::Move(samples));
            }
            self.send_signals_if_due();
        }
        if self.switch_timer.due(self.now) {
            match self.world.switches.snapshot() {
                Ok(snapshot) => {
                    let window = self.sync.switch_interval_secs
                        * f64::from(self.sync.join_switch_resend_intervals);
                    let recent_join = self.last_join_at.is_some_and(|t| self.now - t <= window);
                    if recent_join || self.last_snapshot.as_ref() != Some(&snapshot) {
                        self.last_snapshot = Some(snapshot.clone());
                        self.send(Target::AllPeers, Message::SwitchSnapshot(snapshot));
                    }
                }
                Err(e) => warn!("cannot encode switch snapshot: {e}"),
            }
        }
    }

    /// Signal aspects ride the move cadence. They are sent when they
    /// changed, and unconditionally for a few intervals after a join.
    fn send_signals_if_due(&mut self) {
        if self.world.signals.is_empty() {
            return;
        }
        let snapshot = self.world.signals.snapshot();
        let window =
            self.sync.move_interval_secs * f64::from(self.sync.join_switch_resend_intervals);
        let recent_join = self.last_join_at.is_some_and(|t| self.now - t <= window);
        if recent_join || self.last_signal_snapshot.as_ref() != Some(&snapshot) {
            self.last_signal_snapshot = Some(snapshot.clone());
            self.send(Target::AllPeers, Message::SignalSnapshot(snapshot));
        }
    }

    fn client_periodic(&mut self) {
        // Our train number isn't settled until the join echo arrives.
        if self.move_timer.due(self.now) && self.joined {
            let samples = self.collect_moves();
            if !samples.is_empty() {
                self.send(Target::AllPeers, Message::Move(samples));
            }
        }
        if self.now - self.last_sent >= self.sync.keep_alive_secs {
            let user = self.local.name.clone();
            self.send(Target::AllPeers, Message::Alive { user });
        }
    }

    /// Gather this node's move batch. Locally driven trains report through
    /// `take_move_report`; the server also forwards each replica's newest
    /// sample once.
    fn collect_moves(&mut self) -> Vec<MoveSample> {
        let forward_replicas = self.role == Role::Server;
        let numbers: Vec<TrainNumber> = self.world.trains().map(|t| t.number).collect();
        let mut samples = Vec::new();
        for number in numbers {
            let Some(source) = self.world.train(number).map(|t| self.source_for(t)) else {
                continue;
            };
            let Some(train) = self.world.train_mut(number) else {
                continue;
            };
            let kinematics = if train.is_replica() {
                if !forward_replicas {
                    continue;
                }
                train.take_unforwarded_sample()
            } else {
                train.take_move_report()
            };
            if let Some(kinematics) = kinematics {
                samples.push(MoveSample {
                    source,
                    number,
                    car_count: u32::try_from(train.cars.len()).unwrap_or(u32::MAX),
                    kinematics,
                });
            }
        }
        samples
    }

    /// How a train is named in a move tuple.
    fn source_for(&self, train: &Train) -> MoveSource {
        match &train.owner {
            None => MoveSource::Background(train.number),
            Some(owner) if self.player_train(owner) == Some(train.number) => {
                MoveSource::Player(owner.clone())
            }
            Some(_) => MoveSource::Uncoupled(train.number),
        }
    }

    /// Current player train of `name`, including the local player and
    /// players in the grace period.
    fn player_train(&self, name: &str) -> Option<TrainNumber> {
        if name == self.local.name {
            return self.local.train;
        }
        self.players
            .get(name)
            .or_else(|| self.lost.get(name).map(|lost| &lost.player))
            .map(|player| player.train)
    }

    /// Player whose current player train is `number`, including the local
    /// player and players in the grace period.
    fn driver_of(&self, number: TrainNumber) -> Option<String> {
        if self.local.train == Some(number) {
            return Some(self.local.name.clone());
        }
        self.players
            .values()
            .chain(self.lost.values().map(|lost| &lost.player))
            .find(|player| player.train == number)
            .map(|player| player.name.clone())
    }

    /// Point every player whose train was `from` at `to`.
    fn retarget_player_train(&mut self, from: TrainNumber, to: TrainNumber) {
        if self.local.train == Some(from) {
            self.local.train = Some(to);
        }
        let lost = self.lost.values_mut().map(|lost| &mut lost.player);
        for player in self.players.values_mut().chain(lost) {
            if player.train == from {
                player.train = to;
            }
        }
    }

    fn expire_lost_players(&mut self) {
        let grace = self.sync.lost_player_grace_secs;
        let expired: Vec<String> = self
            .lost
            .iter()
            .filter(|(_, lost)| self.now - lost.lost_at >= grace)
            .map(|(name, _)| name.clone())
            .collect();
        for name in expired {
            if let Some(lost) = self.lost.remove(&name) {
                info!("{name} did not return within {grace}s, removing");
                self.drop_player(lost.player);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Connections
    // -----------------------------------------------------------------------

    pub fn connection_opened(&mut self, peer: PeerId) {
        if self.role == Role::Server {
            self.peers.insert(peer, None);
        }
    }

    /// A connection ended without (or after) an explicit quit.
    pub fn connection_closed(&mut self, peer: PeerId) {
        match self.role {
            Role::Server => {
                if let Some(Some(name)) = self.peers.remove(&peer) {
                    self.retain_lost(&name);
                }
            }
            Role::Client => {
                self.go_standalone();
                self.events.push(SessionEvent::ServerLost {
                    reason: "connection to server lost".into(),
                });
            }
            Role::Standalone => {}
        }
    }

    /// Park a disconnected player: stop its train and keep it for the grace
    /// period. Nothing is broadcast until it rejoins or expires.
    fn retain_lost(&mut self, name: &str) {
        let Some(player) = self.players.remove(name) else {
            return;
        };
        if let Some(train) = self.world.train_mut(player.train) {
            train.stop();
        }
        info!(
            "{name} lost, keeping train {} for {}s",
            player.train, self.sync.lost_player_grace_secs
        );
        self.lost.insert(
            name.to_owned(),
            LostPlayer {
                player,
                lost_at: self.now,
            },
        );
        self.events.push(SessionEvent::PlayerLost {
            name: name.to_owned(),
        });
    }

    /// Remove a player and its train for good and tell every peer.
    fn drop_player(&mut self, player: Player) {
        if self.world.remove_train(player.train).is_some() {
            self.events.push(SessionEvent::TrainRemoved(player.train));
        }
        self.release_uncoupled(&player.name);
        self.send(
            Target::AllPeers,
            Message::Quit(QuitNotice {
                user: player.name.clone(),
                server: false,
            }),
        );
        self.events.push(SessionEvent::PlayerRemoved { name: player.name });
    }

    /// Trains a departed player split off become background trains. The
    /// server takes over driving them and parks them where they are, since
    /// nothing here drives them any further.
    fn release_uncoupled(&mut self, name: &str) {
        let take_over = self.role == Role::Server;
        for train in self.world.trains_mut() {
            if train.owner.as_deref() == Some(name) {
                train.owner = None;
                if take_over {
                    train.make_local();
                    train.stop();
                }
            }
        }
    }

    /// Drop out of the session: other players' trains go away, background
    /// replicas become ours.
    fn go_standalone(&mut self) {
        if self.role == Role::Standalone {
            return;
        }
        let local_name = self.local.name.clone();
        let remote: Vec<TrainNumber> = self
            .world
            .trains()
            .filter(|t| t.is_replica() && t.owner.as_ref().is_some_and(|o| *o != local_name))
            .map(|t| t.number)
            .collect();
        for number in remote {
            self.world.remove_train(number);
            self.events.push(SessionEvent::TrainRemoved(number));
        }
        for train in self.world.trains_mut() {
            train.make_local();
        }
        self.players.clear();
        self.lost.clear();
        self.peers.clear();
        self.missing.clear();
        self.role = Role::Standalone;
        info!("continuing standalone");
    }

    fn send(&mut self, target: Target, message: Message) {
        if self.role == Role::Standalone {
            return;
        }
        self.last_sent = self.now;
        self.outbox.push(Outbound::Send { target, message });
    }

    // -----------------------------------------------------------------------
    // Inbound dispatch
    // -----------------------------------------------------------------------

    /// Apply one decoded message from `peer`.
    pub fn handle_message(&mut self, peer: PeerId, message: Message) -> Result<(), SessionError> {
        match self.role {
            Role::Server => self.handle_as_server(peer, message),
            Role::Client => self.handle_as_client(message),
            Role::Standalone => {
                debug!("standalone, ignoring {}", message.verb());
                Ok(())
            }
        }
    }

    fn handle_as_server(&mut self, peer: PeerId, message: Message) -> Result<(), SessionError> {
        let verb = message.verb();
        match message {
            Message::Join(join) => self.server_join(peer, join),
            Message::Move(samples) => {
                let name = self.sender(peer, verb)?;
                let mut first_error = None;
                for sample in &samples {
                    if let Err(e) = self.accept_move(&name, sample) {
                        first_error.get_or_insert(e);
                    }
                }
                first_error.map_or(Ok(()), Err)
            }
            Message::SwitchChange(change) => {
                let name = self.sender(peer, verb)?;
                self.server_switch_change(peer, &name, change)
            }
            Message::SwitchSnapshot(_) | Message::SignalSnapshot(_) => {
                debug!("{peer} sent a {verb} snapshot, ignoring");
                Ok(())
            }
            Message::TrainAdd(_) | Message::TrainRemove(_) => {
                let name = self.sender(peer, verb)?;
                Err(SessionError::violation(&name, "background trains"))
            }
            Message::Couple(record) => {
                let name = self.sender(peer, verb)?;
                Err(SessionError::violation(&name, record.number))
            }
            Message::SignalChange(change) => {
                let name = self.sender(peer, verb)?;
                self.server_signal_change(peer, &name, change)
            }
            Message::Uncouple(record) => {
                let name = self.sender(peer, verb)?;
                self.server_uncouple(&name, record)
            }
            Message::Event(event) => {
                let name = self.sender(peer, verb)?;
                self.server_event(peer, &name, event)
            }
            Message::Text(text) => {
                let name = self.sender(peer, verb)?;
                if text.level.is_fatal() {
                    return Err(SessionError::violation(&name, &text.addressee));
                }
                self.deliver_text(Some(peer), text);
                Ok(())
            }
            Message::Quit(quit) => {
                let name = self.sender(peer, verb)?;
                if quit.server || quit.user != name {
                    return Err(SessionError::violation(&name, &quit.user));
                }
                info!("{name} quit");
                self.peers.insert(peer, None);
                self.outbox.push(Outbound::Close(peer));
                if let Some(player) = self.players.remove(&name) {
                    self.drop_player(player);
                }
                Ok(())
            }
            Message::Alive { user } => {
                let name = self.sender(peer, verb)?;
                if user != name {
                    return Err(SessionError::violation(&name, &user));
                }
                Ok(())
            }
            Message::GetTrain { user, number } => {
                let name = self.sender(peer, verb)?;
                if user != name {
                    return Err(SessionError::violation(&name, &user));
                }
                self.answer_get_train(peer, number)
            }
        }
    }

    fn handle_as_client(&mut self, message: Message) -> Result<(), SessionError> {
        match message {
            Message::Join(join) => self.client_join(join),
            Message::Move(samples) => {
                self.client_move(&samples);
                Ok(())
            }
            Message::SwitchChange(change) => {
                if change.user == self.local.name {
                    return Ok(());
                }
                if self.world.switches.set_route(change.key, change.route)? {
                    self.events.push(SessionEvent::SwitchChanged(change.key));
                }
                Ok(())
            }
            Message::SwitchSnapshot(snapshot) => {
                let changed = self.world.switches.apply_snapshot(&snapshot)?;
                if !changed.is_empty() {
                    self.events.push(SessionEvent::SwitchesReplaced {
                        changed: changed.len(),
                    });
                }
                Ok(())
            }
            Message::SignalSnapshot(snapshot) => {
                let changed = self.world.signals.apply_snapshot(&snapshot)?;
                if !changed.is_empty() {
                    self.events.push(SessionEvent::SignalsReplaced {
                        changed: changed.len(),
                    });
                }
                Ok(())
            }
            Message::TrainAdd(record) => self.client_train_add(record),
            Message::TrainRemove(numbers) => {
                for number in numbers {
                    match self.world.train(number) {
                        Some(train) if train.is_replica() => {
                            self.world.remove_train(number);
                            self.missing.remove(&number);
                            self.events.push(SessionEvent::TrainRemoved(number));
                        }
                        Some(_) => warn!("refusing to remove locally owned train {number}"),
                        None => {}
                    }
                }
                Ok(())
            }
            Message::Uncouple(record) => self.client_uncouple(record),
            Message::Couple(record) => self.client_couple(record),
            Message::Event(event) => {
                if event.user == self.local.name {
                    return Ok(());
                }
                let Some(number) = self.player_train(&event.user) else {
                    warn!("event {} for unknown player {}", event.kind.token(), event.user);
                    return Ok(());
                };
                if let Some(train) = self.world.train_mut(number) {
                    train.controls.apply(event.kind, event.state);
                }
                self.events.push(SessionEvent::Control {
                    train: number,
                    kind: event.kind,
                    state: event.state,
                });
                Ok(())
            }
            Message::Text(text) => {
                if text.addressee == self.local.name && text.level.is_fatal() {
                    let reason = text.text.clone();
                    self.events.push(SessionEvent::Text(text));
                    self.terminate(reason);
                } else if text.addressee == self.local.name || text.addressee == ALL_PLAYERS {
                    self.events.push(SessionEvent::Text(text));
                }
                Ok(())
            }
            Message::Quit(quit) => {
                if quit.server {
                    self.go_standalone();
                    self.events.push(SessionEvent::ServerLost {
                        reason: format!("server {} left the session", quit.user),
                    });
                } else if quit.user != self.local.name
                    && let Some(player) = self.players.remove(&quit.user)
                {
                    info!("{} left", player.name);
                    if self.world.remove_train(player.train).is_some() {
                        self.events.push(SessionEvent::TrainRemoved(player.train));
                    }
                    self.release_uncoupled(&player.name);
                    self.events.push(SessionEvent::PlayerRemoved { name: player.name });
                }
                Ok(())
            }
            Message::Alive { .. } | Message::GetTrain { .. } | Message::SignalChange(_) => {
                debug!("ignoring server-bound message from upstream");
                Ok(())
            }
        }
    }

    /// Name the connection joined as, refreshing its activity timestamp.
    fn sender(&mut self, peer: PeerId, verb: &'static str) -> Result<String, SessionError> {
        let name = self
            .peers
            .get(&peer)
            .cloned()
            .flatten()
            .ok_or(SessionError::Unbound { peer, verb })?;
        if let Some(player) = self.players.get_mut(&name) {
            player.last_activity = self.now;
        }
        Ok(name)
    }

    // -----------------------------------------------------------------------
    // Joins
    // -----------------------------------------------------------------------

    fn server_join(&mut self, peer: PeerId, join: JoinRecord) -> Result<(), SessionError> {
        if let Some(Some(bound)) = self.peers.get(&peer) {
            if *bound == join.user {
                debug!("{peer} repeated its join, ignoring");
                return Ok(());
            }
            return Err(SessionError::violation(bound, &join.user));
        }
        if !is_valid_player_name(&join.user) {
            self.reject(peer, &join.user, "invalid player name");
            return Ok(());
        }
        // A second connection under an active name is refused; the player
        // already bound to it keeps its connection and train.
        if join.user == self.local.name || self.players.contains_key(&join.user) {
            self.reject(peer, &join.user, "a player with the same name is already in the session");
            return Ok(());
        }
        if join.route != self.route {
            let reason = format!("wrong route {:?}, session runs {:?}", join.route, self.route);
            self.reject(peer, &join.user, &reason);
            return Ok(());
        }
        if self.players.len() >= self.max_players {
            self.reject(peer, &join.user, "session is full");
            return Ok(());
        }
        let cars = match load_consist(self.loader.as_ref(), &join.cars) {
            Ok(cars) => cars,
            Err(e) => {
                self.reject(peer, &join.user, &e.to_string());
                return Ok(());
            }
        };

        if let Some(lost) = self.lost.remove(&join.user) {
            info!("{} rejoined within the grace period", join.user);
            if self.world.remove_train(lost.player.train).is_some() {
                self.events.push(SessionEvent::TrainRemoved(lost.player.train));
            }
            // Peers still hold the old replica; make them replace it.
            self.send(
                Target::AllExcept(peer),
                Message::Quit(QuitNotice {
                    user: join.user.clone(),
                    server: false,
                }),
            );
        }

        let number = if self.world.is_free_permanent(join.train) {
            join.train
        } else {
            self.world.allocate_number()
        };
        self.world.add_train(Train::replica(
            number,
            cars,
            join.kinematics,
            Some(join.user.clone()),
        ))?;
        let player = Player {
            name: join.user.clone(),
            credential: join.credential,
            train: number,
            lead_car_id: join.lead_car_id,
            consist: join.consist,
            path: join.path,
            last_activity: self.now,
            peer: Some(peer),
        };
        info!("{} joined on {peer} with train {number}", player.name);
        self.players.insert(player.name.clone(), player.clone());
        self.peers.insert(peer, Some(player.name.clone()));
        self.last_join_at = Some(self.now);

        // The echo goes first so the joiner settles its own train number
        // before catch-up trains that may reuse the one it proposed.
        if let Some(echo) = self.player_join(&player) {
            self.send(Target::AllPeers, Message::Join(echo));
        }
        self.send_catch_up(peer, &player.name)?;
        self.events.push(SessionEvent::PlayerJoined { name: player.name });
        self.events.push(SessionEvent::TrainAdded(number));
        Ok(())
    }

    /// Everything a new joiner needs: switch and signal states, the other
    /// players, and the background trains.
    fn send_catch_up(&mut self, peer: PeerId, joiner: &str) -> Result<(), SessionError> {
        let target = Target::Peer(peer);
        let snapshot = self.world.switches.snapshot()?;
        self.send(target, Message::SwitchSnapshot(snapshot));
        if !self.world.signals.is_empty() {
            let signals = self.world.signals.snapshot();
            self.send(target, Message::SignalSnapshot(signals));
        }

        let mut player_trains = Vec::new();
        let mut joins = Vec::new();
        let host = self.local_as_player();
        for player in host.iter().chain(self.players.values()) {
            player_trains.push(player.train);
            if player.name != joiner
                && let Some(join) = self.player_join(player)
            {
                joins.push(join);
            }
        }
        let adds: Vec<TrainRecord> = self
            .world
            .trains()
            .filter(|t| !player_trains.contains(&t.number))
            .map(Train::record)
            .collect();

        for join in joins {
            self.send(target, Message::Join(join));
        }
        for add in adds {
            self.send(target, Message::TrainAdd(add));
        }
        Ok(())
    }

    /// Refuse a join with a fatal message to the joiner and close it.
    fn reject(&mut self, peer: PeerId, user: &str, reason: &str) {
        warn!("rejecting join of {user:?} on {peer}: {reason}");
        self.send(
            Target::Peer(peer),
            Message::Text(TextMessage {
                addressee: user.to_owned(),
                level: TextLevel::Error,
                text: reason.to_owned(),
            }),
        );
        self.peers.insert(peer, None);
        self.outbox.push(Outbound::Close(peer));
    }

    fn local_as_player(&self) -> Option<Player> {
        Some(Player {
            name: self.local.name.clone(),
            credential: self.local.credential.clone(),
            train: self.local.train?,
            lead_car_id: self.local.lead_car_id.clone(),
            consist: self.local.consist.clone(),
            path: self.local.path.clone(),
            last_activity: self.now,
            peer: None,
        })
    }

    /// Join record for a player, stamped with this node's environment.
    fn player_join(&self, player: &Player) -> Option<JoinRecord> {
        let train = self.world.train(player.train)?;
        let env = self.world.environment;
        Some(JoinRecord {
            user: player.name.clone(),
            credential: player.credential.clone(),
            train: player.train,
            kinematics: train.kinematics(),
            clock_seconds: env.clock_seconds,
            season: env.season,
            weather: env.weather,
            route: self.route.clone(),
            lead_car_id: player.lead_car_id.clone(),
            consist: player.consist.clone(),
            path: player.path.clone(),
            cars: train.cars.clone(),
        })
    }

    fn client_join(&mut self, join: JoinRecord) -> Result<(), SessionError> {
        if join.user == self.local.name {
            self.world.environment = Environment {
                clock_seconds: join.clock_seconds,
                season: join.season,
                weather: join.weather,
            };
            if let Some(own) = self.local.train
                && own != join.train
            {
                self.world.renumber(own, join.train)?;
                self.local.train = Some(join.train);
                self.events.push(SessionEvent::TrainRenumbered {
                    from: own,
                    to: join.train,
                });
            }
            if !self.joined {
                info!("joined session as {}", self.local.name);
            }
            self.joined = true;
            return Ok(());
        }
        if self.players.contains_key(&join.user) {
            debug!("{} already known, ignoring join", join.user);
            return Ok(());
        }
        let cars = load_consist(self.loader.as_ref(), &join.cars)?;
        self.world.add_train(Train::replica(
            join.train,
            cars,
            join.kinematics,
            Some(join.user.clone()),
        ))?;
        self.missing.remove(&join.train);
        info!("{} is in the session with train {}", join.user, join.train);
        self.players.insert(
            join.user.clone(),
            Player {
                name: join.user.clone(),
                credential: join.credential,
                train: join.train,
                lead_car_id: join.lead_car_id,
                consist: join.consist,
                path: join.path,
                last_activity: self.now,
                peer: None,
            },
        );
        self.events.push(SessionEvent::PlayerJoined { name: join.user });
        self.events.push(SessionEvent::TrainAdded(join.train));
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Moves
    // -----------------------------------------------------------------------

    /// Server: apply one tuple from `name`, who may only report its own
    /// trains.
    fn accept_move(&mut self, name: &str, sample: &MoveSample) -> Result<(), SessionError> {
        let number = match &sample.source {
            MoveSource::Player(user) => {
                let player = self
                    .players
                    .get(name)
                    .filter(|_| user == name)
                    .ok_or_else(|| SessionError::violation(name, user))?;
                player.train
            }
            MoveSource::Uncoupled(number) => {
                let owned = self
                    .world
                    .train(*number)
                    .is_some_and(|t| t.owner.as_deref() == Some(name));
                if !owned {
                    return Err(SessionError::violation(name, &sample.source));
                }
                *number
            }
            MoveSource::Background(_) => {
                return Err(SessionError::violation(name, &sample.source));
            }
        };
        self.apply_sample(number, &sample.kinematics)
    }

    fn apply_sample(&mut self, number: TrainNumber, sample: &Kinematics) -> Result<(), SessionError> {
        let train = self
            .world
            .train_mut(number)
            .ok_or(WorldError::UnknownTrain(number))?;
        train.apply_sample(sample, &self.reconcile)?;
        Ok(())
    }

    fn client_move(&mut self, samples: &[MoveSample]) {
        for sample in samples {
            let number = match &sample.source {
                MoveSource::Player(user) if *user == self.local.name => continue,
                MoveSource::Player(user) => match self.players.get(user) {
                    Some(player) => player.train,
                    None => {
                        self.note_missing(sample.number);
                        continue;
                    }
                },
                MoveSource::Background(number) | MoveSource::Uncoupled(number) => *number,
            };
            match self.world.train(number) {
                None => self.note_missing(number),
                Some(train) if !train.is_replica() => {}
                Some(train) => {
                    let stale_consist = !matches!(sample.source, MoveSource::Player(_))
                        && usize::try_from(sample.car_count).ok() != Some(train.cars.len());
                    if stale_consist {
                        self.note_missing(number);
                    }
                    if let Err(e) = self.apply_sample(number, &sample.kinematics) {
                        warn!("dropping move sample for train {number}: {e}");
                    }
                }
            }
        }
    }

    /// Count a sample for a train we can't place; ask the server once the
    /// count reaches the threshold.
    fn note_missing(&mut self, number: TrainNumber) {
        let threshold = self.sync.missing_train_threshold;
        let count = self.missing.entry(number).or_insert(0);
        *count += 1;
        if *count >= threshold {
            *count = 0;
            debug!("asking server for train {number}");
            let user = self.local.name.clone();
            self.send(Target::AllPeers, Message::GetTrain { user, number });
        }
    }

    fn answer_get_train(&mut self, peer: PeerId, number: TrainNumber) -> Result<(), SessionError> {
        let owner = self
            .local_as_player()
            .into_iter()
            .chain(self.players.values().cloned())
            .find(|player| player.train == number);
        let message = match owner {
            Some(player) => self.player_join(&player).map(Message::Join),
            None => self.world.train(number).map(|t| Message::TrainAdd(t.record())),
        };
        let message = message.ok_or(WorldError::UnknownTrain(number))?;
        self.send(Target::Peer(peer), message);
        Ok(())
    }

    fn client_train_add(&mut self, record: TrainRecord) -> Result<(), SessionError> {
        if let Some(existing) = self.world.train_mut(record.number) {
            if existing.is_replica() && existing.cars != record.cars {
                existing.cars = load_consist(self.loader.as_ref(), &record.cars)?;
                existing.reset(record.kinematics);
                debug!("refreshed consist of train {}", record.number);
            }
            self.missing.remove(&record.number);
            return Ok(());
        }
        let cars = load_consist(self.loader.as_ref(), &record.cars)?;
        self.world
            .add_train(Train::replica(record.number, cars, record.kinematics, None))?;
        self.missing.remove(&record.number);
        self.events.push(SessionEvent::TrainAdded(record.number));
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Switches, uncoupling, events, text
    // -----------------------------------------------------------------------

    fn server_switch_change(
        &mut self,
        peer: PeerId,
        name: &str,
        change: SwitchChange,
    ) -> Result<(), SessionError> {
        if change.user != name {
            return Err(SessionError::violation(name, &change.user));
        }
        if change.hand_thrown && !self.allow_manual_switch {
            warn!("{name} threw switch {} by hand, reverting", change.key);
            self.send(
                Target::Peer(peer),
                Message::Text(TextMessage {
                    addressee: name.to_owned(),
                    level: TextLevel::Warning,
                    text: "Server does not allow hand thrown switches".into(),
                }),
            );
            let snapshot = self.world.switches.snapshot()?;
            self.send(Target::Peer(peer), Message::SwitchSnapshot(snapshot));
            return Ok(());
        }
        if self.world.switches.set_route(change.key, change.route)? {
            self.events.push(SessionEvent::SwitchChanged(change.key));
        }
        self.send(Target::AllExcept(peer), Message::SwitchChange(change));
        Ok(())
    }

    /// Server: confirm a client's uncouple with a permanent rear number.
    fn server_uncouple(&mut self, name: &str, record: UncoupleRecord) -> Result<(), SessionError> {
        if record.user != name {
            return Err(SessionError::violation(name, &record.user));
        }
        let owned = self
            .world
            .train(record.front_number)
            .is_some_and(|t| t.owner.as_deref() == Some(name));
        if !owned {
            return Err(SessionError::violation(name, record.front_number));
        }
        let rear_number = self.world.allocate_number();
        self.world.uncouple(
            record.front_number,
            &record.car_id,
            rear_number,
            record.front,
            record.rear,
        )?;
        if record.player_side == PlayerSide::Rear
            && let Some(player) = self.players.get_mut(name)
        {
            player.train = rear_number;
        }
        info!(
            "{name} uncoupled train {} behind {:?}, rear is {rear_number}",
            record.front_number, record.car_id
        );
        self.events.push(SessionEvent::TrainAdded(rear_number));
        self.send(
            Target::AllPeers,
            Message::Uncouple(UncoupleRecord {
                rear_number,
                ..record
            }),
        );
        Ok(())
    }

    fn client_uncouple(&mut self, record: UncoupleRecord) -> Result<(), SessionError> {
        if record.user == self.local.name {
            // Echo of our own uncouple: adopt the permanent number.
            let current = self
                .world
                .find_by_car(&record.rear_first_car)
                .ok_or(WorldError::UnknownTrain(record.rear_number))?;
            if current != record.rear_number {
                self.world.renumber(current, record.rear_number)?;
                if self.local.train == Some(current) {
                    self.local.train = Some(record.rear_number);
                }
                self.events.push(SessionEvent::TrainRenumbered {
                    from: current,
                    to: record.rear_number,
                });
            }
            return Ok(());
        }
        self.world.uncouple(
            record.front_number,
            &record.car_id,
            record.rear_number,
            record.front,
            record.rear,
        )?;
        if record.player_side == PlayerSide::Rear
            && let Some(player) = self.players.get_mut(&record.user)
        {
            player.train = record.rear_number;
        }
        self.events.push(SessionEvent::TrainAdded(record.rear_number));
        Ok(())
    }

    fn client_couple(&mut self, record: CoupleRecord) -> Result<(), SessionError> {
        let ownership = if record.owner.as_deref() == Some(self.local.name.as_str()) {
            Ownership::Local
        } else {
            Ownership::Replica
        };
        self.world.couple(
            record.number,
            record.absorbed,
            record.cars,
            record.kinematics,
            record.owner,
            ownership,
        )?;
        self.retarget_player_train(record.absorbed, record.number);
        self.missing.remove(&record.absorbed);
        self.events.push(SessionEvent::TrainsCoupled {
            number: record.number,
            absorbed: record.absorbed,
        });
        Ok(())
    }

    /// Server: pass a helper's signal request to the host. Anyone else is
    /// told no.
    fn server_signal_change(
        &mut self,
        peer: PeerId,
        name: &str,
        change: SignalChange,
    ) -> Result<(), SessionError> {
        if change.user != name {
            return Err(SessionError::violation(name, &change.user));
        }
        if !self.signal_helpers.iter().any(|helper| helper == name) {
            warn!("{name} asked to set signal {} without helper rights", change.index);
            self.send(
                Target::Peer(peer),
                Message::Text(TextMessage {
                    addressee: name.to_owned(),
                    level: TextLevel::Warning,
                    text: "Server does not allow you to set signals".into(),
                }),
            );
            return Ok(());
        }
        let key = usize::try_from(change.index)
            .ok()
            .and_then(|index| self.world.signals.key_at(index))
            .ok_or(SignalError::NoSignalAt(change.index))?;
        self.events.push(SessionEvent::SignalRequested {
            user: name.to_owned(),
            key,
            request: change.request,
        });
        Ok(())
    }

    fn server_event(
        &mut self,
        peer: PeerId,
        name: &str,
        event: ControlEvent,
    ) -> Result<(), SessionError> {
        if event.user != name {
            return Err(SessionError::violation(name, &event.user));
        }
        let number = self
            .player_train(name)
            .ok_or_else(|| SessionError::violation(name, &event.user))?;
        if let Some(train) = self.world.train_mut(number) {
            train.controls.apply(event.kind, event.state);
        }
        self.events.push(SessionEvent::Control {
            train: number,
            kind: event.kind,
            state: event.state,
        });
        self.send(Target::AllExcept(peer), Message::Event(event));
        Ok(())
    }

    /// Route a text message. `from` is the connection it came in on, if any.
    fn deliver_text(&mut self, from: Option<PeerId>, text: TextMessage) {
        if text.addressee == ALL_PLAYERS {
            let target = from.map_or(Target::AllPeers, Target::AllExcept);
            if from.is_some() {
                self.events.push(SessionEvent::Text(text.clone()));
            }
            self.send(target, Message::Text(text));
        } else if text.addressee == self.local.name {
            self.events.push(SessionEvent::Text(text));
        } else if let Some(peer) = self.players.get(&text.addressee).and_then(|p| p.peer) {
            self.send(Target::Peer(peer), Message::Text(text));
        } else {
            warn!("no player {:?} to deliver message to", text.addressee);
        }
    }

    /// A fatal message addressed to us: leave and go standalone.
    fn terminate(&mut self, reason: String) {
        warn!("session terminated by server: {reason}");
        let user = self.local.name.clone();
        self.send(
            Target::AllPeers,
            Message::Quit(QuitNotice {
                user,
                server: false,
            }),
        );
        self.go_standalone();
        self.events.push(SessionEvent::Terminated { reason });
    }

    // -----------------------------------------------------------------------
    // Host actions
    // -----------------------------------------------------------------------

    /// Client: announce ourselves to the server.
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.role != Role::Client {
            return Err(SessionError::WrongRole {
                action: "joining a server",
                role: self.role,
            });
        }
        let me = self.local_as_player().ok_or(SessionError::NoLocalTrain)?;
        let join = self.player_join(&me).ok_or(SessionError::NoLocalTrain)?;
        self.send(Target::AllPeers, Message::Join(join));
        Ok(())
    }

    /// Write the physics result for the local player's train.
    pub fn update_local_train(&mut self, kinematics: Kinematics) -> Result<(), SessionError> {
        let number = self.local.train.ok_or(SessionError::NoLocalTrain)?;
        self.set_train_kinematics(number, kinematics)
    }

    /// Write the physics result for any locally driven train.
    pub fn set_train_kinematics(
        &mut self,
        number: TrainNumber,
        kinematics: Kinematics,
    ) -> Result<(), SessionError> {
        let train = self
            .world
            .train_mut(number)
            .ok_or(WorldError::UnknownTrain(number))?;
        train.set_kinematics(kinematics)?;
        Ok(())
    }

    /// Throw a switch here and tell the session.
    pub fn throw_switch(
        &mut self,
        key: SwitchKey,
        route: u8,
        hand_thrown: bool,
    ) -> Result<(), SessionError> {
        self.world.switches.set_route(key, route)?;
        let user = self.local.name.clone();
        self.send(
            Target::AllPeers,
            Message::SwitchChange(SwitchChange {
                user,
                key,
                route,
                hand_thrown,
            }),
        );
        Ok(())
    }

    /// Operate a cab control on the local player's train.
    pub fn send_event(&mut self, kind: EventKind, state: i32) -> Result<(), SessionError> {
        let number = self.local.train.ok_or(SessionError::NoLocalTrain)?;
        if let Some(train) = self.world.train_mut(number) {
            train.controls.apply(kind, state);
        }
        let user = self.local.name.clone();
        self.send(
            Target::AllPeers,
            Message::Event(ControlEvent { user, kind, state }),
        );
        Ok(())
    }

    /// Split a locally driven train behind `car_id`. The host supplies both
    /// halves' kinematics from its physics. Returns the rear train's number,
    /// which on a client is provisional until the server confirms it.
    pub fn uncouple(
        &mut self,
        number: TrainNumber,
        car_id: &str,
        front: Kinematics,
        rear: Kinematics,
    ) -> Result<TrainNumber, SessionError> {
        let train = self
            .world
            .train(number)
            .ok_or(WorldError::UnknownTrain(number))?;
        if train.is_replica() {
            return Err(WorldError::NotLocal(number).into());
        }
        let rear_number = match self.role {
            Role::Client => self.world.provisional_number(&mut self.rng),
            Role::Server | Role::Standalone => self.world.allocate_number(),
        };
        self.world.uncouple(number, car_id, rear_number, front, rear)?;

        let first_car = |n: TrainNumber| {
            self.world
                .train(n)
                .and_then(|t| t.first_car_id())
                .unwrap_or_default()
                .to_owned()
        };
        let front_first_car = first_car(number);
        let rear_first_car = first_car(rear_number);
        let player_side = if self.local.train != Some(number) {
            PlayerSide::Neither
        } else if self
            .world
            .train(rear_number)
            .is_some_and(|t| t.contains_car(&self.local.lead_car_id))
        {
            self.local.train = Some(rear_number);
            PlayerSide::Rear
        } else {
            PlayerSide::Front
        };

        let user = self.local.name.clone();
        self.send(
            Target::AllPeers,
            Message::Uncouple(UncoupleRecord {
                user,
                car_id: car_id.to_owned(),
                front,
                front_number: number,
                rear,
                rear_number,
                front_first_car,
                rear_first_car,
                player_side,
            }),
        );
        Ok(rear_number)
    }

    /// Server: join two trains that ran into each other. `cars` is the
    /// combined consist front to back and `absorbed` disappears into
    /// `number`. A player driving either train keeps driving the result.
    pub fn couple(
        &mut self,
        number: TrainNumber,
        absorbed: TrainNumber,
        cars: Vec<CarDescriptor>,
        kinematics: Kinematics,
    ) -> Result<(), SessionError> {
        if self.role == Role::Client {
            return Err(SessionError::WrongRole {
                action: "coupling trains",
                role: self.role,
            });
        }
        let owner = match (self.driver_of(number), self.driver_of(absorbed)) {
            (Some(first), Some(second)) => {
                return Err(SessionError::PlayerTrainsCoupled { first, second });
            }
            (Some(driver), None) | (None, Some(driver)) => Some(driver),
            (None, None) => [number, absorbed]
                .into_iter()
                .find_map(|n| self.world.train(n).and_then(|t| t.owner.clone())),
        };
        let ownership = match &owner {
            Some(name) if *name != self.local.name => Ownership::Replica,
            _ => Ownership::Local,
        };
        self.world.couple(
            number,
            absorbed,
            cars.clone(),
            kinematics,
            owner.clone(),
            ownership,
        )?;
        self.retarget_player_train(absorbed, number);
        info!("train {absorbed} coupled onto train {number}");
        self.send(
            Target::AllPeers,
            Message::Couple(CoupleRecord {
                number,
                absorbed,
                kinematics,
                owner,
                cars,
            }),
        );
        Ok(())
    }

    /// Server: record what the signalling engine now shows at `key`.
    /// Clients get it with the next signal snapshot. Returns whether the
    /// state changed.
    pub fn set_signal(&mut self, key: SignalKey, state: SignalState) -> Result<bool, SessionError> {
        if self.role == Role::Client {
            return Err(SessionError::WrongRole {
                action: "setting signals",
                role: self.role,
            });
        }
        Ok(self.world.signals.set_state(key, state)?)
    }

    /// Client: ask the server to change a signal.
    pub fn request_signal(
        &mut self,
        key: SignalKey,
        request: SignalRequest,
    ) -> Result<(), SessionError> {
        if self.role != Role::Client {
            return Err(SessionError::WrongRole {
                action: "requesting signal changes",
                role: self.role,
            });
        }
        let index = self
            .world
            .signals
            .index_of(&key)
            .ok_or(SignalError::UnknownSignal(key))?;
        let user = self.local.name.clone();
        self.send(
            Target::AllPeers,
            Message::SignalChange(SignalChange {
                user,
                index: u32::try_from(index).unwrap_or(u32::MAX),
                request,
            }),
        );
        Ok(())
    }

    /// Server: start driving a new background train.
    pub fn add_background_train(
        &mut self,
        cars: Vec<CarDescriptor>,
        kinematics: Kinematics,
    ) -> Result<TrainNumber, SessionError> {
        if self.role == Role::Client {
            return Err(SessionError::WrongRole {
                action: "adding background trains",
                role: self.role,
            });
        }
        let number = self.world.allocate_number();
        let train = Train::local(number, cars, kinematics, None);
        let record = train.record();
        self.world.add_train(train)?;
        self.send(Target::AllPeers, Message::TrainAdd(record));
        Ok(number)
    }

    /// Server: retire a background train.
    pub fn remove_background_train(&mut self, number: TrainNumber) -> Result<(), SessionError> {
        if self.role == Role::Client {
            return Err(SessionError::WrongRole {
                action: "removing background trains",
                role: self.role,
            });
        }
        let train = self
            .world
            .train(number)
            .ok_or(WorldError::UnknownTrain(number))?;
        if train.is_replica() || train.owner.is_some() {
            return Err(SessionError::violation(&self.local.name, number));
        }
        self.world.remove_train(number);
        self.send(Target::AllPeers, Message::TrainRemove(vec![number]));
        Ok(())
    }

    /// Send a text message to one player or to `ALL_PLAYERS`.
    pub fn send_text(&mut self, addressee: &str, level: TextLevel, text: &str) {
        let message = TextMessage {
            addressee: addressee.to_owned(),
            level,
            text: text.to_owned(),
        };
        match self.role {
            Role::Server => self.deliver_text(None, message),
            Role::Client => self.send(Target::AllPeers, Message::Text(message)),
            Role::Standalone => {}
        }
    }

    /// Leave the session. A server tells clients it is going away.
    pub fn quit(&mut self) {
        let server = match self.role {
            Role::Server => true,
            Role::Client => false,
            Role::Standalone => return,
        };
        info!("leaving session");
        let user = self.local.name.clone();
        self.send(Target::AllPeers, Message::Quit(QuitNotice { user, server }));
        self.go_standalone();
    }
}
