// Test-only harness for multi-node integration tests.
//
// `Cluster` holds several real `SyncNode`s (one server, any number of
// clients) and ticks them all from the test thread on a shared virtual
// clock. Wall time only bounds how long a test waits; the session clock
// advances a fixed step per poll, and `skip` jumps it forward so timeouts
// such as the lost-player grace period can be tested without sleeping.
//
// `RawPeer` is a scripted stand-in for the other end of a connection, for
// tests that need to control exactly what a node receives (e.g. a fake
// server confirming a train number).
//
// The only test-specific code here is the polling loops. All networking and
// session logic runs through the same code paths a host uses.
//
// See also: `tests/full_pipeline.rs` for the scenarios.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use railsync_net::{LocalPlayer, NodeConfig, SessionEvent, SyncNode};
use railsync_protocol::{
    CarDescriptor, FrameDecoder, Heading, Kinematics, Message, SwitchKey, TrackPosition,
    TrainNumber, WireFormat, encode_frame,
};
use railsync_sim::{AcceptAllCars, Environment, SwitchTable, Train, World};

/// Default timeout for blocking poll operations.
const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Sleep duration between poll attempts.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Session seconds per poll step.
const STEP_SECS: f64 = 0.05;

pub const ROUTE: &str = "USA2";

/// Route switches shared by every node in a test.
pub const SWITCHES: [SwitchKey; 3] = [
    SwitchKey {
        tile_x: -6132,
        tile_z: 14899,
        world_id: 12,
    },
    SwitchKey {
        tile_x: -6132,
        tile_z: 14899,
        world_id: 40,
    },
    SwitchKey {
        tile_x: -6131,
        tile_z: 14899,
        world_id: 3,
    },
];

/// Route logs to the test harness at debug level.
pub fn init_logging() {
    env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init()
        .ok();
}

pub fn test_config() -> NodeConfig {
    NodeConfig {
        port: 0,
        route: ROUTE.into(),
        ..NodeConfig::default()
    }
}

pub fn kin(travelled: f32, speed: f32) -> Kinematics {
    Kinematics {
        position: TrackPosition {
            tile_x: -6132,
            tile_z: 14899,
            x: 480.0,
            z: -12.5,
            track_node: 311,
        },
        heading: Heading::Forward,
        travelled,
        speed,
    }
}

/// `n` cars with IDs `"{owner} - 0"`, `"{owner} - 1"`, ...
pub fn cars(owner: &str, n: usize) -> Vec<CarDescriptor> {
    (0..n)
        .map(|i| CarDescriptor {
            file: "GP38\\gp38.eng".into(),
            id: format!("{owner} - {i}"),
            flipped: false,
        })
        .collect()
}

pub fn empty_world() -> World {
    World::new(SwitchTable::new(SWITCHES), Environment::default())
}

/// A world holding `name`'s own train and the matching `LocalPlayer`. The
/// lead car is the first one.
pub fn player_world(name: &str, number: u32, car_count: usize) -> (World, LocalPlayer) {
    let mut world = empty_world();
    let number = TrainNumber(number);
    world
        .add_train(Train::local(
            number,
            cars(name, car_count),
            kin(100.0, 0.0),
            Some(name.into()),
        ))
        .expect("fresh world has no trains");
    let local = LocalPlayer::new(name).with_train(number, format!("{name} - 0"));
    (world, local)
}

/// Several nodes ticked together on one virtual clock.
#[derive(Default)]
pub struct Cluster {
    now: f64,
    nodes: BTreeMap<String, SyncNode>,
    events: BTreeMap<String, Vec<SessionEvent>>,
}

impl Cluster {
    pub fn new() -> Self {
        init_logging();
        Self::default()
    }

    /// Host a server node with no player train. Returns its address.
    pub fn host(&mut self, label: &str, config: &NodeConfig, world: World) -> SocketAddr {
        let (node, addr) = SyncNode::host(
            config,
            LocalPlayer::new(label),
            world,
            Box::new(AcceptAllCars),
        )
        .expect("host failed");
        self.insert(label, node);
        addr
    }

    /// Join `addr` as player `name` driving train `number`.
    pub fn join(&mut self, name: &str, addr: SocketAddr, number: u32, car_count: usize) {
        let (world, local) = player_world(name, number, car_count);
        let node = SyncNode::join(addr, &test_config(), local, world, Box::new(AcceptAllCars))
            .expect("join failed");
        self.insert(name, node);
    }

    pub fn insert(&mut self, label: &str, node: SyncNode) {
        self.nodes.insert(label.into(), node);
        self.events.insert(label.into(), Vec::new());
    }

    /// Take a node out of the cluster (to drop it or shut it down).
    pub fn remove(&mut self, label: &str) -> SyncNode {
        self.events.remove(label);
        self.nodes.remove(label).expect("no such node")
    }

    pub fn node(&self, label: &str) -> &SyncNode {
        &self.nodes[label]
    }

    pub fn node_mut(&mut self, label: &str) -> &mut SyncNode {
        self.nodes.get_mut(label).expect("no such node")
    }

    /// Events a node has reported since the last `take_events`.
    pub fn events(&self, label: &str) -> &[SessionEvent] {
        self.events.get(label).map_or(&[], Vec::as_slice)
    }

    pub fn take_events(&mut self, label: &str) -> Vec<SessionEvent> {
        self.events
            .get_mut(label)
            .map(std::mem::take)
            .unwrap_or_default()
    }

    pub fn now(&self) -> f64 {
        self.now
    }

    /// Advance the clock one step and tick every node.
    pub fn step(&mut self) {
        self.now += STEP_SECS;
        for (label, node) in &mut self.nodes {
            node.tick(self.now);
            if let Some(events) = self.events.get_mut(label) {
                events.extend(node.drain_events());
            }
        }
    }

    /// Jump the session clock forward without ticking.
    pub fn skip(&mut self, secs: f64) {
        self.now += secs;
    }

    /// Step until `cond` holds. Panics after the poll timeout.
    pub fn poll_until(&mut self, what: &str, cond: impl Fn(&Cluster) -> bool) {
        let start = Instant::now();
        while !cond(self) {
            assert!(start.elapsed() < POLL_TIMEOUT, "timed out waiting for {what}");
            self.step();
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Step for `secs` of session time regardless of state.
    pub fn run_for(&mut self, secs: f64) {
        let until = self.now + secs;
        while self.now < until {
            self.step();
            thread::sleep(POLL_INTERVAL);
        }
    }
}

/// One end of a connection driven by the test.
pub struct RawPeer {
    stream: TcpStream,
    decoder: FrameDecoder,
}

impl RawPeer {
    /// Bind a fake server on localhost.
    pub fn listen() -> (TcpListener, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind failed");
        let addr = listener.local_addr().expect("no local addr");
        (listener, addr)
    }

    pub fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = listener.accept().expect("accept failed");
        Self::from_stream(stream)
    }

    pub fn connect(addr: SocketAddr) -> Self {
        Self::from_stream(TcpStream::connect(addr).expect("connect failed"))
    }

    fn from_stream(stream: TcpStream) -> Self {
        stream
            .set_read_timeout(Some(POLL_TIMEOUT))
            .expect("set_read_timeout failed");
        Self {
            stream,
            decoder: FrameDecoder::new(WireFormat::LegacyText),
        }
    }

    pub fn send(&mut self, message: &Message) {
        let frame = encode_frame(WireFormat::LegacyText, message.encode().as_bytes())
            .expect("frame too large");
        self.stream.write_all(&frame).expect("send failed");
    }

    /// Next message, or `None` if the other end closed.
    pub fn recv(&mut self) -> Option<Message> {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(unit) = self.decoder.pop().expect("framing error") {
                return Some(Message::decode_bytes(&unit).expect("undecodable message"));
            }
            match self.stream.read(&mut buf) {
                Ok(0) => return None,
                Ok(n) => self.decoder.push(&buf[..n]),
                Err(e) => panic!("read failed: {e}"),
            }
        }
    }

    /// Skip messages until one matches `pred`.
    pub fn recv_until(&mut self, what: &str, pred: impl Fn(&Message) -> bool) -> Message {
        loop {
            match self.recv() {
                Some(message) if pred(&message) => return message,
                Some(_) => {}
                None => panic!("connection closed while waiting for {what}"),
            }
        }
    }
}
