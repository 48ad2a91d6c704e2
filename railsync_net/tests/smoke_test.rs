// Integration smoke test for a hosted server node.
//
// Runs a `SyncNode` in the server role on its own thread, connects plain TCP
// sockets that speak the wire protocol by hand, and walks a session through
// joins, move relaying, switch echo, quit and a protocol error.
//
// Each client is a raw socket using the protocol crate's framing and message
// types; no client-side session code is involved.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use railsync_net::{LocalPlayer, NodeConfig, SyncNode};
use railsync_protocol::{
    CarDescriptor, FrameDecoder, Heading, JoinRecord, Kinematics, Message, MoveSample, MoveSource,
    QuitNotice, SwitchChange, SwitchKey, TrackPosition, TrainNumber, WireFormat, encode_frame,
};
use railsync_sim::{AcceptAllCars, Environment, SwitchTable, World};

const KEY: SwitchKey = SwitchKey {
    tile_x: -6132,
    tile_z: 14899,
    world_id: 40,
};

/// Route the node's logs to the test harness.
fn init_logging() {
    env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init()
        .ok();
}

/// Hosted node ticking on a background thread until dropped.
struct ServerThread {
    addr: SocketAddr,
    keep_running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl ServerThread {
    fn start() -> Self {
        init_logging();
        let config = NodeConfig {
            port: 0,
            route: "USA2".into(),
            ..NodeConfig::default()
        };
        let keep_running = Arc::new(AtomicBool::new(true));
        let flag = keep_running.clone();
        let (addr_tx, addr_rx) = mpsc::channel();
        let thread = thread::spawn(move || {
            let world = World::new(SwitchTable::new([KEY]), Environment::default());
            let (mut node, addr) = SyncNode::host(
                &config,
                LocalPlayer::new("Dispatcher"),
                world,
                Box::new(AcceptAllCars),
            )
            .unwrap();
            addr_tx.send(addr).unwrap();
            let start = Instant::now();
            while flag.load(Ordering::SeqCst) {
                node.tick(start.elapsed().as_secs_f64());
                thread::sleep(Duration::from_millis(10));
            }
            node.shutdown();
        });
        let addr = addr_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        Self {
            addr,
            keep_running,
            thread: Some(thread),
        }
    }
}

impl Drop for ServerThread {
    fn drop(&mut self) {
        self.keep_running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// A hand-driven client connection.
struct RawClient {
    stream: TcpStream,
    decoder: FrameDecoder,
}

impl RawClient {
    fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        Self {
            stream,
            decoder: FrameDecoder::new(WireFormat::LegacyText),
        }
    }

    fn send(&mut self, message: &Message) {
        self.send_raw(&encode_frame(WireFormat::LegacyText, message.encode().as_bytes()).unwrap());
    }

    fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).unwrap();
    }

    /// Next message, or `None` once the server closes the connection.
    fn recv(&mut self) -> Option<Message> {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(unit) = self.decoder.pop().unwrap() {
                return Some(Message::decode_bytes(&unit).unwrap());
            }
            match self.stream.read(&mut buf) {
                Ok(0) => return None,
                Ok(n) => self.decoder.push(&buf[..n]),
                Err(e) => panic!("read failed: {e}"),
            }
        }
    }

    /// Skip messages until one matches.
    fn recv_until(&mut self, what: &str, pred: impl Fn(&Message) -> bool) -> Message {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            match self.recv() {
                Some(message) if pred(&message) => return message,
                Some(_) => {}
                None => panic!("connection closed while waiting for {what}"),
            }
        }
    }
}

fn kin(travelled: f32, speed: f32) -> Kinematics {
    Kinematics {
        position: TrackPosition {
            tile_x: -6132,
            tile_z: 14899,
            x: 10.0,
            z: 20.0,
            track_node: 7,
        },
        heading: Heading::Forward,
        travelled,
        speed,
    }
}

fn join(user: &str, number: u32) -> Message {
    Message::Join(JoinRecord {
        user: user.into(),
        credential: String::new(),
        train: TrainNumber(number),
        kinematics: kin(100.0, 0.0),
        clock_seconds: 0.0,
        season: 0,
        weather: 0,
        route: "USA2".into(),
        lead_car_id: format!("{user} - 0"),
        consist: "con".into(),
        path: "pat".into(),
        cars: vec![CarDescriptor {
            file: "GP38\\gp38.eng".into(),
            id: format!("{user} - 0"),
            flipped: false,
        }],
    })
}

fn connect_and_join(addr: SocketAddr, user: &str, number: u32) -> (RawClient, TrainNumber) {
    let mut client = RawClient::connect(addr);
    client.send(&join(user, number));
    let echo = client.recv_until("own join echo", |m| {
        matches!(m, Message::Join(j) if j.user == user)
    });
    let Message::Join(echo) = echo else {
        unreachable!()
    };
    (client, echo.train)
}

#[test]
fn full_session_lifecycle() {
    let server = ServerThread::start();

    // 1. Two players join; the second catches up on the first.
    let (mut alice, alice_train) = connect_and_join(server.addr, "Alice", 5);
    assert_eq!(alice_train, TrainNumber(5));
    let (mut bob, bob_train) = connect_and_join(server.addr, "Bob", 5);
    assert_ne!(bob_train, alice_train, "taken number must be replaced");
    bob.recv_until("Alice's join", |m| matches!(m, Message::Join(j) if j.user == "Alice"));
    alice.recv_until("Bob's join", |m| matches!(m, Message::Join(j) if j.user == "Bob"));

    // 2. Alice's move is relayed to Bob in the next batch.
    alice.send(&Message::Move(vec![MoveSample {
        source: MoveSource::Player("Alice".into()),
        number: alice_train,
        car_count: 1,
        kinematics: kin(150.0, 12.5),
    }]));
    let batch = bob.recv_until("Alice's move", |m| {
        matches!(m, Message::Move(samples)
            if samples.iter().any(|s| s.source == MoveSource::Player("Alice".into())))
    });
    let Message::Move(samples) = batch else {
        unreachable!()
    };
    let sample = samples
        .iter()
        .find(|s| s.source == MoveSource::Player("Alice".into()))
        .unwrap();
    assert_eq!(sample.kinematics.travelled, 150.0);
    assert_eq!(sample.kinematics.speed, 12.5);

    // 3. Switch change is echoed to the other player.
    let throw = Message::SwitchChange(SwitchChange {
        user: "Bob".into(),
        key: KEY,
        route: 1,
        hand_thrown: true,
    });
    bob.send(&throw);
    assert_eq!(
        alice.recv_until("switch echo", |m| matches!(m, Message::SwitchChange(_))),
        throw
    );

    // 4. Alice quits; Bob hears about it and Alice's socket is closed.
    alice.send(&Message::Quit(QuitNotice {
        user: "Alice".into(),
        server: false,
    }));
    bob.recv_until("Alice's quit", |m| {
        matches!(m, Message::Quit(q) if q.user == "Alice" && !q.server)
    });
    let deadline = Instant::now() + Duration::from_secs(5);
    while alice.recv().is_some() {
        assert!(Instant::now() < deadline, "server kept Alice's socket open");
    }

    // 5. An unknown verb gets the connection dropped.
    bob.send_raw(b"10: TELEPORT 1");
    let deadline = Instant::now() + Duration::from_secs(5);
    while bob.recv().is_some() {
        assert!(Instant::now() < deadline, "server kept Bob's socket open");
    }
}

#[test]
fn wrong_route_is_refused_with_error_text() {
    let server = ServerThread::start();
    let mut client = RawClient::connect(server.addr);
    let Message::Join(mut record) = join("Carol", 9) else {
        unreachable!()
    };
    record.route = "Marias Pass".into();
    client.send(&Message::Join(record));

    match client.recv() {
        Some(Message::Text(text)) => {
            assert_eq!(text.addressee, "Carol");
            assert!(text.level.is_fatal());
        }
        other => panic!("expected fatal text, got {other:?}"),
    }
    assert!(client.recv().is_none());
}

#[test]
fn server_shutdown_announces_quit() {
    let server = ServerThread::start();
    let (mut alice, _) = connect_and_join(server.addr, "Alice", 5);
    drop(server);
    alice.recv_until("server quit", |m| matches!(m, Message::Quit(q) if q.server));
}
