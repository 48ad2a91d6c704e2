// End-to-end integration tests for the multiplayer pipeline.
//
// Each test hosts a real server node, joins real client nodes over
// localhost TCP, and verifies what every node ends up believing:
// join → catch-up → moves → switches → uncouple/couple → disconnect →
// fallback.
//
// All nodes run the same code a host application runs; the only
// test-specific code is the polling in `Cluster` and the scripted `RawPeer`
// used where a test needs to play the server by hand.

use railsync_net::{NodeConfig, Role, SessionEvent};
use railsync_protocol::{
    EventKind, JoinRecord, Message, PlayerSide, TextLevel, TrainNumber, UncoupleRecord,
};
use multiplayer_tests::{Cluster, RawPeer, SWITCHES, cars, empty_world, kin, test_config};

const SERVER: &str = "Dispatcher";

/// Host a server with one background train, then join Alice (train 5,
/// 4 cars) and Bob (train 8, 2 cars) and wait until everyone has everyone.
fn start_session() -> (Cluster, std::net::SocketAddr) {
    start_session_with(&test_config())
}

fn start_session_with(config: &NodeConfig) -> (Cluster, std::net::SocketAddr) {
    let mut c = Cluster::new();
    let addr = c.host(SERVER, config, empty_world());
    let background = c
        .node_mut(SERVER)
        .session_mut()
        .add_background_train(cars("AI", 3), kin(0.0, 0.0))
        .unwrap();
    assert_eq!(background, TrainNumber(1));

    c.join("Alice", addr, 5, 4);
    c.join("Bob", addr, 8, 2);
    c.poll_until("both players to see each other", |c| {
        let alice = c.node("Alice").session();
        let bob = c.node("Bob").session();
        alice.player("Bob").is_some()
            && bob.player("Alice").is_some()
            && alice.world().contains_train(TrainNumber(1))
            && bob.world().contains_train(TrainNumber(1))
    });
    c.take_events("Alice");
    c.take_events("Bob");
    (c, addr)
}

// ---------------------------------------------------------------------------
// Test scenarios
// ---------------------------------------------------------------------------

/// Both clients hold replicas of each other's trains and of the background
/// train, and keep their own train local.
#[test]
fn two_players_see_each_other() {
    let (c, _) = start_session();

    let bob = c.node("Bob").session();
    let alice_replica = bob.world().train(TrainNumber(5)).unwrap();
    assert!(alice_replica.is_replica());
    assert_eq!(alice_replica.owner.as_deref(), Some("Alice"));
    assert_eq!(alice_replica.cars.len(), 4);
    assert!(!bob.world().train(TrainNumber(8)).unwrap().is_replica());

    let alice = c.node("Alice").session();
    assert!(alice.world().train(TrainNumber(8)).unwrap().is_replica());
    assert!(alice.world().train(TrainNumber(1)).unwrap().is_replica());
    assert_eq!(alice.world().train(TrainNumber(1)).unwrap().owner, None);

    assert_eq!(c.node(SERVER).session().player_count(), 2);
    assert_eq!(c.node(SERVER).peer_count(), 2);
}

/// Alice's physics result reaches Bob's replica through the server.
#[test]
fn moves_reach_the_other_client() {
    let (mut c, _) = start_session();
    c.node_mut("Alice")
        .session_mut()
        .update_local_train(kin(150.0, 10.0))
        .unwrap();

    c.poll_until("Bob's replica to move", |c| {
        c.node("Bob")
            .session()
            .world()
            .train(TrainNumber(5))
            .is_some_and(|t| t.kinematics().travelled >= 150.0)
    });
    let replica = c.node("Bob").session().world().train(TrainNumber(5)).unwrap();
    assert_eq!(replica.motion().unwrap().reported_speed(), 10.0);
    // The server's replica saw the same sample.
    let on_server = c.node(SERVER).session().world().train(TrainNumber(5)).unwrap();
    assert_eq!(on_server.last_sample().unwrap().travelled, 150.0);
}

#[test]
fn switch_throw_propagates() {
    let (mut c, _) = start_session();
    c.node_mut("Alice")
        .session_mut()
        .throw_switch(SWITCHES[1], 2, true)
        .unwrap();

    c.poll_until("Bob's switch to follow", |c| {
        c.node("Bob").session().world().switches.route(&SWITCHES[1]) == Some(2)
    });
    assert_eq!(
        c.node(SERVER).session().world().switches.route(&SWITCHES[1]),
        Some(2)
    );
    assert!(c
        .events("Bob")
        .contains(&SessionEvent::SwitchChanged(SWITCHES[1])));
}

#[test]
fn hand_thrown_switch_reverted_when_disallowed() {
    let (mut c, _) = start_session_with(&NodeConfig {
        allow_manual_switch: false,
        ..test_config()
    });
    c.node_mut("Alice")
        .session_mut()
        .throw_switch(SWITCHES[0], 1, true)
        .unwrap();
    assert_eq!(
        c.node("Alice").session().world().switches.route(&SWITCHES[0]),
        Some(1)
    );

    c.poll_until("Alice's switch to be reverted", |c| {
        let warned = c
            .events("Alice")
            .iter()
            .any(|e| matches!(e, SessionEvent::Text(t) if t.level == TextLevel::Warning));
        warned && c.node("Alice").session().world().switches.route(&SWITCHES[0]) == Some(0)
    });
    assert_eq!(
        c.node("Bob").session().world().switches.route(&SWITCHES[0]),
        Some(0)
    );
}

#[test]
fn cab_events_and_chat_reach_the_other_client() {
    let (mut c, _) = start_session();
    c.node_mut("Alice")
        .session_mut()
        .send_event(EventKind::Horn, 1)
        .unwrap();
    c.node_mut("Alice")
        .session_mut()
        .send_text("All", TextLevel::Info, "departing east");

    c.poll_until("Bob to hear the horn and the message", |c| {
        let bob = c.node("Bob").session();
        let horn = bob
            .world()
            .train(TrainNumber(5))
            .is_some_and(|t| t.controls.horn);
        let chat = c
            .events("Bob")
            .iter()
            .any(|e| matches!(e, SessionEvent::Text(t) if t.text == "departing east"));
        horn && chat
    });
    assert!(c
        .events("Bob")
        .contains(&SessionEvent::Control {
            train: TrainNumber(5),
            kind: EventKind::Horn,
            state: 1,
        }));
}

/// Client-side uncouple against a scripted server: the provisional rear
/// number is replaced by the one the server confirms.
#[test]
fn uncouple_adopts_server_assigned_number() {
    let (listener, addr) = RawPeer::listen();
    let mut c = Cluster::new();
    c.join("Alice", addr, 5, 4);
    let mut server = RawPeer::accept(&listener);

    let Message::Join(join) = server.recv_until("join", |m| matches!(m, Message::Join(_))) else {
        unreachable!()
    };
    assert_eq!(join.cars.len(), 4);
    server.send(&Message::Join(JoinRecord {
        clock_seconds: 43_200.0,
        ..join
    }));
    c.poll_until("join echo", |c| c.node("Alice").session().is_joined());
    assert_eq!(
        c.node("Alice").session().world().environment.clock_seconds,
        43_200.0
    );

    let rear = c
        .node_mut("Alice")
        .session_mut()
        .uncouple(TrainNumber(5), "Alice - 1", kin(100.0, 0.0), kin(85.0, 0.0))
        .unwrap();
    assert!(rear.is_provisional());
    c.node_mut("Alice").flush();

    let Message::Uncouple(record) =
        server.recv_until("uncouple", |m| matches!(m, Message::Uncouple(_)))
    else {
        unreachable!()
    };
    assert_eq!(record.rear_number, rear);
    assert_eq!(record.front_first_car, "Alice - 0");
    assert_eq!(record.rear_first_car, "Alice - 2");
    assert_eq!(record.player_side, PlayerSide::Front);

    server.send(&Message::Uncouple(UncoupleRecord {
        rear_number: TrainNumber(42),
        ..record
    }));
    c.poll_until("rear train renumbered", |c| {
        c.node("Alice")
            .session()
            .world()
            .contains_train(TrainNumber(42))
    });

    let world = c.node("Alice").session().world();
    assert!(!world.contains_train(rear));
    let rear_train = world.train(TrainNumber(42)).unwrap();
    assert!(!rear_train.is_replica());
    assert_eq!(rear_train.first_car_id(), Some("Alice - 2"));
    assert_eq!(rear_train.cars.len(), 2);
    assert_eq!(c.node("Alice").session().local().train, Some(TrainNumber(5)));
    assert!(c.events("Alice").contains(&SessionEvent::TrainRenumbered {
        from: rear,
        to: TrainNumber(42),
    }));
}

/// Uncouple through a real server: every node ends up with the same
/// permanent rear number.
#[test]
fn uncouple_is_numbered_by_the_server() {
    let (mut c, _) = start_session();
    let provisional = c
        .node_mut("Alice")
        .session_mut()
        .uncouple(TrainNumber(5), "Alice - 2", kin(100.0, 0.0), kin(70.0, 0.0))
        .unwrap();

    c.poll_until("rear train to reach Bob", |c| {
        c.node("Bob").session().world().find_by_car("Alice - 3").is_some()
            && c.node("Alice").session().world().find_by_car("Alice - 3") != Some(provisional)
    });
    let on_bob = c.node("Bob").session().world().find_by_car("Alice - 3").unwrap();
    let on_alice = c.node("Alice").session().world().find_by_car("Alice - 3").unwrap();
    let on_server = c.node(SERVER).session().world().find_by_car("Alice - 3").unwrap();
    assert_eq!(on_bob, on_alice);
    assert_eq!(on_server, on_alice);
    assert!(!on_alice.is_provisional());
    assert_eq!(
        c.node("Bob").session().world().train(TrainNumber(5)).unwrap().cars.len(),
        3
    );
}

/// The server couples Alice's train onto the background train. Alice keeps
/// driving the merged train and Bob follows it as a replica.
#[test]
fn coupled_train_stays_with_its_driver() {
    let (mut c, _) = start_session();
    let consist = cars("AI", 3).into_iter().chain(cars("Alice", 4)).collect();
    c.node_mut(SERVER)
        .session_mut()
        .couple(TrainNumber(1), TrainNumber(5), consist, kin(100.0, 0.0))
        .unwrap();

    c.poll_until("everyone to see one coupled train", |c| {
        let alice = c.node("Alice").session();
        let bob = c.node("Bob").session();
        alice.local().train == Some(TrainNumber(1))
            && !bob.world().contains_train(TrainNumber(5))
            && bob.world().train(TrainNumber(1)).is_some_and(|t| t.cars.len() == 7)
    });
    let alice = c.node("Alice").session();
    assert!(!alice.world().train(TrainNumber(1)).unwrap().is_replica());
    assert!(!alice.world().contains_train(TrainNumber(5)));
    assert_eq!(c.node("Bob").session().player("Alice").unwrap().train, TrainNumber(1));

    c.node_mut("Alice")
        .session_mut()
        .update_local_train(kin(130.0, 5.0))
        .unwrap();
    c.poll_until("Bob's replica of the coupled train to move", |c| {
        c.node("Bob")
            .session()
            .world()
            .train(TrainNumber(1))
            .is_some_and(|t| t.kinematics().travelled >= 130.0)
    });
}

#[test]
fn lost_player_can_rejoin_within_grace() {
    let (mut c, addr) = start_session();
    drop(c.remove("Alice"));

    c.poll_until("server to notice Alice is gone", |c| {
        c.node(SERVER).session().is_lost("Alice")
    });
    // Retained without telling anyone.
    assert!(c.node("Bob").session().world().contains_train(TrainNumber(5)));
    assert!(c.node(SERVER).session().world().contains_train(TrainNumber(5)));

    c.join("Alice", addr, 5, 4);
    c.poll_until("Alice to be back everywhere", |c| {
        let server = c.node(SERVER).session();
        let removed = c
            .events("Bob")
            .contains(&SessionEvent::PlayerRemoved { name: "Alice".into() });
        c.node("Alice").session().is_joined()
            && server.player("Alice").is_some()
            && !server.is_lost("Alice")
            && removed
            && c.node("Bob").session().player("Alice").is_some()
    });
    assert_eq!(c.node(SERVER).session().player("Alice").unwrap().train, TrainNumber(5));
    assert!(c.node("Bob").session().world().contains_train(TrainNumber(5)));
}

#[test]
fn lost_player_expires_after_grace() {
    let (mut c, _) = start_session();
    drop(c.remove("Alice"));
    c.poll_until("server to notice Alice is gone", |c| {
        c.node(SERVER).session().is_lost("Alice")
    });

    c.skip(61.0);
    c.poll_until("Alice's train to be removed from Bob", |c| {
        !c.node("Bob").session().world().contains_train(TrainNumber(5))
    });
    let server = c.node(SERVER).session();
    assert!(!server.is_lost("Alice"));
    assert!(server.player("Alice").is_none());
    assert!(!server.world().contains_train(TrainNumber(5)));
    assert!(c.node("Bob").session().player("Alice").is_none());
}

#[test]
fn server_quit_leaves_clients_standalone() {
    let (mut c, _) = start_session();
    c.remove(SERVER).shutdown();

    c.poll_until("both clients to fall back", |c| {
        c.node("Alice").session().role() == Role::Standalone
            && c.node("Bob").session().role() == Role::Standalone
    });
    let alice = c.node("Alice").session();
    assert!(!alice.world().train(TrainNumber(5)).unwrap().is_replica());
    assert!(!alice.world().train(TrainNumber(1)).unwrap().is_replica());
    assert!(!alice.world().contains_train(TrainNumber(8)));
    assert_eq!(alice.player_count(), 0);
    assert!(c
        .events("Alice")
        .iter()
        .any(|e| matches!(e, SessionEvent::ServerLost { .. })));
    assert_eq!(c.node("Alice").peer_count(), 0);
}

#[test]
fn server_crash_leaves_clients_standalone() {
    let (mut c, _) = start_session();
    drop(c.remove(SERVER));

    c.poll_until("Alice to fall back", |c| {
        c.node("Alice").session().role() == Role::Standalone
    });
    assert!(c.node("Alice").session().world().contains_train(TrainNumber(5)));
    assert!(c
        .events("Alice")
        .iter()
        .any(|e| matches!(e, SessionEvent::ServerLost { .. })));
}

#[test]
fn full_session_terminates_late_joiner() {
    let mut c = Cluster::new();
    let addr = c.host(
        SERVER,
        &NodeConfig {
            max_players: 1,
            ..test_config()
        },
        empty_world(),
    );
    c.join("Alice", addr, 5, 4);
    c.poll_until("Alice to join", |c| c.node("Alice").session().is_joined());
    c.join("Bob", addr, 8, 2);

    c.poll_until("Bob to be turned away", |c| {
        c.node("Bob").session().role() == Role::Standalone
    });
    assert!(c
        .events("Bob")
        .iter()
        .any(|e| matches!(e, SessionEvent::Terminated { .. })));
    assert!(!c.node("Bob").session().is_joined());
    assert!(c.node("Bob").session().world().contains_train(TrainNumber(8)));
    assert_eq!(c.node(SERVER).session().player_count(), 1);
}
