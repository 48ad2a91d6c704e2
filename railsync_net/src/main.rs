// CLI entry point for a dedicated railsync server.
//
// Hosts a session with no player train of its own: it numbers trains,
// relays state between clients and keeps the shared clock running. See
// `node.rs` for the tick loop and `session.rs` for the protocol.
//
// Usage:
//   dispatcher [OPTIONS]
//     --config <FILE>         JSON `NodeConfig` (flags below override it)
//     --port <PORT>           Listen port (default: 30000)
//     --bind <ADDR>           Listen address (default: 127.0.0.1)
//     --route <NAME>          Route every joiner must be on
//     --max-players <N>       Max players (default: 16)
//     --no-manual-switch      Refuse hand-thrown switches
//     --binary-framing        Use the 4-byte length-header framing
//     --name <NAME>           Name used in server messages (default: Dispatcher)
//     --switches <FILE>       JSON array of switch keys for the route
//     --trainset <DIR>        Check joiners' cars against this trainset
//
// Logging goes through `env_logger`; set `RUST_LOG` to change the level.

use std::time::{Duration, Instant};

use log::{error, info};
use railsync_net::{LocalPlayer, NodeConfig, SessionEvent, SyncNode};
use railsync_protocol::{SwitchKey, WireFormat};
use railsync_sim::{AcceptAllCars, CarLoader, Environment, SwitchTable, TrainsetDirLoader, World};

const TICK: Duration = Duration::from_millis(50);

struct Args {
    config: NodeConfig,
    name: String,
    switches: Vec<SwitchKey>,
    trainset: Option<String>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = parse_args();

    let loader: Box<dyn CarLoader> = match &args.trainset {
        Some(dir) => Box::new(TrainsetDirLoader::new(dir)),
        None => Box::new(AcceptAllCars),
    };
    let world = World::new(SwitchTable::new(args.switches), Environment::default());
    let local = LocalPlayer::new(args.name);

    let (mut node, addr) = match SyncNode::host(&args.config, local, world, loader) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("Failed to start server: {e}");
            std::process::exit(1);
        }
    };

    println!("Dispatcher listening on {addr}");
    println!("Press Ctrl+C to stop.");

    // The process exits on SIGINT; clients treat the dropped connection as a
    // lost server.
    let start = Instant::now();
    let mut last = 0.0;
    loop {
        let now = start.elapsed().as_secs_f64();
        node.session_mut().world_mut().environment.clock_seconds += now - last;
        last = now;
        node.tick(now);
        for event in node.drain_events() {
            log_event(&event);
        }
        std::thread::sleep(TICK);
    }
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::PlayerJoined { name } => info!("{name} joined"),
        SessionEvent::PlayerLost { name } => info!("{name} lost connection"),
        SessionEvent::PlayerRemoved { name } => info!("{name} left"),
        SessionEvent::Text(text) => info!("[{}] {}", text.level.token(), text.text),
        SessionEvent::SignalRequested { user, key, request } => {
            info!("{user} asks for {request:?} at {key}");
        }
        SessionEvent::Terminated { reason } | SessionEvent::ServerLost { reason } => {
            error!("{reason}");
        }
        other => log::debug!("{other:?}"),
    }
}

/// Parse command-line arguments. Uses simple `std::env::args()` matching.
fn parse_args() -> Args {
    let raw: Vec<String> = std::env::args().collect();
    let mut args = Args {
        config: NodeConfig::default(),
        name: "Dispatcher".into(),
        switches: Vec::new(),
        trainset: None,
    };

    // --config first so the other flags override it.
    if let Some(i) = raw.iter().position(|a| a == "--config") {
        let path = raw.get(i + 1).unwrap_or_else(|| fail("--config requires a file"));
        args.config = NodeConfig::load(path).unwrap_or_else(|e| fail(&format!("{path}: {e}")));
    }

    let mut i = 1;
    while i < raw.len() {
        match raw[i].as_str() {
            "--config" => i += 1,
            "--port" => {
                i += 1;
                args.config.port = raw
                    .get(i)
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_else(|| fail("--port requires a valid port number"));
            }
            "--bind" => {
                i += 1;
                args.config.bind_address =
                    raw.get(i).cloned().unwrap_or_else(|| fail("--bind requires an address"));
            }
            "--route" => {
                i += 1;
                args.config.route =
                    raw.get(i).cloned().unwrap_or_else(|| fail("--route requires a value"));
            }
            "--max-players" => {
                i += 1;
                args.config.max_players = raw
                    .get(i)
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_else(|| fail("--max-players requires a valid number"));
            }
            "--no-manual-switch" => args.config.allow_manual_switch = false,
            "--binary-framing" => args.config.wire_format = WireFormat::LengthHeader,
            "--name" => {
                i += 1;
                args.name = raw.get(i).cloned().unwrap_or_else(|| fail("--name requires a value"));
            }
            "--switches" => {
                i += 1;
                let path = raw.get(i).unwrap_or_else(|| fail("--switches requires a file"));
                args.switches = load_switch_keys(path);
            }
            "--trainset" => {
                i += 1;
                args.trainset =
                    Some(raw.get(i).cloned().unwrap_or_else(|| fail("--trainset requires a directory")));
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    args
}

fn load_switch_keys(path: &str) -> Vec<SwitchKey> {
    let text = std::fs::read_to_string(path).unwrap_or_else(|e| fail(&format!("{path}: {e}")));
    serde_json::from_str(&text).unwrap_or_else(|e| fail(&format!("{path}: {e}")))
}

fn fail(message: &str) -> ! {
    eprintln!("{message}");
    std::process::exit(1);
}

fn print_usage() {
    println!("Usage: dispatcher [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --config <FILE>         JSON node config (flags below override it)");
    println!("  --port <PORT>           Listen port (default: 30000)");
    println!("  --bind <ADDR>           Listen address (default: 127.0.0.1)");
    println!("  --route <NAME>          Route every joiner must be on");
    println!("  --max-players <N>       Max players (default: 16)");
    println!("  --no-manual-switch      Refuse hand-thrown switches");
    println!("  --binary-framing        Use the 4-byte length-header framing");
    println!("  --name <NAME>           Name used in server messages (default: Dispatcher)");
    println!("  --switches <FILE>       JSON array of switch keys for the route");
    println!("  --trainset <DIR>        Check joiners' cars against this trainset");
    println!("  --help, -h              Show this help");
}
