// TCP listener for the server role.
//
// Architecture: thread-per-reader with a central `mpsc` channel, the same
// shape on both roles.
//
// - **Listener thread** (non-blocking `accept()` loop): assigns each new
//   connection a `PeerId`, hands the node a `PeerWriter` through
//   `TransportEvent::Connected`, then spawns the connection's reader thread.
//   `Connected` is sent before the reader starts, so the node always sees a
//   peer's `Connected` ahead of its first `Message`.
// - **Reader threads**: see `connection.rs`.
// - **Tick thread** (not here): `SyncNode::tick` drains the channel.
//
// There is no handshake at the transport level. A peer is anonymous until
// its first `PLAYER` message binds it to a name in the session.
//
// Shutdown: `ListenerHandle::stop` clears `keep_running`; the accept loop
// polls it every 50 ms. Established connections are closed by the node.

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::thread;
use std::time::Duration;

use log::{info, warn};
use railsync_protocol::{PeerId, WireFormat};

use crate::config::NodeConfig;
use crate::connection::{PeerWriter, TransportEvent, spawn_reader};

const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Handle returned by `start_listener` to stop accepting connections.
pub struct ListenerHandle {
    keep_running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl ListenerHandle {
    /// Signal the listener to stop and wait for it.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.keep_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Bind the configured address and start accepting on a background thread.
/// Returns the handle and the actual bound address (useful when port 0 is
/// used to let the OS pick a free port).
pub fn start_listener(
    config: &NodeConfig,
    tx: Sender<TransportEvent>,
) -> std::io::Result<(ListenerHandle, SocketAddr)> {
    let listener = TcpListener::bind((config.bind_address.as_str(), config.port))?;
    let addr = listener.local_addr()?;
    // Non-blocking so the accept loop can check keep_running.
    listener.set_nonblocking(true)?;

    let keep_running = Arc::new(AtomicBool::new(true));
    let keep_running_listener = keep_running.clone();
    let format = config.wire_format;
    let thread = thread::spawn(move || {
        accept_loop(&listener, format, &tx, &keep_running_listener);
    });
    info!("listening on {addr}");

    Ok((
        ListenerHandle {
            keep_running,
            thread: Some(thread),
        },
        addr,
    ))
}

fn accept_loop(
    listener: &TcpListener,
    format: WireFormat,
    tx: &Sender<TransportEvent>,
    keep_running: &AtomicBool,
) {
    let mut next_peer = 1u32;
    while keep_running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, remote)) => {
                let peer = PeerId(next_peer);
                next_peer += 1;
                if let Err(e) = stream.set_nonblocking(false) {
                    warn!("dropping connection from {remote}: {e}");
                    continue;
                }
                stream.set_nodelay(true).ok();
                let writer = match PeerWriter::new(peer, &stream, format) {
                    Ok(writer) => writer,
                    Err(e) => {
                        warn!("dropping connection from {remote}: {e}");
                        continue;
                    }
                };
                info!("{peer} connected from {remote}");
                if tx.send(TransportEvent::Connected { peer, writer }).is_err() {
                    break;
                }
                spawn_reader(peer, stream, format, tx.clone());
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                warn!("accept failed, listener stopping: {e}");
                break;
            }
        }
    }
}
