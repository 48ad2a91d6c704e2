// Outbound connection for the client role.
//
// A client has exactly one connection, to the server. `connect` opens it on
// the calling thread, spawns the reader thread, and returns the write half.
// Inbound messages arrive on the same `TransportEvent` channel the server
// role uses, tagged with `UPSTREAM_PEER`, so the node's tick loop is
// identical in both roles.
//
// The session's opening `PLAYER` message is sent by the node right after
// this returns; there is no separate handshake.

use std::net::{TcpStream, ToSocketAddrs};
use std::sync::mpsc::Sender;

use log::info;
use railsync_protocol::{PeerId, WireFormat};

use crate::connection::{PeerWriter, TransportEvent, spawn_reader};

/// Peer ID a client uses for its server connection.
pub const UPSTREAM_PEER: PeerId = PeerId(0);

/// Connect to a server and start reading from it.
pub fn connect(
    addr: impl ToSocketAddrs,
    format: WireFormat,
    tx: Sender<TransportEvent>,
) -> std::io::Result<PeerWriter> {
    let stream = TcpStream::connect(addr)?;
    stream.set_nodelay(true).ok();
    let writer = PeerWriter::new(UPSTREAM_PEER, &stream, format)?;
    if let Ok(remote) = stream.peer_addr() {
        info!("connected to server at {remote}");
    }
    spawn_reader(UPSTREAM_PEER, stream, format, tx);
    Ok(writer)
}
