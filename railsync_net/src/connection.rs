// Per-connection plumbing shared by the server and client roles.
//
// Every TCP connection is split in two:
// - **Reader thread** (`spawn_reader`): blocking reads into a `FrameDecoder`,
//   decodes each unit with `Message::decode_bytes`, and forwards the result
//   as a `TransportEvent` over the node's `mpsc` channel. It is the only code
//   that reads from the socket.
// - **Writer** (`PeerWriter`): held by the node's tick thread, the only code
//   that writes to the socket. Sends are synchronous; messages are small and
//   a stalled peer is detected by its reader failing.
//
// The reader applies the error taxonomy itself: framing desync and unknown
// verbs close the connection, malformed payloads are logged and dropped.
// Every reader ends by sending exactly one `Closed` event, which is what
// makes connection teardown idempotent on the session side.
//
// See also: `server.rs` (listener), `client.rs` (outbound connect),
// `node.rs` (drains the channel each tick).

use std::io::{self, BufWriter, Read};
use std::net::{Shutdown, TcpStream};
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};

use log::{debug, error, info, warn};
use railsync_protocol::{
    DecodeError, FrameDecoder, FramingError, Message, PeerId, WireFormat, write_frame,
};

const READ_CHUNK: usize = 4096;

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed its end.
    Eof,
    Io(String),
    Framing(FramingError),
    Protocol(DecodeError),
}

/// Events sent from reader and listener threads to the tick thread.
pub enum TransportEvent {
    Connected { peer: PeerId, writer: PeerWriter },
    Message { peer: PeerId, message: Message },
    Closed { peer: PeerId, reason: CloseReason },
}

/// Write half of one connection.
pub struct PeerWriter {
    peer: PeerId,
    format: WireFormat,
    stream: TcpStream,
    writer: BufWriter<TcpStream>,
}

impl PeerWriter {
    pub fn new(peer: PeerId, stream: &TcpStream, format: WireFormat) -> io::Result<Self> {
        Ok(Self {
            peer,
            format,
            stream: stream.try_clone()?,
            writer: BufWriter::new(stream.try_clone()?),
        })
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    /// Frame and send one encoded message.
    pub fn send(&mut self, payload: &str) -> io::Result<()> {
        write_frame(&mut self.writer, self.format, payload.as_bytes())
    }

    /// Close both directions. The reader thread sees EOF and reports
    /// `Closed`.
    pub fn close(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

/// Spawn the reader thread for one connection.
pub fn spawn_reader(
    peer: PeerId,
    stream: TcpStream,
    format: WireFormat,
    tx: Sender<TransportEvent>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let reason = reader_loop(peer, &stream, format, &tx);
        match &reason {
            CloseReason::Eof => info!("{peer} disconnected"),
            CloseReason::Io(e) => info!("{peer} connection lost: {e}"),
            CloseReason::Framing(e) => error!("{peer} closed: {e}"),
            CloseReason::Protocol(e) => error!("{peer} closed: {e}"),
        }
        let _ = stream.shutdown(Shutdown::Both);
        let _ = tx.send(TransportEvent::Closed { peer, reason });
    })
}

/// Read until the stream ends or becomes untrustworthy.
fn reader_loop(
    peer: PeerId,
    mut stream: &TcpStream,
    format: WireFormat,
    tx: &Sender<TransportEvent>,
) -> CloseReason {
    let mut decoder = FrameDecoder::new(format);
    let mut buf = [0u8; READ_CHUNK];
    loop {
        let n = match stream.read(&mut buf) {
            Ok(0) => return CloseReason::Eof,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return CloseReason::Io(e.to_string()),
        };
        decoder.push(&buf[..n]);
        loop {
            let unit = match decoder.pop() {
                Ok(Some(unit)) => unit,
                Ok(None) => break,
                Err(e) => return CloseReason::Framing(e),
            };
            match Message::decode_bytes(&unit) {
                Ok(message) => {
                    debug!("{peer} -> {}", message.verb());
                    if tx.send(TransportEvent::Message { peer, message }).is_err() {
                        // Node dropped; nobody is listening any more.
                        return CloseReason::Eof;
                    }
                }
                Err(e) if e.is_fatal() => return CloseReason::Protocol(e),
                Err(e) => warn!("{peer}: dropping message: {e}"),
            }
        }
    }
}
