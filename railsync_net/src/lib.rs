// railsync_net: multiplayer session layer for railsync.
//
// A node runs in one of three roles. The server accepts TCP connections,
// validates joins, numbers trains and relays every change to the other
// peers. A client holds one connection to the server and keeps replicas of
// everyone else's trains. A standalone node keeps simulating on its own after
// the server goes away. The protocol itself (verbs, framing) lives in
// `railsync_protocol`; the trains and switches being synchronized live in
// `railsync_sim`.
//
// Module overview:
// - `session.rs`:    `Session`: roster, join validation, ownership checks,
//                    lost-player retention, cadence. Pure state machine; no
//                    sockets.
// - `node.rs`:       `SyncNode`: owns a `Session` plus its connections and
//                    drives both from the host's tick.
// - `server.rs`:     TCP listener thread for the server role.
// - `client.rs`:     Outbound connection for the client role.
// - `connection.rs`: Per-connection reader threads and `PeerWriter`.
// - `config.rs`:     `NodeConfig` / `SyncConfig`, JSON-loadable.
// - `error.rs`:      `SessionError`, `NetError`.
//
// Threading follows one rule: reader and listener threads only produce
// `TransportEvent`s; all session state is touched from the thread that calls
// `SyncNode::tick`.
//
// The crate ships a `dispatcher` binary (`main.rs`) that hosts a server with
// no train of its own.

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod node;
pub mod server;
pub mod session;

pub use config::{NodeConfig, SyncConfig};
pub use error::{NetError, SessionError};
pub use node::SyncNode;
pub use session::{LocalPlayer, Outbound, Player, Role, Session, SessionEvent, Target};
