//! Network service module
//!
//! This crate owns everything that touches a socket:
//! - `buffer.rs` - bounded multi-reader packet buffers between stages
//! - `connection.rs` - one outbound peer connection with its send lock
//! - `pool.rs` - the connection pool, handshake and bootstrap
//! - `receiver.rs` - per-connection read loop and packet routing
//! - `server.rs` - optional inbound peer listener
//! - `introducer.rs` - peer-directory lookup over HTTP

pub mod buffer;
pub mod connection;
pub mod error;
pub mod introducer;
pub mod pool;
pub mod receiver;
pub mod server;

pub use buffer::PacketBuffer;
pub use connection::{parse_endpoint, Endpoint, PeerConnection, Trust};
pub use error::{NetError, NetResult};
pub use pool::{BootstrapInfo, ConnectionPool};
pub use introducer::fetch_directory_peers;
pub use receiver::{run_receiver, run_receiver_once, ReceiverCounters, RouteBuffers};
pub use server::PeerServer;
