//! Runtime-agnostic core of a text-protocol memcached client: the
//! consistent-hash router, wire codec, connection state machine, and
//! connection pool/dispatcher. A concrete crate (e.g. `rscache-tokio`)
//! supplies the [`connection::Connection`] transport; this crate has no
//! knowledge of any specific async runtime's networking types.

pub mod client;
pub mod connection;
pub mod continuum;
pub mod endpoint;
pub mod error;
pub mod hash;
pub mod pool;
pub mod prefix;
pub mod protocol;
pub mod validate;

pub use client::{Client, ClientConfig, Item, MultiOutcome};
pub use connection::{Connection, ConnectionState};
pub use continuum::{Continuum, Router};
pub use endpoint::{Endpoint, ServerSet};
pub use error::{Error, NetworkErrorKind};
pub use hash::KeyHash;
pub use pool::{Pool, PoolConfig, TimeoutKind};
