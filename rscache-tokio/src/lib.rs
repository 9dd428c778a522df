//! `TokioConnection`: a `tokio::net::TcpStream`-backed implementation of
//! [`rscache_core::connection::Connection`]. Unlike the teacher's
//! `rsmc-tokio`, the stream is not wrapped in `Arc<Mutex<_>>` — a
//! connection here is exclusively owned by whichever caller currently
//! holds it out of the pool (`spec.md §3` "Connection is in free_conns
//! iff not currently borrowed"), so no interior sharing is needed.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use rscache_core::connection::{Connection, ConnectionState};
use rscache_core::endpoint::Endpoint;
use rscache_core::error::{Error, NetworkErrorKind};

pub use rscache_core::client::{ClientConfig, Item, MultiOutcome};
pub use rscache_core::hash::KeyHash;
pub use rscache_core::pool::{PoolConfig, TimeoutKind};
pub use rscache_core::{Error as MemcacheError, NetworkErrorKind as MemcacheNetworkErrorKind};

/// A memcached client wired to the Tokio runtime.
pub type Client = rscache_core::client::Client<TokioConnection>;

/// A Tokio-backed [`Connection`](rscache_core::connection::Connection).
#[derive(Debug)]
pub struct TokioConnection {
    stream: TcpStream,
    state: ConnectionState,
}

#[async_trait]
impl Connection for TokioConnection {
    async fn connect(endpoint: &Endpoint, connect_timeout: Duration) -> Result<Self, Error> {
        let addr = endpoint.socket_addr();
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| {
                Error::NetworkError(NetworkErrorKind::PollTimeout(format!(
                    "connect to {} timed out",
                    addr
                )))
            })?
            .map_err(|e| Error::NetworkError(NetworkErrorKind::Poll(e.to_string())))?;
        stream
            .set_nodelay(true)
            .map_err(|e| Error::NetworkError(NetworkErrorKind::Poll(e.to_string())))?;
        Ok(TokioConnection {
            stream,
            state: ConnectionState::new(),
        })
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        self.stream
            .read(buf)
            .await
            .map_err(|e| Error::NetworkError(NetworkErrorKind::Recv(e.to_string())))
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), Error> {
        self.stream
            .write_all(data)
            .await
            .map_err(|e| Error::NetworkError(NetworkErrorKind::Send(e.to_string())))
    }

    fn state(&self) -> &ConnectionState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ConnectionState {
        &mut self.state
    }
}
