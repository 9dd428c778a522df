//! Error taxonomy shared by every module in the crate.

use std::{
    error::Error as StdError,
    fmt::{Display, Formatter, Result as FmtResult},
};

use crate::protocol::DecodeError;

/// The kind of network fault that produced a [`Error::NetworkError`].
///
/// Each variant carries the triggering cause as a free-form message, the
/// same way the source client reports e.g. `"recv_error"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkErrorKind {
    Send(String),
    Recv(String),
    Poll(String),
    PollTimeout(String),
    Server(String),
}

impl Display for NetworkErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            NetworkErrorKind::Send(m) => write!(f, "send_error: {}", m),
            NetworkErrorKind::Recv(m) => write!(f, "recv_error: {}", m),
            NetworkErrorKind::Poll(m) => write!(f, "poll_error: {}", m),
            NetworkErrorKind::PollTimeout(m) => write!(f, "poll_timeout_error: {}", m),
            NetworkErrorKind::Server(m) => write!(f, "server_error: {}", m),
        }
    }
}

/// An error produced while talking to a memcached cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The key was not present on the server.
    CacheMiss,
    /// A `cas` write lost the race against a concurrent modification.
    CASConflict,
    /// A conditional write (`add`/`replace`/`cas`) was rejected.
    NotStored,
    /// The key failed client-side validation before any I/O happened.
    MalformedKey,
    /// A transport or protocol fault poisoned the connection that hit it.
    NetworkError(NetworkErrorKind),
    /// The caller used the API incorrectly (e.g. `flush_all` without
    /// opting in via `toggle_flush_all_feature`).
    ProgrammingError,
    /// The stream closed mid-reply, leaving a partially parsed message.
    IncompleteBuffer,
    /// The connection is known to be poisoned and must not be reused.
    BadConnection,
    /// The client (or its pool) has already been shut down via `quit`.
    ClientClosed,
    /// The caller-supplied cancellation token fired before the op finished.
    ContextCanceled,
}

impl Error {
    /// Whether this error indicates the connection that produced it must
    /// be evicted from the pool rather than returned to `free_conns`.
    ///
    /// Send, receive, poll, and server_error are the "bad-conn" family
    /// referenced throughout `§4.3`/`§4.4`/`§7`.
    pub fn is_bad_connection(&self) -> bool {
        matches!(
            self,
            Error::NetworkError(
                NetworkErrorKind::Send(_)
                    | NetworkErrorKind::Recv(_)
                    | NetworkErrorKind::Poll(_)
                    | NetworkErrorKind::PollTimeout(_)
                    | NetworkErrorKind::Server(_)
            ) | Error::IncompleteBuffer
        )
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Error::CacheMiss => write!(f, "libmc: cache miss"),
            Error::CASConflict => write!(f, "libmc: compare-and-swap conflict"),
            Error::NotStored => write!(f, "libmc: item not stored"),
            Error::MalformedKey => write!(
                f,
                "malformed: key is too long or contains invalid characters"
            ),
            Error::NetworkError(kind) => write!(f, "libmc: network error({})", kind),
            Error::ProgrammingError => write!(f, "libmc: programming error"),
            Error::IncompleteBuffer => write!(f, "libmc: incomplete buffer"),
            Error::BadConnection => write!(f, "libmc: bad connection"),
            Error::ClientClosed => write!(f, "libmc: client closed"),
            Error::ContextCanceled => write!(f, "libmc: context canceled"),
        }
    }
}

impl StdError for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::NetworkError(NetworkErrorKind::Recv(err.to_string()))
    }
}

impl From<DecodeError> for Error {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::Malformed(msg) => Error::NetworkError(NetworkErrorKind::Recv(msg)),
        }
    }
}
