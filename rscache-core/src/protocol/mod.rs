//! The text, CRLF-terminated memcached wire protocol: `spec.md §4.2` in
//! full. Stateless encoding (`Command::encode`) and incremental decoding
//! (`Decoder`), plus the outcome→`Error` mapping both the connection and
//! the high-level client rely on.

mod command;
mod decoder;
mod outcome;

pub use command::Command;
pub use decoder::{DecodeError, Decoder};
pub use outcome::Outcome;

use crate::error::{Error, NetworkErrorKind};

/// Outcomes that terminate any reply regardless of which command produced
/// it (`spec.md §4.2`: "`ERROR`, `CLIENT_ERROR <msg>`, `SERVER_ERROR <msg>`
/// terminate any reply immediately").
fn terminal_error(outcome: &Outcome) -> Option<Error> {
    match outcome {
        Outcome::ServerError(msg) => Some(Error::NetworkError(NetworkErrorKind::Server(msg.clone()))),
        Outcome::ClientError(_) | Outcome::Error => Some(Error::ProgrammingError),
        _ => None,
    }
}

/// Maps a single storage reply (`set`/`add`/`replace`/`append`/`prepend`)
/// per `spec.md §4.2` "Outcome mapping for storage."
pub fn storage_result(outcome: Outcome) -> Result<(), Error> {
    if let Some(err) = terminal_error(&outcome) {
        return Err(err);
    }
    match outcome {
        Outcome::Stored => Ok(()),
        Outcome::NotStored => Err(Error::NotStored),
        other => Err(unexpected(other)),
    }
}

/// Maps a `cas` reply: `EXISTS` additionally means a CAS conflict and
/// `NOT_FOUND` means the key never existed.
pub fn cas_result(outcome: Outcome) -> Result<(), Error> {
    if let Some(err) = terminal_error(&outcome) {
        return Err(err);
    }
    match outcome {
        Outcome::Stored => Ok(()),
        Outcome::NotStored => Err(Error::NotStored),
        Outcome::Exists => Err(Error::CASConflict),
        Outcome::NotFound => Err(Error::CacheMiss),
        other => Err(unexpected(other)),
    }
}

/// Maps a `delete` reply.
pub fn delete_result(outcome: Outcome) -> Result<(), Error> {
    if let Some(err) = terminal_error(&outcome) {
        return Err(err);
    }
    match outcome {
        Outcome::Deleted => Ok(()),
        Outcome::NotFound => Err(Error::CacheMiss),
        other => Err(unexpected(other)),
    }
}

/// Maps a `touch` reply.
pub fn touch_result(outcome: Outcome) -> Result<(), Error> {
    if let Some(err) = terminal_error(&outcome) {
        return Err(err);
    }
    match outcome {
        Outcome::Touched => Ok(()),
        Outcome::NotFound => Err(Error::CacheMiss),
        other => Err(unexpected(other)),
    }
}

/// Maps an `incr`/`decr` reply. `spec.md §4.2` "Numeric semantics": a
/// missing key is `CacheMiss` on either operation.
pub fn numeric_result(outcome: Outcome) -> Result<u64, Error> {
    if let Some(err) = terminal_error(&outcome) {
        return Err(err);
    }
    match outcome {
        Outcome::Numeric(n) => Ok(n),
        Outcome::NotFound => Err(Error::CacheMiss),
        other => Err(unexpected(other)),
    }
}

/// Maps a `flush_all` reply, gated by `toggle_flush_all_feature` at the
/// client layer (`spec.md §8` property 16).
pub fn flush_all_result(outcome: Outcome) -> Result<(), Error> {
    if let Some(err) = terminal_error(&outcome) {
        return Err(err);
    }
    match outcome {
        Outcome::Ok => Ok(()),
        other => Err(unexpected(other)),
    }
}

/// Maps a `version` reply.
pub fn version_result(outcome: Outcome) -> Result<String, Error> {
    if let Some(err) = terminal_error(&outcome) {
        return Err(err);
    }
    match outcome {
        Outcome::Version(s) => Ok(s),
        other => Err(unexpected(other)),
    }
}

fn unexpected(outcome: Outcome) -> Error {
    Error::NetworkError(NetworkErrorKind::Recv(format!(
        "unexpected reply: {:?}",
        outcome
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_result_mapping() {
        assert_eq!(Ok(()), storage_result(Outcome::Stored));
        assert_eq!(Err(Error::NotStored), storage_result(Outcome::NotStored));
    }

    #[test]
    fn test_cas_result_mapping() {
        assert_eq!(Ok(()), cas_result(Outcome::Stored));
        assert_eq!(Err(Error::CASConflict), cas_result(Outcome::Exists));
        assert_eq!(Err(Error::CacheMiss), cas_result(Outcome::NotFound));
    }

    #[test]
    fn test_delete_result_mapping() {
        assert_eq!(Ok(()), delete_result(Outcome::Deleted));
        assert_eq!(Err(Error::CacheMiss), delete_result(Outcome::NotFound));
    }

    #[test]
    fn test_numeric_result_mapping() {
        assert_eq!(Ok(7), numeric_result(Outcome::Numeric(7)));
        assert_eq!(Err(Error::CacheMiss), numeric_result(Outcome::NotFound));
    }

    #[test]
    fn test_server_error_dominates() {
        let err = storage_result(Outcome::ServerError("oom".to_string())).unwrap_err();
        assert!(err.is_bad_connection());
    }
}
