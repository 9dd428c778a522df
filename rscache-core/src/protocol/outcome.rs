//! Reply tags the decoder yields, per `spec.md §3` "Outcome tag."

/// One parsed reply. A command may yield several in sequence (e.g. several
/// `Value` outcomes followed by a terminating `End`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Stored,
    NotStored,
    Exists,
    NotFound,
    Deleted,
    Touched,
    Ok,
    Value {
        key: Vec<u8>,
        flags: u32,
        bytes: Vec<u8>,
        cas: Option<u64>,
    },
    Stat(String, String),
    Version(String),
    /// `<new value>\r\n` reply to a successful `incr`/`decr`.
    Numeric(u64),
    End,
    Error,
    ClientError(String),
    ServerError(String),
}
