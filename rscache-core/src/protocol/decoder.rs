//! Incremental reply decoder. Reads CRLF-delimited lines, switching to a
//! raw byte read of exactly `bytes + 2` octets right after a `VALUE`
//! header, per `spec.md §4.2` "Reply decoding."

use super::outcome::Outcome;

/// Decoding failed to produce an `Outcome` from the buffered bytes. Needing
/// more bytes is not an error: [`Decoder::decode_one`] signals that with
/// `Ok(None)` instead, since the decoder itself has no way to tell "not
/// enough data yet" apart from "stream closed mid-reply" — that
/// distinction is the caller's to make, from whether another read returns
/// EOF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The buffered bytes are not a valid reply.
    Malformed(String),
}

#[derive(Debug, Clone)]
struct PendingValue {
    key: Vec<u8>,
    flags: u32,
    cas: Option<u64>,
    bytes: usize,
}

/// Stateful, allocation-light incremental decoder. Feed it bytes as they
/// arrive off the wire; call [`Decoder::decode_one`] in a loop to drain
/// whatever complete outcomes are currently buffered.
#[derive(Debug, Clone, Default)]
pub struct Decoder {
    buf: Vec<u8>,
    pos: usize,
    pending: Option<PendingValue>,
}

impl Decoder {
    pub fn new() -> Self {
        Decoder::default()
    }

    /// Append newly read bytes to the internal buffer.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Try to decode one `Outcome` from the currently buffered bytes.
    /// Returns `Ok(None)` rather than an error when more bytes are needed
    /// but the data seen so far is otherwise well-formed — callers loop:
    /// read more, feed, retry.
    pub fn decode_one(&mut self) -> Result<Option<Outcome>, DecodeError> {
        if let Some(pending) = self.pending.clone() {
            return self.decode_value_body(pending);
        }
        let line = match self.take_line()? {
            Some(line) => line,
            None => return Ok(None),
        };
        self.parse_line(&line)
    }

    fn compact(&mut self) {
        if self.pos > 0 {
            self.buf.drain(0..self.pos);
            self.pos = 0;
        }
    }

    /// Pull one CRLF-terminated line (without the CRLF) out of the
    /// buffer, advancing `pos` past it. `Ok(None)` if no full line is
    /// buffered yet.
    fn take_line(&mut self) -> Result<Option<Vec<u8>>, DecodeError> {
        let haystack = &self.buf[self.pos..];
        match find_crlf(haystack) {
            Some(idx) => {
                let line = haystack[..idx].to_vec();
                self.pos += idx + 2;
                self.compact();
                Ok(Some(line))
            }
            None => Ok(None),
        }
    }

    fn decode_value_body(
        &mut self,
        pending: PendingValue,
    ) -> Result<Option<Outcome>, DecodeError> {
        let need = pending.bytes + 2;
        let available = &self.buf[self.pos..];
        if available.len() < need {
            return Ok(None);
        }
        if &available[pending.bytes..need] != b"\r\n" {
            return Err(DecodeError::Malformed(
                "value block missing trailing CRLF".to_string(),
            ));
        }
        let value = available[..pending.bytes].to_vec();
        self.pos += need;
        self.compact();
        self.pending = None;
        Ok(Some(Outcome::Value {
            key: pending.key,
            flags: pending.flags,
            bytes: value,
            cas: pending.cas,
        }))
    }

    fn parse_line(&mut self, line: &[u8]) -> Result<Option<Outcome>, DecodeError> {
        let text = std::str::from_utf8(line)
            .map_err(|_| DecodeError::Malformed("non-utf8 reply line".to_string()))?;

        Ok(Some(match text {
            "STORED" => Outcome::Stored,
            "NOT_STORED" => Outcome::NotStored,
            "EXISTS" => Outcome::Exists,
            "NOT_FOUND" => Outcome::NotFound,
            "DELETED" => Outcome::Deleted,
            "TOUCHED" => Outcome::Touched,
            "OK" => Outcome::Ok,
            "END" => Outcome::End,
            "ERROR" => Outcome::Error,
            _ if text.starts_with("CLIENT_ERROR ") => {
                Outcome::ClientError(text["CLIENT_ERROR ".len()..].to_string())
            }
            _ if text.starts_with("SERVER_ERROR ") => {
                Outcome::ServerError(text["SERVER_ERROR ".len()..].to_string())
            }
            _ if text.starts_with("VERSION ") => {
                Outcome::Version(text["VERSION ".len()..].to_string())
            }
            _ if text.starts_with("STAT ") => {
                let rest = &text["STAT ".len()..];
                let mut parts = rest.splitn(2, ' ');
                let key = parts
                    .next()
                    .ok_or_else(|| DecodeError::Malformed("empty STAT line".to_string()))?;
                let value = parts.next().unwrap_or("");
                Outcome::Stat(key.to_string(), value.to_string())
            }
            _ if text.starts_with("VALUE ") => {
                let pending = parse_value_header(&text["VALUE ".len()..])?;
                self.pending = Some(pending);
                return self.decode_one_tail();
            }
            _ if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) => {
                let n: u64 = text
                    .parse()
                    .map_err(|_| DecodeError::Malformed(format!("bad numeric reply: {}", text)))?;
                Outcome::Numeric(n)
            }
            other => {
                return Err(DecodeError::Malformed(format!(
                    "unrecognized reply line: {:?}",
                    other
                )))
            }
        }))
    }

    /// After setting up a pending VALUE body, immediately try to drain it
    /// in case the body bytes are already buffered.
    fn decode_one_tail(&mut self) -> Result<Option<Outcome>, DecodeError> {
        self.decode_one()
    }
}

fn find_crlf(haystack: &[u8]) -> Option<usize> {
    haystack.windows(2).position(|w| w == b"\r\n")
}

fn parse_value_header(rest: &str) -> Result<PendingValue, DecodeError> {
    let mut parts = rest.split(' ');
    let key = parts
        .next()
        .ok_or_else(|| DecodeError::Malformed("VALUE missing key".to_string()))?
        .as_bytes()
        .to_vec();
    let flags: u32 = parts
        .next()
        .ok_or_else(|| DecodeError::Malformed("VALUE missing flags".to_string()))?
        .parse()
        .map_err(|_| DecodeError::Malformed("VALUE flags not an integer".to_string()))?;
    let bytes: usize = parts
        .next()
        .ok_or_else(|| DecodeError::Malformed("VALUE missing byte count".to_string()))?
        .parse()
        .map_err(|_| DecodeError::Malformed("VALUE byte count not an integer".to_string()))?;
    let cas = match parts.next() {
        Some(s) => Some(
            s.parse()
                .map_err(|_| DecodeError::Malformed("VALUE cas not an integer".to_string()))?,
        ),
        None => None,
    };
    Ok(PendingValue { key, flags, cas, bytes })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_stored() {
        let mut d = Decoder::new();
        d.feed(b"STORED\r\n");
        assert_eq!(Ok(Some(Outcome::Stored)), d.decode_one());
        assert_eq!(Ok(None), d.decode_one());
    }

    #[test]
    fn test_decode_value_then_end() {
        let mut d = Decoder::new();
        d.feed(b"VALUE foo 0 3\r\nbar\r\nEND\r\n");
        assert_eq!(
            Ok(Some(Outcome::Value {
                key: b"foo".to_vec(),
                flags: 0,
                bytes: b"bar".to_vec(),
                cas: None,
            })),
            d.decode_one()
        );
        assert_eq!(Ok(Some(Outcome::End)), d.decode_one());
    }

    #[test]
    fn test_decode_value_with_cas() {
        let mut d = Decoder::new();
        d.feed(b"VALUE foo 0 3 42\r\nbar\r\nEND\r\n");
        assert_eq!(
            Ok(Some(Outcome::Value {
                key: b"foo".to_vec(),
                flags: 0,
                bytes: b"bar".to_vec(),
                cas: Some(42),
            })),
            d.decode_one()
        );
    }

    #[test]
    fn test_decode_split_across_feeds() {
        let mut d = Decoder::new();
        d.feed(b"VALUE foo 0 3\r\nba");
        assert_eq!(Ok(None), d.decode_one());
        d.feed(b"r\r\nEND\r\n");
        assert_eq!(
            Ok(Some(Outcome::Value {
                key: b"foo".to_vec(),
                flags: 0,
                bytes: b"bar".to_vec(),
                cas: None,
            })),
            d.decode_one()
        );
        assert_eq!(Ok(Some(Outcome::End)), d.decode_one());
    }

    #[test]
    fn test_decode_split_mid_line() {
        let mut d = Decoder::new();
        d.feed(b"STOR");
        assert_eq!(Ok(None), d.decode_one());
        d.feed(b"ED\r\n");
        assert_eq!(Ok(Some(Outcome::Stored)), d.decode_one());
    }

    #[test]
    fn test_decode_errors() {
        let mut d = Decoder::new();
        d.feed(b"CLIENT_ERROR bad command line format\r\n");
        assert_eq!(
            Ok(Some(Outcome::ClientError("bad command line format".to_string()))),
            d.decode_one()
        );

        let mut d = Decoder::new();
        d.feed(b"SERVER_ERROR out of memory\r\n");
        assert_eq!(
            Ok(Some(Outcome::ServerError("out of memory".to_string()))),
            d.decode_one()
        );
    }

    #[test]
    fn test_decode_stat_lines() {
        let mut d = Decoder::new();
        d.feed(b"STAT pid 123\r\nEND\r\n");
        assert_eq!(
            Ok(Some(Outcome::Stat("pid".to_string(), "123".to_string()))),
            d.decode_one()
        );
        assert_eq!(Ok(Some(Outcome::End)), d.decode_one());
    }

    #[test]
    fn test_decode_numeric_reply() {
        let mut d = Decoder::new();
        d.feed(b"5\r\n");
        assert_eq!(Ok(Some(Outcome::Numeric(5))), d.decode_one());
    }

    #[test]
    fn test_decode_version() {
        let mut d = Decoder::new();
        d.feed(b"VERSION 1.6.21\r\n");
        assert_eq!(Ok(Some(Outcome::Version("1.6.21".to_string()))), d.decode_one());
    }

    #[test]
    fn test_decode_malformed_line() {
        let mut d = Decoder::new();
        d.feed(b"NONSENSE\r\n");
        assert!(matches!(d.decode_one(), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_decode_multiple_values_then_end() {
        let mut d = Decoder::new();
        d.feed(b"VALUE a 0 1\r\nx\r\nVALUE b 0 1\r\ny\r\nEND\r\n");
        assert_eq!(
            Ok(Some(Outcome::Value { key: b"a".to_vec(), flags: 0, bytes: b"x".to_vec(), cas: None })),
            d.decode_one()
        );
        assert_eq!(
            Ok(Some(Outcome::Value { key: b"b".to_vec(), flags: 0, bytes: b"y".to_vec(), cas: None })),
            d.decode_one()
        );
        assert_eq!(Ok(Some(Outcome::End)), d.decode_one());
    }
}
