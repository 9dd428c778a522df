//! Wire-level commands. `spec.md §4.2` "Commands" table, verbatim.

/// One request in the text protocol. `noreply` suppresses the reply for
/// every variant that carries it; `Get`/`Gets`/`Version`/`Stats`/`Quit`
/// always reply (there is no `noreply` form for them).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Set {
        key: Vec<u8>,
        flags: u32,
        exptime: i64,
        value: Vec<u8>,
        noreply: bool,
    },
    Add {
        key: Vec<u8>,
        flags: u32,
        exptime: i64,
        value: Vec<u8>,
        noreply: bool,
    },
    Replace {
        key: Vec<u8>,
        flags: u32,
        exptime: i64,
        value: Vec<u8>,
        noreply: bool,
    },
    Append {
        key: Vec<u8>,
        flags: u32,
        exptime: i64,
        value: Vec<u8>,
        noreply: bool,
    },
    Prepend {
        key: Vec<u8>,
        flags: u32,
        exptime: i64,
        value: Vec<u8>,
        noreply: bool,
    },
    Cas {
        key: Vec<u8>,
        flags: u32,
        exptime: i64,
        value: Vec<u8>,
        cas_unique: u64,
        noreply: bool,
    },
    Get(Vec<Vec<u8>>),
    Gets(Vec<Vec<u8>>),
    Delete {
        key: Vec<u8>,
        noreply: bool,
    },
    Incr {
        key: Vec<u8>,
        delta: u64,
        noreply: bool,
    },
    Decr {
        key: Vec<u8>,
        delta: u64,
        noreply: bool,
    },
    Touch {
        key: Vec<u8>,
        exptime: i64,
        noreply: bool,
    },
    Version,
    Stats,
    FlushAll {
        delay: Option<i64>,
        noreply: bool,
    },
    Quit,
}

impl Command {
    /// Whether a reply should be read back for this command. `Get`/`Gets`/
    /// `Version`/`Stats` always reply; everything else follows its
    /// `noreply` field.
    pub fn expects_reply(&self) -> bool {
        match self {
            Command::Set { noreply, .. }
            | Command::Add { noreply, .. }
            | Command::Replace { noreply, .. }
            | Command::Append { noreply, .. }
            | Command::Prepend { noreply, .. }
            | Command::Cas { noreply, .. }
            | Command::Delete { noreply, .. }
            | Command::Incr { noreply, .. }
            | Command::Decr { noreply, .. }
            | Command::Touch { noreply, .. }
            | Command::FlushAll { noreply, .. } => !noreply,
            Command::Get(_) | Command::Gets(_) | Command::Version | Command::Stats => true,
            Command::Quit => false,
        }
    }

    /// Serialize this command into its wire form, appended to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Command::Set { key, flags, exptime, value, noreply } => {
                encode_storage(out, "set", key, *flags, *exptime, value, *noreply)
            }
            Command::Add { key, flags, exptime, value, noreply } => {
                encode_storage(out, "add", key, *flags, *exptime, value, *noreply)
            }
            Command::Replace { key, flags, exptime, value, noreply } => {
                encode_storage(out, "replace", key, *flags, *exptime, value, *noreply)
            }
            Command::Append { key, flags, exptime, value, noreply } => {
                encode_storage(out, "append", key, *flags, *exptime, value, *noreply)
            }
            Command::Prepend { key, flags, exptime, value, noreply } => {
                encode_storage(out, "prepend", key, *flags, *exptime, value, *noreply)
            }
            Command::Cas { key, flags, exptime, value, cas_unique, noreply } => {
                out.extend_from_slice(b"cas ");
                out.extend_from_slice(key);
                out.extend_from_slice(format!(" {} {} {} {}", flags, exptime, value.len(), cas_unique).as_bytes());
                if *noreply {
                    out.extend_from_slice(b" noreply");
                }
                out.extend_from_slice(b"\r\n");
                out.extend_from_slice(value);
                out.extend_from_slice(b"\r\n");
            }
            Command::Get(keys) => encode_multiget(out, "get", keys),
            Command::Gets(keys) => encode_multiget(out, "gets", keys),
            Command::Delete { key, noreply } => {
                out.extend_from_slice(b"delete ");
                out.extend_from_slice(key);
                if *noreply {
                    out.extend_from_slice(b" noreply");
                }
                out.extend_from_slice(b"\r\n");
            }
            Command::Incr { key, delta, noreply } => encode_arith(out, "incr", key, *delta, *noreply),
            Command::Decr { key, delta, noreply } => encode_arith(out, "decr", key, *delta, *noreply),
            Command::Touch { key, exptime, noreply } => {
                out.extend_from_slice(b"touch ");
                out.extend_from_slice(key);
                out.extend_from_slice(format!(" {}", exptime).as_bytes());
                if *noreply {
                    out.extend_from_slice(b" noreply");
                }
                out.extend_from_slice(b"\r\n");
            }
            Command::Version => out.extend_from_slice(b"version\r\n"),
            Command::Stats => out.extend_from_slice(b"stats\r\n"),
            Command::FlushAll { delay, noreply } => {
                out.extend_from_slice(b"flush_all");
                if let Some(d) = delay {
                    out.extend_from_slice(format!(" {}", d).as_bytes());
                }
                if *noreply {
                    out.extend_from_slice(b" noreply");
                }
                out.extend_from_slice(b"\r\n");
            }
            Command::Quit => out.extend_from_slice(b"quit\r\n"),
        }
    }
}

fn encode_storage(
    out: &mut Vec<u8>,
    verb: &str,
    key: &[u8],
    flags: u32,
    exptime: i64,
    value: &[u8],
    noreply: bool,
) {
    out.extend_from_slice(verb.as_bytes());
    out.push(b' ');
    out.extend_from_slice(key);
    out.extend_from_slice(format!(" {} {} {}", flags, exptime, value.len()).as_bytes());
    if noreply {
        out.extend_from_slice(b" noreply");
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(value);
    out.extend_from_slice(b"\r\n");
}

fn encode_multiget(out: &mut Vec<u8>, verb: &str, keys: &[Vec<u8>]) {
    out.extend_from_slice(verb.as_bytes());
    for key in keys {
        out.push(b' ');
        out.extend_from_slice(key);
    }
    out.extend_from_slice(b"\r\n");
}

fn encode_arith(out: &mut Vec<u8>, verb: &str, key: &[u8], delta: u64, noreply: bool) {
    out.extend_from_slice(verb.as_bytes());
    out.push(b' ');
    out.extend_from_slice(key);
    out.extend_from_slice(format!(" {}", delta).as_bytes());
    if noreply {
        out.extend_from_slice(b" noreply");
    }
    out.extend_from_slice(b"\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(cmd: &Command) -> String {
        let mut out = Vec::new();
        cmd.encode(&mut out);
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_encode_set() {
        let cmd = Command::Set {
            key: b"foo".to_vec(),
            flags: 0,
            exptime: 0,
            value: b"bar".to_vec(),
            noreply: false,
        };
        assert_eq!("set foo 0 0 3\r\nbar\r\n", encoded(&cmd));
    }

    #[test]
    fn test_encode_set_noreply() {
        let cmd = Command::Set {
            key: b"foo".to_vec(),
            flags: 1,
            exptime: 60,
            value: b"bar".to_vec(),
            noreply: true,
        };
        assert_eq!("set foo 1 60 3 noreply\r\nbar\r\n", encoded(&cmd));
    }

    /// `append` must dispatch to the `append` wire verb, never `prepend`
    /// (`spec.md §9` REDESIGN FLAG 2).
    #[test]
    fn test_encode_append_is_not_prepend() {
        let cmd = Command::Append {
            key: b"k".to_vec(),
            flags: 0,
            exptime: 0,
            value: b"b".to_vec(),
            noreply: false,
        };
        assert_eq!("append k 0 0 1\r\nb\r\n", encoded(&cmd));

        let cmd = Command::Prepend {
            key: b"k".to_vec(),
            flags: 0,
            exptime: 0,
            value: b"c".to_vec(),
            noreply: false,
        };
        assert_eq!("prepend k 0 0 1\r\nc\r\n", encoded(&cmd));
    }

    #[test]
    fn test_encode_cas() {
        let cmd = Command::Cas {
            key: b"k".to_vec(),
            flags: 0,
            exptime: 0,
            value: b"v".to_vec(),
            cas_unique: 42,
            noreply: false,
        };
        assert_eq!("cas k 0 0 1 42\r\nv\r\n", encoded(&cmd));
    }

    #[test]
    fn test_encode_get_multi() {
        let cmd = Command::Get(vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!("get a b\r\n", encoded(&cmd));
    }

    #[test]
    fn test_encode_delete_noreply() {
        let cmd = Command::Delete { key: b"k".to_vec(), noreply: true };
        assert_eq!("delete k noreply\r\n", encoded(&cmd));
    }

    #[test]
    fn test_encode_flush_all_with_delay() {
        let cmd = Command::FlushAll { delay: Some(30), noreply: false };
        assert_eq!("flush_all 30\r\n", encoded(&cmd));
    }

    #[test]
    fn test_expects_reply() {
        assert!(!Command::Delete { key: b"k".to_vec(), noreply: true }.expects_reply());
        assert!(Command::Delete { key: b"k".to_vec(), noreply: false }.expects_reply());
        assert!(Command::Get(vec![]).expects_reply());
        assert!(!Command::Quit.expects_reply());
    }
}
