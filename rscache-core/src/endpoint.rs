//! `Endpoint`/`ServerSet`: the static server list a [`crate::Client`] is
//! built from, per `spec.md §3` "Data model."

use std::fmt::{Display, Formatter, Result as FmtResult};

/// The default memcached port, used when a server string omits one.
pub const DEFAULT_PORT: u16 = 11211;

/// One memcached server: a host/port pair, with an optional alias that
/// (when present) replaces `host:port` as the continuum hash label so a
/// host can be renumbered without reshuffling the ring.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub alias: Option<String>,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16, alias: Option<String>) -> Self {
        Endpoint {
            host: host.into(),
            port,
            alias,
        }
    }

    /// Parse the `"host[:port][ alias]"` wire format accepted by
    /// `new_client`'s `servers` parameter.
    pub fn parse(spec: &str) -> Result<Self, String> {
        let mut parts = spec.splitn(2, ' ');
        let addr = parts
            .next()
            .ok_or_else(|| format!("empty server spec: {:?}", spec))?;
        let alias = parts.next().map(|s| s.to_string());

        let mut addr_parts = addr.splitn(2, ':');
        let host = addr_parts
            .next()
            .ok_or_else(|| format!("missing host in server spec: {:?}", spec))?
            .to_string();
        let port = match addr_parts.next() {
            Some(p) => p
                .parse::<u16>()
                .map_err(|_| format!("invalid port in server spec: {:?}", spec))?,
            None => DEFAULT_PORT,
        };

        Ok(Endpoint::new(host, port, alias))
    }

    /// The label hashed onto the continuum, per `spec.md §4.1`
    /// "Construction": `alias ?? (host if port==11211 else host:port)`.
    pub fn continuum_label(&self) -> String {
        match &self.alias {
            Some(alias) => alias.clone(),
            None if self.port == DEFAULT_PORT => self.host.clone(),
            None => format!("{}:{}", self.host, self.port),
        }
    }

    /// The address the client actually dials: always `host:port`,
    /// regardless of any alias used for hashing.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.socket_addr())
    }
}

/// An ordered, immutable list of [`Endpoint`]s a client was constructed
/// with. Immutable for the client's lifetime, per `spec.md §3`.
#[derive(Debug, Clone)]
pub struct ServerSet(Vec<Endpoint>);

impl ServerSet {
    pub fn new(endpoints: Vec<Endpoint>) -> Self {
        ServerSet(endpoints)
    }

    pub fn parse_all(specs: &[String]) -> Result<Self, String> {
        let endpoints = specs
            .iter()
            .map(|s| Endpoint::parse(s))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ServerSet(endpoints))
    }

    pub fn as_slice(&self) -> &[Endpoint] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::ops::Index<usize> for ServerSet {
    type Output = Endpoint;

    fn index(&self, index: usize) -> &Endpoint {
        &self.0[index]
    }
}
