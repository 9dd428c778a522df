//! The high-level `Client`: the public API surface of `spec.md §6`, built
//! on top of the router, codec, connection, and pool modules. Implements
//! the "Control flow for a public operation" paragraph of `spec.md §2` and
//! the multi-key fan-out rules of `§4.4`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::connection::Connection;
use crate::continuum::Router;
use crate::endpoint::ServerSet;
use crate::error::Error;
use crate::hash::KeyHash;
use crate::pool::{Pool, PoolConfig, TimeoutKind};
use crate::prefix::{add_prefix, remove_prefix};
use crate::protocol::{self, Command, Outcome};
use crate::validate::validate_key;

/// One stored item, as returned by `get`/`gets`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub value: Vec<u8>,
    pub flags: u32,
    /// Only populated by `gets`; required for a subsequent `cas`.
    pub cas_unique: Option<u64>,
}

/// Constructor-time, immutable client configuration: `new_client`'s
/// parameter list (`spec.md §6`).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub servers: Vec<String>,
    pub noreply: bool,
    pub prefix: String,
    pub hash_fn: KeyHash,
    pub failover: bool,
    /// Documented as non-functional: the pool's mutex is always present
    /// regardless of this flag. Kept only for source compatibility
    /// (`spec.md §9` design note "disable_lock option").
    pub disable_lock: bool,
}

impl ClientConfig {
    pub fn new(
        servers: Vec<String>,
        noreply: bool,
        prefix: impl Into<String>,
        hash_fn: KeyHash,
        failover: bool,
        disable_lock: bool,
    ) -> Self {
        ClientConfig {
            servers,
            noreply,
            prefix: prefix.into(),
            hash_fn,
            failover,
            disable_lock,
        }
    }

    /// `simple_new`: `noreply=false, prefix="", hash_fn=Crc32,
    /// failover=false, disable_lock=false` (`spec.md §6`).
    pub fn simple(servers: Vec<String>) -> Self {
        ClientConfig::new(servers, false, "", KeyHash::Crc32, false, false)
    }
}

/// Combined result of a multi-key operation: the spec models this as a
/// (map, error) pair rather than a plain `Result`, since partial success
/// and a non-nil error can coexist (`spec.md §4.4` "Multi-key fan-out",
/// `§7` "GetMulti returns CacheMiss ... in addition to the partial map").
#[derive(Debug, Clone)]
pub struct MultiOutcome<V> {
    pub items: HashMap<Vec<u8>, V>,
    pub failed_keys: Vec<Vec<u8>>,
    pub error: Option<Error>,
}

impl<V> Default for MultiOutcome<V> {
    fn default() -> Self {
        MultiOutcome {
            items: HashMap::new(),
            failed_keys: Vec::new(),
            error: None,
        }
    }
}

/// Precedence used to decide which of several per-group errors becomes
/// the operation's overall error (`spec.md §4.4`): network errors
/// dominate `MalformedKey`, which dominates `CacheMiss`.
fn error_rank(err: &Error) -> u8 {
    match err {
        Error::CacheMiss => 0,
        Error::MalformedKey => 1,
        _ => 2,
    }
}

fn merge_error(slot: &mut Option<Error>, candidate: Error) {
    match slot {
        None => *slot = Some(candidate),
        Some(existing) if error_rank(&candidate) > error_rank(existing) => *slot = Some(candidate),
        _ => {}
    }
}

/// A client manages one [`Pool`] per server in the cluster, routing keys
/// to the right pool via a [`Router`] built once at construction
/// (`spec.md §2` "Router (Continuum)").
pub struct Client<C: Connection> {
    servers: ServerSet,
    router: Router,
    pools: Vec<Pool<C>>,
    prefix: String,
    noreply: bool,
    failover: bool,
    flush_all_enabled: AtomicBool,
}

impl<C: Connection> Client<C> {
    /// `new_client(servers, noreply, prefix, hash_fn, failover,
    /// disable_lock)`.
    pub fn new(config: ClientConfig) -> Result<Self, Error> {
        let servers = ServerSet::parse_all(&config.servers)
            .map_err(|_| Error::ProgrammingError)?;
        let router = Router::new(&servers, config.hash_fn);
        let pools = servers
            .as_slice()
            .iter()
            .map(|e| Pool::new(e.clone(), PoolConfig::default()))
            .collect();
        Ok(Client {
            servers,
            router,
            pools,
            prefix: config.prefix,
            noreply: config.noreply,
            failover: config.failover,
            flush_all_enabled: AtomicBool::new(false),
        })
    }

    // ---- configuration (`spec.md §6`) ----

    pub fn set_conn_max_open(&self, n: i64) {
        for pool in &self.pools {
            pool.set_config(|cfg| cfg.max_open = n);
        }
    }

    pub fn set_conn_max_lifetime(&self, d: Duration) {
        for pool in &self.pools {
            pool.set_config(|cfg| cfg.max_lifetime = d);
        }
    }

    pub fn set_max_retries(&self, n: i64) {
        for pool in &self.pools {
            pool.set_config(|cfg| cfg.max_retries = n);
        }
    }

    pub fn config_timeout(&self, kind: TimeoutKind, d: Duration) {
        for pool in &self.pools {
            pool.set_config(|cfg| cfg.apply_timeout(kind, d));
        }
    }

    /// `flush_all` is a no-op unless explicitly opted into (`spec.md §6`
    /// "Admin", `§8` property 16).
    pub fn toggle_flush_all_feature(&self, enabled: bool) {
        self.flush_all_enabled.store(enabled, Ordering::SeqCst);
    }

    // ---- key machinery shared by every operation ----

    /// Apply the configured prefix, then validate. Every public method
    /// goes through this before issuing any I/O (`spec.md §4.2` "Key
    /// validation", `§8` property 9/10).
    fn wire_key(&self, key: &[u8]) -> Result<Vec<u8>, Error> {
        let wired = add_prefix(&self.prefix, key);
        validate_key(&wired)?;
        Ok(wired)
    }

    fn strip_prefix(&self, key: &[u8]) -> Vec<u8> {
        remove_prefix(&self.prefix, key)
    }

    /// Pure routing: no I/O (`get_server_address_by_key`).
    pub fn get_server_address_by_key(&self, key: &[u8]) -> Result<String, Error> {
        let wired = self.wire_key(key)?;
        let idx = self.router.route(&wired);
        Ok(self.servers[idx].socket_addr())
    }

    /// Routing that actually attempts a connection, honoring `failover`
    /// (`get_realtime_server_address_by_key`).
    pub async fn get_realtime_server_address_by_key(
        &self,
        cancel: &CancellationToken,
        key: &[u8],
    ) -> Result<String, Error> {
        let wired = self.wire_key(key)?;
        let idx = self.router.route(&wired);
        let (conn, used_idx) = self.borrow_with_failover(cancel, idx).await?;
        let addr = self.servers[used_idx].socket_addr();
        self.pools[used_idx].release(conn, None).await;
        Ok(addr)
    }

    // ---- single-connection exec with failover (`spec.md §9` REDESIGN FLAG 4) ----

    /// Borrow a connection for `idx`, trying the next endpoint on the ring
    /// once if `failover` is enabled and the first attempt fails to open.
    async fn borrow_with_failover(
        &self,
        cancel: &CancellationToken,
        idx: usize,
    ) -> Result<(C, usize), Error> {
        match self.pools[idx].borrow(cancel).await {
            Ok(conn) => Ok((conn, idx)),
            Err(e) if self.failover && self.servers.len() > 1 => {
                warn!(endpoint = %self.servers[idx], error = %e, "failover: trying next endpoint");
                let next = (idx + 1) % self.servers.len();
                let conn = self.pools[next].borrow(cancel).await?;
                Ok((conn, next))
            }
            Err(e) => Err(e),
        }
    }

    /// Drive one command against endpoint `idx`, applying `failover` on a
    /// bad-connection error exactly as `borrow_with_failover` does for the
    /// open step (`spec.md §9` REDESIGN FLAG 4: "on connect/send/recv
    /// error for endpoint E, transparently try the next endpoint on the
    /// continuum ring once before surfacing the error").
    async fn exec_on(
        &self,
        cancel: &CancellationToken,
        idx: usize,
        cmd: Command,
    ) -> Result<Vec<Outcome>, Error> {
        let (mut conn, used_idx) = self.borrow_with_failover(cancel, idx).await?;
        let poll_timeout = self.pools[used_idx].poll_timeout();
        let result = conn.exec(&cmd, poll_timeout).await;
        match &result {
            Ok(_) => self.pools[used_idx].release(conn, None).await,
            Err(e) => {
                let bad = e.is_bad_connection();
                self.pools[used_idx].release(conn, Some(e)).await;
                if bad && self.failover && self.servers.len() > 1 && used_idx == idx {
                    let next = (idx + 1) % self.servers.len();
                    let conn2 = self.pools[next].borrow(cancel).await?;
                    return self.exec_with(cancel, next, conn2, cmd).await;
                }
            }
        }
        result
    }

    async fn exec_with(
        &self,
        _cancel: &CancellationToken,
        idx: usize,
        mut conn: C,
        cmd: Command,
    ) -> Result<Vec<Outcome>, Error> {
        let poll_timeout = self.pools[idx].poll_timeout();
        let result = conn.exec(&cmd, poll_timeout).await;
        match &result {
            Ok(_) => self.pools[idx].release(conn, None).await,
            Err(e) => self.pools[idx].release(conn, Some(e)).await,
        }
        result
    }

    // ---- data plane: single key ----

    pub async fn get(&self, cancel: &CancellationToken, key: &[u8]) -> Result<Item, Error> {
        self.get_impl(cancel, key, false).await
    }

    pub async fn gets(&self, cancel: &CancellationToken, key: &[u8]) -> Result<Item, Error> {
        self.get_impl(cancel, key, true).await
    }

    async fn get_impl(
        &self,
        cancel: &CancellationToken,
        key: &[u8],
        with_cas: bool,
    ) -> Result<Item, Error> {
        let wired = self.wire_key(key)?;
        let idx = self.router.route(&wired);
        let cmd = if with_cas {
            Command::Gets(vec![wired])
        } else {
            Command::Get(vec![wired])
        };
        let outcomes = self.exec_on(cancel, idx, cmd).await?;
        for outcome in outcomes {
            if let Outcome::Value { flags, bytes, cas, .. } = outcome {
                return Ok(Item {
                    value: bytes,
                    flags,
                    cas_unique: cas,
                });
            }
        }
        Err(Error::CacheMiss)
    }

    pub async fn set(
        &self,
        cancel: &CancellationToken,
        key: &[u8],
        value: &[u8],
        flags: u32,
        exptime: i64,
    ) -> Result<(), Error> {
        self.store(cancel, "set", key, value, flags, exptime).await
    }

    pub async fn add(
        &self,
        cancel: &CancellationToken,
        key: &[u8],
        value: &[u8],
        flags: u32,
        exptime: i64,
    ) -> Result<(), Error> {
        self.store(cancel, "add", key, value, flags, exptime).await
    }

    pub async fn replace(
        &self,
        cancel: &CancellationToken,
        key: &[u8],
        value: &[u8],
        flags: u32,
        exptime: i64,
    ) -> Result<(), Error> {
        self.store(cancel, "replace", key, value, flags, exptime).await
    }

    /// Dispatches strictly to the `append` wire verb (`spec.md §9`
    /// REDESIGN FLAG 2: an older source variant mis-dispatched this to
    /// `prepend`; that bug is not reproduced here).
    pub async fn append(
        &self,
        cancel: &CancellationToken,
        key: &[u8],
        value: &[u8],
    ) -> Result<(), Error> {
        self.store(cancel, "append", key, value, 0, 0).await
    }

    pub async fn prepend(
        &self,
        cancel: &CancellationToken,
        key: &[u8],
        value: &[u8],
    ) -> Result<(), Error> {
        self.store(cancel, "prepend", key, value, 0, 0).await
    }

    async fn store(
        &self,
        cancel: &CancellationToken,
        verb: &str,
        key: &[u8],
        value: &[u8],
        flags: u32,
        exptime: i64,
    ) -> Result<(), Error> {
        let wired = self.wire_key(key)?;
        let noreply = self.noreply;
        let cmd = match verb {
            "set" => Command::Set { key: wired.clone(), flags, exptime, value: value.to_vec(), noreply },
            "add" => Command::Add { key: wired.clone(), flags, exptime, value: value.to_vec(), noreply },
            "replace" => Command::Replace { key: wired.clone(), flags, exptime, value: value.to_vec(), noreply },
            "append" => Command::Append { key: wired.clone(), flags, exptime, value: value.to_vec(), noreply },
            "prepend" => Command::Prepend { key: wired.clone(), flags, exptime, value: value.to_vec(), noreply },
            _ => unreachable!("internal verb dispatch"),
        };
        let outcomes = self.exec_on(cancel, self.router.route(&wired), cmd).await?;
        if noreply {
            return Ok(());
        }
        match outcomes.into_iter().next() {
            Some(outcome) => protocol::storage_result(outcome),
            None => Err(Error::IncompleteBuffer),
        }
    }

    pub async fn cas(
        &self,
        cancel: &CancellationToken,
        key: &[u8],
        value: &[u8],
        flags: u32,
        exptime: i64,
        cas_unique: u64,
    ) -> Result<(), Error> {
        let wired = self.wire_key(key)?;
        let noreply = self.noreply;
        let cmd = Command::Cas {
            key: wired.clone(),
            flags,
            exptime,
            value: value.to_vec(),
            cas_unique,
            noreply,
        };
        let outcomes = self.exec_on(cancel, self.router.route(&wired), cmd).await?;
        if noreply {
            return Ok(());
        }
        match outcomes.into_iter().next() {
            Some(outcome) => protocol::cas_result(outcome),
            None => Err(Error::IncompleteBuffer),
        }
    }

    pub async fn delete(&self, cancel: &CancellationToken, key: &[u8]) -> Result<(), Error> {
        let wired = self.wire_key(key)?;
        let noreply = self.noreply;
        let cmd = Command::Delete { key: wired.clone(), noreply };
        let outcomes = self.exec_on(cancel, self.router.route(&wired), cmd).await?;
        if noreply {
            return Ok(());
        }
        match outcomes.into_iter().next() {
            Some(outcome) => protocol::delete_result(outcome),
            None => Err(Error::IncompleteBuffer),
        }
    }

    pub async fn touch(
        &self,
        cancel: &CancellationToken,
        key: &[u8],
        exptime: i64,
    ) -> Result<(), Error> {
        let wired = self.wire_key(key)?;
        let noreply = self.noreply;
        let cmd = Command::Touch { key: wired.clone(), exptime, noreply };
        let outcomes = self.exec_on(cancel, self.router.route(&wired), cmd).await?;
        if noreply {
            return Ok(());
        }
        match outcomes.into_iter().next() {
            Some(outcome) => protocol::touch_result(outcome),
            None => Err(Error::IncompleteBuffer),
        }
    }

    pub async fn incr(
        &self,
        cancel: &CancellationToken,
        key: &[u8],
        delta: u64,
    ) -> Result<u64, Error> {
        self.arith(cancel, key, delta, true).await
    }

    pub async fn decr(
        &self,
        cancel: &CancellationToken,
        key: &[u8],
        delta: u64,
    ) -> Result<u64, Error> {
        self.arith(cancel, key, delta, false).await
    }

    async fn arith(
        &self,
        cancel: &CancellationToken,
        key: &[u8],
        delta: u64,
        incr: bool,
    ) -> Result<u64, Error> {
        let wired = self.wire_key(key)?;
        let noreply = self.noreply;
        let cmd = if incr {
            Command::Incr { key: wired.clone(), delta, noreply }
        } else {
            Command::Decr { key: wired.clone(), delta, noreply }
        };
        let outcomes = self.exec_on(cancel, self.router.route(&wired), cmd).await?;
        if noreply {
            return Ok(0);
        }
        match outcomes.into_iter().next() {
            Some(outcome) => protocol::numeric_result(outcome),
            None => Err(Error::IncompleteBuffer),
        }
    }

    // ---- admin ----

    pub async fn version(&self, cancel: &CancellationToken, idx: usize) -> Result<String, Error> {
        let outcomes = self.exec_on(cancel, idx, Command::Version).await?;
        match outcomes.into_iter().next() {
            Some(outcome) => protocol::version_result(outcome),
            None => Err(Error::IncompleteBuffer),
        }
    }

    pub async fn stats(
        &self,
        cancel: &CancellationToken,
        idx: usize,
    ) -> Result<Vec<(String, String)>, Error> {
        let outcomes = self.exec_on(cancel, idx, Command::Stats).await?;
        let mut stats = Vec::new();
        for outcome in outcomes {
            match outcome {
                Outcome::Stat(k, v) => stats.push((k, v)),
                Outcome::End => break,
                other => return Err(Error::NetworkError(crate::error::NetworkErrorKind::Recv(
                    format!("unexpected stats reply: {:?}", other),
                ))),
            }
        }
        Ok(stats)
    }

    /// Gated behind `toggle_flush_all_feature(true)`; otherwise
    /// `ProgrammingError` without touching any server (`spec.md §8`
    /// property 16).
    pub async fn flush_all(
        &self,
        cancel: &CancellationToken,
        delay: Option<i64>,
    ) -> Result<(), Error> {
        if !self.flush_all_enabled.load(Ordering::SeqCst) {
            return Err(Error::ProgrammingError);
        }
        let noreply = self.noreply;
        let cmd = Command::FlushAll { delay, noreply };
        let results = join_all((0..self.servers.len()).map(|idx| {
            let cmd = cmd.clone();
            async move { self.exec_on(cancel, idx, cmd).await }
        }))
        .await;
        for outcomes in results {
            let outcomes = outcomes?;
            if noreply {
                continue;
            }
            match outcomes.into_iter().next() {
                Some(outcome) => protocol::flush_all_result(outcome)?,
                None => return Err(Error::IncompleteBuffer),
            }
        }
        Ok(())
    }

    /// Best-effort `quit` on every per-endpoint pool (`spec.md §4.3`).
    pub async fn quit(&self) {
        for pool in &self.pools {
            pool.quit().await;
        }
    }

    // ---- multi-key fan-out (`spec.md §4.4`) ----

    pub async fn get_multi(
        &self,
        cancel: &CancellationToken,
        keys: &[&[u8]],
    ) -> MultiOutcome<Item> {
        self.get_multi_impl(cancel, keys, false).await
    }

    pub async fn gets_multi(
        &self,
        cancel: &CancellationToken,
        keys: &[&[u8]],
    ) -> MultiOutcome<Item> {
        self.get_multi_impl(cancel, keys, true).await
    }

    async fn get_multi_impl(
        &self,
        cancel: &CancellationToken,
        keys: &[&[u8]],
        with_cas: bool,
    ) -> MultiOutcome<Item> {
        let mut out = MultiOutcome::default();
        let mut wired_keys: Vec<Vec<u8>> = Vec::with_capacity(keys.len());
        for &key in keys {
            match self.wire_key(key) {
                Ok(w) => wired_keys.push(w),
                Err(e) => {
                    out.failed_keys.push(key.to_vec());
                    merge_error(&mut out.error, e);
                }
            }
        }
        if wired_keys.is_empty() {
            return out;
        }
        let refs: Vec<&[u8]> = wired_keys.iter().map(|k| k.as_slice()).collect();
        let groups = self.router.group(&refs);

        let group_results = join_all(groups.into_iter().map(|(idx, wired_group)| {
            let cmd = if with_cas {
                Command::Gets(wired_group.iter().map(|k| k.to_vec()).collect())
            } else {
                Command::Get(wired_group.iter().map(|k| k.to_vec()).collect())
            };
            async move { (idx, self.exec_on(cancel, idx, cmd).await) }
        }))
        .await;

        let mut returned = 0usize;
        for (_idx, result) in group_results {
            match result {
                Ok(outcomes) => {
                    for outcome in outcomes {
                        if let Outcome::Value { key, flags, bytes, cas } = outcome {
                            let original = self.strip_prefix(&key);
                            out.items.insert(
                                original,
                                Item {
                                    value: bytes,
                                    flags,
                                    cas_unique: cas,
                                },
                            );
                            returned += 1;
                        }
                    }
                }
                Err(e) => merge_error(&mut out.error, e),
            }
        }
        if returned < keys.len() {
            merge_error(&mut out.error, Error::CacheMiss);
        }
        out
    }

    pub async fn set_multi(
        &self,
        cancel: &CancellationToken,
        items: HashMap<Vec<u8>, (Vec<u8>, u32, i64)>,
    ) -> MultiOutcome<()> {
        let mut out = MultiOutcome::default();
        let noreply = self.noreply;
        let mut by_idx: std::collections::BTreeMap<usize, Vec<(Vec<u8>, Vec<u8>, u32, i64, Vec<u8>)>> =
            std::collections::BTreeMap::new();
        for (key, (value, flags, exptime)) in &items {
            match self.wire_key(key) {
                Ok(wired) => {
                    let idx = self.router.route(&wired);
                    by_idx.entry(idx).or_default().push((
                        key.clone(),
                        wired,
                        *flags,
                        *exptime,
                        value.clone(),
                    ));
                }
                Err(e) => {
                    out.failed_keys.push(key.clone());
                    merge_error(&mut out.error, e);
                }
            }
        }

        let group_results = join_all(by_idx.into_iter().map(|(idx, group)| async move {
            let mut per_key_results = Vec::with_capacity(group.len());
            for (original, wired, flags, exptime, value) in group {
                let cmd = Command::Set { key: wired, flags, exptime, value, noreply };
                let result = self.exec_on(cancel, idx, cmd).await;
                per_key_results.push((original, result));
            }
            per_key_results
        }))
        .await;

        for per_key_results in group_results {
            for (original, result) in per_key_results {
                match result {
                    Ok(outcomes) => {
                        if noreply {
                            out.items.insert(original, ());
                            continue;
                        }
                        match outcomes.into_iter().next() {
                            Some(outcome) => match protocol::storage_result(outcome) {
                                Ok(()) => {
                                    out.items.insert(original, ());
                                }
                                Err(e) => {
                                    out.failed_keys.push(original);
                                    merge_error(&mut out.error, e);
                                }
                            },
                            None => {
                                out.failed_keys.push(original);
                                merge_error(&mut out.error, Error::IncompleteBuffer);
                            }
                        }
                    }
                    Err(e) => {
                        out.failed_keys.push(original);
                        merge_error(&mut out.error, e);
                    }
                }
            }
        }
        out
    }

    pub async fn delete_multi(
        &self,
        cancel: &CancellationToken,
        keys: &[&[u8]],
    ) -> MultiOutcome<()> {
        let mut out = MultiOutcome::default();
        let noreply = self.noreply;
        let mut wired_keys: Vec<(Vec<u8>, Vec<u8>)> = Vec::with_capacity(keys.len());
        for &key in keys {
            match self.wire_key(key) {
                Ok(w) => wired_keys.push((key.to_vec(), w)),
                Err(e) => {
                    out.failed_keys.push(key.to_vec());
                    merge_error(&mut out.error, e);
                }
            }
        }
        if wired_keys.is_empty() {
            return out;
        }

        let mut by_idx: std::collections::BTreeMap<usize, Vec<(Vec<u8>, Vec<u8>)>> =
            std::collections::BTreeMap::new();
        for (original, wired) in wired_keys {
            let idx = self.router.route(&wired);
            by_idx.entry(idx).or_default().push((original, wired));
        }

        let group_results = join_all(by_idx.into_iter().map(|(idx, group)| async move {
            let mut per_key_results = Vec::with_capacity(group.len());
            for (original, wired) in group {
                let cmd = Command::Delete { key: wired, noreply };
                let result = self.exec_on(cancel, idx, cmd).await;
                per_key_results.push((original, result));
            }
            per_key_results
        }))
        .await;

        for per_key_results in group_results {
            for (original, result) in per_key_results {
                match result {
                    Ok(outcomes) => {
                        if noreply {
                            // `spec.md §4.4`: when noreply suppresses visibility,
                            // the caller cannot tell which keys actually hit;
                            // they are reconciled into failed_keys below once
                            // we know whether the overall errcode is non-OK.
                            out.items.insert(original, ());
                            continue;
                        }
                        match outcomes.into_iter().next() {
                            Some(outcome) => match protocol::delete_result(outcome) {
                                Ok(()) => {
                                    out.items.insert(original, ());
                                }
                                Err(e) => {
                                    out.failed_keys.push(original);
                                    merge_error(&mut out.error, e);
                                }
                            },
                            None => {
                                out.failed_keys.push(original);
                                merge_error(&mut out.error, Error::IncompleteBuffer);
                            }
                        }
                    }
                    Err(e) => {
                        out.failed_keys.push(original);
                        merge_error(&mut out.error, e);
                    }
                }
            }
        }

        // `spec.md §4.4` last paragraph: under `noreply`, if the overall
        // errcode ends up non-OK, the caller cannot observe per-key
        // outcomes, so every requested key is reported as failed.
        if noreply && out.error.is_some() {
            out.failed_keys = keys.iter().map(|k| k.to_vec()).collect();
            out.items.clear();
        }
        out
    }
}
