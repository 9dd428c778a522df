//! Consistent-hash ring: `Continuum` places endpoints on a ring, `Router`
//! maps keys to them. Implements `spec.md §3` ("Continuum" data model) and
//! `§4.1` ("Router").

use std::collections::BTreeMap;

use crate::endpoint::ServerSet;
use crate::hash::{md5_u32, KeyHash};

/// Points per endpoint: each point is one MD5 digest of `"{label}-{bucket}"`
/// for `bucket` in `0..POINTS_PER_ENDPOINT`, truncated to a `u32` the same
/// way a lookup key is (`spec.md §4.1` "Construction").
const POINTS_PER_ENDPOINT: u32 = 100;

/// One point on the ring: a 32-bit hash paired with the endpoint index it
/// resolves to. Sorted ascending by `hash`, ties broken by endpoint
/// insertion order (a stable sort preserves this without extra bookkeeping).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Point {
    hash: u32,
    endpoint: usize,
}

/// The ring itself: every endpoint's points, sorted once at construction.
/// Hashing onto the ring is always MD5, regardless of the [`KeyHash`] a
/// [`Router`] is configured with (`spec.md §3` Continuum data model).
#[derive(Debug, Clone)]
pub struct Continuum {
    points: Vec<Point>,
}

impl Continuum {
    /// Build the ring from a server set. Each endpoint contributes
    /// `POINTS_PER_ENDPOINT` points, labeled by
    /// [`crate::endpoint::Endpoint::continuum_label`].
    pub fn new(servers: &ServerSet) -> Self {
        let mut points =
            Vec::with_capacity(servers.len() * POINTS_PER_ENDPOINT as usize);
        for (endpoint_idx, endpoint) in servers.as_slice().iter().enumerate() {
            let label = endpoint.continuum_label();
            for bucket in 0..POINTS_PER_ENDPOINT {
                let hash = md5_u32(format!("{}-{}", label, bucket).as_bytes());
                points.push(Point {
                    hash,
                    endpoint: endpoint_idx,
                });
            }
        }
        points.sort_by_key(|p| p.hash);
        Continuum { points }
    }

    /// Find the endpoint index owning `key_hash`: the first point whose
    /// hash is `>=` `key_hash`, wrapping to index 0 when `key_hash` is
    /// past the last point (`spec.md §4.1` "Construction").
    pub fn route(&self, key_hash: u32) -> usize {
        let i = self
            .points
            .partition_point(|p| p.hash < key_hash);
        let i = if i == self.points.len() { 0 } else { i };
        self.points[i].endpoint
    }
}

/// Routes keys to endpoint indices: a [`Continuum`] plus the configured
/// [`KeyHash`] used to place a lookup key on it.
#[derive(Debug, Clone)]
pub struct Router {
    continuum: Continuum,
    key_hash: KeyHash,
}

impl Router {
    pub fn new(servers: &ServerSet, key_hash: KeyHash) -> Self {
        Router {
            continuum: Continuum::new(servers),
            key_hash,
        }
    }

    /// The endpoint index a single key resolves to.
    pub fn route(&self, key: &[u8]) -> usize {
        self.continuum.route(self.key_hash.hash(key))
    }

    /// Group keys by the endpoint they route to, preserving each
    /// endpoint's keys in caller order (`spec.md §4.1` "Grouping").
    pub fn group<'a>(&self, keys: &[&'a [u8]]) -> BTreeMap<usize, Vec<&'a [u8]>> {
        let mut groups: BTreeMap<usize, Vec<&'a [u8]>> = BTreeMap::new();
        for &key in keys {
            groups.entry(self.route(key)).or_default().push(key);
        }
        groups
    }
}
