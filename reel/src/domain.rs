use chrono::{DateTime, TimeDelta, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display};
use std::hash::Hash;

/// Identity of a cached value.
///
/// The byte encoding must preserve ordering and be prefix-free among values of
/// the same type, so that composite keys can be built by concatenation and
/// scanned by prefix.
pub trait CacheKey:
    Clone + Debug + Display + Eq + Hash + Serialize + DeserializeOwned + Send + Sync + 'static
{
    fn encode(&self, buf: &mut Vec<u8>);

    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        buf
    }
}

impl CacheKey for u64 {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.to_be_bytes());
    }
}

impl CacheKey for u32 {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.to_be_bytes());
    }
}

impl CacheKey for String {
    fn encode(&self, buf: &mut Vec<u8>) {
        // length prefix keeps "ab" from being a prefix of "abc"
        buf.extend_from_slice(&(self.len() as u32).to_be_bytes());
        buf.extend_from_slice(self.as_bytes());
    }
}

/// Parent key for lists that are not scoped to another entity ("popular", "trending")
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Global;

impl Display for Global {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("global")
    }
}

impl CacheKey for Global {
    fn encode(&self, _buf: &mut Vec<u8>) {}
}

/// A domain value cached one record per identity
pub trait Entity: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    type Key: CacheKey;

    /// Entity type name, used as the tree name and as the `entity_type` span tag
    const NAME: &'static str;

    fn key(&self) -> Self::Key;
}

/// An ordered, paginated list of entities, optionally scoped to a parent
pub trait PagedList: Send + Sync + 'static {
    type Parent: CacheKey;
    type Item: Entity;

    const NAME: &'static str;
}

/// A local membership collection (watchlist, favourites)
pub trait Collection: Send + Sync + 'static {
    type Id: CacheKey;

    const NAME: &'static str;
}

/// A cached payload and the instant it was written
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CacheRecord<K, T> {
    pub key: K,
    pub payload: T,
    pub cached_at: DateTime<Utc>,
}

impl<K, T> CacheRecord<K, T> {
    pub fn new(key: K, payload: T, cached_at: DateTime<Utc>) -> Self {
        Self {
            key,
            payload,
            cached_at,
        }
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: TimeDelta) -> bool {
        is_fresh(self.cached_at, now, ttl)
    }
}

/// One position of a cached page. The item payload itself lives in the
/// item's entity tree and is shared by every page that references it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PageEntry<K> {
    pub item: K,
    pub cached_at: DateTime<Utc>,
}

impl<K> PageEntry<K> {
    pub fn new(item: K, cached_at: DateTime<Utc>) -> Self {
        Self { item, cached_at }
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: TimeDelta) -> bool {
        is_fresh(self.cached_at, now, ttl)
    }
}

/// Membership entry. `added_at` orders presentation only and never expires.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SetRecord<Id> {
    pub id: Id,
    pub added_at: DateTime<Utc>,
}

impl<Id> SetRecord<Id> {
    pub fn new(id: Id, added_at: DateTime<Utc>) -> Self {
        Self { id, added_at }
    }
}

fn is_fresh(cached_at: DateTime<Utc>, now: DateTime<Utc>, ttl: TimeDelta) -> bool {
    now.signed_duration_since(cached_at) < ttl
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_freshness_boundary() {
        let written = DateTime::<Utc>::UNIX_EPOCH;
        let record = CacheRecord::new(42u64, "payload", written);
        let ttl = TimeDelta::hours(24);

        assert!(record.is_fresh(written + TimeDelta::hours(1), ttl));
        assert!(record.is_fresh(written + ttl - TimeDelta::seconds(1), ttl));
        assert!(!record.is_fresh(written + ttl, ttl));
        assert!(!record.is_fresh(written + TimeDelta::hours(25), ttl));
    }

    #[test]
    fn test_integer_keys_sort_numerically() {
        assert!(2u64.to_bytes() < 10u64.to_bytes());
        assert!(255u32.to_bytes() < 256u32.to_bytes());
    }

    #[test]
    fn test_string_keys_are_prefix_free() {
        let short = "ab".to_string().to_bytes();
        let long = "abc".to_string().to_bytes();
        assert!(!long.starts_with(&short));
    }

    #[test]
    fn test_global_key_is_empty() {
        assert!(Global.to_bytes().is_empty());
        assert_eq!(Global.to_string(), "global");
    }
}
