//! Redis-compatible hot state operations.
//!
//! Redis holds everything that is shared between worker processes while a
//! simulation runs: the simulation record, the run claim, and the tick
//! queue. This module provides the typed primitives those components are
//! built from; the key patterns themselves live in `cascadex-engine`.
//!
//! # Key Patterns (consumed by the engine)
//!
//! | Pattern | Type | Description |
//! |---------|------|-------------|
//! | `sim:{graph_id}` | JSON | Live simulation record |
//! | `lock:sim:{graph_id}` | String + TTL | Run claim |
//! | `queue:ticks` | Sorted set | Pending tick jobs, score = ready-at ms |
//! | `queue:tick_attempts` | Hash | Per-graph failed-attempt counters |
//!
//! # Atomicity
//!
//! Two operations must be atomic with respect to concurrent workers and
//! use Lua scripts: the version compare-and-swap on a simulation record
//! ([`RedisPool::compare_and_swap_version`]) and the claim-one-due-job
//! queue pop ([`RedisPool::zpop_due`]).

use fred::prelude::*;
use fred::types::scan::Scanner;
use futures::TryStreamExt as _;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::DbError;

/// Compare-and-swap on the `version` field of a JSON record.
///
/// Returns `1` on swap, `-1` on version mismatch, `-2` when the key is
/// absent. The version comparison and the write happen atomically, so a
/// successful swap proves no other writer advanced the record in between.
const CAS_VERSION_SCRIPT: &str = r"
local current = redis.call('GET', KEYS[1])
if not current then
  return -2
end
local decoded = cjson.decode(current)
if decoded['version'] ~= tonumber(ARGV[1]) then
  return -1
end
redis.call('SET', KEYS[1], ARGV[2])
return 1
";

/// Atomically pop at most one sorted-set member whose score is due.
///
/// The range read and the removal happen in one script so two workers
/// polling concurrently never receive the same member.
const ZPOP_DUE_SCRIPT: &str = r"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 1)
if #due == 0 then
  return false
end
redis.call('ZREM', KEYS[1], due[1])
return due[1]
";

/// Outcome of a version compare-and-swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The stored version matched and the new value was written.
    Swapped,
    /// Another writer advanced the record first; nothing was written.
    VersionMismatch,
    /// The key no longer exists (the run was stopped).
    Missing,
}

/// Connection handle to a Redis-compatible instance.
///
/// Wraps a [`fred::prelude::Client`] and provides the typed operations
/// the engine's shared-state components are built on.
#[derive(Clone)]
pub struct RedisPool {
    client: Client,
}

impl RedisPool {
    /// Connect to Redis at the given URL.
    ///
    /// The URL should follow the Redis URL scheme:
    /// `redis://host:port` or `redis://host:port/db`
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Config`] if the URL cannot be parsed.
    /// Returns [`DbError::Redis`] if the connection fails.
    pub async fn connect(url: &str) -> Result<Self, DbError> {
        let config =
            Config::from_url(url).map_err(|e| DbError::Config(format!("Invalid Redis URL: {e}")))?;

        let client = Builder::from_config(config).build()?;
        client.init().await?;

        tracing::info!("Connected to Redis");
        Ok(Self { client })
    }

    // =========================================================================
    // Generic JSON get/set/delete
    // =========================================================================

    /// Serialize `value` as JSON and store it at `key`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Serialization`] if serialization fails.
    /// Returns [`DbError::Redis`] if the write fails.
    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), DbError> {
        let json = serde_json::to_string(value)?;
        let _: () = self.client.set(key, json.as_str(), None, None, false).await?;
        Ok(())
    }

    /// Read the value at `key` and deserialize from JSON.
    ///
    /// Returns `None` when the key does not exist -- for simulation
    /// records a missing key is normal control flow (the run was
    /// stopped), not an error.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Serialization`] if deserialization fails.
    /// Returns [`DbError::Redis`] if the read fails.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, DbError> {
        let value: Option<String> = self.client.get(key).await?;
        match value {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    /// Delete a key. Returns `true` if the key existed.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Redis`] if the delete fails.
    pub async fn delete(&self, key: &str) -> Result<bool, DbError> {
        let removed: u32 = self.client.del(key).await?;
        Ok(removed > 0)
    }

    // =========================================================================
    // Claims -- set-if-absent with expiry, renew, release
    // =========================================================================

    /// Set `key` to `value` with a TTL, only if the key does not exist.
    ///
    /// Returns `true` when the key was created (the claim is ours).
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Redis`] if the write fails.
    pub async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: i64) -> Result<bool, DbError> {
        let result: Option<String> = self
            .client
            .set(
                key,
                value,
                Some(Expiration::EX(ttl_secs)),
                Some(SetOptions::NX),
                false,
            )
            .await?;
        Ok(result.is_some())
    }

    /// Reset the TTL on an existing key.
    ///
    /// Returns `false` when the key is absent (expired or deleted), in
    /// which case no expiry was applied.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Redis`] if the command fails.
    pub async fn expire(&self, key: &str, ttl_secs: i64) -> Result<bool, DbError> {
        let applied: bool = self.client.expire(key, ttl_secs, None).await?;
        Ok(applied)
    }

    // =========================================================================
    // Optimistic concurrency -- version compare-and-swap
    // =========================================================================

    /// Atomically replace the JSON record at `key` if its stored
    /// `version` field equals `expected_version`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Redis`] if the script execution fails.
    pub async fn compare_and_swap_version(
        &self,
        key: &str,
        expected_version: u64,
        new_json: &str,
    ) -> Result<CasOutcome, DbError> {
        let result: i64 = self
            .client
            .eval(
                CAS_VERSION_SCRIPT,
                vec![key.to_owned()],
                vec![expected_version.to_string(), new_json.to_owned()],
            )
            .await?;

        Ok(match result {
            1 => CasOutcome::Swapped,
            -2 => CasOutcome::Missing,
            _ => CasOutcome::VersionMismatch,
        })
    }

    // =========================================================================
    // Sorted-set queue primitives
    // =========================================================================

    /// Add `member` to the sorted set at `key` with the given score,
    /// only if it is not already present (NX).
    ///
    /// Returns `true` when the member was added; `false` means a job for
    /// this member is already pending and the call was a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Redis`] if the write fails.
    pub async fn zadd_if_absent(
        &self,
        key: &str,
        member: &str,
        score: f64,
    ) -> Result<bool, DbError> {
        let added: i64 = self
            .client
            .zadd(key, Some(SetOptions::NX), None, false, false, (score, member))
            .await?;
        Ok(added > 0)
    }

    /// Remove `member` from the sorted set at `key`.
    ///
    /// Returns `true` if the member was present.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Redis`] if the command fails.
    pub async fn zrem(&self, key: &str, member: &str) -> Result<bool, DbError> {
        let removed: u64 = self.client.zrem(key, member).await?;
        Ok(removed > 0)
    }

    /// Atomically claim one member of the sorted set at `key` whose
    /// score is at most `max_score`, removing it in the same operation.
    ///
    /// Returns `None` when no member is due.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Redis`] if the script execution fails.
    pub async fn zpop_due(&self, key: &str, max_score: f64) -> Result<Option<String>, DbError> {
        let member: Option<String> = self
            .client
            .eval(
                ZPOP_DUE_SCRIPT,
                vec![key.to_owned()],
                vec![max_score.to_string()],
            )
            .await?;
        Ok(member)
    }

    // =========================================================================
    // Hash counters (retry attempt bookkeeping)
    // =========================================================================

    /// Increment the counter at `field` in the hash at `key` and return
    /// the new value.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Redis`] if the command fails.
    pub async fn hash_incr(&self, key: &str, field: &str) -> Result<i64, DbError> {
        let count: i64 = self.client.hincrby(key, field, 1).await?;
        Ok(count)
    }

    /// Remove `field` from the hash at `key`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Redis`] if the command fails.
    pub async fn hash_clear(&self, key: &str, field: &str) -> Result<(), DbError> {
        let _: u64 = self.client.hdel(key, field).await?;
        Ok(())
    }

    // =========================================================================
    // Key enumeration (recovery sweep)
    // =========================================================================

    /// Collect all keys matching `pattern` via SCAN.
    ///
    /// Used by the recovery sweep to enumerate live simulation records
    /// after a process restart. SCAN is cursor-based, so this is safe on
    /// a shared instance where KEYS would not be.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Redis`] if any scan page fails.
    pub async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, DbError> {
        let mut keys = Vec::new();
        let mut stream = self.client.scan(pattern, Some(100), None);

        while let Some(mut page) = stream.try_next().await? {
            if let Some(page_keys) = page.take_results() {
                for key in page_keys {
                    if let Some(s) = key.as_str() {
                        keys.push(s.to_owned());
                    }
                }
            }
            let _ = page.next();
        }

        Ok(keys)
    }

    /// Flush all keys from the Redis instance.
    ///
    /// **WARNING:** This deletes all data. Only use for testing.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Redis`] if the flush fails.
    pub async fn flush_all(&self) -> Result<(), DbError> {
        let _: () = self.client.flushall(false).await?;
        Ok(())
    }

    /// Return a reference to the underlying [`Client`].
    pub const fn client(&self) -> &Client {
        &self.client
    }
}
