//! RESP-protocol storage implementations
//!
//! The warm tier is a KeyDB instance, the cold tier a Kvrocks instance;
//! both speak the Redis protocol, so one connection layer serves both.
//! Monotone status updates go through server-side Lua so concurrent
//! writers cannot move a counter backwards.

pub mod archive_store;
pub mod tick_store;

pub use archive_store::RedisArchiveStore;
pub use tick_store::RedisTickStore;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::warn;

use crate::error::{StoreError, StoreResult};

/// Attempts before a connection is flagged degraded.
const MAX_STORE_RETRIES: u32 = 5;

/// First retry delay; doubles per attempt.
const INITIAL_BACKOFF: Duration = Duration::from_millis(50);

/// Shared connection with retry/backoff and a degraded flag.
///
/// Retries are capped and backed off exponentially; once exhausted, the
/// store is marked degraded and the error surfaces to the caller, which
/// must not advance any frontier on the strength of a failed write.
pub(crate) struct RedisHandle {
    conn: ConnectionManager,
    degraded: AtomicBool,
    label: &'static str,
}

impl RedisHandle {
    pub(crate) async fn connect(url: &str, label: &'static str) -> StoreResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            degraded: AtomicBool::new(false),
            label,
        })
    }

    pub(crate) fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    fn note_failure(&self, attempts: u32) {
        self.degraded.store(true, Ordering::Relaxed);
        warn!(store = self.label, attempts, "store degraded after repeated failures");
    }

    fn note_success(&self) {
        self.degraded.store(false, Ordering::Relaxed);
    }

    /// Run one command with retry/backoff. `run` receives a cloned
    /// multiplexed connection per attempt.
    pub(crate) async fn run<T, F>(&self, mut attempt_fn: F) -> StoreResult<T>
    where
        F: FnMut(ConnectionManager) -> redis::RedisFuture<'static, T>,
    {
        let mut delay = INITIAL_BACKOFF;
        let mut last: Option<redis::RedisError> = None;
        for _ in 0..MAX_STORE_RETRIES {
            match attempt_fn(self.conn.clone()).await {
                Ok(value) => {
                    self.note_success();
                    return Ok(value);
                }
                Err(err) => {
                    last = Some(err);
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
        self.note_failure(MAX_STORE_RETRIES);
        match last {
            Some(err) => Err(StoreError::Io(err)),
            None => Err(StoreError::Degraded(MAX_STORE_RETRIES)),
        }
    }

    pub(crate) async fn get_bytes(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let key = key.to_string();
        self.run(move |mut conn| {
            let key = key.clone();
            Box::pin(async move { conn.get(key).await })
        })
        .await
    }

    pub(crate) async fn set_bytes(&self, key: &str, value: Vec<u8>) -> StoreResult<()> {
        let key = key.to_string();
        self.run(move |mut conn| {
            let key = key.clone();
            let value = value.clone();
            Box::pin(async move { conn.set(key, value).await })
        })
        .await
    }

    /// First write wins; replays leave the stored value unchanged.
    pub(crate) async fn set_bytes_nx(&self, key: &str, value: Vec<u8>) -> StoreResult<()> {
        let key = key.to_string();
        self.run(move |mut conn| {
            let key = key.clone();
            let value = value.clone();
            Box::pin(async move {
                let _: bool = conn.set_nx(key, value).await?;
                Ok(())
            })
        })
        .await
    }

    pub(crate) async fn del(&self, keys: Vec<String>) -> StoreResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        self.run(move |mut conn| {
            let keys = keys.clone();
            Box::pin(async move { conn.del(keys).await })
        })
        .await
    }

    pub(crate) async fn exists(&self, key: &str) -> StoreResult<bool> {
        let key = key.to_string();
        self.run(move |mut conn| {
            let key = key.clone();
            Box::pin(async move { conn.exists(key).await })
        })
        .await
    }

    pub(crate) async fn sadd(&self, key: &str, member: String) -> StoreResult<()> {
        let key = key.to_string();
        self.run(move |mut conn| {
            let key = key.clone();
            let member = member.clone();
            Box::pin(async move {
                let _: i64 = conn.sadd(key, member).await?;
                Ok(())
            })
        })
        .await
    }

    pub(crate) async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        let key = key.to_string();
        self.run(move |mut conn| {
            let key = key.clone();
            Box::pin(async move { conn.smembers(key).await })
        })
        .await
    }

    pub(crate) async fn scard(&self, key: &str) -> StoreResult<usize> {
        let key = key.to_string();
        self.run(move |mut conn| {
            let key = key.clone();
            Box::pin(async move { conn.scard(key).await })
        })
        .await
    }

    pub(crate) async fn mget_bytes(&self, keys: Vec<String>) -> StoreResult<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        // MGET with a single key returns a scalar, so always batch >= 2.
        if keys.len() == 1 {
            return Ok(vec![self.get_bytes(&keys[0]).await?]);
        }
        self.run(move |mut conn| {
            let keys = keys.clone();
            Box::pin(async move { conn.get(keys).await })
        })
        .await
    }

    pub(crate) async fn hget_u64(&self, key: &str, field: &str) -> StoreResult<Option<u64>> {
        let key = key.to_string();
        let field = field.to_string();
        let raw: Option<String> = self
            .run(move |mut conn| {
                let key = key.clone();
                let field = field.clone();
                Box::pin(async move { conn.hget(key, field).await })
            })
            .await?;
        Ok(raw.and_then(|s| s.parse().ok()))
    }

    /// HSET `field = value` only when strictly greater than the stored
    /// value; optionally carries a companion field set in the same step.
    pub(crate) async fn hset_monotone(
        &self,
        key: &str,
        field: &str,
        value: u64,
        companion: Option<(&str, u64)>,
    ) -> StoreResult<()> {
        const SCRIPT: &str = r#"
local cur = tonumber(redis.call('HGET', KEYS[1], ARGV[1]) or '-1')
local new = tonumber(ARGV[2])
if new > cur then
  redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
  if ARGV[3] ~= '' then
    redis.call('HSET', KEYS[1], ARGV[3], ARGV[4])
  end
  return 1
end
return 0
"#;
        let script = redis::Script::new(SCRIPT);
        let key = key.to_string();
        let field = field.to_string();
        let (companion_field, companion_value) = companion
            .map(|(f, v)| (f.to_string(), v.to_string()))
            .unwrap_or_default();
        self.run(move |mut conn| {
            let script = script.clone();
            let key = key.clone();
            let field = field.clone();
            let companion_field = companion_field.clone();
            let companion_value = companion_value.clone();
            let value_str = value.to_string();
            Box::pin(async move {
                let _: i64 = script
                    .key(key)
                    .arg(field)
                    .arg(value_str)
                    .arg(companion_field)
                    .arg(companion_value)
                    .invoke_async(&mut conn)
                    .await?;
                Ok(())
            })
        })
        .await
    }
}
