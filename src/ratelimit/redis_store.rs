//! Redis-backed sliding-window store shared by every process.
//!
//! Each identity is a sorted set scored by admission time. Pruning, counting,
//! the conditional insert and the expiry refresh run inside one Lua script,
//! so concurrent checks from any number of processes never over-admit.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use tracing::{debug, info};
use uuid::Uuid;

use super::store::{StoreError, WindowSnapshot, WindowStore};

/// Seconds added to the window when refreshing a key's expiry.
const EXPIRY_SLACK_SECS: u64 = 10;

/// KEYS[1] = window key
/// ARGV = now, window_secs, limit, member, ttl_secs
/// Returns {allowed, count_before, oldest_score_or_empty}
const ADMIT_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])

redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)
local count = redis.call('ZCARD', key)
local allowed = 0
if count < limit then
    redis.call('ZADD', key, now, ARGV[4])
    allowed = 1
end
redis.call('EXPIRE', key, tonumber(ARGV[5]))

local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
local oldest_score = ''
if oldest[2] then
    oldest_score = oldest[2]
end
return {allowed, count, oldest_score}
"#;

/// KEYS[1] = window key
/// ARGV = now, window_secs
/// Returns {count, oldest_score_or_empty}
const USAGE_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])

redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)
local count = redis.call('ZCARD', key)
local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
local oldest_score = ''
if oldest[2] then
    oldest_score = oldest[2]
end
return {count, oldest_score}
"#;

/// Sliding-window store on a Redis connection manager.
#[derive(Clone)]
pub struct RedisWindowStore {
    connection: ConnectionManager,
    key_prefix: String,
    admit_script: Script,
    usage_script: Script,
}

impl std::fmt::Debug for RedisWindowStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisWindowStore")
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

impl RedisWindowStore {
    /// Open a managed connection to `url` and verify it with a PING.
    pub async fn connect(url: &str, key_prefix: impl Into<String>) -> Result<Self, StoreError> {
        let client = Client::open(url)?;
        let mut connection = ConnectionManager::new(client).await?;

        let pong: String = redis::cmd("PING").query_async(&mut connection).await?;
        debug!(reply = %pong, "Shared store answered ping");

        let store = Self {
            connection,
            key_prefix: key_prefix.into(),
            admit_script: Script::new(ADMIT_SCRIPT),
            usage_script: Script::new(USAGE_SCRIPT),
        };
        info!(key_prefix = %store.key_prefix, "Connected to shared rate limit store");
        Ok(store)
    }

    fn window_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }
}

fn parse_score(raw: &str) -> Result<Option<f64>, StoreError> {
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<f64>()
        .map(Some)
        .map_err(|_| StoreError::InvalidReply(format!("non-numeric score {raw:?}")))
}

fn expiry_secs(window: Duration) -> u64 {
    window.as_secs_f64().ceil() as u64 + EXPIRY_SLACK_SECS
}

#[async_trait]
impl WindowStore for RedisWindowStore {
    async fn admit(
        &self,
        key: &str,
        now: f64,
        limit: u64,
        window: Duration,
    ) -> Result<WindowSnapshot, StoreError> {
        let mut connection = self.connection.clone();
        let member = format!("{now:.6}-{}", Uuid::new_v4());

        let (allowed, count, oldest): (i64, u64, String) = self
            .admit_script
            .key(self.window_key(key))
            .arg(now)
            .arg(window.as_secs_f64())
            .arg(limit)
            .arg(member)
            .arg(expiry_secs(window))
            .invoke_async(&mut connection)
            .await?;

        Ok(WindowSnapshot {
            allowed: allowed == 1,
            count,
            oldest: parse_score(&oldest)?,
        })
    }

    async fn usage(&self, key: &str, now: f64, window: Duration) -> Result<WindowSnapshot, StoreError> {
        let mut connection = self.connection.clone();

        let (count, oldest): (u64, String) = self
            .usage_script
            .key(self.window_key(key))
            .arg(now)
            .arg(window.as_secs_f64())
            .invoke_async(&mut connection)
            .await?;

        Ok(WindowSnapshot {
            allowed: false,
            count,
            oldest: parse_score(&oldest)?,
        })
    }

    async fn clear(&self, key: &str) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        let _: () = connection.del(self.window_key(key)).await?;
        Ok(())
    }
}
