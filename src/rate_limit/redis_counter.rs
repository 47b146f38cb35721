use std::time::Duration;

use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, Client, RedisError, Script};
use tokio::sync::Mutex;
use tracing::info;

use super::{CounterError, CounterStore, WindowCount};

// INCR and the first-hit EXPIRE run as one script so no request can observe a counter
// without a window. A key left without a TTL gets one instead of living forever.
const HIT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
  ttl = tonumber(ARGV[1])
end
return {count, ttl}
"#;

/// Redis-backed counters, shared by every instance of the service.
pub struct RedisCounterStore {
    client: Client,
    connection: Mutex<Option<MultiplexedConnection>>,
    script: Script,
}

impl RedisCounterStore {
    /// Parses the URL only; the connection is opened on first use so that a Redis
    /// outage at startup degrades to an open limiter instead of a failed boot.
    pub fn new(redis_url: &str) -> Result<Self, RedisError> {
        let client = Client::open(redis_url)?;
        info!("Rate limiter using Redis counter store");
        Ok(Self {
            client,
            connection: Mutex::new(None),
            script: Script::new(HIT_SCRIPT),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, RedisError> {
        let mut cached = self.connection.lock().await;
        if let Some(conn) = cached.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self.client.get_multiplexed_async_connection().await?;
        *cached = Some(conn.clone());
        Ok(conn)
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn hit(&self, key: &str, window: Duration) -> Result<WindowCount, CounterError> {
        let mut conn = self.connection().await?;
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);

        let result: Result<(u64, i64), RedisError> = self
            .script
            .key(key)
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await;

        match result {
            Ok((count, ttl_ms)) => Ok(WindowCount {
                count,
                resets_in: Duration::from_millis(ttl_ms.max(0) as u64),
            }),
            Err(e) => {
                // Drop the cached connection so the next hit reconnects
                *self.connection.lock().await = None;
                Err(e.into())
            }
        }
    }
}
