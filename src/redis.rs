use crate::error::StoreError;
use crate::store::{BucketStore, DurableRecord};
use redis::{Client, Connection, RedisResult};
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

const DEFAULT_IO_TIMEOUT: Duration = Duration::from_millis(250);

/// Bucket store backed by Redis.
///
/// Records are JSON strings written with `SET .. EX`, so Redis reclaims
/// abandoned keys without any help from the service.
pub struct RedisBucketStore {
    client: Client,
    connection: Mutex<Option<Connection>>,
    io_timeout: Duration,
}

impl fmt::Debug for RedisBucketStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisBucketStore")
            .field("client", &self.client)
            .field("io_timeout", &self.io_timeout)
            .finish_non_exhaustive()
    }
}

impl RedisBucketStore {
    pub fn new(redis_url: &str) -> Result<Self, StoreError> {
        Self::with_timeout(redis_url, DEFAULT_IO_TIMEOUT)
    }

    pub fn with_timeout(redis_url: &str, io_timeout: Duration) -> Result<Self, StoreError> {
        let client = Client::open(redis_url)
            .map_err(|e| StoreError::Unavailable(format!("Failed to create Redis client: {}", e)))?;

        Ok(Self {
            client,
            connection: Mutex::new(None),
            io_timeout,
        })
    }

    fn connect(&self) -> RedisResult<Connection> {
        let conn = self.client.get_connection_with_timeout(self.io_timeout)?;
        conn.set_read_timeout(Some(self.io_timeout))?;
        conn.set_write_timeout(Some(self.io_timeout))?;
        Ok(conn)
    }

    /// Run `op` on the shared connection, connecting on demand. A failed
    /// command drops the connection so the next call reconnects.
    fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> RedisResult<T>,
    ) -> Result<T, StoreError> {
        let mut guard = self.connection.lock().map_err(|_| StoreError::Poisoned)?;

        if guard.is_none() {
            debug!("Opening Redis connection");
            *guard = Some(self.connect()?);
        }
        let conn = guard
            .as_mut()
            .ok_or_else(|| StoreError::Unavailable("No Redis connection available".into()))?;

        match op(conn) {
            Ok(value) => Ok(value),
            Err(e) => {
                if e.is_connection_dropped() || e.is_io_error() || e.is_timeout() {
                    *guard = None;
                }
                Err(StoreError::Redis(e))
            }
        }
    }
}

/// `EX` argument for `ttl`, at least one second so Redis accepts it.
fn expiry_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

impl BucketStore for RedisBucketStore {
    fn provision(&self) -> Result<(), StoreError> {
        // Redis has no schema; expiry is set per record on write.
        self.ping()?;
        info!("Redis bucket store reachable");
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<DurableRecord>, StoreError> {
        let raw: Option<String> = self.with_connection(|conn| redis::cmd("GET").arg(key).query(conn))?;
        match raw {
            Some(raw) => match DurableRecord::from_json(&raw) {
                Ok(record) => Ok(Some(record)),
                Err(e) => {
                    warn!(key = %key, error = %e, "Ignoring malformed bucket record");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    fn save(&self, key: &str, record: &DurableRecord, ttl: Duration) -> Result<(), StoreError> {
        let value = record.to_json()?;
        let ttl = expiry_seconds(ttl);

        self.with_connection(|conn| {
            redis::cmd("SET")
                .arg(key)
                .arg(&value)
                .arg("EX")
                .arg(ttl)
                .query::<()>(conn)
        })
    }

    fn ping(&self) -> Result<(), StoreError> {
        let reply: String = self.with_connection(|conn| redis::cmd("PING").query(conn))?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(StoreError::Unavailable(format!("Unexpected PING reply: {}", reply)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_seconds() {
        assert_eq!(expiry_seconds(Duration::from_secs(3600)), 3600);
        assert_eq!(expiry_seconds(Duration::from_millis(1_500)), 1);
        assert_eq!(expiry_seconds(Duration::ZERO), 1);
    }

    #[test]
    fn test_rejects_invalid_url() {
        assert!(RedisBucketStore::new("not a url").is_err());
    }

    #[test]
    fn test_client_creation_is_lazy() {
        // Opening a client does not connect, so an unreachable host is fine here.
        assert!(RedisBucketStore::new("redis://127.0.0.1:1").is_ok());
    }
}
