use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::debug;

use super::{RecordStore, StoreError, SwapOutcome};

// KEYS[1] = record key, KEYS[2] = collection index; ARGV[1] = id, ARGV[2] = value
const INSERT_SCRIPT: &str = r#"
if redis.call('SET', KEYS[1], ARGV[2], 'NX') then
  redis.call('SADD', KEYS[2], ARGV[1])
  return 1
end
return 0
"#;

// KEYS[1] = record key; ARGV[1] = expected, ARGV[2] = replacement
// 1 = swapped, 0 = stale, -1 = missing
const SWAP_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
  return -1
end
if current ~= ARGV[1] then
  return 0
end
redis.call('SET', KEYS[1], ARGV[2])
return 1
"#;

/// Redis-backed record store.
///
/// Records live at `{prefix}:{collection}:{id}` and each collection keeps a set
/// of its ids at `{prefix}:{collection}:index`. Inserts and swaps run as Lua
/// scripts so the check and the write happen in one server-side step.
pub struct RedisRecordStore {
    client: redis::Client,
    key_prefix: String,
    insert_script: redis::Script,
    swap_script: redis::Script,
}

impl RedisRecordStore {
    pub fn new(connection_url: &str, key_prefix: impl Into<String>) -> Result<Self, StoreError> {
        let client = redis::Client::open(connection_url)
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            key_prefix: key_prefix.into(),
            insert_script: redis::Script::new(INSERT_SCRIPT),
            swap_script: redis::Script::new(SWAP_SCRIPT),
        })
    }

    fn record_key(&self, collection: &str, id: &str) -> String {
        format!("{}:{}:{}", self.key_prefix, collection, id)
    }

    fn index_key(&self, collection: &str) -> String {
        format!("{}:{}:index", self.key_prefix, collection)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, StoreError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))
    }
}

#[async_trait]
impl RecordStore for RedisRecordStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection().await?;
        let payload: Option<String> = conn
            .get(self.record_key(collection, id))
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(payload)
    }

    async fn list(&self, collection: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.connection().await?;
        let ids: Vec<String> = conn
            .smembers(self.index_key(collection))
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids
            .iter()
            .map(|id| self.record_key(collection, id))
            .collect();
        let payloads: Vec<Option<String>> = conn
            .mget(keys)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(payloads.into_iter().flatten().collect())
    }

    async fn insert(&self, collection: &str, id: &str, value: String) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let inserted: i64 = self
            .insert_script
            .key(self.record_key(collection, id))
            .key(self.index_key(collection))
            .arg(id)
            .arg(value)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        debug!(collection, id, inserted, "Redis insert");
        Ok(inserted == 1)
    }

    async fn compare_and_swap(
        &self,
        collection: &str,
        id: &str,
        expected: &str,
        value: String,
    ) -> Result<SwapOutcome, StoreError> {
        let mut conn = self.connection().await?;
        let outcome: i64 = self
            .swap_script
            .key(self.record_key(collection, id))
            .arg(expected)
            .arg(value)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        debug!(collection, id, outcome, "Redis compare-and-swap");
        match outcome {
            1 => Ok(SwapOutcome::Swapped),
            0 => Ok(SwapOutcome::Stale),
            -1 => Ok(SwapOutcome::Missing),
            other => Err(StoreError::Internal(format!(
                "unexpected compare-and-swap reply {other}"
            ))),
        }
    }
}
