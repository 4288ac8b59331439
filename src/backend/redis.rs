use super::{keys, Backend, Placement};
use crate::config::RedisConfig;
use crate::error::{BouncerError, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, RedisError, Script};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;

// All scripts address their keys positionally via KEYS[n], never by
// reconstructing a key name with string concatenation inside Lua. This
// keeps every related key under one hash tag, which is what makes these
// scripts valid on a Redis Cluster deployment (EVAL requires all touched
// keys to hash to the same slot).

const ID_ADD_SCRIPT: &str = r#"
local store_ids = KEYS[1]
local store_expiry = KEYS[2]
local queue_ids = KEYS[3]
local queue_expiry = KEYS[4]
local queue_pos = KEYS[5]
local capacity_key = KEYS[6]

local id = ARGV[1]
local now = tonumber(ARGV[2])
local validated = tonumber(ARGV[3])
local quarantine = tonumber(ARGV[4])

if redis.call('SISMEMBER', store_ids, id) == 1 then
    redis.call('HSET', store_expiry, id, now + validated)
    return 0
end

local cached = redis.call('HGET', queue_pos, id)
if cached then
    redis.call('HSET', queue_expiry, id, now + validated)
    return tonumber(cached)
end

local capacity = tonumber(redis.call('GET', capacity_key))
if capacity == nil then
    capacity = -1
end

if capacity < 0 then
    redis.call('SADD', store_ids, id)
    redis.call('HSET', store_expiry, id, now + validated)
    return 0
end

local qlen = redis.call('LLEN', queue_ids)
local slen = redis.call('SCARD', store_ids)

if qlen == 0 and slen < capacity then
    redis.call('SADD', store_ids, id)
    redis.call('HSET', store_expiry, id, now + validated)
    return 0
end

redis.call('RPUSH', queue_ids, id)
local position = qlen + 1
redis.call('HSET', queue_pos, id, position)
redis.call('HSET', queue_expiry, id, now + quarantine)
return position
"#;

// Same placement logic as id_add, but reports whether the id was newly
// added and wraps the result as {added, position} so the hot path gets
// both values in one round trip.
const ID_POSITION_SCRIPT: &str = r#"
local store_ids = KEYS[1]
local store_expiry = KEYS[2]
local queue_ids = KEYS[3]
local queue_expiry = KEYS[4]
local queue_pos = KEYS[5]
local capacity_key = KEYS[6]

local id = ARGV[1]
local now = tonumber(ARGV[2])
local validated = tonumber(ARGV[3])
local quarantine = tonumber(ARGV[4])

if redis.call('SISMEMBER', store_ids, id) == 1 then
    redis.call('HSET', store_expiry, id, now + validated)
    return {0, 0}
end

local cached = redis.call('HGET', queue_pos, id)
if cached then
    redis.call('HSET', queue_expiry, id, now + validated)
    return {0, tonumber(cached)}
end

local capacity = tonumber(redis.call('GET', capacity_key))
if capacity == nil then
    capacity = -1
end

if capacity < 0 then
    redis.call('SADD', store_ids, id)
    redis.call('HSET', store_expiry, id, now + validated)
    return {1, 0}
end

local qlen = redis.call('LLEN', queue_ids)
local slen = redis.call('SCARD', store_ids)

if qlen == 0 and slen < capacity then
    redis.call('SADD', store_ids, id)
    redis.call('HSET', store_expiry, id, now + validated)
    return {1, 0}
end

redis.call('RPUSH', queue_ids, id)
local position = qlen + 1
redis.call('HSET', queue_pos, id, position)
redis.call('HSET', queue_expiry, id, now + quarantine)
return {1, position}
"#;

const ID_REMOVE_SCRIPT: &str = r#"
local store_ids = KEYS[1]
local store_expiry = KEYS[2]
local queue_expiry = KEYS[3]

local id = ARGV[1]
local now = tonumber(ARGV[2])

if redis.call('HEXISTS', queue_expiry, id) == 1 then
    redis.call('HSET', queue_expiry, id, now - 1)
    return 1
end

redis.call('SREM', store_ids, id)
redis.call('HDEL', store_expiry, id)
return 1
"#;

const ID_PROMOTE_SCRIPT: &str = r#"
local store_ids = KEYS[1]
local store_expiry = KEYS[2]
local queue_ids = KEYS[3]
local queue_expiry = KEYS[4]
local queue_pos = KEYS[5]

local id = ARGV[1]
local now = tonumber(ARGV[2])
local validated = tonumber(ARGV[3])

redis.call('LREM', queue_ids, 1, id)
redis.call('HDEL', queue_pos, id)
redis.call('HDEL', queue_expiry, id)
redis.call('SADD', store_ids, id)
redis.call('HSET', store_expiry, id, now + validated)
return 1
"#;

// Shared drain loop for store_promote/store_promote_n: transfer is
// computed differently by each caller and passed in as ARGV[1].
const STORE_PROMOTE_SCRIPT: &str = r#"
local store_ids = KEYS[1]
local store_expiry = KEYS[2]
local queue_ids = KEYS[3]
local queue_expiry = KEYS[4]
local queue_pos = KEYS[5]
local capacity_key = KEYS[6]

local now = tonumber(ARGV[1])
local capacity = tonumber(redis.call('GET', capacity_key))
if capacity == nil then
    capacity = -1
end

local transfer
if capacity < 0 then
    transfer = redis.call('LLEN', queue_ids)
else
    local store_len = redis.call('SCARD', store_ids)
    transfer = capacity - store_len
    if transfer < 0 then
        transfer = 0
    end
end

local moved = 0
for _ = 1, transfer do
    local id = redis.call('LPOP', queue_ids)
    if not id then
        break
    end
    redis.call('HDEL', queue_pos, id)
    local expiry = redis.call('HGET', queue_expiry, id)
    redis.call('HDEL', queue_expiry, id)
    redis.call('SADD', store_ids, id)
    redis.call('HSET', store_expiry, id, expiry or now)
    moved = moved + 1
end

return moved
"#;

const STORE_PROMOTE_N_SCRIPT: &str = r#"
local store_ids = KEYS[1]
local store_expiry = KEYS[2]
local queue_ids = KEYS[3]
local queue_expiry = KEYS[4]
local queue_pos = KEYS[5]

local n = tonumber(ARGV[1])
local now = tonumber(ARGV[2])

local moved = 0
for _ = 1, n do
    local id = redis.call('LPOP', queue_ids)
    if not id then
        break
    end
    redis.call('HDEL', queue_pos, id)
    local expiry = redis.call('HGET', queue_expiry, id)
    redis.call('HDEL', queue_expiry, id)
    redis.call('SADD', store_ids, id)
    redis.call('HSET', store_expiry, id, expiry or now)
    moved = moved + 1
end

return moved
"#;

// The sole O(n) script; a running index offset recompacts the position
// cache in one pass instead of re-indexing on every removal.
const QUEUE_TIMEOUT_SCRIPT: &str = r#"
local queue_ids = KEYS[1]
local queue_expiry = KEYS[2]
local queue_pos = KEYS[3]

local now = tonumber(ARGV[1])

local all = redis.call('LRANGE', queue_ids, 0, -1)
local survivors = {}
local removed = 0

for _, id in ipairs(all) do
    local expiry = tonumber(redis.call('HGET', queue_expiry, id))
    if expiry == nil or expiry < now then
        redis.call('HDEL', queue_expiry, id)
        redis.call('HDEL', queue_pos, id)
        removed = removed + 1
    else
        table.insert(survivors, id)
    end
end

redis.call('DEL', queue_ids)

-- unpack(survivors) in one call would blow Lua's C stack once the queue
-- is large, which is exactly the condition this sweep exists to handle.
-- Push in bounded chunks instead.
local chunk_size = 1000
for chunk_start = 1, #survivors, chunk_size do
    local chunk_end = math.min(chunk_start + chunk_size - 1, #survivors)
    redis.call('RPUSH', queue_ids, unpack(survivors, chunk_start, chunk_end))
end

for i, id in ipairs(survivors) do
    redis.call('HSET', queue_pos, id, i)
end

return removed
"#;

const STORE_TIMEOUT_SCRIPT: &str = r#"
local store_ids = KEYS[1]
local store_expiry = KEYS[2]

local now = tonumber(ARGV[1])
local ids = redis.call('HKEYS', store_expiry)
local removed = 0

for _, id in ipairs(ids) do
    local expiry = tonumber(redis.call('HGET', store_expiry, id))
    if expiry ~= nil and expiry < now then
        redis.call('SREM', store_ids, id)
        redis.call('HDEL', store_expiry, id)
        removed = removed + 1
    end
end

return removed
"#;

// A missing container is a re-init signal distinct from "confirmed
// empty", so EXISTS == 0 on either side short-circuits to "has ids".
const HAS_IDS_SCRIPT: &str = r#"
local store_ids = KEYS[1]
local queue_ids = KEYS[2]

if redis.call('EXISTS', store_ids) == 0 or redis.call('EXISTS', queue_ids) == 0 then
    return 1
end

if redis.call('SCARD', store_ids) > 0 or redis.call('LLEN', queue_ids) > 0 then
    return 1
end

return 0
"#;

const CHECK_SYNC_KEYS_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1
    and redis.call('EXISTS', KEYS[2]) == 1
    and redis.call('EXISTS', KEYS[3]) == 1 then
    return 1
end
return 0
"#;

/// Distributed backend backed by Redis/Valkey server-side Lua scripts.
///
/// Every mutation travels as one `EVALSHA` round trip; script digests are
/// cached on [`RedisBackend::connect`] and reloaded automatically if the
/// backing store reports `NOSCRIPT` (a flush evicted the cache).
pub struct RedisBackend {
    conn: ConnectionManager,
    client: Client,
    prefix: String,
    events_tx: broadcast::Sender<String>,
    reloaded: AtomicBool,

    id_add: Script,
    id_position: Script,
    id_remove: Script,
    id_promote: Script,
    store_promote: Script,
    store_promote_n: Script,
    queue_timeout: Script,
    store_timeout: Script,
    has_ids: Script,
    check_sync_keys: Script,
}

impl RedisBackend {
    pub async fn connect(config: RedisConfig, prefix: &str) -> Result<Self> {
        let client = Self::build_client(&config)
            .map_err(|e| BouncerError::Transport(format!("invalid redis endpoint: {e}")))?;

        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| BouncerError::Transport(e.to_string()))?;

        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let backend = Self {
            conn,
            client: client.clone(),
            prefix: prefix.to_string(),
            events_tx,
            reloaded: AtomicBool::new(false),
            id_add: Script::new(ID_ADD_SCRIPT),
            id_position: Script::new(ID_POSITION_SCRIPT),
            id_remove: Script::new(ID_REMOVE_SCRIPT),
            id_promote: Script::new(ID_PROMOTE_SCRIPT),
            store_promote: Script::new(STORE_PROMOTE_SCRIPT),
            store_promote_n: Script::new(STORE_PROMOTE_N_SCRIPT),
            queue_timeout: Script::new(QUEUE_TIMEOUT_SCRIPT),
            store_timeout: Script::new(STORE_TIMEOUT_SCRIPT),
            has_ids: Script::new(HAS_IDS_SCRIPT),
            check_sync_keys: Script::new(CHECK_SYNC_KEYS_SCRIPT),
        };

        backend.start_pubsub_listener();

        debug!(prefix = %backend.prefix, "connected to redis backend");
        Ok(backend)
    }

    fn build_client(config: &RedisConfig) -> std::result::Result<Client, RedisError> {
        let endpoint = config.endpoints.first().cloned().unwrap_or_default();
        let mut url = endpoint;

        if !url.contains('@') {
            if let (Some(user), Some(pass)) = (&config.username, &config.password) {
                if let Some(pos) = url.find("://") {
                    let (scheme, rest) = url.split_at(pos + 3);
                    url = format!("{scheme}{user}:{pass}@{rest}");
                }
            } else if let Some(pass) = &config.password {
                if let Some(pos) = url.find("://") {
                    let (scheme, rest) = url.split_at(pos + 3);
                    url = format!("{scheme}:{pass}@{rest}");
                }
            }
        }

        if config.db != 0 && !url.contains(&format!("/{}", config.db)) {
            url = format!("{url}/{}", config.db);
        }

        Client::open(url.as_str())
    }

    fn start_pubsub_listener(&self) {
        let client = self.client.clone();
        let channel = keys::events(&self.prefix);
        let events_tx = self.events_tx.clone();

        tokio::spawn(async move {
            loop {
                match Self::run_pubsub_loop(&client, &channel, &events_tx).await {
                    Ok(()) => break,
                    Err(e) => {
                        error!(error = %e, "event pub/sub loop failed, reconnecting in 1s");
                        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    }
                }
            }
        });
    }

    async fn run_pubsub_loop(
        client: &Client,
        channel: &str,
        events_tx: &broadcast::Sender<String>,
    ) -> Result<()> {
        let mut pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| BouncerError::Transport(e.to_string()))?;

        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| BouncerError::Transport(e.to_string()))?;

        let mut stream = pubsub.into_on_message();

        use futures::StreamExt;
        while let Some(msg) = stream.next().await {
            match msg.get_payload::<String>() {
                Ok(payload) => {
                    let _ = events_tx.send(payload);
                }
                Err(e) => warn!(error = %e, "dropped malformed event payload"),
            }
        }

        Ok(())
    }

    fn key(&self, build: impl Fn(&str) -> String) -> String {
        build(&self.prefix)
    }

    /// Runs a script invocation built fresh by `build`, transparently
    /// reloading and retrying once on `NOSCRIPT` (the backing store was
    /// flushed and evicted the digest cache). `build` is called again on
    /// retry since a `ScriptInvocation` borrows the connection call and
    /// can't be replayed.
    async fn run<'s, T>(
        &self,
        script: &'s Script,
        build: impl Fn() -> redis::ScriptInvocation<'s>,
    ) -> Result<T>
    where
        T: redis::FromRedisValue,
    {
        let mut conn = self.conn.clone();
        match build().invoke_async(&mut conn).await {
            Ok(value) => Ok(value),
            Err(e) if e.kind() == redis::ErrorKind::NoScriptError => {
                self.reloaded.store(true, Ordering::Relaxed);
                script
                    .load_async(&mut conn)
                    .await
                    .map_err(|e| BouncerError::Transport(e.to_string()))?;
                build()
                    .invoke_async(&mut conn)
                    .await
                    .map_err(|_| BouncerError::ScriptMissing)
            }
            Err(e) => Err(BouncerError::Transport(e.to_string())),
        }
    }
}

#[async_trait]
impl Backend for RedisBackend {
    async fn id_add(
        &self,
        id: &str,
        now: i64,
        validated_expiry: i64,
        quarantine_expiry: i64,
    ) -> Result<u64> {
        if id.is_empty() {
            return Err(BouncerError::InvalidArgument("id must not be empty".into()));
        }
        let store_ids = self.key(keys::store_ids);
        let store_expiry = self.key(keys::store_expiry_secs);
        let queue_ids = self.key(keys::queue_ids);
        let queue_expiry = self.key(keys::queue_expiry_secs);
        let queue_pos = self.key(keys::queue_position_cache);
        let capacity_key = self.key(keys::store_capacity);

        self.run(&self.id_add, || {
            let mut invocation = self.id_add.prepare_invoke();
            invocation
                .key(&store_ids)
                .key(&store_expiry)
                .key(&queue_ids)
                .key(&queue_expiry)
                .key(&queue_pos)
                .key(&capacity_key)
                .arg(id)
                .arg(now)
                .arg(validated_expiry)
                .arg(quarantine_expiry);
            invocation
        })
        .await
    }

    async fn id_position(
        &self,
        id: &str,
        now: i64,
        validated_expiry: i64,
        quarantine_expiry: i64,
    ) -> Result<Placement> {
        if id.is_empty() {
            return Err(BouncerError::InvalidArgument("id must not be empty".into()));
        }
        let store_ids = self.key(keys::store_ids);
        let store_expiry = self.key(keys::store_expiry_secs);
        let queue_ids = self.key(keys::queue_ids);
        let queue_expiry = self.key(keys::queue_expiry_secs);
        let queue_pos = self.key(keys::queue_position_cache);
        let capacity_key = self.key(keys::store_capacity);

        let (added, position): (i64, u64) = self
            .run(&self.id_position, || {
                let mut invocation = self.id_position.prepare_invoke();
                invocation
                    .key(&store_ids)
                    .key(&store_expiry)
                    .key(&queue_ids)
                    .key(&queue_expiry)
                    .key(&queue_pos)
                    .key(&capacity_key)
                    .arg(id)
                    .arg(now)
                    .arg(validated_expiry)
                    .arg(quarantine_expiry);
                invocation
            })
            .await?;

        Ok(Placement {
            added: added == 1,
            position,
        })
    }

    async fn id_remove(&self, id: &str, now: i64) -> Result<()> {
        let store_ids = self.key(keys::store_ids);
        let store_expiry = self.key(keys::store_expiry_secs);
        let queue_expiry = self.key(keys::queue_expiry_secs);

        let _: i64 = self
            .run(&self.id_remove, || {
                let mut invocation = self.id_remove.prepare_invoke();
                invocation
                    .key(&store_ids)
                    .key(&store_expiry)
                    .key(&queue_expiry)
                    .arg(id)
                    .arg(now);
                invocation
            })
            .await?;
        Ok(())
    }

    async fn id_promote(&self, id: &str, now: i64, validated_expiry: i64) -> Result<()> {
        let store_ids = self.key(keys::store_ids);
        let store_expiry = self.key(keys::store_expiry_secs);
        let queue_ids = self.key(keys::queue_ids);
        let queue_expiry = self.key(keys::queue_expiry_secs);
        let queue_pos = self.key(keys::queue_position_cache);

        let _: i64 = self
            .run(&self.id_promote, || {
                let mut invocation = self.id_promote.prepare_invoke();
                invocation
                    .key(&store_ids)
                    .key(&store_expiry)
                    .key(&queue_ids)
                    .key(&queue_expiry)
                    .key(&queue_pos)
                    .arg(id)
                    .arg(now)
                    .arg(validated_expiry);
                invocation
            })
            .await?;
        Ok(())
    }

    async fn store_promote(&self, now: i64) -> Result<u64> {
        let store_ids = self.key(keys::store_ids);
        let store_expiry = self.key(keys::store_expiry_secs);
        let queue_ids = self.key(keys::queue_ids);
        let queue_expiry = self.key(keys::queue_expiry_secs);
        let queue_pos = self.key(keys::queue_position_cache);
        let capacity_key = self.key(keys::store_capacity);

        self.run(&self.store_promote, || {
            let mut invocation = self.store_promote.prepare_invoke();
            invocation
                .key(&store_ids)
                .key(&store_expiry)
                .key(&queue_ids)
                .key(&queue_expiry)
                .key(&queue_pos)
                .key(&capacity_key)
                .arg(now);
            invocation
        })
        .await
    }

    async fn store_promote_n(&self, n: u64, now: i64) -> Result<u64> {
        if n == 0 {
            return Ok(0);
        }
        let store_ids = self.key(keys::store_ids);
        let store_expiry = self.key(keys::store_expiry_secs);
        let queue_ids = self.key(keys::queue_ids);
        let queue_expiry = self.key(keys::queue_expiry_secs);
        let queue_pos = self.key(keys::queue_position_cache);

        self.run(&self.store_promote_n, || {
            let mut invocation = self.store_promote_n.prepare_invoke();
            invocation
                .key(&store_ids)
                .key(&store_expiry)
                .key(&queue_ids)
                .key(&queue_expiry)
                .key(&queue_pos)
                .arg(n)
                .arg(now);
            invocation
        })
        .await
    }

    async fn queue_timeout(&self, now: i64) -> Result<u64> {
        let queue_ids = self.key(keys::queue_ids);
        let queue_expiry = self.key(keys::queue_expiry_secs);
        let queue_pos = self.key(keys::queue_position_cache);

        self.run(&self.queue_timeout, || {
            let mut invocation = self.queue_timeout.prepare_invoke();
            invocation
                .key(&queue_ids)
                .key(&queue_expiry)
                .key(&queue_pos)
                .arg(now);
            invocation
        })
        .await
    }

    async fn store_timeout(&self, now: i64) -> Result<u64> {
        let store_ids = self.key(keys::store_ids);
        let store_expiry = self.key(keys::store_expiry_secs);

        self.run(&self.store_timeout, || {
            let mut invocation = self.store_timeout.prepare_invoke();
            invocation.key(&store_ids).key(&store_expiry).arg(now);
            invocation
        })
        .await
    }

    async fn has_ids(&self) -> Result<bool> {
        let store_ids = self.key(keys::store_ids);
        let queue_ids = self.key(keys::queue_ids);

        let result: i64 = self
            .run(&self.has_ids, || {
                let mut invocation = self.has_ids.prepare_invoke();
                invocation.key(&store_ids).key(&queue_ids);
                invocation
            })
            .await?;
        Ok(result == 1)
    }

    async fn check_sync_keys(&self) -> Result<bool> {
        let queue_enabled = self.key(keys::queue_enabled);
        let store_capacity = self.key(keys::store_capacity);
        let sync_timestamp = self.key(keys::queue_sync_timestamp);

        let result: i64 = self
            .run(&self.check_sync_keys, || {
                let mut invocation = self.check_sync_keys.prepare_invoke();
                invocation
                    .key(&queue_enabled)
                    .key(&store_capacity)
                    .key(&sync_timestamp);
                invocation
            })
            .await?;
        Ok(result == 1)
    }

    async fn seed_sync_keys(
        &self,
        now: i64,
        store_capacity: i64,
        queue_enabled: bool,
    ) -> Result<()> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(self.key(keys::store_capacity), store_capacity)
            .await
            .map_err(|e| BouncerError::Transport(e.to_string()))?;
        conn.set::<_, _, ()>(self.key(keys::queue_enabled), queue_enabled as i64)
            .await
            .map_err(|e| BouncerError::Transport(e.to_string()))?;
        conn.set::<_, _, ()>(self.key(keys::queue_sync_timestamp), now)
            .await
            .map_err(|e| BouncerError::Transport(e.to_string()))?;
        Ok(())
    }

    async fn queue_size(&self) -> Result<u64> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        conn.llen(self.key(keys::queue_ids))
            .await
            .map_err(|e| BouncerError::Transport(e.to_string()))
    }

    async fn store_size(&self) -> Result<u64> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        conn.scard(self.key(keys::store_ids))
            .await
            .map_err(|e| BouncerError::Transport(e.to_string()))
    }

    async fn store_capacity(&self) -> Result<i64> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        let raw: Option<i64> = conn
            .get(self.key(keys::store_capacity))
            .await
            .map_err(|e| BouncerError::Transport(e.to_string()))?;
        Ok(raw.unwrap_or(-1))
    }

    async fn set_store_capacity(&self, capacity: i64) -> Result<()> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(self.key(keys::store_capacity), capacity)
            .await
            .map_err(|e| BouncerError::Transport(e.to_string()))
    }

    async fn queue_enabled(&self) -> Result<bool> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        let raw: Option<i64> = conn
            .get(self.key(keys::queue_enabled))
            .await
            .map_err(|e| BouncerError::Transport(e.to_string()))?;
        Ok(raw.unwrap_or(1) != 0)
    }

    async fn set_queue_enabled(&self, enabled: bool) -> Result<()> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(self.key(keys::queue_enabled), enabled as i64)
            .await
            .map_err(|e| BouncerError::Transport(e.to_string()))
    }

    async fn queue_waiting_page(&self) -> Result<Option<String>> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        conn.get(self.key(keys::queue_waiting_page))
            .await
            .map_err(|e| BouncerError::Transport(e.to_string()))
    }

    async fn set_queue_waiting_page(&self, page: &str) -> Result<()> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(self.key(keys::queue_waiting_page), page)
            .await
            .map_err(|e| BouncerError::Transport(e.to_string()))
    }

    async fn queue_sync_timestamp(&self) -> Result<i64> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        let raw: Option<i64> = conn
            .get(self.key(keys::queue_sync_timestamp))
            .await
            .map_err(|e| BouncerError::Transport(e.to_string()))?;
        Ok(raw.unwrap_or(0))
    }

    async fn set_queue_sync_timestamp(&self, now: i64) -> Result<()> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(self.key(keys::queue_sync_timestamp), now)
            .await
            .map_err(|e| BouncerError::Transport(e.to_string()))
    }

    async fn publish(&self, event: &str) -> Result<()> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        let channel = self.key(keys::events);
        let _: i64 = conn
            .publish(channel, event)
            .await
            .map_err(|e| BouncerError::Transport(e.to_string()))?;
        Ok(())
    }

    async fn subscribe(&self) -> Result<broadcast::Receiver<String>> {
        Ok(self.events_tx.subscribe())
    }

    fn reloaded_scripts(&self) -> bool {
        self.reloaded.swap(false, Ordering::Relaxed)
    }
}
