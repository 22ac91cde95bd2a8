//! Redis-backed atomic store. Every operation is a single Lua script, so
//! the check and the write it guards run as one step on the server.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, Script};

use bulwark_core::StoreError;
use bulwark_core::ports::{
    AdmitRequest, AdmitVerdict, AtomicStore, ConsumeRequest, ConsumeVerdict, CostCheckRequest,
    CostRecordRequest, CostVerdict, IssueRequest, IssueVerdict, LedgerQuery, LedgerTotals,
    StrikeRequest,
};

/// Redis connection configuration.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis URL (e.g., redis://localhost:6379)
    pub url: String,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Whether to fall back to the in-memory store if Redis is unavailable
    pub fallback_to_memory: bool,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            connect_timeout: Duration::from_secs(5),
            fallback_to_memory: true,
        }
    }
}

impl RedisConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            connect_timeout: Duration::from_secs(
                std::env::var("REDIS_CONNECT_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
            ),
            fallback_to_memory: std::env::var("REDIS_FALLBACK_TO_MEMORY")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
        }
    }
}

/// Open a managed connection, bounded by the configured timeout.
pub async fn connect(config: &RedisConfig) -> Result<ConnectionManager, StoreError> {
    let client =
        Client::open(config.url.as_str()).map_err(|e| StoreError::Connection(e.to_string()))?;

    // Use timeout to prevent hanging if Redis is unreachable
    let conn_manager_fut = ConnectionManager::new(client);
    tokio::time::timeout(config.connect_timeout, conn_manager_fut)
        .await
        .map_err(|_| StoreError::Connection("Connection timed out".to_string()))?
        .map_err(|e| StoreError::Connection(e.to_string()))
}

fn store_error(e: RedisError) -> StoreError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
    {
        StoreError::Connection(e.to_string())
    } else {
        StoreError::Script(e.to_string())
    }
}

/// TTL argument in whole milliseconds. PEXPIRE and SET PX reject zero.
fn millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

fn parse<T: std::str::FromStr>(reply: &[String], index: usize) -> Result<T, StoreError> {
    reply
        .get(index)
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| StoreError::Protocol(format!("unexpected script reply: {reply:?}")))
}

/// Script replies carry sums as Lua numbers, which may print in exponent form.
fn parse_micros(reply: &[String], index: usize) -> Result<i64, StoreError> {
    parse::<f64>(reply, index).map(|v| v as i64)
}

// KEYS: one sorted set per window.
// ARGV: now, member, dedup flag, then (floor, limit, ttl_ms) per window.
const ADMIT_LUA: &str = r#"
local member = ARGV[2]
local dedup = ARGV[3] == '1'
local counts = {}
local present = {}

for i = 1, #KEYS do
    redis.call('ZREMRANGEBYSCORE', KEYS[i], '-inf', '(' .. ARGV[3 * i + 1])
    counts[i] = redis.call('ZCARD', KEYS[i])
    present[i] = dedup and redis.call('ZSCORE', KEYS[i], member) ~= false
end

for i = 1, #KEYS do
    local limit = tonumber(ARGV[3 * i + 2])
    if not present[i] and counts[i] >= limit then
        local oldest = redis.call('ZRANGE', KEYS[i], 0, 0, 'WITHSCORES')
        return {'0', tostring(i), tostring(counts[i]), oldest[2] or '', '0'}
    end
end

local duplicate = #KEYS > 0
for i = 1, #KEYS do
    redis.call('ZADD', KEYS[i], ARGV[1], member)
    redis.call('PEXPIRE', KEYS[i], ARGV[3 * i + 3])
    if not present[i] then
        duplicate = false
    end
end

local first = counts[1] or 0
if #KEYS > 0 and not present[1] then
    first = first + 1
end
return {'1', '0', tostring(first), '', duplicate and '1' or '0'}
"#;

// KEYS: strikes, level, ban.
// ARGV: threshold, tracking_ms, base_ms, max_ms, decay_ms.
// Returns -1 while under the threshold, otherwise the ban in ms.
const STRIKE_LUA: &str = r#"
local strikes = redis.call('INCR', KEYS[1])
if strikes == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
if strikes < tonumber(ARGV[1]) then
    return -1
end

redis.call('DEL', KEYS[1])
local level = redis.call('INCR', KEYS[2])
redis.call('PEXPIRE', KEYS[2], ARGV[5])

local ban = tonumber(ARGV[3]) * (2 ^ math.min(level - 1, 31))
ban = math.floor(math.min(ban, tonumber(ARGV[4])))
if ban > 0 then
    redis.call('SET', KEYS[3], level, 'PX', ban)
end
return ban
"#;

// Sum of cost receipts; members end in ':<usd>', malformed ones count zero.
const COST_TOTAL_LUA: &str = r#"
local function cost_total(members)
    local sum = 0
    for _, m in ipairs(members) do
        local cost = tonumber(string.match(m, ':([^:]*)$'))
        if cost and cost == cost and cost >= 0 and cost < math.huge then
            sum = sum + math.floor(cost * 1000000 + 0.5)
        end
    end
    return sum
end
"#;

// KEYS: throttle, burst, day.
// ARGV: now, member, estimate, burst floor, day floor, burst limit,
//       daily limit, throttle_ms, burst_ttl_ms, day_ttl_ms.
const COST_CHECK_LUA: &str = r#"
local remaining = redis.call('PTTL', KEYS[1])
if remaining > 0 then
    local marker = redis.call('GET', KEYS[1])
    return {'throttled', marker or '', tostring(remaining)}
end

redis.call('ZREMRANGEBYSCORE', KEYS[2], '-inf', '(' .. ARGV[4])
redis.call('ZREMRANGEBYSCORE', KEYS[3], '-inf', '(' .. ARGV[5])

local estimate = tonumber(ARGV[3])
local burst = cost_total(redis.call('ZRANGE', KEYS[2], 0, -1))
local day = cost_total(redis.call('ZRANGE', KEYS[3], 0, -1))
local throttle = tonumber(ARGV[8])

local daily_limit = tonumber(ARGV[7])
if daily_limit > 0 and day + estimate > daily_limit then
    redis.call('SET', KEYS[1], 'daily_limit', 'PX', throttle * 2)
    return {'daily_limit', '', tostring(throttle * 2)}
end

local burst_limit = tonumber(ARGV[6])
if burst_limit > 0 and burst + estimate > burst_limit then
    redis.call('SET', KEYS[1], 'burst', 'PX', throttle)
    return {'burst', '', tostring(throttle)}
end

local added = estimate
if redis.call('ZSCORE', KEYS[2], ARGV[2]) or redis.call('ZSCORE', KEYS[3], ARGV[2]) then
    added = 0
end
redis.call('ZADD', KEYS[2], ARGV[1], ARGV[2])
redis.call('PEXPIRE', KEYS[2], ARGV[9])
redis.call('ZADD', KEYS[3], ARGV[1], ARGV[2])
redis.call('PEXPIRE', KEYS[3], ARGV[10])

return {'allowed', tostring(burst + added), tostring(day + added)}
"#;

// KEYS: burst, day. ARGV: now, replaced member or '', member, burst_ttl_ms, day_ttl_ms.
const RECORD_LUA: &str = r#"
for i = 1, 2 do
    if ARGV[2] ~= '' then
        redis.call('ZREM', KEYS[i], ARGV[2])
    end
    redis.call('ZADD', KEYS[i], ARGV[1], ARGV[3])
    redis.call('PEXPIRE', KEYS[i], ARGV[3 + i])
end
return 1
"#;

// KEYS: throttle, burst, day. ARGV: burst_since, day_start.
const LEDGER_LUA: &str = r#"
local burst = cost_total(redis.call('ZRANGEBYSCORE', KEYS[2], ARGV[1], '+inf'))
local day = cost_total(redis.call('ZRANGEBYSCORE', KEYS[3], ARGV[2], '+inf'))
return {tostring(burst), tostring(day), tostring(redis.call('PTTL', KEYS[1]))}
"#;

// KEYS: marker, index, candidate record.
// ARGV: now, owner, candidate id, record prefix, ttl_secs, cooldown_secs,
//       reuse window, record_ttl_ms, cooldown_ms, max_active.
const ISSUE_LUA: &str = r#"
local now = tonumber(ARGV[1])
local ttl = tonumber(ARGV[5])
redis.call('ZREMRANGEBYSCORE', KEYS[2], '-inf', ARGV[1])

local last = tonumber(redis.call('GET', KEYS[1]) or '')
if last then
    local elapsed = now - last
    local cooldown = tonumber(ARGV[6])
    if elapsed < cooldown then
        local newest = redis.call('ZREVRANGE', KEYS[2], 0, 0)
        if newest[1] then
            local record = ARGV[4] .. newest[1]
            local created = tonumber(redis.call('HGET', record, 'created_at') or '')
            if created and now - created <= tonumber(ARGV[7]) then
                local expires_at = tostring(now + ttl)
                redis.call('HSET', record, 'expires_at', expires_at)
                redis.call('PEXPIRE', record, ARGV[8])
                redis.call('ZADD', KEYS[2], expires_at, newest[1])
                redis.call('PEXPIRE', KEYS[2], ARGV[8])
                return {'reused', newest[1]}
            end
        end
        return {'cooling_down', tostring(cooldown - elapsed)}
    end
end

local expires_at = tostring(now + ttl)
redis.call('HSET', KEYS[3], 'owner', ARGV[2], 'created_at', ARGV[1], 'expires_at', expires_at)
redis.call('PEXPIRE', KEYS[3], ARGV[8])
redis.call('ZADD', KEYS[2], expires_at, ARGV[3])

local excess = redis.call('ZCARD', KEYS[2]) - tonumber(ARGV[10])
if excess > 0 then
    local stale = redis.call('ZRANGE', KEYS[2], 0, excess - 1)
    for _, id in ipairs(stale) do
        redis.call('DEL', ARGV[4] .. id)
    end
    redis.call('ZREMRANGEBYRANK', KEYS[2], 0, excess - 1)
end
redis.call('PEXPIRE', KEYS[2], ARGV[8])

if tonumber(ARGV[9]) > 0 then
    redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[9])
end
return {'issued', ARGV[3]}
"#;

// KEYS: record, index. ARGV: owner, now, challenge id, delete flag.
const CONSUME_LUA: &str = r#"
local record = redis.call('HMGET', KEYS[1], 'owner', 'expires_at')
if not record[1] then
    return 'missing'
end

if (tonumber(record[2]) or 0) <= tonumber(ARGV[2]) then
    redis.call('DEL', KEYS[1])
    redis.call('ZREM', KEYS[2], ARGV[3])
    return 'expired'
end

if record[1] ~= ARGV[1] then
    return 'mismatch'
end

if ARGV[4] ~= '1' then
    return 'valid'
end

redis.call('DEL', KEYS[1])
redis.call('ZREM', KEYS[2], ARGV[3])
return 'consumed'
"#;

struct Scripts {
    admit: Script,
    strike: Script,
    cost_check: Script,
    record: Script,
    ledger: Script,
    issue: Script,
    consume: Script,
}

impl Scripts {
    fn load() -> Self {
        Self {
            admit: Script::new(ADMIT_LUA),
            strike: Script::new(STRIKE_LUA),
            cost_check: Script::new(&format!("{COST_TOTAL_LUA}{COST_CHECK_LUA}")),
            record: Script::new(RECORD_LUA),
            ledger: Script::new(&format!("{COST_TOTAL_LUA}{LEDGER_LUA}")),
            issue: Script::new(ISSUE_LUA),
            consume: Script::new(CONSUME_LUA),
        }
    }
}

/// Redis-backed atomic store.
///
/// Uses connection manager for automatic reconnection. Scripts are sent by
/// SHA and reloaded transparently after a server restart.
///
/// Standalone Redis only. The issuance script reads and deletes challenge
/// records (`challenge:token:<id>`) that are not passed in `KEYS`, because
/// their ids are only known inside the script, and those keys do not share
/// a hash slot with the stable key's index. Redis Cluster rejects such
/// scripts.
pub struct RedisStore {
    conn: ConnectionManager,
    scripts: Scripts,
}

impl RedisStore {
    pub async fn new(config: RedisConfig) -> Result<Self, StoreError> {
        let conn = connect(&config).await?;
        tracing::info!(url = %config.url, "Connected to Redis store");

        Ok(Self {
            conn,
            scripts: Scripts::load(),
        })
    }

    /// Create from environment configuration.
    pub async fn from_env() -> Result<Self, StoreError> {
        Self::new(RedisConfig::from_env()).await
    }

    /// A handle on the shared connection, for components living next to
    /// the store.
    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

#[async_trait]
impl AtomicStore for RedisStore {
    async fn check_and_admit(&self, request: &AdmitRequest) -> Result<AdmitVerdict, StoreError> {
        let mut conn = self.conn.clone();
        let mut invocation = self.scripts.admit.prepare_invoke();
        invocation
            .arg(request.now)
            .arg(&request.member)
            .arg(if request.dedup { "1" } else { "0" });
        for window in &request.windows {
            let ttl = Duration::try_from_secs_f64(window.window_secs + request.ttl_margin_secs)
                .unwrap_or_default();
            invocation
                .key(&window.key)
                .arg(request.now - window.window_secs)
                .arg(window.limit)
                .arg(millis(ttl));
        }

        let reply: Vec<String> = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;

        let allowed = reply.first().is_some_and(|v| v == "1");
        let window: usize = parse(&reply, 1)?;
        Ok(AdmitVerdict {
            allowed,
            duplicate: reply.get(4).is_some_and(|v| v == "1"),
            count: parse(&reply, 2)?,
            rejected_window: (!allowed).then(|| window.saturating_sub(1)),
            oldest_score: parse(&reply, 3).ok(),
        })
    }

    async fn ban_remaining(&self, ban_key: &str) -> Result<Option<Duration>, StoreError> {
        let mut conn = self.conn.clone();
        let remaining: i64 = conn.pttl(ban_key).await.map_err(store_error)?;
        Ok((remaining > 0).then(|| Duration::from_millis(remaining as u64)))
    }

    async fn register_strike(
        &self,
        request: &StrikeRequest,
    ) -> Result<Option<Duration>, StoreError> {
        let mut conn = self.conn.clone();
        let ban_ms: i64 = self
            .scripts
            .strike
            .key(&request.strikes_key)
            .key(&request.level_key)
            .key(&request.ban_key)
            .arg(request.threshold)
            .arg(millis(request.tracking_period))
            .arg(request.base_ban.as_millis() as u64)
            .arg(request.max_ban.as_millis() as u64)
            .arg(millis(request.level_decay))
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;

        Ok((ban_ms >= 0).then(|| Duration::from_millis(ban_ms as u64)))
    }

    async fn check_and_throttle(
        &self,
        request: &CostCheckRequest,
    ) -> Result<CostVerdict, StoreError> {
        let mut conn = self.conn.clone();
        let throttle_ms = millis(request.throttle);
        let reply: Vec<String> = self
            .scripts
            .cost_check
            .key(&request.throttle_key)
            .key(&request.burst_key)
            .key(&request.day_key)
            .arg(request.now)
            .arg(&request.member)
            .arg(request.estimated_micros)
            .arg(request.now - request.burst_window_secs)
            .arg(request.day_start)
            .arg(request.burst_limit_micros)
            .arg(request.daily_limit_micros)
            .arg(throttle_ms)
            .arg(millis(request.burst_ttl))
            .arg(millis(request.day_ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;

        let verdict = match reply.first().map(String::as_str) {
            Some("allowed") => CostVerdict::Allowed {
                burst_total_micros: parse_micros(&reply, 1)?,
                day_total_micros: parse_micros(&reply, 2)?,
            },
            Some("throttled") => CostVerdict::AlreadyThrottled {
                marker: reply.get(1).filter(|m| !m.is_empty()).cloned(),
                remaining: Duration::from_millis(parse(&reply, 2)?),
            },
            Some("daily_limit") => CostVerdict::DailyLimit {
                throttle: Duration::from_millis(parse(&reply, 2)?),
            },
            Some("burst") => CostVerdict::Burst {
                throttle: Duration::from_millis(throttle_ms),
            },
            _ => {
                return Err(StoreError::Protocol(format!(
                    "unexpected cost reply: {reply:?}"
                )));
            }
        };

        Ok(verdict)
    }

    async fn record_cost(&self, request: &CostRecordRequest) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: i64 = self
            .scripts
            .record
            .key(&request.burst_key)
            .key(&request.day_key)
            .arg(request.now)
            .arg(request.replaces.as_deref().unwrap_or(""))
            .arg(&request.member)
            .arg(millis(request.burst_ttl))
            .arg(millis(request.day_ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn read_ledger(&self, query: &LedgerQuery) -> Result<LedgerTotals, StoreError> {
        let mut conn = self.conn.clone();
        let reply: Vec<String> = self
            .scripts
            .ledger
            .key(&query.throttle_key)
            .key(&query.burst_key)
            .key(&query.day_key)
            .arg(query.burst_since)
            .arg(query.day_start)
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;

        let remaining: i64 = parse(&reply, 2)?;
        Ok(LedgerTotals {
            burst_micros: parse_micros(&reply, 0)?,
            day_micros: parse_micros(&reply, 1)?,
            throttle_remaining: (remaining > 0).then(|| Duration::from_millis(remaining as u64)),
        })
    }

    async fn issue_or_reuse(&self, request: &IssueRequest) -> Result<IssueVerdict, StoreError> {
        let mut conn = self.conn.clone();
        let record_ttl = Duration::try_from_secs_f64(request.ttl_secs + request.grace_secs)
            .unwrap_or_default();
        let cooldown_ms = Duration::try_from_secs_f64(request.cooldown_secs)
            .unwrap_or_default()
            .as_millis() as u64;

        let reply: Vec<String> = self
            .scripts
            .issue
            .key(&request.marker_key)
            .key(&request.index_key)
            .key(format!("{}{}", request.token_prefix, request.candidate_id))
            .arg(request.now)
            .arg(&request.owner)
            .arg(&request.candidate_id)
            .arg(&request.token_prefix)
            .arg(request.ttl_secs)
            .arg(request.cooldown_secs)
            .arg(request.reuse_window_secs)
            .arg(millis(record_ttl))
            .arg(cooldown_ms)
            .arg(request.max_active.max(1))
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;

        let expires_in = Duration::try_from_secs_f64(request.ttl_secs).unwrap_or_default();
        let verdict = match reply.first().map(String::as_str) {
            Some("issued") => IssueVerdict::Issued {
                challenge_id: parse(&reply, 1)?,
                expires_in,
            },
            Some("reused") => IssueVerdict::Reused {
                challenge_id: parse(&reply, 1)?,
                expires_in,
            },
            Some("cooling_down") => IssueVerdict::CoolingDown {
                retry_after: Duration::try_from_secs_f64(parse(&reply, 1)?).unwrap_or_default(),
            },
            _ => {
                return Err(StoreError::Protocol(format!(
                    "unexpected issue reply: {reply:?}"
                )));
            }
        };

        Ok(verdict)
    }

    async fn consume_once(&self, request: &ConsumeRequest) -> Result<ConsumeVerdict, StoreError> {
        let mut conn = self.conn.clone();
        let reply: String = self
            .scripts
            .consume
            .key(&request.token_key)
            .key(&request.index_key)
            .arg(&request.owner)
            .arg(request.now)
            .arg(&request.challenge_id)
            .arg(if request.delete { "1" } else { "0" })
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;

        match reply.as_str() {
            "consumed" => Ok(ConsumeVerdict::Consumed),
            "valid" => Ok(ConsumeVerdict::Valid),
            "missing" => Ok(ConsumeVerdict::Missing),
            "expired" => Ok(ConsumeVerdict::Expired),
            "mismatch" => Ok(ConsumeVerdict::Mismatch),
            other => Err(StoreError::Protocol(format!(
                "unexpected consume reply: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulwark_core::ports::AdmitWindow;

    async fn get_test_store() -> Option<RedisStore> {
        let config = RedisConfig {
            url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6389".to_string()),
            connect_timeout: Duration::from_secs(1),
            fallback_to_memory: false,
        };

        RedisStore::new(config).await.ok()
    }

    fn unique(prefix: &str) -> String {
        format!("test:{prefix}:{}", uuid::Uuid::new_v4().simple())
    }

    fn now() -> f64 {
        bulwark_core::keys::epoch_secs(chrono::Utc::now())
    }

    #[tokio::test]
    async fn test_redis_admission_window() {
        let store = match get_test_store().await {
            Some(s) => s,
            None => {
                tracing::warn!("Redis not available, skipping test");
                return;
            }
        };

        let key = unique("window");
        let admit = |member: &str| AdmitRequest {
            windows: vec![AdmitWindow {
                key: key.clone(),
                window_secs: 60.0,
                limit: 2,
            }],
            member: member.to_string(),
            dedup: true,
            now: now(),
            ttl_margin_secs: 5.0,
        };

        let first = store.check_and_admit(&admit("a")).await.unwrap();
        assert!(first.allowed);
        assert_eq!(first.count, 1);

        let repeat = store.check_and_admit(&admit("a")).await.unwrap();
        assert!(repeat.allowed);
        assert!(repeat.duplicate);
        assert_eq!(repeat.count, 1);

        assert!(store.check_and_admit(&admit("b")).await.unwrap().allowed);

        let third = store.check_and_admit(&admit("c")).await.unwrap();
        assert!(!third.allowed);
        assert_eq!(third.rejected_window, Some(0));
        assert_eq!(third.count, 2);
        assert!(third.oldest_score.is_some());
    }

    #[tokio::test]
    async fn test_redis_true_up_replaces_one_receipt() {
        let store = match get_test_store().await {
            Some(s) => s,
            None => return,
        };

        let base = unique("record");
        let record = |replaces: Option<&str>, member: &str| CostRecordRequest {
            burst_key: format!("{base}:burst"),
            day_key: format!("{base}:day"),
            replaces: replaces.map(str::to_string),
            member: member.to_string(),
            now: now(),
            burst_ttl: Duration::from_secs(60),
            day_ttl: Duration::from_secs(60),
        };

        store.record_cost(&record(None, "10.0.0.1#a:0.010000")).await.unwrap();
        store.record_cost(&record(None, "10.0.0.1#b:0.010000")).await.unwrap();
        store
            .record_cost(&record(Some("10.0.0.1#b:0.010000"), "10.0.0.1#b:0.004000"))
            .await
            .unwrap();

        let totals = store
            .read_ledger(&LedgerQuery {
                throttle_key: format!("{base}:throttle"),
                burst_key: format!("{base}:burst"),
                day_key: format!("{base}:day"),
                burst_since: now() - 60.0,
                day_start: now() - 3600.0,
            })
            .await
            .unwrap();
        assert_eq!(totals.burst_micros, 14_000);
        assert_eq!(totals.day_micros, 14_000);
    }

    #[tokio::test]
    async fn test_redis_cost_throttle() {
        let store = match get_test_store().await {
            Some(s) => s,
            None => return,
        };

        let base = unique("cost");
        let request = |member: &str| CostCheckRequest {
            throttle_key: format!("{base}:throttle"),
            burst_key: format!("{base}:burst"),
            day_key: format!("{base}:day"),
            member: member.to_string(),
            estimated_micros: 10_000,
            now: now(),
            burst_window_secs: 600.0,
            day_start: now() - 3600.0,
            burst_limit_micros: 20_000,
            daily_limit_micros: 250_000,
            throttle: Duration::from_secs(5),
            burst_ttl: Duration::from_secs(660),
            day_ttl: Duration::from_secs(60),
        };

        for i in 0..2 {
            let verdict = store
                .check_and_throttle(&request(&format!("id{i}:0.010000")))
                .await
                .unwrap();
            assert!(matches!(verdict, CostVerdict::Allowed { .. }));
        }

        let verdict = store
            .check_and_throttle(&request("id2:0.010000"))
            .await
            .unwrap();
        assert_eq!(
            verdict,
            CostVerdict::Burst {
                throttle: Duration::from_secs(5)
            }
        );

        let verdict = store
            .check_and_throttle(&request("id3:0.010000"))
            .await
            .unwrap();
        assert!(matches!(
            verdict,
            CostVerdict::AlreadyThrottled { marker: Some(ref m), .. } if m == "burst"
        ));
    }

    #[tokio::test]
    async fn test_redis_challenge_consumed_once() {
        let store = match get_test_store().await {
            Some(s) => s,
            None => return,
        };

        let base = unique("challenge");
        let issue = IssueRequest {
            marker_key: format!("{base}:issued"),
            index_key: format!("{base}:active"),
            token_prefix: format!("{base}:token:"),
            candidate_id: "c1".to_string(),
            owner: "hash".to_string(),
            now: now(),
            ttl_secs: 60.0,
            cooldown_secs: 3.0,
            reuse_window_secs: 3.5,
            grace_secs: 5.0,
            max_active: 4,
        };

        let issued = store.issue_or_reuse(&issue).await.unwrap();
        assert!(matches!(issued, IssueVerdict::Issued { ref challenge_id, .. } if challenge_id == "c1"));

        let again = store
            .issue_or_reuse(&IssueRequest {
                candidate_id: "c2".to_string(),
                ..issue.clone()
            })
            .await
            .unwrap();
        assert!(matches!(again, IssueVerdict::Reused { ref challenge_id, .. } if challenge_id == "c1"));

        let consume = |owner: &str, delete: bool| ConsumeRequest {
            token_key: format!("{base}:token:c1"),
            index_key: format!("{base}:active"),
            challenge_id: "c1".to_string(),
            owner: owner.to_string(),
            now: now(),
            delete,
        };

        assert_eq!(
            store.consume_once(&consume("other", true)).await.unwrap(),
            ConsumeVerdict::Mismatch
        );
        assert_eq!(
            store.consume_once(&consume("hash", false)).await.unwrap(),
            ConsumeVerdict::Valid
        );
        assert_eq!(
            store.consume_once(&consume("hash", true)).await.unwrap(),
            ConsumeVerdict::Consumed
        );
        assert_eq!(
            store.consume_once(&consume("hash", true)).await.unwrap(),
            ConsumeVerdict::Missing
        );
    }
}
