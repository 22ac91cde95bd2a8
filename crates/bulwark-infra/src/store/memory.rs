//! In-memory atomic store - used in tests and as the fallback when Redis is
//! unavailable.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use bulwark_core::StoreError;
use bulwark_core::domain::parse_cost_member;
use bulwark_core::keys::epoch_secs;
use bulwark_core::ports::{
    AdmitRequest, AdmitVerdict, AtomicStore, Clock, ConsumeRequest, ConsumeVerdict,
    CostCheckRequest, CostRecordRequest, CostVerdict, IssueRequest, IssueVerdict, LedgerQuery,
    LedgerTotals, StrikeRequest, SystemClock,
};

const DAILY_MARKER: &str = "daily_limit";
const BURST_MARKER: &str = "burst";

struct Expiring<T> {
    value: T,
    expires_at: Option<f64>,
}

impl<T> Expiring<T> {
    fn expired(&self, now: f64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// One keyspace of a single value type, with lazy TTL eviction.
struct Table<T>(HashMap<String, Expiring<T>>);

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self(HashMap::new())
    }
}

impl<T> Table<T> {
    fn live(&mut self, key: &str, now: f64) -> Option<&mut Expiring<T>> {
        if self.0.get(key).is_some_and(|e| e.expired(now)) {
            self.0.remove(key);
        }
        self.0.get_mut(key)
    }

    fn get(&mut self, key: &str, now: f64) -> Option<&mut T> {
        self.live(key, now).map(|e| &mut e.value)
    }

    fn insert(&mut self, key: &str, value: T, ttl: Duration, now: f64) {
        self.0.insert(
            key.to_string(),
            Expiring {
                value,
                expires_at: Some(now + ttl.as_secs_f64()),
            },
        );
    }

    fn expire(&mut self, key: &str, ttl: Duration, now: f64) {
        if let Some(entry) = self.live(key, now) {
            entry.expires_at = Some(now + ttl.as_secs_f64());
        }
    }

    fn remaining(&mut self, key: &str, now: f64) -> Option<Duration> {
        let at = self.live(key, now)?.expires_at?;
        Duration::try_from_secs_f64(at - now).ok()
    }

    fn remove(&mut self, key: &str) -> Option<T> {
        self.0.remove(key).map(|e| e.value)
    }
}

impl<T: Default> Table<T> {
    fn get_or_default(&mut self, key: &str, now: f64) -> &mut T {
        if self.0.get(key).is_some_and(|e| e.expired(now)) {
            self.0.remove(key);
        }
        &mut self
            .0
            .entry(key.to_string())
            .or_insert_with(|| Expiring {
                value: T::default(),
                expires_at: None,
            })
            .value
    }
}

impl Table<u64> {
    /// INCR semantics: the TTL is only set when the counter is created.
    fn incr(&mut self, key: &str, ttl_on_create: Duration, now: f64) -> u64 {
        match self.live(key, now) {
            Some(entry) => {
                entry.value += 1;
                entry.value
            }
            None => {
                self.insert(key, 1, ttl_on_create, now);
                1
            }
        }
    }
}

type SortedSet = HashMap<String, f64>;

struct ChallengeRecord {
    owner: String,
    created_at: f64,
    expires_at: f64,
}

#[derive(Default)]
struct State {
    strings: Table<String>,
    counters: Table<u64>,
    sorted: Table<SortedSet>,
    challenges: Table<ChallengeRecord>,
}

impl State {
    /// Sum of receipts scored at or after `since`, without mutating.
    fn cost_total(&mut self, key: &str, since: f64, now: f64) -> i64 {
        self.sorted
            .get(key, now)
            .map(|set| {
                set.iter()
                    .filter(|(_, score)| **score >= since)
                    .filter_map(|(member, _)| parse_cost_member(member))
                    .map(|(_, micros)| micros)
                    .sum()
            })
            .unwrap_or(0)
    }

    fn evict_before(&mut self, key: &str, floor: f64, now: f64) {
        if let Some(set) = self.sorted.get(key, now) {
            set.retain(|_, score| *score >= floor);
        }
    }
}

/// Mutex-guarded store: every operation is one critical section, which gives
/// the same serialization the Redis scripts get from the server.
///
/// Receipt scores come from the request; key expiry follows the store's own
/// clock, the way Redis TTLs follow the server clock.
/// Note: State is per-process and lost on restart.
pub struct InMemoryStore {
    state: Mutex<State>,
    clock: Arc<dyn Clock>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            clock,
        }
    }

    fn now(&self) -> f64 {
        epoch_secs(self.clock.now())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

struct WindowState {
    count: u64,
    present: bool,
    oldest: Option<f64>,
}

#[async_trait]
impl AtomicStore for InMemoryStore {
    async fn check_and_admit(&self, request: &AdmitRequest) -> Result<AdmitVerdict, StoreError> {
        let clock = self.now();
        let mut state = self.state.lock().await;

        let mut windows = Vec::with_capacity(request.windows.len());
        for window in &request.windows {
            state.evict_before(&window.key, request.now - window.window_secs, clock);
            let set = state.sorted.get(&window.key, clock);
            windows.push(match set {
                Some(set) => WindowState {
                    count: set.len() as u64,
                    present: request.dedup && set.contains_key(&request.member),
                    oldest: set.values().copied().reduce(f64::min),
                },
                None => WindowState {
                    count: 0,
                    present: false,
                    oldest: None,
                },
            });
        }

        let rejected = request
            .windows
            .iter()
            .zip(&windows)
            .position(|(window, seen)| !seen.present && seen.count >= window.limit);

        if let Some(index) = rejected {
            return Ok(AdmitVerdict {
                allowed: false,
                duplicate: false,
                count: windows[index].count,
                rejected_window: Some(index),
                oldest_score: windows[index].oldest,
            });
        }

        for window in &request.windows {
            state
                .sorted
                .get_or_default(&window.key, clock)
                .insert(request.member.clone(), request.now);
            let ttl = Duration::from_secs_f64(window.window_secs + request.ttl_margin_secs);
            state.sorted.expire(&window.key, ttl, clock);
        }

        let duplicate = !windows.is_empty() && windows.iter().all(|w| w.present);
        let count = windows
            .first()
            .map(|w| w.count + u64::from(!w.present))
            .unwrap_or(0);

        Ok(AdmitVerdict {
            allowed: true,
            duplicate,
            count,
            rejected_window: None,
            oldest_score: None,
        })
    }

    async fn ban_remaining(&self, ban_key: &str) -> Result<Option<Duration>, StoreError> {
        let clock = self.now();
        let mut state = self.state.lock().await;
        Ok(state.strings.remaining(ban_key, clock))
    }

    async fn register_strike(
        &self,
        request: &StrikeRequest,
    ) -> Result<Option<Duration>, StoreError> {
        let clock = self.now();
        let mut state = self.state.lock().await;

        let strikes = state
            .counters
            .incr(&request.strikes_key, request.tracking_period, clock);
        if strikes < request.threshold {
            return Ok(None);
        }

        state.counters.remove(&request.strikes_key);
        let level = state
            .counters
            .incr(&request.level_key, request.level_decay, clock);
        state
            .counters
            .expire(&request.level_key, request.level_decay, clock);

        let factor = 2u32.saturating_pow(level.saturating_sub(1).min(31) as u32);
        let ban = request.base_ban.saturating_mul(factor).min(request.max_ban);
        state
            .strings
            .insert(&request.ban_key, level.to_string(), ban, clock);

        Ok(Some(ban))
    }

    async fn check_and_throttle(
        &self,
        request: &CostCheckRequest,
    ) -> Result<CostVerdict, StoreError> {
        let clock = self.now();
        let mut state = self.state.lock().await;

        if let Some(remaining) = state.strings.remaining(&request.throttle_key, clock) {
            let marker = state.strings.get(&request.throttle_key, clock).cloned();
            return Ok(CostVerdict::AlreadyThrottled { marker, remaining });
        }

        state.evict_before(
            &request.burst_key,
            request.now - request.burst_window_secs,
            clock,
        );
        state.evict_before(&request.day_key, request.day_start, clock);

        let burst_total = state.cost_total(&request.burst_key, f64::MIN, clock);
        let day_total = state.cost_total(&request.day_key, f64::MIN, clock);

        if request.daily_limit_micros > 0
            && day_total + request.estimated_micros > request.daily_limit_micros
        {
            let throttle = request.throttle.saturating_mul(2);
            state
                .strings
                .insert(&request.throttle_key, DAILY_MARKER.to_string(), throttle, clock);
            return Ok(CostVerdict::DailyLimit { throttle });
        }

        if request.burst_limit_micros > 0
            && burst_total + request.estimated_micros > request.burst_limit_micros
        {
            state.strings.insert(
                &request.throttle_key,
                BURST_MARKER.to_string(),
                request.throttle,
                clock,
            );
            return Ok(CostVerdict::Burst {
                throttle: request.throttle,
            });
        }

        let mut added = request.estimated_micros;
        for (key, ttl) in [
            (&request.burst_key, request.burst_ttl),
            (&request.day_key, request.day_ttl),
        ] {
            let set = state.sorted.get_or_default(key, clock);
            if set.insert(request.member.clone(), request.now).is_some() {
                added = 0;
            }
            state.sorted.expire(key, ttl, clock);
        }

        Ok(CostVerdict::Allowed {
            burst_total_micros: burst_total + added,
            day_total_micros: day_total + added,
        })
    }

    async fn record_cost(&self, request: &CostRecordRequest) -> Result<(), StoreError> {
        let clock = self.now();
        let mut state = self.state.lock().await;

        for (key, ttl) in [
            (&request.burst_key, request.burst_ttl),
            (&request.day_key, request.day_ttl),
        ] {
            let set = state.sorted.get_or_default(key, clock);
            if let Some(replaced) = &request.replaces {
                set.remove(replaced);
            }
            set.insert(request.member.clone(), request.now);
            state.sorted.expire(key, ttl, clock);
        }

        Ok(())
    }

    async fn read_ledger(&self, query: &LedgerQuery) -> Result<LedgerTotals, StoreError> {
        let clock = self.now();
        let mut state = self.state.lock().await;

        Ok(LedgerTotals {
            burst_micros: state.cost_total(&query.burst_key, query.burst_since, clock),
            day_micros: state.cost_total(&query.day_key, query.day_start, clock),
            throttle_remaining: state.strings.remaining(&query.throttle_key, clock),
        })
    }

    async fn issue_or_reuse(&self, request: &IssueRequest) -> Result<IssueVerdict, StoreError> {
        let clock = self.now();
        let mut state = self.state.lock().await;
        let ttl = Duration::from_secs_f64(request.ttl_secs);
        let record_ttl = Duration::from_secs_f64(request.ttl_secs + request.grace_secs);

        if let Some(index) = state.sorted.get(&request.index_key, clock) {
            index.retain(|_, expires_at| *expires_at > request.now);
        }

        let last_issued = state
            .strings
            .get(&request.marker_key, clock)
            .and_then(|v| v.parse::<f64>().ok());

        if let Some(last) = last_issued {
            let elapsed = request.now - last;
            if elapsed < request.cooldown_secs {
                let newest = state.sorted.get(&request.index_key, clock).and_then(|set| {
                    set.iter()
                        .max_by(|a, b| a.1.total_cmp(b.1))
                        .map(|(id, _)| id.clone())
                });

                if let Some(id) = newest {
                    let token_key = format!("{}{}", request.token_prefix, id);
                    let reusable = state.challenges.get(&token_key, clock).is_some_and(|r| {
                        request.now - r.created_at <= request.reuse_window_secs
                    });
                    if reusable {
                        let expires_at = request.now + request.ttl_secs;
                        if let Some(record) = state.challenges.get(&token_key, clock) {
                            record.expires_at = expires_at;
                        }
                        state.challenges.expire(&token_key, record_ttl, clock);
                        state
                            .sorted
                            .get_or_default(&request.index_key, clock)
                            .insert(id.clone(), expires_at);
                        state.sorted.expire(&request.index_key, record_ttl, clock);
                        return Ok(IssueVerdict::Reused {
                            challenge_id: id,
                            expires_in: ttl,
                        });
                    }
                }

                return Ok(IssueVerdict::CoolingDown {
                    retry_after: Duration::try_from_secs_f64(request.cooldown_secs - elapsed)
                        .unwrap_or_default(),
                });
            }
        }

        let expires_at = request.now + request.ttl_secs;
        let token_key = format!("{}{}", request.token_prefix, request.candidate_id);
        state.challenges.insert(
            &token_key,
            ChallengeRecord {
                owner: request.owner.clone(),
                created_at: request.now,
                expires_at,
            },
            record_ttl,
            clock,
        );

        let evicted = {
            let index = state.sorted.get_or_default(&request.index_key, clock);
            index.insert(request.candidate_id.clone(), expires_at);
            let mut evicted = Vec::new();
            while index.len() as u64 > request.max_active.max(1) {
                let oldest = index
                    .iter()
                    .min_by(|a, b| a.1.total_cmp(b.1))
                    .map(|(id, _)| id.clone());
                match oldest {
                    Some(id) => {
                        index.remove(&id);
                        evicted.push(id);
                    }
                    None => break,
                }
            }
            evicted
        };
        for id in evicted {
            state
                .challenges
                .remove(&format!("{}{}", request.token_prefix, id));
        }
        state.sorted.expire(&request.index_key, record_ttl, clock);

        if request.cooldown_secs > 0.0 {
            state.strings.insert(
                &request.marker_key,
                request.now.to_string(),
                Duration::from_secs_f64(request.cooldown_secs),
                clock,
            );
        }

        Ok(IssueVerdict::Issued {
            challenge_id: request.candidate_id.clone(),
            expires_in: ttl,
        })
    }

    async fn consume_once(&self, request: &ConsumeRequest) -> Result<ConsumeVerdict, StoreError> {
        let clock = self.now();
        let mut state = self.state.lock().await;

        let (owner_matches, expired) = match state.challenges.get(&request.token_key, clock) {
            Some(record) => (record.owner == request.owner, record.expires_at <= request.now),
            None => return Ok(ConsumeVerdict::Missing),
        };

        if expired {
            state.challenges.remove(&request.token_key);
            if let Some(index) = state.sorted.get(&request.index_key, clock) {
                index.remove(&request.challenge_id);
            }
            return Ok(ConsumeVerdict::Expired);
        }

        if !owner_matches {
            return Ok(ConsumeVerdict::Mismatch);
        }
        if !request.delete {
            return Ok(ConsumeVerdict::Valid);
        }

        state.challenges.remove(&request.token_key);
        if let Some(index) = state.sorted.get(&request.index_key, clock) {
            index.remove(&request.challenge_id);
        }
        Ok(ConsumeVerdict::Consumed)
    }
}
