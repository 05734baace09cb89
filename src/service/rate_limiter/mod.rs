// =============================================================================
// Conclave Federated Messaging Server - Rate Limiter Module
// =============================================================================
//
// Project: Conclave - Membership Management Core for Federated Messaging
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Contributors: Conclave Development Team
// License: Apache 2.0 / MIT
//
// Description:
//   Token-bucket limiter registry. Policies are named configurations loaded
//   at startup; the registry lazily creates one bucket per (policy, key) and
//   guards each bucket with its own mutex, so unrelated keys never contend.
//   Refill is computed lazily from elapsed wall-clock time; there are no
//   timers or background tasks.
//
// =============================================================================

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, RwLock},
    time::{Duration, Instant},
};

use tracing::{debug, instrument, warn};

use crate::{config::RateLimitPolicy, Error, Result};

/// Token bucket rate limiter state.
///
/// Owned exclusively by its registry entry; all access goes through the
/// per-bucket mutex. Tokens never exceed capacity and never go negative.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
    capacity: f64,
    refill_rate: f64,
}

impl TokenBucket {
    fn new(policy: &RateLimitPolicy) -> Self {
        let capacity = f64::from(policy.burst_count);
        Self {
            tokens: capacity,
            last_refill: Instant::now(),
            capacity,
            refill_rate: policy.per_second,
        }
    }

    /// Lazy refill from elapsed wall-clock time, capped at capacity.
    /// A zero refill rate leaves the bucket untouched forever.
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    fn try_consume(&mut self, cost: f64) -> bool {
        self.refill();
        if self.tokens >= cost {
            self.tokens -= cost;
            true
        } else {
            false
        }
    }

    /// Admission check without consumption
    fn would_admit(&mut self, cost: f64) -> bool {
        self.refill();
        self.tokens >= cost
    }

    /// Unconditional consumption, clamped at zero
    fn record(&mut self, cost: f64) {
        self.refill();
        self.tokens = (self.tokens - cost).max(0.0);
    }

    fn reset(&mut self) {
        self.tokens = self.capacity;
        self.last_refill = Instant::now();
    }

    /// Earliest-retry hint for a denied request; `None` when the bucket
    /// never refills or the wait does not fit a `Duration` (a rate small
    /// enough that the wait overflows is as good as never)
    fn time_until_available(&self, cost: f64) -> Option<Duration> {
        if self.refill_rate > 0.0 {
            let deficit = (cost - self.tokens).max(0.0);
            Duration::try_from_secs_f64(deficit / self.refill_rate).ok()
        } else {
            None
        }
    }
}

/// Limiter registry: policy name -> key -> bucket
pub struct Service {
    policies: RwLock<HashMap<String, RateLimitPolicy>>,
    buckets: RwLock<HashMap<(String, String), Arc<Mutex<TokenBucket>>>>,
}

impl Service {
    pub fn new(policies: HashMap<String, RateLimitPolicy>) -> Self {
        debug!(
            "🚦 Initializing rate limiter registry with {} policies",
            policies.len()
        );
        Self {
            policies: RwLock::new(policies),
            buckets: RwLock::new(HashMap::new()),
        }
    }

    fn policy(&self, name: &str) -> Result<RateLimitPolicy> {
        self.policies
            .read()
            .expect("policy table lock")
            .get(name)
            .copied()
            .ok_or_else(|| Error::NotFound(format!("rate limit policy {name}")))
    }

    /// The bucket for (policy, key), created on first use
    fn bucket(&self, policy_name: &str, key: &str) -> Result<Arc<Mutex<TokenBucket>>> {
        {
            let buckets = self.buckets.read().expect("bucket map lock");
            if let Some(bucket) = buckets.get(&(policy_name.to_owned(), key.to_owned())) {
                return Ok(Arc::clone(bucket));
            }
        }
        let policy = self.policy(policy_name)?;
        let mut buckets = self.buckets.write().expect("bucket map lock");
        let bucket = buckets
            .entry((policy_name.to_owned(), key.to_owned()))
            .or_insert_with(|| Arc::new(Mutex::new(TokenBucket::new(&policy))));
        Ok(Arc::clone(bucket))
    }

    /// Atomically check and consume one token. Fails with `LimitExceeded`
    /// when the bucket cannot cover the request; a denied call leaves the
    /// token count unchanged.
    #[instrument(level = "debug", skip(self))]
    pub fn check_and_consume(&self, policy_name: &str, key: &str) -> Result<()> {
        let bucket = self.bucket(policy_name, key)?;
        let mut bucket = bucket.lock().expect("bucket lock");
        if bucket.try_consume(1.0) {
            Ok(())
        } else {
            warn!("🚫 Rate limit {policy_name} exceeded for key {key}");
            Err(Error::LimitExceeded {
                policy: policy_name.to_owned(),
                retry_after: bucket.time_until_available(1.0),
            })
        }
    }

    /// Non-consuming admission check. Used before a remote join so that no
    /// token is held across the federation round trip; the token is charged
    /// through [`Self::record`] once the remote server accepts.
    #[instrument(level = "debug", skip(self))]
    pub fn check(&self, policy_name: &str, key: &str) -> Result<()> {
        let bucket = self.bucket(policy_name, key)?;
        let mut bucket = bucket.lock().expect("bucket lock");
        if bucket.would_admit(1.0) {
            Ok(())
        } else {
            Err(Error::LimitExceeded {
                policy: policy_name.to_owned(),
                retry_after: bucket.time_until_available(1.0),
            })
        }
    }

    /// Consume one token unconditionally, clamped at zero. The action has
    /// already happened; this makes it count against the key.
    #[instrument(level = "debug", skip(self))]
    pub fn record(&self, policy_name: &str, key: &str) -> Result<()> {
        let bucket = self.bucket(policy_name, key)?;
        bucket.lock().expect("bucket lock").record(1.0);
        Ok(())
    }

    /// Refill a key's bucket to capacity. Administrative override.
    pub fn reset(&self, policy_name: &str, key: &str) -> Result<()> {
        let bucket = self.bucket(policy_name, key)?;
        bucket.lock().expect("bucket lock").reset();
        Ok(())
    }

    /// Replace a policy at runtime and drop its existing buckets.
    /// Test/administrative override only; production policies come from
    /// configuration at startup.
    pub fn set_policy(&self, name: &str, policy: RateLimitPolicy) {
        self.policies
            .write()
            .expect("policy table lock")
            .insert(name.to_owned(), policy);
        self.buckets
            .write()
            .expect("bucket map lock")
            .retain(|(policy_name, _), _| policy_name != name);
    }

    /// Number of live buckets, for admin introspection
    pub fn bucket_count(&self) -> usize {
        self.buckets.read().expect("bucket map lock").len()
    }
}
