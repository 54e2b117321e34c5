//! Rate limiting for sync-proxy.
//!
//! Requests are limited per user with a keyed governor limiter backed by
//! DashMap, and across all users with a direct limiter. Both are checked
//! before any connection state is created or touched.

use crate::config::LimitsConfig;
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use sync_types::UserId;

/// Type alias for a keyed rate limiter using DashMap.
type KeyedLimiter<K> = RateLimiter<
    K,
    dashmap::DashMap<K, InMemoryState>,
    DefaultClock,
    NoOpMiddleware<governor::clock::QuantaInstant>,
>;

/// Type alias for a direct (non-keyed) rate limiter.
type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Rate limiters for the proxy.
#[derive(Clone)]
pub struct RateLimits {
    /// Limits sync requests per user.
    ///
    /// Configured via `limits.requests_per_minute`.
    user_limiter: Arc<KeyedLimiter<UserId>>,

    /// Global rate limiter across all users.
    global_limiter: Arc<DirectLimiter>,
}

impl std::fmt::Debug for RateLimits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimits")
            .field("user_limiter", &"KeyedLimiter<UserId>")
            .field("global_limiter", &"DirectLimiter")
            .finish()
    }
}

impl RateLimits {
    /// Create rate limiters from configuration.
    ///
    /// A zero quota is treated as one.
    pub fn new(config: &LimitsConfig) -> Self {
        let per_user = NonZeroU32::new(config.requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let global_rps =
            NonZeroU32::new(config.global_requests_per_second).unwrap_or(NonZeroU32::MIN);

        Self {
            user_limiter: Arc::new(RateLimiter::keyed(Quota::per_minute(per_user))),
            global_limiter: Arc::new(RateLimiter::direct(Quota::per_second(global_rps))),
        }
    }

    /// Check if a request from `user_id` is allowed.
    pub fn check_user(&self, user_id: &UserId) -> Result<(), RateLimitError> {
        self.user_limiter
            .check_key(user_id)
            .map_err(|_| RateLimitError::UserLimitExceeded)
    }

    /// Check if the global request rate is within limits.
    ///
    /// This caps aggregate throughput regardless of per-user limits.
    pub fn check_global(&self) -> Result<(), RateLimitError> {
        self.global_limiter
            .check()
            .map_err(|_| RateLimitError::GlobalLimitExceeded)
    }

    /// Get the number of tracked user keys (for metrics).
    pub fn user_keys_count(&self) -> usize {
        self.user_limiter.len()
    }

    /// Evict users whose quota has fully recharged. Call periodically from
    /// the cleanup task.
    pub fn shrink(&self) {
        self.user_limiter.retain_recent();
    }
}

/// Rate limit error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    /// Too many requests from this user.
    UserLimitExceeded,
    /// Global request rate exceeded across all users.
    GlobalLimitExceeded,
}

impl std::fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UserLimitExceeded => {
                write!(f, "user request rate limit exceeded")
            }
            Self::GlobalLimitExceeded => {
                write!(f, "global rate limit exceeded")
            }
        }
    }
}

impl std::error::Error for RateLimitError {}
