// In-memory rate limiter for challenge endpoints.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Different rate limit types with their constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitType {
    /// Max challenge session starts per hour.
    ChallengeStarts,
    /// Max agent message submissions per hour.
    MessageSubmissions,
}

impl RateLimitType {
    /// Maximum number of events allowed in the window.
    pub fn max_count(&self) -> usize {
        match self {
            RateLimitType::ChallengeStarts => 30,
            RateLimitType::MessageSubmissions => 120,
        }
    }

    /// Time window for the rate limit.
    pub fn window(&self) -> Duration {
        match self {
            RateLimitType::ChallengeStarts => Duration::from_secs(3600),
            RateLimitType::MessageSubmissions => Duration::from_secs(3600),
        }
    }
}

impl std::fmt::Display for RateLimitType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RateLimitType::ChallengeStarts => write!(f, "challenge starts per hour"),
            RateLimitType::MessageSubmissions => write!(f, "message submissions per hour"),
        }
    }
}

/// Error returned when a rate limit is exceeded.
#[derive(Debug, Clone)]
pub struct RateLimitError {
    pub limit_type: RateLimitType,
    pub max: usize,
}

impl std::fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Rate limit exceeded: max {} {}",
            self.max, self.limit_type
        )
    }
}

/// Key for the rate limit map: (user_id, limit_type).
type LimitKey = (i64, RateLimitType);

/// Thread-safe in-memory rate limiter.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    inner: Arc<Mutex<HashMap<LimitKey, Vec<Instant>>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Check if the user is within the rate limit for the given type.
    /// If within limits, records the event and returns Ok(()).
    /// If exceeded, returns Err(RateLimitError).
    /// In local mode, rate limiting is always bypassed.
    pub fn check_limit(
        &self,
        user_id: i64,
        limit_type: RateLimitType,
    ) -> Result<(), RateLimitError> {
        if crate::config::is_local_mode() {
            return Ok(());
        }
        let mut map = self.inner.lock().unwrap();
        let key = (user_id, limit_type);
        let window = limit_type.window();
        let max = limit_type.max_count();
        let now = Instant::now();

        let entries = map.entry(key).or_insert_with(Vec::new);

        // Remove expired entries
        entries.retain(|t| now.duration_since(*t) < window);

        if entries.len() >= max {
            return Err(RateLimitError { limit_type, max });
        }

        entries.push(now);
        Ok(())
    }

    /// Get the current count for a user and limit type (for testing/diagnostics).
    pub fn current_count(&self, user_id: i64, limit_type: RateLimitType) -> usize {
        let mut map = self.inner.lock().unwrap();
        let key = (user_id, limit_type);
        let window = limit_type.window();
        let now = Instant::now();

        if let Some(entries) = map.get_mut(&key) {
            entries.retain(|t| now.duration_since(*t) < window);
            entries.len()
        } else {
            0
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter_allows_within_limit() {
        let limiter = RateLimiter::new();

        // ChallengeStarts allows 30 per hour
        for _ in 0..30 {
            assert!(limiter
                .check_limit(1, RateLimitType::ChallengeStarts)
                .is_ok());
        }
    }

    #[test]
    fn test_rate_limiter_denies_over_limit() {
        let limiter = RateLimiter::new();

        for _ in 0..30 {
            assert!(limiter
                .check_limit(1, RateLimitType::ChallengeStarts)
                .is_ok());
        }
        // 31st should fail
        let result = limiter.check_limit(1, RateLimitType::ChallengeStarts);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert_eq!(err.max, 30);
        assert_eq!(err.limit_type, RateLimitType::ChallengeStarts);
    }

    #[test]
    fn test_rate_limiter_separate_users() {
        let limiter = RateLimiter::new();

        // Fill up user 1's challenge starts
        for _ in 0..30 {
            assert!(limiter
                .check_limit(1, RateLimitType::ChallengeStarts)
                .is_ok());
        }
        assert!(limiter
            .check_limit(1, RateLimitType::ChallengeStarts)
            .is_err());

        // User 2 should still be fine
        assert!(limiter
            .check_limit(2, RateLimitType::ChallengeStarts)
            .is_ok());
    }

    #[test]
    fn test_rate_limiter_separate_types() {
        let limiter = RateLimiter::new();

        // Fill up challenge starts for user 1
        for _ in 0..30 {
            assert!(limiter
                .check_limit(1, RateLimitType::ChallengeStarts)
                .is_ok());
        }
        assert!(limiter
            .check_limit(1, RateLimitType::ChallengeStarts)
            .is_err());

        // Message submissions should still work for user 1
        assert!(limiter
            .check_limit(1, RateLimitType::MessageSubmissions)
            .is_ok());
    }

    #[test]
    fn test_rate_limiter_current_count() {
        let limiter = RateLimiter::new();

        assert_eq!(limiter.current_count(1, RateLimitType::ChallengeStarts), 0);

        limiter.check_limit(1, RateLimitType::ChallengeStarts).unwrap();
        assert_eq!(limiter.current_count(1, RateLimitType::ChallengeStarts), 1);

        limiter.check_limit(1, RateLimitType::ChallengeStarts).unwrap();
        assert_eq!(limiter.current_count(1, RateLimitType::ChallengeStarts), 2);
    }

    #[test]
    fn test_message_submissions_limit() {
        let limiter = RateLimiter::new();

        // MessageSubmissions allows 120 per hour
        for _ in 0..120 {
            assert!(limiter
                .check_limit(1, RateLimitType::MessageSubmissions)
                .is_ok());
        }
        assert!(limiter
            .check_limit(1, RateLimitType::MessageSubmissions)
            .is_err());
    }

    #[test]
    fn test_rate_limit_error_display() {
        let err = RateLimitError {
            limit_type: RateLimitType::MessageSubmissions,
            max: 120,
        };
        assert_eq!(
            err.to_string(),
            "Rate limit exceeded: max 120 message submissions per hour"
        );
    }
}
