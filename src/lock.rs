// Per-(user, challenge) mutual exclusion backed by a lease row in the
// shared database, so every process serving the same database observes it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use thiserror::Error;
use uuid::Uuid;

use crate::db::Database;
use crate::metrics;

/// How often a waiter re-attempts the lease claim.
const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Random extra sleep so competing waiters do not retry in lockstep.
const POLL_JITTER_MS: u64 = 25;

#[derive(Debug, Error)]
pub enum LockError {
    /// The wait bound elapsed while another holder kept the lease.
    #[error("another submission for this session is in progress")]
    Busy,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Factory handing out session leases with the configured wait bound and
/// lease lifetime.
#[derive(Clone)]
pub struct SessionLocks {
    db: Arc<Database>,
    wait_timeout: Duration,
    lease_ttl: Duration,
}

impl SessionLocks {
    pub fn new(db: Arc<Database>, wait_timeout: Duration, lease_ttl: Duration) -> Self {
        Self {
            db,
            wait_timeout,
            lease_ttl,
        }
    }

    /// Acquire the lease for (user, challenge), polling until the wait
    /// bound. The claim itself is a single atomic statement; a lease whose
    /// holder died is taken over once it expires.
    pub async fn acquire(
        &self,
        user_id: i64,
        challenge_id: i64,
    ) -> Result<SessionLease, LockError> {
        let holder = Uuid::new_v4().to_string();
        let ttl_ms = self.lease_ttl.as_millis() as i64;
        let started = Instant::now();

        loop {
            let now = chrono::Utc::now().timestamp_millis();
            let claimed = self
                .db
                .try_claim_session_lease(user_id, challenge_id, &holder, now + ttl_ms, now)
                .await?;
            if claimed {
                metrics::SESSION_LOCK_WAIT_SECONDS.observe(started.elapsed().as_secs_f64());
                metrics::HELD_SESSION_LEASES.inc();
                return Ok(SessionLease {
                    db: self.db.clone(),
                    user_id,
                    challenge_id,
                    holder,
                    released: false,
                });
            }

            if started.elapsed() >= self.wait_timeout {
                metrics::SESSION_LOCK_TIMEOUTS_TOTAL.inc();
                return Err(LockError::Busy);
            }

            let jitter = rand::thread_rng().gen_range(0..POLL_JITTER_MS);
            tokio::time::sleep(POLL_INTERVAL + Duration::from_millis(jitter)).await;
        }
    }
}

/// A held session lease. Call [`SessionLease::release`] when the critical
/// section is done; a lease that is merely dropped stays in the table until
/// its expiry reclaims it.
pub struct SessionLease {
    db: Arc<Database>,
    user_id: i64,
    challenge_id: i64,
    holder: String,
    released: bool,
}

impl SessionLease {
    pub async fn release(mut self) {
        self.released = true;
        metrics::HELD_SESSION_LEASES.dec();
        match self
            .db
            .release_session_lease(self.user_id, self.challenge_id, &self.holder)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                // The lease expired and someone else reclaimed it while we
                // were still working. The writes this lease guarded already
                // committed, but serialization was no longer guaranteed.
                metrics::SESSION_LEASES_LOST_TOTAL.inc();
                tracing::warn!(
                    "session lease user={} challenge={} expired before release; \
                     lease TTL is too short for the slowest agent turn",
                    self.user_id,
                    self.challenge_id
                );
            }
            Err(e) => {
                tracing::error!(
                    "failed to release session lease user={} challenge={}: {}",
                    self.user_id,
                    self.challenge_id,
                    e
                );
            }
        }
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if !self.released {
            metrics::HELD_SESSION_LEASES.dec();
            tracing::warn!(
                "session lease user={} challenge={} dropped without release; \
                 it stays held until expiry",
                self.user_id,
                self.challenge_id
            );
        }
    }
}
