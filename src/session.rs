// Challenge session lifecycle: starting sessions, serialized message
// submission, and context reads.
//
// Sessions move through exactly one transition, active -> succeeded, and
// the flip happens the moment the agent's reply turn invokes the
// challenge's success tool. All mutation of a session runs under its
// database lease, so concurrent submissions serialize and the transcript
// order matches lease-acquisition order.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::agent::{self, AgentError, AgentGateway, ProvisionSpec};
use crate::db::{Challenge, ChallengeSession, Database, SessionStatus, SessionTurn, TurnRole};
use crate::lock::{LockError, SessionLocks};
use crate::metrics;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("challenge not found")]
    ChallengeNotFound,
    #[error("user is not enrolled in this challenge's tournament")]
    NotEnrolled,
    #[error("challenge has not been started")]
    SessionNotFound,
    /// The session already succeeded. A normal outcome, not a fault.
    #[error("challenge already completed")]
    AlreadyCompleted,
    /// Another submission holds the session lease. Retryable.
    #[error("another submission for this challenge is in progress")]
    SessionBusy,
    #[error("message must not be empty")]
    EmptyMessage,
    #[error("could not provision the challenge agent: {0}")]
    ProvisioningFailed(String),
    /// The agent service was unreachable or errored. Retryable; nothing
    /// was recorded.
    #[error("agent communication failed: {0}")]
    AgentUnavailable(String),
    /// The stored agent handle no longer resolves. Needs operator help.
    #[error("the challenge agent no longer exists")]
    AgentMissing,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<LockError> for SessionError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::Busy => SessionError::SessionBusy,
            LockError::Database(e) => SessionError::Database(e),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnView {
    pub role: TurnRole,
    pub content: String,
    pub tool_called: bool,
}

/// What a client sees of a session: status, transcript and whether more
/// messages are accepted. `can_contribute` is derived from status, never
/// stored.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub challenge_id: i64,
    pub status: SessionStatus,
    pub can_contribute: bool,
    pub transcript: Vec<TurnView>,
    pub created_at: String,
    pub updated_at: String,
}

impl SessionView {
    fn build(session: &ChallengeSession, turns: Vec<SessionTurn>) -> Self {
        SessionView {
            challenge_id: session.challenge_id,
            status: session.status,
            can_contribute: session.can_contribute(),
            transcript: turns
                .into_iter()
                .map(|turn| TurnView {
                    role: turn.role,
                    content: turn.content,
                    tool_called: turn.tool_called,
                })
                .collect(),
            created_at: session.created_at.clone(),
            updated_at: session.updated_at.clone(),
        }
    }
}

#[derive(Clone)]
pub struct SessionController {
    db: Arc<Database>,
    gateway: Arc<dyn AgentGateway>,
    locks: SessionLocks,
}

impl SessionController {
    pub fn new(db: Arc<Database>, gateway: Arc<dyn AgentGateway>, locks: SessionLocks) -> Self {
        Self { db, gateway, locks }
    }

    /// Start a session for (user, challenge), or return the existing one.
    /// The bool reports whether a new session was created by this call.
    pub async fn start(
        &self,
        user_id: i64,
        challenge_id: i64,
    ) -> Result<(SessionView, bool), SessionError> {
        let challenge = self
            .db
            .get_challenge(challenge_id)
            .await?
            .ok_or(SessionError::ChallengeNotFound)?;
        if !self.db.is_enrolled(user_id, challenge.tournament_id).await? {
            return Err(SessionError::NotEnrolled);
        }

        if let Some(existing) = self.db.get_session(user_id, challenge_id).await? {
            let turns = self.db.list_turns(existing.id).await?;
            return Ok((SessionView::build(&existing, turns), false));
        }

        // Provision before persisting: a provisioning failure must leave no
        // session behind. The deterministic name makes a retry after a
        // crash re-attach to the agent created here.
        let spec = ProvisionSpec {
            name: agent::agent_name(user_id, challenge.tournament_id, challenge_id),
            system_prompt: challenge.description.clone(),
            tools: challenge.agent_tools(),
        };
        let agent_ref = self
            .gateway
            .provision(&spec)
            .await
            .map_err(|e| SessionError::ProvisioningFailed(e.to_string()))?;

        match self.db.create_session(user_id, challenge_id, &agent_ref).await? {
            Some(session) => {
                metrics::SESSIONS_STARTED_TOTAL.inc();
                tracing::info!(
                    "user {} started challenge {} (session {})",
                    user_id,
                    challenge_id,
                    session.id
                );
                Ok((SessionView::build(&session, Vec::new()), true))
            }
            None => {
                // Lost a concurrent double-start; the stored row wins
                let session = self
                    .db
                    .get_session(user_id, challenge_id)
                    .await?
                    .ok_or(SessionError::SessionNotFound)?;
                let turns = self.db.list_turns(session.id).await?;
                Ok((SessionView::build(&session, turns), false))
            }
        }
    }

    /// Submit one message to the session's agent and append the resulting
    /// exchange. Serialized per session via the lease; on agent failure
    /// nothing is appended.
    pub async fn submit_message(
        &self,
        user_id: i64,
        challenge_id: i64,
        text: &str,
    ) -> Result<SessionView, SessionError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        let challenge = self
            .db
            .get_challenge(challenge_id)
            .await?
            .ok_or(SessionError::ChallengeNotFound)?;

        // Cheap rejections before any lease work
        let session = self
            .db
            .get_session(user_id, challenge_id)
            .await?
            .ok_or(SessionError::SessionNotFound)?;
        if session.status == SessionStatus::Succeeded {
            return Err(SessionError::AlreadyCompleted);
        }

        let lease = self.locks.acquire(user_id, challenge_id).await?;
        let result = self
            .submit_locked(&challenge, user_id, challenge_id, text)
            .await;
        lease.release().await;
        result
    }

    async fn submit_locked(
        &self,
        challenge: &Challenge,
        user_id: i64,
        challenge_id: i64,
        text: &str,
    ) -> Result<SessionView, SessionError> {
        // The status may have flipped while we waited for the lease; this
        // re-check under the lease is the enforcement point for the
        // one-way state machine.
        let session = self
            .db
            .get_session(user_id, challenge_id)
            .await?
            .ok_or(SessionError::SessionNotFound)?;
        if session.status == SessionStatus::Succeeded {
            return Err(SessionError::AlreadyCompleted);
        }

        let turn = match self.gateway.send_message(&session.agent_ref, text).await {
            Ok(turn) => turn,
            Err(AgentError::AgentMissing(agent_ref)) => {
                tracing::error!(
                    "agent {} for session {} is gone; operator intervention required",
                    agent_ref,
                    session.id
                );
                return Err(SessionError::AgentMissing);
            }
            // Nothing was persisted, so the transcript stays untouched
            Err(e) => return Err(SessionError::AgentUnavailable(e.to_string())),
        };
        metrics::MESSAGES_SUBMITTED_TOTAL.inc();

        let tool_called = turn.invoked(&challenge.success_tool);
        let (updated, newly_succeeded) = match self
            .db
            .append_exchange(session.id, text, &turn.text, tool_called)
            .await?
        {
            Some(outcome) => outcome,
            // The session completed under a newer lease while our agent
            // call was in flight; nothing was written
            None => return Err(SessionError::AlreadyCompleted),
        };

        if newly_succeeded {
            metrics::CHALLENGES_SUCCEEDED_TOTAL.inc();
            tracing::info!(
                "user {} completed challenge {} (session {})",
                user_id,
                challenge_id,
                session.id
            );
            self.spawn_badge_award(user_id, challenge_id);
        }

        let turns = self.db.list_turns(updated.id).await?;
        Ok(SessionView::build(&updated, turns))
    }

    /// Badge issuance is fire-and-forget: a failed award must not fail the
    /// submission that completed the challenge, and the award itself is
    /// idempotent.
    fn spawn_badge_award(&self, user_id: i64, challenge_id: i64) {
        let db = self.db.clone();
        tokio::spawn(async move {
            match db.award_challenge_badges(user_id, challenge_id).await {
                Ok(awarded) => {
                    metrics::BADGES_AWARDED_TOTAL.inc_by(awarded);
                    if awarded > 0 {
                        tracing::info!(
                            "awarded {} badge(s) to user {} for challenge {}",
                            awarded,
                            user_id,
                            challenge_id
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        "badge award failed for user {} challenge {}: {}",
                        user_id,
                        challenge_id,
                        e
                    );
                }
            }
        });
    }

    /// Snapshot of the session for display. No locking.
    pub async fn context(
        &self,
        user_id: i64,
        challenge_id: i64,
    ) -> Result<SessionView, SessionError> {
        if self.db.get_challenge(challenge_id).await?.is_none() {
            return Err(SessionError::ChallengeNotFound);
        }
        let session = self
            .db
            .get_session(user_id, challenge_id)
            .await?
            .ok_or(SessionError::SessionNotFound)?;
        let turns = self.db.list_turns(session.id).await?;
        Ok(SessionView::build(&session, turns))
    }
}
