// Database access layer (SQLite via sqlx).

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

/// Lifecycle of a challenge session. `Succeeded` is terminal; there is no
/// transition out of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Succeeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

/// Tournament date listing filters, mirroring the query parameter values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionFilter {
    PastOnly,
    ActiveOnly,
    FutureOnly,
    PastAndActive,
    ActiveAndFuture,
}

impl Default for SelectionFilter {
    fn default() -> Self {
        SelectionFilter::ActiveOnly
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub subject: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Tournament {
    pub id: i64,
    pub name: String,
    pub description: String,
    /// Unix seconds, inclusive window bounds.
    pub start_date: i64,
    pub end_date: i64,
    pub created_at: String,
}

impl Tournament {
    pub fn is_running(&self, now: i64) -> bool {
        self.start_date <= now && now <= self.end_date
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Challenge {
    pub id: i64,
    pub tournament_id: i64,
    pub name: String,
    pub description: String,
    /// Tool name whose invocation by the agent completes the challenge.
    pub success_tool: String,
    /// Optional JSON array of extra tool names the agent is provisioned with.
    pub required_tools: Option<String>,
    pub created_at: String,
}

impl Challenge {
    /// Tool names the challenge agent is provisioned with, success tool first.
    /// Malformed extra-tool JSON is skipped with a warning.
    pub fn agent_tools(&self) -> Vec<String> {
        let mut tools = vec![self.success_tool.clone()];
        if let Some(raw) = &self.required_tools {
            match serde_json::from_str::<Vec<String>>(raw) {
                Ok(extra) => {
                    for tool in extra {
                        if !tools.contains(&tool) {
                            tools.push(tool);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        "challenge {} has malformed required_tools, ignoring: {}",
                        self.id,
                        e
                    );
                }
            }
        }
        tools
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Badge {
    pub id: i64,
    pub challenge_id: i64,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChallengeSession {
    pub id: i64,
    pub user_id: i64,
    pub challenge_id: i64,
    /// Remote identifier of the provisioned agent.
    pub agent_ref: String,
    pub status: SessionStatus,
    pub created_at: String,
    pub updated_at: String,
}

impl ChallengeSession {
    /// A session accepts messages only while it is active.
    pub fn can_contribute(&self) -> bool {
        self.status == SessionStatus::Active
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SessionTurn {
    pub id: i64,
    pub session_id: i64,
    pub seq: i64,
    pub role: TurnRole,
    pub content: String,
    pub tool_called: bool,
    pub created_at: String,
}

const SESSION_COLUMNS: &str =
    "id, user_id, challenge_id, agent_ref, status, created_at, updated_at";
const TOURNAMENT_COLUMNS: &str = "id, name, description, start_date, end_date, created_at";
const CHALLENGE_COLUMNS: &str =
    "id, tournament_id, name, description, success_tool, required_tools, created_at";

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        // A pooled in-memory SQLite database gives every connection its own
        // empty database, so pin the pool to a single connection there.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subject TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tournaments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                start_date INTEGER NOT NULL,
                end_date INTEGER NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS challenges (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tournament_id INTEGER NOT NULL REFERENCES tournaments(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                success_tool TEXT NOT NULL CHECK (success_tool <> ''),
                required_tools TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tournament_enrollments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                tournament_id INTEGER NOT NULL REFERENCES tournaments(id) ON DELETE CASCADE,
                enrolled_at TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE(user_id, tournament_id)
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS badges (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                challenge_id INTEGER NOT NULL REFERENCES challenges(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT ''
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_badges (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                badge_id INTEGER NOT NULL REFERENCES badges(id) ON DELETE CASCADE,
                awarded_at TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE(user_id, badge_id)
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS challenge_sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                challenge_id INTEGER NOT NULL REFERENCES challenges(id) ON DELETE CASCADE,
                agent_ref TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active', 'succeeded')),
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE(user_id, challenge_id)
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS session_turns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id INTEGER NOT NULL REFERENCES challenge_sessions(id) ON DELETE CASCADE,
                seq INTEGER NOT NULL,
                role TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
                content TEXT NOT NULL,
                tool_called INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE(session_id, seq)
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS session_leases (
                user_id INTEGER NOT NULL,
                challenge_id INTEGER NOT NULL,
                holder TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                PRIMARY KEY (user_id, challenge_id)
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ── Users ─────────────────────────────────────────────────────────

    /// Look up the local user for a token subject, creating the row on
    /// first sight.
    pub async fn ensure_user(&self, subject: &str) -> Result<User, sqlx::Error> {
        let inserted = sqlx::query_as::<_, User>(
            "INSERT INTO users (subject) VALUES (?) ON CONFLICT(subject) DO NOTHING RETURNING id, subject, created_at",
        )
        .bind(subject)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(user) = inserted {
            return Ok(user);
        }
        sqlx::query_as::<_, User>("SELECT id, subject, created_at FROM users WHERE subject = ?")
            .bind(subject)
            .fetch_one(&self.pool)
            .await
    }

    // ── Tournaments ───────────────────────────────────────────────────

    pub async fn create_tournament(
        &self,
        name: &str,
        description: &str,
        start_date: i64,
        end_date: i64,
    ) -> Result<Tournament, sqlx::Error> {
        let sql = format!(
            "INSERT INTO tournaments (name, description, start_date, end_date) VALUES (?, ?, ?, ?) RETURNING {TOURNAMENT_COLUMNS}"
        );
        sqlx::query_as::<_, Tournament>(&sql)
            .bind(name)
            .bind(description)
            .bind(start_date)
            .bind(end_date)
            .fetch_one(&self.pool)
            .await
    }

    pub async fn list_tournaments(
        &self,
        filter: SelectionFilter,
        page_index: i64,
        count: i64,
    ) -> Result<Vec<Tournament>, sqlx::Error> {
        let now = chrono::Utc::now().timestamp();
        let offset = page_index * count;
        let rows = match filter {
            SelectionFilter::ActiveOnly => {
                let sql = format!(
                    "SELECT {TOURNAMENT_COLUMNS} FROM tournaments WHERE start_date <= ? AND end_date >= ? ORDER BY start_date, id LIMIT ? OFFSET ?"
                );
                sqlx::query_as::<_, Tournament>(&sql)
                    .bind(now)
                    .bind(now)
                    .bind(count)
                    .bind(offset)
                    .fetch_all(&self.pool)
                    .await?
            }
            SelectionFilter::PastOnly => {
                let sql = format!(
                    "SELECT {TOURNAMENT_COLUMNS} FROM tournaments WHERE end_date < ? ORDER BY start_date, id LIMIT ? OFFSET ?"
                );
                sqlx::query_as::<_, Tournament>(&sql)
                    .bind(now)
                    .bind(count)
                    .bind(offset)
                    .fetch_all(&self.pool)
                    .await?
            }
            SelectionFilter::FutureOnly => {
                let sql = format!(
                    "SELECT {TOURNAMENT_COLUMNS} FROM tournaments WHERE start_date > ? ORDER BY start_date, id LIMIT ? OFFSET ?"
                );
                sqlx::query_as::<_, Tournament>(&sql)
                    .bind(now)
                    .bind(count)
                    .bind(offset)
                    .fetch_all(&self.pool)
                    .await?
            }
            SelectionFilter::PastAndActive => {
                let sql = format!(
                    "SELECT {TOURNAMENT_COLUMNS} FROM tournaments WHERE start_date <= ? ORDER BY start_date, id LIMIT ? OFFSET ?"
                );
                sqlx::query_as::<_, Tournament>(&sql)
                    .bind(now)
                    .bind(count)
                    .bind(offset)
                    .fetch_all(&self.pool)
                    .await?
            }
            SelectionFilter::ActiveAndFuture => {
                let sql = format!(
                    "SELECT {TOURNAMENT_COLUMNS} FROM tournaments WHERE end_date >= ? ORDER BY start_date, id LIMIT ? OFFSET ?"
                );
                sqlx::query_as::<_, Tournament>(&sql)
                    .bind(now)
                    .bind(count)
                    .bind(offset)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(rows)
    }

    pub async fn get_tournament(&self, id: i64) -> Result<Option<Tournament>, sqlx::Error> {
        let sql = format!("SELECT {TOURNAMENT_COLUMNS} FROM tournaments WHERE id = ?");
        sqlx::query_as::<_, Tournament>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Enroll a user in a tournament. Returns false when the user was
    /// already enrolled.
    pub async fn enroll_user(
        &self,
        user_id: i64,
        tournament_id: i64,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO tournament_enrollments (user_id, tournament_id) VALUES (?, ?) ON CONFLICT(user_id, tournament_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(tournament_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn is_enrolled(
        &self,
        user_id: i64,
        tournament_id: i64,
    ) -> Result<bool, sqlx::Error> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM tournament_enrollments WHERE user_id = ? AND tournament_id = ?",
        )
        .bind(user_id)
        .bind(tournament_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    /// Tournaments the user is enrolled in whose window covers now.
    pub async fn active_tournaments_for_user(
        &self,
        user_id: i64,
    ) -> Result<Vec<Tournament>, sqlx::Error> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query_as::<_, Tournament>(
            "SELECT t.id, t.name, t.description, t.start_date, t.end_date, t.created_at \
             FROM tournaments t \
             JOIN tournament_enrollments e ON e.tournament_id = t.id \
             WHERE e.user_id = ? AND t.start_date <= ? AND t.end_date >= ? \
             ORDER BY t.start_date, t.id",
        )
            .bind(user_id)
            .bind(now)
            .bind(now)
            .fetch_all(&self.pool)
            .await
    }

    // ── Challenges ────────────────────────────────────────────────────

    pub async fn create_challenge(
        &self,
        tournament_id: i64,
        name: &str,
        description: &str,
        success_tool: &str,
        required_tools: Option<&str>,
    ) -> Result<Challenge, sqlx::Error> {
        let sql = format!(
            "INSERT INTO challenges (tournament_id, name, description, success_tool, required_tools) VALUES (?, ?, ?, ?, ?) RETURNING {CHALLENGE_COLUMNS}"
        );
        sqlx::query_as::<_, Challenge>(&sql)
            .bind(tournament_id)
            .bind(name)
            .bind(description)
            .bind(success_tool)
            .bind(required_tools)
            .fetch_one(&self.pool)
            .await
    }

    pub async fn list_challenges(
        &self,
        tournament_id: Option<i64>,
        page_index: i64,
        count: i64,
    ) -> Result<Vec<Challenge>, sqlx::Error> {
        let offset = page_index * count;
        let rows = match tournament_id {
            Some(tid) => {
                let sql = format!(
                    "SELECT {CHALLENGE_COLUMNS} FROM challenges WHERE tournament_id = ? ORDER BY id LIMIT ? OFFSET ?"
                );
                sqlx::query_as::<_, Challenge>(&sql)
                    .bind(tid)
                    .bind(count)
                    .bind(offset)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql = format!(
                    "SELECT {CHALLENGE_COLUMNS} FROM challenges ORDER BY id LIMIT ? OFFSET ?"
                );
                sqlx::query_as::<_, Challenge>(&sql)
                    .bind(count)
                    .bind(offset)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(rows)
    }

    pub async fn get_challenge(&self, id: i64) -> Result<Option<Challenge>, sqlx::Error> {
        let sql = format!("SELECT {CHALLENGE_COLUMNS} FROM challenges WHERE id = ?");
        sqlx::query_as::<_, Challenge>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Challenges where the user holds an active session in a currently
    /// running tournament.
    pub async fn active_challenges_for_user(
        &self,
        user_id: i64,
    ) -> Result<Vec<Challenge>, sqlx::Error> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query_as::<_, Challenge>(
            "SELECT c.id, c.tournament_id, c.name, c.description, c.success_tool, c.required_tools, c.created_at \
             FROM challenges c \
             JOIN challenge_sessions s ON s.challenge_id = c.id \
             JOIN tournaments t ON t.id = c.tournament_id \
             WHERE s.user_id = ? AND s.status = 'active' \
               AND t.start_date <= ? AND t.end_date >= ? \
             ORDER BY c.id",
        )
            .bind(user_id)
            .bind(now)
            .bind(now)
            .fetch_all(&self.pool)
            .await
    }

    // ── Badges ────────────────────────────────────────────────────────

    pub async fn create_badge(
        &self,
        challenge_id: i64,
        name: &str,
        description: &str,
    ) -> Result<Badge, sqlx::Error> {
        sqlx::query_as::<_, Badge>(
            "INSERT INTO badges (challenge_id, name, description) VALUES (?, ?, ?) RETURNING id, challenge_id, name, description",
        )
        .bind(challenge_id)
        .bind(name)
        .bind(description)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn list_badges(
        &self,
        page_index: i64,
        count: i64,
    ) -> Result<Vec<Badge>, sqlx::Error> {
        sqlx::query_as::<_, Badge>(
            "SELECT id, challenge_id, name, description FROM badges ORDER BY id LIMIT ? OFFSET ?",
        )
        .bind(count)
        .bind(page_index * count)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn get_badge(&self, id: i64) -> Result<Option<Badge>, sqlx::Error> {
        sqlx::query_as::<_, Badge>(
            "SELECT id, challenge_id, name, description FROM badges WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Badges the user has earned, newest award first.
    pub async fn earned_badges(
        &self,
        user_id: i64,
        page_index: i64,
        count: i64,
    ) -> Result<Vec<Badge>, sqlx::Error> {
        sqlx::query_as::<_, Badge>(
            "SELECT b.id, b.challenge_id, b.name, b.description FROM badges b \
             JOIN user_badges ub ON ub.badge_id = b.id \
             WHERE ub.user_id = ? ORDER BY ub.awarded_at DESC, b.id LIMIT ? OFFSET ?",
        )
        .bind(user_id)
        .bind(count)
        .bind(page_index * count)
        .fetch_all(&self.pool)
        .await
    }

    /// Award every badge attached to a challenge to the user. Awards the
    /// user already holds are left untouched. Returns the number of new
    /// awards.
    pub async fn award_challenge_badges(
        &self,
        user_id: i64,
        challenge_id: i64,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO user_badges (user_id, badge_id) \
             SELECT ?, id FROM badges WHERE challenge_id = ? \
             ON CONFLICT(user_id, badge_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(challenge_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    // ── Challenge sessions ────────────────────────────────────────────

    /// Insert a new session row. Returns None when a session for this
    /// (user, challenge) already exists; the caller re-reads the winner.
    pub async fn create_session(
        &self,
        user_id: i64,
        challenge_id: i64,
        agent_ref: &str,
    ) -> Result<Option<ChallengeSession>, sqlx::Error> {
        let sql = format!(
            "INSERT INTO challenge_sessions (user_id, challenge_id, agent_ref) VALUES (?, ?, ?) \
             ON CONFLICT(user_id, challenge_id) DO NOTHING RETURNING {SESSION_COLUMNS}"
        );
        sqlx::query_as::<_, ChallengeSession>(&sql)
            .bind(user_id)
            .bind(challenge_id)
            .bind(agent_ref)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn get_session(
        &self,
        user_id: i64,
        challenge_id: i64,
    ) -> Result<Option<ChallengeSession>, sqlx::Error> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM challenge_sessions WHERE user_id = ? AND challenge_id = ?"
        );
        sqlx::query_as::<_, ChallengeSession>(&sql)
            .bind(user_id)
            .bind(challenge_id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn list_turns(&self, session_id: i64) -> Result<Vec<SessionTurn>, sqlx::Error> {
        sqlx::query_as::<_, SessionTurn>(
            "SELECT id, session_id, seq, role, content, tool_called, created_at \
             FROM session_turns WHERE session_id = ? ORDER BY seq",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
    }

    /// Append one user/assistant turn pair and, when the assistant turn
    /// carried the success tool, flip the session to succeeded. All writes
    /// happen in a single transaction so readers never observe a partial
    /// exchange. Returns the updated session and whether this call caused
    /// the active-to-succeeded transition, or None (writing nothing) when
    /// the session is no longer active.
    pub async fn append_exchange(
        &self,
        session_id: i64,
        user_content: &str,
        assistant_content: &str,
        tool_called: bool,
    ) -> Result<Option<(ChallengeSession, bool)>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        // The caller's lease may have expired mid-call and the session may
        // have been completed under a newer one. The re-read inside the
        // transaction keeps late writes off a frozen transcript.
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM challenge_sessions WHERE id = ?")
                .bind(session_id)
                .fetch_optional(&mut *tx)
                .await?;
        if status.as_deref() != Some("active") {
            tx.rollback().await?;
            return Ok(None);
        }

        let max_seq: Option<i64> =
            sqlx::query_scalar("SELECT MAX(seq) FROM session_turns WHERE session_id = ?")
                .bind(session_id)
                .fetch_one(&mut *tx)
                .await?;
        let next_seq = max_seq.unwrap_or(0) + 1;

        sqlx::query(
            "INSERT INTO session_turns (session_id, seq, role, content, tool_called) VALUES (?, ?, 'user', ?, 0)",
        )
        .bind(session_id)
        .bind(next_seq)
        .bind(user_content)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO session_turns (session_id, seq, role, content, tool_called) VALUES (?, ?, 'assistant', ?, ?)",
        )
        .bind(session_id)
        .bind(next_seq + 1)
        .bind(assistant_content)
        .bind(tool_called)
        .execute(&mut *tx)
        .await?;

        // The status flip is guarded so a session that somehow already
        // succeeded can never be flipped twice.
        let newly_succeeded = if tool_called {
            let result = sqlx::query(
                "UPDATE challenge_sessions SET status = 'succeeded', updated_at = datetime('now') \
                 WHERE id = ? AND status = 'active'",
            )
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
            result.rows_affected() > 0
        } else {
            sqlx::query(
                "UPDATE challenge_sessions SET updated_at = datetime('now') WHERE id = ?",
            )
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
            false
        };

        let sql = format!("SELECT {SESSION_COLUMNS} FROM challenge_sessions WHERE id = ?");
        let session = sqlx::query_as::<_, ChallengeSession>(&sql)
            .bind(session_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some((session, newly_succeeded)))
    }

    // ── Session leases ────────────────────────────────────────────────

    /// Atomically claim the lease for (user, challenge). The stored lease
    /// is replaced only when it has expired; a live lease is never stolen.
    pub async fn try_claim_session_lease(
        &self,
        user_id: i64,
        challenge_id: i64,
        holder: &str,
        expires_at: i64,
        now: i64,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO session_leases (user_id, challenge_id, holder, expires_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT(user_id, challenge_id) DO UPDATE \
             SET holder = excluded.holder, expires_at = excluded.expires_at \
             WHERE session_leases.expires_at <= ?",
        )
        .bind(user_id)
        .bind(challenge_id)
        .bind(holder)
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete the lease if this holder still owns it. Returns false when
    /// the lease expired and was reclaimed by someone else in the meantime.
    pub async fn release_session_lease(
        &self,
        user_id: i64,
        challenge_id: i64,
        holder: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM session_leases WHERE user_id = ? AND challenge_id = ? AND holder = ?",
        )
        .bind(user_id)
        .bind(challenge_id)
        .bind(holder)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // ── Local fixtures ────────────────────────────────────────────────

    /// Seed a demo tournament, challenge and badge so local mode is usable
    /// out of the box. No-op when tournaments already exist.
    pub async fn seed_local_fixtures(&self) -> Result<(), sqlx::Error> {
        let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tournaments")
            .fetch_one(&self.pool)
            .await?;
        if existing > 0 {
            return Ok(());
        }

        let now = chrono::Utc::now().timestamp();
        let tournament = self
            .create_tournament(
                "Local Playground",
                "Auto-created tournament for local development",
                now - 3600,
                now + 30 * 24 * 3600,
            )
            .await?;
        let challenge = self
            .create_challenge(
                tournament.id,
                "Roll the dice",
                "Convince the agent to roll a d20 for you.",
                "roll_d20",
                None,
            )
            .await?;
        self.create_badge(challenge.id, "Dice Whisperer", "Completed the demo challenge")
            .await?;

        tracing::info!(
            "seeded local fixtures: tournament {} / challenge {}",
            tournament.id,
            challenge.id
        );
        Ok(())
    }
}
