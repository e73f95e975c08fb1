// Application configuration, loaded from environment variables and CLI flags.

use std::time::Duration;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Database URL (SQLite connection string).
    pub database_url: String,
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// Base URL of the conversational-agent service.
    pub agent_service_url: String,
    /// Bearer token for the agent service, if it requires one.
    pub agent_service_token: Option<String>,
    /// Model identifier the agent service provisions agents with.
    pub agent_model: String,
    /// Per-request timeout for agent service calls.
    pub agent_timeout: Duration,
    /// Upper bound on waiting for a session lease before failing busy.
    pub lock_wait_timeout: Duration,
    /// Lifetime of a session lease. Must exceed the agent timeout plus
    /// storage writes, or a slow turn could lose its lease mid-flight.
    pub lease_ttl: Duration,
    /// Whether to run in local mode (no auth, no rate limiting).
    pub local_mode: bool,
}

impl Config {
    /// Load configuration from environment variables and CLI arguments.
    ///
    /// Environment variables:
    /// - `DATABASE_URL` - SQLite connection string (default: `sqlite:wargames.db?mode=rwc`)
    /// - `PORT` - HTTP server port (default: 3000)
    /// - `AGENT_SERVICE_URL` - Agent service base URL (default: `http://localhost:8283`)
    /// - `AGENT_SERVICE_TOKEN` - Bearer token for the agent service
    /// - `AGENT_MODEL` - Model handle for provisioned agents (default: `openai/gpt-4o-mini`)
    /// - `AGENT_TIMEOUT_SECS` - Agent request timeout (default: 30)
    /// - `LOCK_WAIT_TIMEOUT_MS` - Session lease wait bound (default: 5000)
    /// - `LEASE_TTL_SECS` - Session lease lifetime (default: 90)
    /// - `WARGAMES_LOCAL_MODE` - Set to `true` to enable local mode
    ///
    /// CLI flags:
    /// - `--local` - Enable local mode (same as `WARGAMES_LOCAL_MODE=true`)
    /// - `--port <PORT>` - Override the port
    /// - `--database-url <URL>` - Override the database URL
    pub fn load() -> Self {
        let args: Vec<String> = std::env::args().collect();

        let database_url = Self::parse_cli_value(&args, "--database-url")
            .or_else(|| std::env::var("DATABASE_URL").ok())
            .unwrap_or_else(|| "sqlite:wargames.db?mode=rwc".to_string());

        // Port: CLI flag --port takes precedence, then env var, then default
        let port = Self::parse_cli_value(&args, "--port")
            .and_then(|v| v.parse().ok())
            .or_else(|| std::env::var("PORT").ok().and_then(|v| v.parse().ok()))
            .unwrap_or(3000);

        let agent_service_url = std::env::var("AGENT_SERVICE_URL")
            .unwrap_or_else(|_| "http://localhost:8283".to_string());

        let agent_service_token = std::env::var("AGENT_SERVICE_TOKEN").ok();

        let agent_model =
            std::env::var("AGENT_MODEL").unwrap_or_else(|_| "openai/gpt-4o-mini".to_string());

        let agent_timeout = Duration::from_secs(Self::env_u64("AGENT_TIMEOUT_SECS", 30));
        let lock_wait_timeout =
            Duration::from_millis(Self::env_u64("LOCK_WAIT_TIMEOUT_MS", 5000));
        let lease_ttl = Duration::from_secs(Self::env_u64("LEASE_TTL_SECS", 90));

        if lease_ttl <= agent_timeout {
            tracing::warn!(
                "LEASE_TTL_SECS ({:?}) does not exceed AGENT_TIMEOUT_SECS ({:?}); \
                 a slow agent turn may lose its session lease while still running",
                lease_ttl,
                agent_timeout
            );
        }

        let local_mode = args.contains(&"--local".to_string())
            || std::env::var("WARGAMES_LOCAL_MODE")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(false);

        Config {
            database_url,
            port,
            agent_service_url,
            agent_service_token,
            agent_model,
            agent_timeout,
            lock_wait_timeout,
            lease_ttl,
            local_mode,
        }
    }

    /// Parse a CLI flag value like `--port 8080`.
    fn parse_cli_value(args: &[String], flag: &str) -> Option<String> {
        args.windows(2).find_map(|pair| {
            if pair[0] == flag {
                Some(pair[1].clone())
            } else {
                None
            }
        })
    }

    fn env_u64(name: &str, default: u64) -> u64 {
        std::env::var(name)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }
}

/// Global flag indicating local mode is active.
/// This is set once at startup and read by auth extractors.
static LOCAL_MODE: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(false);

/// Set the local mode flag (called once at startup).
pub fn set_local_mode(enabled: bool) {
    LOCAL_MODE.store(enabled, std::sync::atomic::Ordering::Relaxed);
}

/// Check if local mode is active.
pub fn is_local_mode() -> bool {
    LOCAL_MODE.load(std::sync::atomic::Ordering::Relaxed)
}

/// Token subject used for the auto-created local user.
pub const LOCAL_SUBJECT: &str = "local";
