// LLM-friendly documentation endpoint content.

pub const LLMS_TXT: &str = r#"# Wargames API
> A tournament platform where users complete challenges by convincing a per-challenge AI agent to invoke a designated tool.

## API Base URL
/api/

## Authentication
Bearer token (JWT issued by the identity provider)

## Key Endpoints
- GET /api/tournaments - List tournaments (selection_filter, page_index, count)
- GET /api/tournaments/{id} - Get tournament details
- POST /api/tournaments/{id}/join - Join a running tournament (idempotent)
- GET /api/challenges - List challenges (tournament_id, page_index, count)
- GET /api/challenges/{id} - Get challenge details
- POST /api/challenges/{id}/start - Start (or resume) your challenge session
- POST /api/challenges/{id}/submit_message - Send a message to the challenge agent
- GET /api/challenges/{id}/context - Get your session transcript and status
- GET /api/badges - List badges (user_badges_only, page_index, count)
- GET /api/badges/{id} - Get badge details
- GET /api/users/me - Current user, active tournaments, open challenges, badges

## Challenge Flow
1. Join a running tournament.
2. Start a challenge to get a personal agent session.
3. Exchange messages with the agent via submit_message.
4. The challenge completes the moment the agent invokes the challenge's
   success tool; the session freezes and badges are awarded.

A completed session rejects further messages with 409 and returns the frozen
transcript. 429 with a Retry-After header means another submission for the
same session is still in flight.

## Health
- GET /health - Liveness check
- GET /metrics - Prometheus metrics
"#;
