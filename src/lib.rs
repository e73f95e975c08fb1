// Wargames backend: tournament catalog, per-user challenge sessions and
// the conversational-agent gateway.

pub mod agent;
pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod llms_txt;
pub mod lock;
pub mod metrics;
pub mod rate_limit;
pub mod session;
