//! Application configuration loaded from environment variables.

use std::str::FromStr;

use crate::errors::{BeaconError, Result};
use crate::policy::{AccessPolicies, Policy};
use crate::service::DEFAULT_MAX_QUESTION_CHARS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = BeaconError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            other => Err(BeaconError::Config(format!(
                "Invalid STORE_BACKEND {other:?} (expected sqlite or memory)"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Which [`crate::store::QaStore`] backend to run
    pub store_backend: StoreBackend,
    /// Path to the SQLite database file
    pub database_url: String,
    /// Port for the REST API server
    pub api_port: u16,
    /// EVM JSON-RPC endpoint used for balance and owner reads
    pub rpc_url: String,
    /// Neynar bulk user lookup endpoint
    pub neynar_api_url: String,
    /// Neynar API key; trust checks fail closed without it
    pub neynar_api_key: Option<String>,
    /// Minimum social score for the `trusted` gate
    pub trust_threshold: f64,
    /// Question text is truncated to this many characters
    pub max_question_chars: usize,
    /// Timeout for outbound gateway requests
    pub http_timeout_secs: u64,
    pub policies: AccessPolicies,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            store_backend: env_or("STORE_BACKEND", "sqlite").parse()?,
            database_url: env_or("DATABASE_URL", "sqlite:./beacon.db"),
            api_port: parse_env("API_PORT", "3001")?,
            rpc_url: env_or("RPC_URL", "https://mainnet.base.org"),
            neynar_api_url: env_or(
                "NEYNAR_API_URL",
                "https://api.neynar.com/v2/farcaster/user/bulk",
            ),
            neynar_api_key: env_var("NEYNAR_API_KEY").ok().filter(|k| !k.is_empty()),
            trust_threshold: parse_env("TRUST_THRESHOLD", "0.8")?,
            max_question_chars: parse_env(
                "MAX_QUESTION_CHARS",
                &DEFAULT_MAX_QUESTION_CHARS.to_string(),
            )?,
            http_timeout_secs: parse_env("HTTP_TIMEOUT_SECS", "30")?,
            policies: AccessPolicies {
                create_project: policy_env("PROJECT_POLICY", "admin")?,
                submit_question: policy_env("QUESTION_POLICY", "holder|admin")?,
                upvote: policy_env("UPVOTE_POLICY", "open")?,
            },
        })
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| BeaconError::Config(format!("Missing env var: {key}")))
}

fn env_or(key: &str, default: &str) -> String {
    env_var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: FromStr>(key: &str, default: &str) -> Result<T> {
    env_or(key, default)
        .trim()
        .parse()
        .map_err(|_| BeaconError::Config(format!("Invalid {key}")))
}

fn policy_env(key: &str, default: &str) -> Result<Policy> {
    env_or(key, default)
        .parse()
        .map_err(|e| BeaconError::Config(format!("Invalid {key}: {e}")))
}
