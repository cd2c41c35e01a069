//! Records owned by the Q&A service.
//!
//! Field names serialize in camelCase because that is the shape the mini-app
//! client consumes.

use serde::{Deserialize, Serialize};

/// A token project hosting a Q&A board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub token_symbol: String,
    /// Stored as provided; compared case-insensitively.
    pub token_address: String,
    pub chain: String,
    /// Always lowercase.
    pub admin_wallet: String,
    pub admin_fid: u64,
    pub admin_username: String,
    /// Epoch milliseconds.
    pub created_at: i64,
    /// Number of questions on this project, computed at read time.
    pub total_questions: u64,
}

impl Project {
    /// The `(lowercase token address, chain)` pair a project is unique on.
    pub fn dedup_key(&self) -> ProjectKey {
        ProjectKey::new(&self.token_address, &self.chain)
    }
}

/// Identity of a project for de-duplication purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProjectKey {
    pub token_key: String,
    pub chain: String,
}

impl ProjectKey {
    pub fn new(token_address: &str, chain: &str) -> Self {
        Self {
            token_key: token_address.to_lowercase(),
            chain: chain.to_string(),
        }
    }
}

/// A question submitted to a project's board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub project_id: String,
    pub text: String,
    pub author_fid: u64,
    pub author_username: String,
    /// Submitter's wallet, lowercase.
    pub wallet_address: String,
    /// Always equal to `voters.len()`.
    pub votes: u64,
    /// Lowercase wallets in the order they voted.
    pub voters: Vec<String>,
    /// Epoch milliseconds.
    pub created_at: i64,
}

impl Question {
    pub fn has_voted(&self, wallet: &str) -> bool {
        self.voters.iter().any(|v| v == wallet)
    }
}

/// Input to project registration, before normalization.
#[derive(Debug, Clone)]
pub struct NewProject {
    pub token_symbol: String,
    pub token_address: String,
    pub chain: String,
    pub admin_wallet: String,
    pub admin_fid: u64,
    pub admin_username: String,
}

/// Input to question submission, before normalization.
#[derive(Debug, Clone)]
pub struct NewQuestion {
    pub project_id: String,
    pub text: String,
    pub author_fid: u64,
    pub author_username: String,
    pub wallet_address: String,
}

/// Result of an idempotent project registration.
#[derive(Debug, Clone)]
pub struct Registered {
    pub project: Project,
    /// `false` when an existing project for the same token/chain was returned.
    pub created: bool,
}
