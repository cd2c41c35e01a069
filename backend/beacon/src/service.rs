//! Project registry and question board.
//!
//! The service owns normalization (lowercase wallets, capped question text),
//! id assignment, timestamps and ordering. Atomicity of the mutating paths is
//! delegated to the injected [`QaStore`]. No authorization happens here;
//! callers gate requests through [`crate::policy`] first.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::errors::{BeaconError, Result};
use crate::models::{NewProject, NewQuestion, Project, Question, Registered};
use crate::store::QaStore;

pub const DEFAULT_MAX_QUESTION_CHARS: usize = 500;

#[derive(Clone)]
pub struct BeaconService {
    store: Arc<dyn QaStore>,
    max_question_chars: usize,
}

impl BeaconService {
    pub fn new(store: Arc<dyn QaStore>, max_question_chars: usize) -> Self {
        Self {
            store,
            max_question_chars,
        }
    }

    // ─────────────────────────────────────────────────────────
    // Project registry
    // ─────────────────────────────────────────────────────────

    /// All projects with their question counts, newest first.
    pub async fn list_projects_with_counts(&self) -> Result<Vec<Project>> {
        let mut projects = self.store.list_projects().await?;
        projects.sort_by(newest_project_first);
        Ok(projects)
    }

    pub async fn get_project(&self, project_id: &str) -> Result<Option<Project>> {
        self.store.get_project(project_id).await
    }

    /// Register a project, or return the one already registered for the same
    /// token address (case-insensitive) and chain.
    pub async fn create_project(&self, input: NewProject) -> Result<Registered> {
        require("tokenAddress", &input.token_address)?;
        require("adminWallet", &input.admin_wallet)?;

        let candidate = Project {
            id: new_id("proj"),
            token_symbol: input.token_symbol,
            token_address: input.token_address,
            chain: input.chain,
            admin_wallet: input.admin_wallet.to_lowercase(),
            admin_fid: input.admin_fid,
            admin_username: input.admin_username,
            created_at: now_millis(),
            total_questions: 0,
        };

        let (project, created) = self.store.insert_project_if_absent(candidate).await?;
        if created {
            info!(
                "Registered project {} for {} on {}",
                project.id, project.token_address, project.chain
            );
        } else {
            info!(
                "Project for {} on {} already registered as {}",
                project.token_address, project.chain, project.id
            );
        }

        Ok(Registered { project, created })
    }

    // ─────────────────────────────────────────────────────────
    // Question board
    // ─────────────────────────────────────────────────────────

    /// Questions for one project, most votes first, then newest first.
    pub async fn list_questions_for_project(&self, project_id: &str) -> Result<Vec<Question>> {
        let mut questions = self.store.list_questions(project_id).await?;
        rank_questions(&mut questions);
        Ok(questions)
    }

    pub async fn get_question(&self, question_id: &str) -> Result<Option<Question>> {
        self.store.get_question(question_id).await
    }

    /// Submit a question. Text longer than the configured cap is truncated.
    pub async fn create_question(&self, input: NewQuestion) -> Result<Question> {
        require("projectId", &input.project_id)?;
        require("text", &input.text)?;
        require("walletAddress", &input.wallet_address)?;

        let question = Question {
            id: new_id("q"),
            project_id: input.project_id,
            text: truncate_chars(&input.text, self.max_question_chars),
            author_fid: input.author_fid,
            author_username: input.author_username,
            wallet_address: input.wallet_address.to_lowercase(),
            votes: 0,
            voters: Vec::new(),
            created_at: now_millis(),
        };

        self.store.insert_question(&question).await?;
        info!(
            "Question {} submitted to project {}",
            question.id, question.project_id
        );
        Ok(question)
    }

    /// Record one upvote per wallet. A repeat vote returns the question
    /// unchanged.
    pub async fn upvote_question(&self, question_id: &str, wallet_address: &str) -> Result<Question> {
        require("questionId", question_id)?;
        require("walletAddress", wallet_address)?;

        let wallet = wallet_address.to_lowercase();
        self.store
            .add_voter(question_id, &wallet)
            .await?
            .ok_or_else(|| BeaconError::NotFound(format!("Question {question_id}")))
    }
}

// ─────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────

/// Sort by votes desc, then `created_at` desc, then id desc so that equal
/// votes and timestamps still order deterministically.
pub fn rank_questions(questions: &mut [Question]) {
    questions.sort_by(|a, b| {
        b.votes
            .cmp(&a.votes)
            .then_with(|| b.created_at.cmp(&a.created_at))
            .then_with(|| b.id.cmp(&a.id))
    });
}

fn newest_project_first(a: &Project, b: &Project) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.id.cmp(&a.id))
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(BeaconError::Validation(format!("{field} is required")));
    }
    Ok(())
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((end, _)) => text[..end].to_string(),
        None => text.to_string(),
    }
}

fn new_id(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4().simple())
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
