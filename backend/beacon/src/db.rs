//! SQLite store — pool setup, migrations, and the [`QaStore`] queries.
//!
//! Atomicity comes from the schema rather than from locking:
//!
//! * `projects` carries `UNIQUE (token_key, chain)`, so concurrent
//!   registrations of the same pair collapse onto one row.
//! * `question_voters` carries `UNIQUE (question_id, wallet)` and `votes` is
//!   never stored. It is the length of the voter list read in the same query,
//!   so `votes == |voters|` holds on every returned snapshot.

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::errors::{BeaconError, Result};
use crate::models::{Project, Question};
use crate::store::QaStore;

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    let options = SqliteConnectOptions::from_str(&url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

// ─────────────────────────────────────────────────────────
// Row shapes
// ─────────────────────────────────────────────────────────

#[derive(sqlx::FromRow)]
struct ProjectRow {
    id: String,
    token_symbol: String,
    token_address: String,
    chain: String,
    admin_wallet: String,
    admin_fid: i64,
    admin_username: String,
    created_at: i64,
    total_questions: i64,
}

impl From<ProjectRow> for Project {
    fn from(row: ProjectRow) -> Self {
        Project {
            id: row.id,
            token_symbol: row.token_symbol,
            token_address: row.token_address,
            chain: row.chain,
            admin_wallet: row.admin_wallet,
            admin_fid: u64::try_from(row.admin_fid).unwrap_or_default(),
            admin_username: row.admin_username,
            created_at: row.created_at,
            total_questions: u64::try_from(row.total_questions).unwrap_or_default(),
        }
    }
}

#[derive(sqlx::FromRow)]
struct QuestionRow {
    id: String,
    project_id: String,
    text: String,
    author_fid: i64,
    author_username: String,
    wallet_address: String,
    created_at: i64,
}

impl QuestionRow {
    fn into_question(self, voters: Vec<String>) -> Question {
        Question {
            id: self.id,
            project_id: self.project_id,
            text: self.text,
            author_fid: u64::try_from(self.author_fid).unwrap_or_default(),
            author_username: self.author_username,
            wallet_address: self.wallet_address,
            votes: voters.len() as u64,
            voters,
            created_at: self.created_at,
        }
    }
}

const PROJECT_COLUMNS: &str = r#"
    SELECT p.id, p.token_symbol, p.token_address, p.chain, p.admin_wallet,
           p.admin_fid, p.admin_username, p.created_at,
           (SELECT COUNT(*) FROM questions q WHERE q.project_id = p.id) AS total_questions
    FROM   projects p
"#;

const QUESTION_COLUMNS: &str = r#"
    SELECT q.id, q.project_id, q.text, q.author_fid, q.author_username,
           q.wallet_address, q.created_at
    FROM   questions q
"#;

fn fid_to_i64(fid: u64) -> Result<i64> {
    i64::try_from(fid).map_err(|_| BeaconError::Validation(format!("fid {fid} is out of range")))
}

// ─────────────────────────────────────────────────────────
// Store implementation
// ─────────────────────────────────────────────────────────

#[async_trait]
impl QaStore for SqliteStore {
    async fn list_projects(&self) -> Result<Vec<Project>> {
        let rows = sqlx::query_as::<_, ProjectRow>(PROJECT_COLUMNS)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Project::from).collect())
    }

    async fn get_project(&self, id: &str) -> Result<Option<Project>> {
        let row = sqlx::query_as::<_, ProjectRow>(&format!("{PROJECT_COLUMNS} WHERE p.id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Project::from))
    }

    async fn insert_project_if_absent(&self, project: Project) -> Result<(Project, bool)> {
        let key = project.dedup_key();

        let inserted = sqlx::query(
            r#"
            INSERT INTO projects
                (id, token_symbol, token_address, token_key, chain,
                 admin_wallet, admin_fid, admin_username, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT (token_key, chain) DO NOTHING
            "#,
        )
        .bind(&project.id)
        .bind(&project.token_symbol)
        .bind(&project.token_address)
        .bind(&key.token_key)
        .bind(&key.chain)
        .bind(&project.admin_wallet)
        .bind(fid_to_i64(project.admin_fid)?)
        .bind(&project.admin_username)
        .bind(project.created_at)
        .execute(&self.pool)
        .await?
        .rows_affected()
            == 1;

        let stored = sqlx::query_as::<_, ProjectRow>(&format!(
            "{PROJECT_COLUMNS} WHERE p.token_key = ?1 AND p.chain = ?2"
        ))
        .bind(&key.token_key)
        .bind(&key.chain)
        .fetch_one(&self.pool)
        .await?;

        Ok((stored.into(), inserted))
    }

    async fn list_questions(&self, project_id: &str) -> Result<Vec<Question>> {
        let rows = sqlx::query_as::<_, QuestionRow>(&format!(
            "{QUESTION_COLUMNS} WHERE q.project_id = ?1"
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        let votes: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT v.question_id, v.wallet
            FROM   question_voters v
            JOIN   questions q ON q.id = v.question_id
            WHERE  q.project_id = ?1
            ORDER  BY v.seq ASC
            "#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        let mut voters_by_question: HashMap<String, Vec<String>> = HashMap::new();
        for (question_id, wallet) in votes {
            voters_by_question.entry(question_id).or_default().push(wallet);
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let voters = voters_by_question.remove(&row.id).unwrap_or_default();
                row.into_question(voters)
            })
            .collect())
    }

    async fn get_question(&self, id: &str) -> Result<Option<Question>> {
        let Some(row) =
            sqlx::query_as::<_, QuestionRow>(&format!("{QUESTION_COLUMNS} WHERE q.id = ?1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
        else {
            return Ok(None);
        };

        let voters: Vec<(String,)> = sqlx::query_as(
            "SELECT wallet FROM question_voters WHERE question_id = ?1 ORDER BY seq ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(row.into_question(voters.into_iter().map(|(w,)| w).collect())))
    }

    async fn insert_question(&self, question: &Question) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO questions
                (id, project_id, text, author_fid, author_username, wallet_address, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&question.id)
        .bind(&question.project_id)
        .bind(&question.text)
        .bind(fid_to_i64(question.author_fid)?)
        .bind(&question.author_username)
        .bind(&question.wallet_address)
        .bind(question.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn add_voter(&self, question_id: &str, wallet: &str) -> Result<Option<Question>> {
        let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM questions WHERE id = ?1")
            .bind(question_id)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Ok(None);
        }

        // Questions are never deleted, so the row cannot vanish between the
        // existence check and the insert.
        let added = sqlx::query(
            "INSERT OR IGNORE INTO question_voters (question_id, wallet) VALUES (?1, ?2)",
        )
        .bind(question_id)
        .bind(wallet)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if added == 0 {
            debug!("{wallet} already voted on {question_id}");
        }

        self.get_question(question_id).await
    }
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
