//! Axum REST API handlers.
//!
//! Handlers parse and default request fields, run the configured access
//! policy through the identity gateway, then call into [`BeaconService`].

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::errors::{BeaconError, Result};
use crate::gateway::IdentityGateway;
use crate::models::{NewProject, NewQuestion, Project, Question};
use crate::policy::{AccessPolicies, Subject};
use crate::service::BeaconService;

const DEFAULT_TOKEN_SYMBOL: &str = "$TOKEN";
const DEFAULT_CHAIN: &str = "base-mainnet";

#[derive(Clone)]
pub struct ApiState {
    pub service: BeaconService,
    pub gateway: Arc<dyn IdentityGateway>,
    pub policies: AccessPolicies,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/projects", get(list_projects).post(create_project))
        .route("/api/projects/:id", get(get_project))
        .route("/api/questions", get(list_questions).post(create_question))
        .route("/api/questions/upvote", post(upvote_question))
        .route("/api/holder", get(check_holder))
        .with_state(state)
}

// ─────────────────────────────────────────────────────────
// Request shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectRequest {
    pub token_symbol: Option<String>,
    pub token_address: Option<String>,
    pub chain: Option<String>,
    pub admin_wallet: Option<String>,
    pub admin_fid: Option<u64>,
    pub admin_username: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionsQuery {
    pub project_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateQuestionRequest {
    pub project_id: Option<String>,
    pub text: Option<String>,
    pub author_fid: Option<u64>,
    pub author_username: Option<String>,
    pub wallet_address: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpvoteRequest {
    pub question_id: Option<String>,
    pub wallet_address: Option<String>,
    pub fid: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HolderQuery {
    pub token_address: Option<String>,
    pub wallet_address: Option<String>,
}

// ─────────────────────────────────────────────────────────
// Response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ProjectsResponse {
    pub projects: Vec<Project>,
}

#[derive(Serialize)]
pub struct ProjectResponse {
    pub project: Project,
}

#[derive(Serialize)]
pub struct QuestionsResponse {
    pub questions: Vec<Question>,
}

#[derive(Serialize)]
pub struct QuestionResponse {
    pub question: Question,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HolderResponse {
    pub is_holder: bool,
    /// Raw token units, base 10.
    pub balance: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for BeaconError {
    fn into_response(self) -> Response {
        let status = match &self {
            BeaconError::Validation(_) => StatusCode::BAD_REQUEST,
            BeaconError::NotFound(_) => StatusCode::NOT_FOUND,
            BeaconError::Forbidden(_) => StatusCode::FORBIDDEN,
            BeaconError::Upstream(_) | BeaconError::Http(_) | BeaconError::Json(_) => {
                StatusCode::BAD_GATEWAY
            }
            BeaconError::Database(_) | BeaconError::Migrate(_) | BeaconError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        if status.is_server_error() {
            error!("Request failed: {self}");
        }

        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `GET /api/projects`
///
/// Every project with its question count, newest first.
pub async fn list_projects(State(state): State<Arc<ApiState>>) -> Result<Json<ProjectsResponse>> {
    let projects = state.service.list_projects_with_counts().await?;
    Ok(Json(ProjectsResponse { projects }))
}

/// `GET /api/projects/:id`
pub async fn get_project(
    State(state): State<Arc<ApiState>>,
    Path(project_id): Path<String>,
) -> Result<Json<ProjectResponse>> {
    let project = find_project(&state, &project_id).await?;
    Ok(Json(ProjectResponse { project }))
}

/// `POST /api/projects`
///
/// Registers a project, or returns the existing one for the same token and
/// chain (`200` instead of `201`).
pub async fn create_project(
    State(state): State<Arc<ApiState>>,
    body: std::result::Result<Json<CreateProjectRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ProjectResponse>)> {
    let Json(req) = body.map_err(bad_body)?;

    let input = NewProject {
        token_symbol: trimmed_or(req.token_symbol, DEFAULT_TOKEN_SYMBOL),
        token_address: required("tokenAddress", req.token_address)?,
        chain: trimmed_or(req.chain, DEFAULT_CHAIN),
        admin_wallet: required("adminWallet", req.admin_wallet)?,
        admin_fid: req
            .admin_fid
            .ok_or_else(|| BeaconError::Validation("adminFid is required".to_string()))?,
        admin_username: req.admin_username.unwrap_or_default(),
    };

    state
        .policies
        .create_project
        .authorize(
            state.gateway.as_ref(),
            Subject {
                token_address: Some(&input.token_address),
                wallet: &input.admin_wallet,
                fid: Some(input.admin_fid),
            },
        )
        .await?;

    let registered = state.service.create_project(input).await?;
    let status = if registered.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(ProjectResponse {
            project: registered.project,
        }),
    ))
}

/// `GET /api/questions?projectId=…`
///
/// Questions for one project, most votes first.
pub async fn list_questions(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<QuestionsQuery>,
) -> Result<Json<QuestionsResponse>> {
    let project_id = required("projectId", query.project_id)?;
    find_project(&state, &project_id).await?;
    let questions = state.service.list_questions_for_project(&project_id).await?;
    Ok(Json(QuestionsResponse { questions }))
}

/// `POST /api/questions`
pub async fn create_question(
    State(state): State<Arc<ApiState>>,
    body: std::result::Result<Json<CreateQuestionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<QuestionResponse>)> {
    let Json(req) = body.map_err(bad_body)?;

    let project_id = required("projectId", req.project_id)?;
    let wallet_address = required("walletAddress", req.wallet_address)?;
    let text = req
        .text
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| BeaconError::Validation("text is required".to_string()))?;
    let author_fid = req
        .author_fid
        .ok_or_else(|| BeaconError::Validation("authorFid is required".to_string()))?;

    let project = find_project(&state, &project_id).await?;
    state
        .policies
        .submit_question
        .authorize(
            state.gateway.as_ref(),
            Subject {
                token_address: Some(&project.token_address),
                wallet: &wallet_address,
                fid: Some(author_fid),
            },
        )
        .await?;

    let question = state
        .service
        .create_question(NewQuestion {
            project_id,
            text,
            author_fid,
            author_username: req.author_username.unwrap_or_default(),
            wallet_address,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(QuestionResponse { question })))
}

/// `POST /api/questions/upvote`
///
/// Repeat votes from the same wallet succeed without changing the count.
pub async fn upvote_question(
    State(state): State<Arc<ApiState>>,
    body: std::result::Result<Json<UpvoteRequest>, JsonRejection>,
) -> Result<Json<QuestionResponse>> {
    let Json(req) = body.map_err(bad_body)?;
    let question_id = required("questionId", req.question_id)?;
    let wallet_address = required("walletAddress", req.wallet_address)?;

    if !state.policies.upvote.is_open() {
        let question = state
            .service
            .get_question(&question_id)
            .await?
            .ok_or_else(|| BeaconError::NotFound(format!("Question {question_id}")))?;
        let project = state.service.get_project(&question.project_id).await?;
        state
            .policies
            .upvote
            .authorize(
                state.gateway.as_ref(),
                Subject {
                    token_address: project.as_ref().map(|p| p.token_address.as_str()),
                    wallet: &wallet_address,
                    fid: req.fid,
                },
            )
            .await?;
    }

    let question = state
        .service
        .upvote_question(&question_id, &wallet_address)
        .await?;
    Ok(Json(QuestionResponse { question }))
}

/// `GET /api/holder?tokenAddress=…&walletAddress=…`
///
/// Whether the wallet holds the token, with the balance that decided it.
pub async fn check_holder(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<HolderQuery>,
) -> Result<Json<HolderResponse>> {
    let token_address = required("tokenAddress", query.token_address)?;
    let wallet_address = required("walletAddress", query.wallet_address)?;
    let balance = state
        .gateway
        .token_balance(&token_address, &wallet_address)
        .await?;
    Ok(Json(HolderResponse {
        is_holder: balance != "0",
        balance,
    }))
}

// ─────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────

async fn find_project(state: &ApiState, project_id: &str) -> Result<Project> {
    state
        .service
        .get_project(project_id)
        .await?
        .ok_or_else(|| BeaconError::NotFound(format!("Project {project_id}")))
}

fn required(field: &str, value: Option<String>) -> Result<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| BeaconError::Validation(format!("{field} is required")))
}

fn trimmed_or(value: Option<String>, default: &str) -> String {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn bad_body(rejection: JsonRejection) -> BeaconError {
    BeaconError::Validation(rejection.body_text())
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
