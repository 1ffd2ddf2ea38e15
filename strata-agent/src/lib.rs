#![allow(clippy::missing_errors_doc)]

//! # Strata Agent
//!
//! A small JSON API wrapping the unified memory system for benchmark
//! agents: write turns, inspect per-tier state, force cleanup, and check
//! aggregate health. External session ids are rewritten to
//! `"<agent_prefix>:<id>"` and tracked.

pub mod bootstrap;

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{error, info};

use strata_core::llm::GenerateOptions;
use strata_core::models::{Role, Turn};
use strata_core::system::{ContextRequest, UnifiedMemorySystem};
use strata_core::tiers::HealthStatus;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub memory: Arc<UnifiedMemorySystem>,
    pub sessions: Arc<RwLock<BTreeSet<String>>>,
    pub agent_prefix: String,
}

impl AppState {
    #[must_use]
    pub fn new(memory: Arc<UnifiedMemorySystem>, agent_prefix: impl Into<String>) -> Self {
        Self {
            memory,
            sessions: Arc::new(RwLock::new(BTreeSet::new())),
            agent_prefix: agent_prefix.into(),
        }
    }

    /// Rewrite an external session id into the agent namespace.
    #[must_use]
    pub fn apply_prefix(&self, session_id: &str) -> String {
        let prefix = format!("{}:", self.agent_prefix);
        if session_id.starts_with(&prefix) {
            session_id.to_string()
        } else {
            format!("{}{session_id}", prefix)
        }
    }

    async fn track_session(&self, session_id: &str) {
        self.sessions.write().await.insert(session_id.to_string());
    }

    async fn remove_session(&self, session_id: &str) {
        self.sessions.write().await.remove(session_id);
    }
}

#[derive(Debug, Deserialize)]
pub struct RunTurnRequest {
    pub session_id: String,
    pub turn_id: String,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Option<serde_json::Map<String, Value>>,
}

#[derive(Debug, Serialize)]
pub struct RunTurnResponse {
    pub session_id: String,
    pub reply: String,
    pub turn_count: usize,
    pub fact_count: usize,
}

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    pub session_id: String,
}

type HandlerError = (StatusCode, Json<Value>);

fn internal_error(error: impl std::fmt::Display) -> HandlerError {
    error!("Request failed: {error}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": error.to_string()})),
    )
}

/// Build the agent router.
#[must_use]
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/run_turn", post(run_turn))
        .route("/sessions", get(list_sessions))
        .route("/memory_state", get(memory_state))
        .route("/cleanup_force", post(cleanup_force))
        .route("/health", get(health))
        .with_state(state)
}

/// Write the user turn, obtain an assistant reply from the memory-grounded
/// prompt, and write the assistant turn.
async fn run_turn(
    State(state): State<AppState>,
    Json(request): Json<RunTurnRequest>,
) -> Result<Json<RunTurnResponse>, HandlerError> {
    let session_id = state.apply_prefix(&request.session_id);
    state.track_session(&session_id).await;

    let mut turn = Turn::new(&session_id, &request.turn_id, request.role, request.content);
    if let Some(timestamp) = request.timestamp {
        turn.timestamp = timestamp;
    }
    if let Some(metadata) = request.metadata {
        turn.metadata = metadata;
    }
    state
        .memory
        .store_turn(&turn)
        .await
        .map_err(internal_error)?;

    let block = state
        .memory
        .get_context_block(&session_id, &ContextRequest::default())
        .await
        .map_err(internal_error)?;

    let prompt = format!(
        "{}\n\nRespond to the latest user message concisely.",
        block.to_prompt_string(false)
    );
    let reply = match state
        .memory
        .llm()
        .generate(&prompt, &GenerateOptions::default().with_max_output_tokens(256))
        .await
    {
        Ok(response) => response.text,
        // No provider configured still yields a usable echo agent
        Err(e) => {
            info!("Assistant generation unavailable: {e}");
            "Acknowledged.".to_string()
        }
    };

    let assistant_turn = Turn::new(
        &session_id,
        format!("{}-reply", request.turn_id),
        Role::Assistant,
        reply.clone(),
    );
    state
        .memory
        .store_turn(&assistant_turn)
        .await
        .map_err(internal_error)?;

    Ok(Json(RunTurnResponse {
        session_id,
        reply,
        turn_count: block.turn_count() + 2,
        fact_count: block.fact_count(),
    }))
}

async fn list_sessions(State(state): State<AppState>) -> Json<Value> {
    let sessions: Vec<String> = state.sessions.read().await.iter().cloned().collect();
    Json(json!({"sessions": sessions}))
}

async fn memory_state(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<Value>, HandlerError> {
    let session_id = state.apply_prefix(&query.session_id);
    let memory_state = state
        .memory
        .memory_state(&session_id)
        .await
        .map_err(internal_error)?;
    Ok(Json(serde_json::to_value(memory_state).map_err(internal_error)?))
}

async fn cleanup_force(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<Value>, HandlerError> {
    let targets: Vec<String> = if query.session_id == "all" {
        state.sessions.read().await.iter().cloned().collect()
    } else {
        vec![state.apply_prefix(&query.session_id)]
    };

    let mut cleaned = Vec::new();
    for session_id in targets {
        state
            .memory
            .cleanup_session(&session_id)
            .await
            .map_err(internal_error)?;
        state.remove_session(&session_id).await;
        cleaned.push(session_id);
    }
    Ok(Json(json!({"cleaned": cleaned})))
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let health = state.memory.health_check().await;
    let status_code = match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    let body = serde_json::to_value(&health).unwrap_or_else(|_| json!({"status": "unknown"}));
    (status_code, Json(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::config::SystemConfig;
    use strata_core::llm::LlmClient;

    fn state() -> AppState {
        let memory = Arc::new(UnifiedMemorySystem::in_memory(
            Arc::new(LlmClient::new()),
            SystemConfig::default(),
        ));
        AppState::new(memory, "ltm_agent")
    }

    #[test]
    fn prefix_is_applied_once()
    {
        let state = state();
        assert_eq!(state.apply_prefix("abc"), "ltm_agent:abc");
        assert_eq!(state.apply_prefix("ltm_agent:abc"), "ltm_agent:abc");
    }

    #[tokio::test]
    async fn run_turn_stores_both_sides_of_the_exchange() {
        let state = state();
        state.memory.initialize().await.unwrap();

        let response = run_turn(
            State(state.clone()),
            Json(RunTurnRequest {
                session_id: "s1".to_string(),
                turn_id: "t1".to_string(),
                role: Role::User,
                content: "hello there".to_string(),
                timestamp: None,
                metadata: None,
            }),
        )
        .await
        .unwrap();

        assert_eq!(response.0.session_id, "ltm_agent:s1");
        assert!(!response.0.reply.is_empty());

        let turns = state
            .memory
            .l1()
            .retrieve_session("ltm_agent:s1")
            .await
            .unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::Assistant);
        assert_eq!(turns[1].role, Role::User);

        let sessions = state.sessions.read().await;
        assert!(sessions.contains("ltm_agent:s1"));
    }

    #[tokio::test]
    async fn cleanup_force_removes_tracked_sessions() {
        let state = state();
        state.memory.initialize().await.unwrap();

        run_turn(
            State(state.clone()),
            Json(RunTurnRequest {
                session_id: "s1".to_string(),
                turn_id: "t1".to_string(),
                role: Role::User,
                content: "hello".to_string(),
                timestamp: None,
                metadata: None,
            }),
        )
        .await
        .unwrap();

        cleanup_force(
            State(state.clone()),
            Query(SessionQuery {
                session_id: "all".to_string(),
            }),
        )
        .await
        .unwrap();

        assert!(state.sessions.read().await.is_empty());
        let remaining = state
            .memory
            .l1()
            .retrieve_session("ltm_agent:s1")
            .await
            .unwrap();
        assert!(remaining.is_empty());
    }
}
