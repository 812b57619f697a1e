//! Axum Handlers for the REST API
//!
//! Conversation management and the turn endpoint. Input and progress errors
//! carry stable codes for clients; collaborator and internal failures are
//! deliberately opaque ("try again"), since nothing was persisted for the
//! failed turn.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use parley_core::interpreter::{Conversation, Position, StepError};
use parley_core::progression::Stage;
use parley_core::transcript::Transcript;
use rand::seq::IndexedRandom;
use serde::Deserialize;
use std::sync::Arc;
use tracing::error;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::{
    db::SaveOutcome,
    models::{
        ConversationDetail, ConversationSummary, CreateConversationPayload, ErrorResponse,
        MessageView, StateView, TurnRequestPayload, TurnResponse,
    },
    state::AppState,
};

/// First names the simulated agent is drawn from when a conversation starts.
const AGENT_NAMES: [&str; 12] = [
    "Alex", "Casey", "Drew", "Emery", "Jordan", "Morgan", "Quinn", "Riley", "Rowan", "Sage",
    "Skyler", "Taylor",
];

pub enum ApiError {
    BadRequest { code: String, message: String },
    Forbidden { code: String, message: String },
    NotFound(String),
    Conflict(String),
    InternalServerError(anyhow::Error),
}

impl ApiError {
    fn bad_request(code: &str, message: impl Into<String>) -> Self {
        ApiError::BadRequest {
            code: code.to_string(),
            message: message.into(),
        }
    }

    /// Maps engine step errors onto the API taxonomy: input and progress
    /// errors become structured client errors, everything else is opaque.
    fn from_step(err: StepError) -> Self {
        match err {
            StepError::InvalidSelection => ApiError::bad_request("invalid_selection", err.to_string()),
            StepError::StageNotUnlocked(stage) => ApiError::Forbidden {
                code: "stage_not_unlocked".to_string(),
                message: format!("stage '{stage}' is not unlocked yet"),
            },
            other => ApiError::InternalServerError(other.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::BadRequest { code, message } => (StatusCode::BAD_REQUEST, code, message),
            ApiError::Forbidden { code, message } => (StatusCode::FORBIDDEN, code, message),
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, "not_found".to_string(), message)
            }
            ApiError::Conflict(message) => {
                (StatusCode::CONFLICT, "conflict".to_string(), message)
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error".to_string(),
                    "An internal error occurred. Please try again.".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { code, message })).into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

fn require_user_id(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get("x-user-id")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::bad_request("missing_user", "x-user-id header is required"))
}

fn parse_stage(raw: &str) -> Result<Stage, ApiError> {
    raw.parse::<Stage>()
        .map_err(|err| ApiError::bad_request("unknown_stage", err.to_string()))
}

fn summary(
    id: Uuid,
    created_at: chrono::DateTime<chrono::Utc>,
    conversation: &Conversation,
) -> ConversationSummary {
    ConversationSummary {
        id,
        stage: conversation.stage.to_string(),
        agent_name: conversation.agent.name.clone(),
        created_at,
    }
}

/// Create a new practice conversation on a stage.
#[utoipa::path(
    post,
    path = "/conversations",
    request_body = CreateConversationPayload,
    responses(
        (status = 201, description = "Conversation created", body = ConversationSummary),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 403, description = "Stage not unlocked", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("x-user-id" = String, Header, description = "The ID of the acting user")
    )
)]
pub async fn create_conversation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<CreateConversationPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = require_user_id(&headers)?;
    let user = state.db.ensure_user(user_id).await?;
    let stage = parse_stage(&payload.stage)?;

    // Gate before any collaborator call.
    if !user.progress.max_unlocked_stage.unlocks(stage) {
        return Err(ApiError::Forbidden {
            code: "stage_not_unlocked".to_string(),
            message: format!("stage '{stage}' is not unlocked yet"),
        });
    }

    let agent_name = AGENT_NAMES
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or("Riley");

    let definition = state.levels.get(stage);
    let scenario = match &definition.seed {
        Some(seed) => {
            state
                .scenarios
                .level_scenario(seed, &user.persona, agent_name)
                .await?
        }
        None => {
            let (_, scenario) = state
                .scenarios
                .playground_scenario(&user.persona, agent_name, &user.interests)
                .await?;
            scenario
        }
    };
    let agent = state
        .scenarios
        .agent_persona(&scenario.agent_perspective, agent_name)
        .await?;

    let conversation = Conversation {
        stage,
        scenario,
        user: user.persona,
        agent,
        position: match definition.graph.entry() {
            Some(entry) => Position::Active { at: entry.clone() },
            None => Position::Completed,
        },
        transcript: Transcript::default(),
    };

    let (id, created_at) = state.db.create_conversation(user_id, &conversation).await?;
    Ok((StatusCode::CREATED, Json(summary(id, created_at, &conversation))))
}

#[derive(Deserialize, IntoParams)]
pub struct ListQuery {
    /// Restrict the listing to one stage.
    pub stage: Option<String>,
}

/// List the user's conversations.
#[utoipa::path(
    get,
    path = "/conversations",
    responses(
        (status = 200, description = "Conversations", body = [ConversationSummary]),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ListQuery,
        ("x-user-id" = String, Header, description = "The ID of the acting user")
    )
)]
pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ConversationSummary>>, ApiError> {
    let user_id = require_user_id(&headers)?;
    let stage = query.stage.as_deref().map(parse_stage).transpose()?;
    let stored = state.db.list_conversations(user_id, stage).await?;
    Ok(Json(
        stored
            .into_iter()
            .map(|entry| summary(entry.id, entry.created_at, &entry.conversation))
            .collect(),
    ))
}

/// Get one conversation with its message history and current state.
#[utoipa::path(
    get,
    path = "/conversations/{id}",
    responses(
        (status = 200, description = "Conversation detail", body = ConversationDetail),
        (status = 404, description = "Conversation not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Conversation ID"),
        ("x-user-id" = String, Header, description = "The ID of the acting user")
    )
)]
pub async fn get_conversation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<ConversationDetail>, ApiError> {
    let user_id = require_user_id(&headers)?;
    let stored = state
        .db
        .get_conversation(id, user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Conversation '{id}' not found")))?;

    let conversation = stored.conversation;
    let messages = conversation
        .transcript
        .messages()
        .into_iter()
        .map(|message| MessageView {
            sender: message.sender,
            text: message.text,
        })
        .collect();
    Ok(Json(ConversationDetail {
        id: stored.id,
        stage: conversation.stage.to_string(),
        agent_name: conversation.agent.name.clone(),
        scenario: serde_json::to_value(&conversation.scenario)?,
        state: StateView::from(&conversation.position),
        messages,
    }))
}

/// Advance a conversation by one turn.
#[utoipa::path(
    post,
    path = "/conversations/{id}/turns",
    request_body = TurnRequestPayload,
    responses(
        (status = 200, description = "The produced turn", body = TurnResponse),
        (status = 400, description = "Invalid selection", body = ErrorResponse),
        (status = 403, description = "Stage not unlocked", body = ErrorResponse),
        (status = 404, description = "Conversation not found", body = ErrorResponse),
        (status = 409, description = "Concurrent turn detected", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Conversation ID"),
        ("x-user-id" = String, Header, description = "The ID of the acting user")
    )
)]
pub async fn take_turn(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<TurnRequestPayload>,
) -> Result<Json<TurnResponse>, ApiError> {
    let user_id = require_user_id(&headers)?;
    let user = state.db.ensure_user(user_id).await?;
    let mut progress = user.progress;

    let stored = state
        .db
        .get_conversation(id, user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Conversation '{id}' not found")))?;
    let mut conversation = stored.conversation;

    let graph = state.levels.graph(conversation.stage);
    let outcome = state
        .interpreter
        .step(graph, &mut conversation, &mut progress, payload.option.into())
        .await
        .map_err(ApiError::from_step)?;

    match state
        .db
        .save_turn(stored.id, user_id, stored.version, &conversation, &progress)
        .await?
    {
        SaveOutcome::Saved => {}
        SaveOutcome::Conflict => {
            return Err(ApiError::Conflict(
                "another turn for this conversation committed first; reload and retry".to_string(),
            ));
        }
    }

    Ok(Json(TurnResponse {
        turn: outcome.turn.into(),
        max_unlocked_stage: outcome.max_unlocked_stage.to_string(),
    }))
}
