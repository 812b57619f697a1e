//! API Models
//!
//! Request and response shapes for the REST API, annotated for OpenAPI
//! generation with `utoipa`. Conversions to and from the engine's types live
//! here so handlers stay thin.

use chrono::{DateTime, Utc};
use parley_core::interpreter::{Position, Turn, UserAction};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Deserialize, ToSchema)]
pub struct CreateConversationPayload {
    /// Stage to practice: `level-0`, `level-1` or `playground`.
    #[schema(example = "level-0")]
    pub stage: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct ConversationSummary {
    #[schema(value_type = String, format = Uuid)]
    pub id: Uuid,
    #[schema(example = "level-0")]
    pub stage: String,
    pub agent_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct MessageView {
    pub sender: String,
    pub text: String,
}

/// Where the conversation sits, as shown to clients.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum StateView {
    /// Options are on the table; the client must pick or type.
    Waiting {
        options: Vec<String>,
        allow_custom: bool,
    },
    /// The next call will produce content at a node of the given kind.
    Active { kind: String },
    /// Feedback is due on the next call.
    FeedbackPending,
    Completed,
}

impl From<&Position> for StateView {
    fn from(position: &Position) -> Self {
        match position {
            Position::Active { at } => StateView::Active {
                kind: at.kind.to_string(),
            },
            Position::AwaitingChoice { offered, allow_custom } => StateView::Waiting {
                options: offered.iter().map(|o| o.text.clone()).collect(),
                allow_custom: *allow_custom,
            },
            Position::PendingFeedback { .. } => StateView::FeedbackPending,
            Position::Completed => StateView::Completed,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct ConversationDetail {
    #[schema(value_type = String, format = Uuid)]
    pub id: Uuid,
    #[schema(example = "level-0")]
    pub stage: String,
    pub agent_name: String,
    #[schema(value_type = Object)]
    pub scenario: serde_json::Value,
    pub state: StateView,
    pub messages: Vec<MessageView>,
}

/// The caller's action for one turn.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SelectOptionPayload {
    /// The empty continue signal.
    None,
    /// Pick one of the offered options by display index.
    Index { index: usize },
    /// Send a free-typed reply (only where allowed).
    Custom { text: String },
}

impl From<SelectOptionPayload> for UserAction {
    fn from(payload: SelectOptionPayload) -> Self {
        match payload {
            SelectOptionPayload::None => UserAction::None,
            SelectOptionPayload::Index { index } => UserAction::SelectIndex(index),
            SelectOptionPayload::Custom { text } => UserAction::CustomText(text),
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct TurnRequestPayload {
    pub option: SelectOptionPayload,
}

/// The single outward result of one turn.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnView {
    Agent {
        content: String,
    },
    Options {
        options: Vec<String>,
        allow_custom: bool,
    },
    Feedback {
        title: String,
        body: String,
        follow_up: Option<String>,
    },
    Complete,
}

impl From<Turn> for TurnView {
    fn from(turn: Turn) -> Self {
        match turn {
            Turn::Agent { text } => TurnView::Agent { content: text },
            Turn::Choices { options, allow_custom } => TurnView::Options {
                options,
                allow_custom,
            },
            Turn::Feedback { feedback } => TurnView::Feedback {
                title: feedback.title,
                body: feedback.body,
                follow_up: feedback.follow_up,
            },
            Turn::Complete => TurnView::Complete,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct TurnResponse {
    pub turn: TurnView,
    #[schema(example = "level-0")]
    pub max_unlocked_stage: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct ErrorResponse {
    /// Stable code for input and progress errors; `internal_error` otherwise.
    pub code: String,
    pub message: String,
}
