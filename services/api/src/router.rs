//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST API and OpenAPI documentation.

use crate::{
    handlers,
    models::{
        ConversationDetail, ConversationSummary, CreateConversationPayload, ErrorResponse,
        MessageView, SelectOptionPayload, StateView, TurnRequestPayload, TurnResponse, TurnView,
    },
    state::AppState,
};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::create_conversation,
        handlers::list_conversations,
        handlers::get_conversation,
        handlers::take_turn,
    ),
    components(
        schemas(
            CreateConversationPayload,
            ConversationSummary,
            ConversationDetail,
            MessageView,
            StateView,
            SelectOptionPayload,
            TurnRequestPayload,
            TurnResponse,
            TurnView,
            ErrorResponse
        )
    ),
    tags(
        (name = "Parley API", description = "Scripted-but-branching conversation practice")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    // Group all routes that require AppState into their own router.
    let api_router = Router::new()
        .route(
            "/conversations",
            get(handlers::list_conversations).post(handlers::create_conversation),
        )
        .route("/conversations/{id}", get(handlers::get_conversation))
        .route("/conversations/{id}/turns", post(handlers::take_turn))
        .with_state(app_state);

    // Merge the stateful routes with the stateless Swagger UI routes.
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
