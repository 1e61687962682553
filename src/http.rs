use crate::registry::{RegisteredSystem, RegistryStore};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use serde::Serialize;
use tracing::error;

#[derive(Clone)]
pub struct HttpAppState {
    pub registry: RegistryStore,
}

#[derive(Debug, Serialize)]
pub struct Message {
    pub message: String,
}

pub fn build_router(registry: RegistryStore) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/hello/:name", get(say_hello))
        .route("/healthz", get(healthz))
        .route("/api/systems", get(systems_handler))
        .with_state(HttpAppState { registry })
}

async fn root() -> Json<Message> {
    Json(Message {
        message: "Hello World".to_string(),
    })
}

async fn say_hello(Path(name): Path<String>) -> Json<Message> {
    Json(Message {
        message: format!("Hello {name}"),
    })
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn systems_handler(State(state): State<HttpAppState>) -> Response {
    match state.registry.systems().await {
        Ok(systems) => Json::<Vec<RegisteredSystem>>(systems).into_response(),
        Err(err) => {
            error!(error = %err, "failed to list systems");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to list systems: {err}"),
            )
                .into_response()
        }
    }
}
