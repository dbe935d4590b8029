use std::collections::HashMap;

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        Query, State,
    },
    http::{HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use domain::ConversationId;
use serde_json::{json, Value};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{error::ApiError, state::AppState, ws_connection::WebSocketConnection};

/// 单个入站帧的大小上限
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

pub fn router(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .nest("/v1", api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(cors_origins))
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(health))
        .route("/ws", get(websocket_upgrade))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() || origins.iter().any(|origin| origin == "*") {
        return CorsLayer::new().allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(origin = %origin, error = %err, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new().allow_origin(allowed)
}

async fn health() -> Json<Value> {
    Json(json!({}))
}

/// 准入关口：认证 -> 会话参数 -> 成员资格 -> 升级
async fn websocket_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    let user_id = state.jwt_service.extract_user_from_headers(&headers)?;

    let conversation_id: ConversationId = query
        .get("conversation_id")
        .ok_or_else(|| ApiError::bad_request("conversation_id required"))?
        .parse::<uuid::Uuid>()
        .map(ConversationId::from)
        .map_err(|_| ApiError::bad_request("Invalid conversation ID"))?;

    let is_member = state
        .repository
        .is_member(conversation_id, user_id)
        .await
        .map_err(|err| {
            tracing::error!(
                error = %err,
                user_id = %user_id,
                conversation_id = %conversation_id,
                "membership check failed"
            );
            ApiError::from(err)
        })?;
    if !is_member {
        return Err(ApiError::forbidden("Not a member of this conversation"));
    }

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    Ok(ws
        .max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| async move {
            match WebSocketConnection::open(state, user_id, conversation_id).await {
                Ok(connection) => connection.run(socket).await,
                Err(err) => tracing::error!(
                    error = ?err,
                    user_id = %user_id,
                    conversation_id = %conversation_id,
                    "failed to register connection"
                ),
            }
        }))
}
