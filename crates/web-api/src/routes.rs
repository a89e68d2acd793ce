use application::{
    pagination::DEFAULT_PER_PAGE, AuthenticateUserRequest, CreateRoomRequest, MessageFilter, Page,
    PageRequest, RealtimeStats, RegisterUserRequest, SendMessageRequest,
};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    middleware,
    routing::{get, post},
    Form, Json, Router,
};
use chrono::{DateTime, Utc};
use domain::{ChatRoom, Message, MessageId, RoomId, RoomMember, User, UserId};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    auth::TokenResponse,
    error::ApiError,
    metrics::{metrics, track_requests},
    state::AppState,
    websocket::chat_socket,
};

#[derive(Debug, Deserialize)]
struct RegisterPayload {
    username: String,
    #[serde(default)]
    display_name: Option<String>,
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct TokenForm {
    username: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct CreateChatPayload {
    name: String,
    #[serde(default)]
    is_private: bool,
}

#[derive(Debug, Deserialize)]
struct AddMemberPayload {
    user_id: i64,
}

#[derive(Debug, Deserialize)]
struct SendMessagePayload {
    content: String,
}

#[derive(Debug, Default, Deserialize)]
struct PageQuery {
    page: Option<u32>,
    per_page: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatListQuery {
    search: Option<String>,
    page: Option<u32>,
    per_page: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct MessageSearchQuery {
    user_id: Option<i64>,
    chat_id: Option<i64>,
    q: Option<String>,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
    page: Option<u32>,
    per_page: Option<u32>,
}

fn page_request(page: Option<u32>, per_page: Option<u32>) -> PageRequest {
    PageRequest::new(page.unwrap_or(1), per_page.unwrap_or(DEFAULT_PER_PAGE))
}

/// HTTP 接口里的消息表示，字段名与实时推送保持一致。
#[derive(Debug, Serialize)]
struct MessageResponse {
    id: MessageId,
    chat_id: RoomId,
    user_id: UserId,
    content: String,
    created_at: DateTime<Utc>,
}

impl From<Message> for MessageResponse {
    fn from(message: Message) -> Self {
        Self {
            id: message.id,
            chat_id: message.room_id,
            user_id: message.sender_id,
            content: message.content.into_inner(),
            created_at: message.created_at,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/auth/register", post(register_user))
        .route("/auth/token", post(issue_token))
        .route("/auth/me", get(current_user))
        .route("/users", get(list_users))
        .route("/chats", get(list_chats).post(create_chat))
        .route("/chats/{chat_id}", get(get_chat))
        .route("/chats/{chat_id}/join", post(join_chat))
        .route("/chats/{chat_id}/members", post(add_member))
        .route(
            "/chats/{chat_id}/messages",
            get(chat_messages).post(send_message),
        )
        .route("/messages", get(search_messages))
        .route("/messages/{message_id}", get(get_message))
        .route("/ws/stats", get(websocket_stats))
        .route("/ws/chats/{chat_id}", get(chat_socket))
        .route_layer(middleware::from_fn(track_requests))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `*` 表示放行所有来源，无法解析的来源会被忽略。
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|origin| origin == "*") {
        return CorsLayer::permissive();
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring invalid cors origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn register_user(
    State(state): State<AppState>,
    Json(payload): Json<RegisterPayload>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let user = state
        .user_service
        .register(RegisterUserRequest {
            username: payload.username,
            display_name: payload.display_name,
            email: payload.email,
            password: payload.password,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(user)))
}

/// OAuth2 password 形式的登录，表单字段 `username` / `password`。
async fn issue_token(
    State(state): State<AppState>,
    Form(form): Form<TokenForm>,
) -> Result<Json<TokenResponse>, ApiError> {
    let user = state
        .user_service
        .authenticate(AuthenticateUserRequest {
            username: form.username,
            password: form.password,
        })
        .await?;

    let token = state.jwt_service.generate_token(user.id)?;
    tracing::info!(user_id = %user.id, "access token issued");
    Ok(Json(TokenResponse::bearer(token)))
}

async fn current_user(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<User>, ApiError> {
    let user_id = state.jwt_service.extract_user_from_headers(&headers)?;
    let user = state
        .user_service
        .get_user(user_id)
        .await
        .map_err(|_| ApiError::unauthorized("Could not validate credentials"))?;
    Ok(Json(user))
}

async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Page<User>>, ApiError> {
    let page = state
        .user_service
        .list_users(page_request(query.page, query.per_page))
        .await?;
    Ok(Json(page))
}

async fn list_chats(
    State(state): State<AppState>,
    Query(query): Query<ChatListQuery>,
) -> Result<Json<Page<ChatRoom>>, ApiError> {
    let page = state
        .chat_service
        .list_rooms(query.search, page_request(query.page, query.per_page))
        .await?;
    Ok(Json(page))
}

async fn create_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateChatPayload>,
) -> Result<(StatusCode, Json<ChatRoom>), ApiError> {
    let user_id = state.jwt_service.extract_user_from_headers(&headers)?;
    let room = state
        .chat_service
        .create_room(CreateRoomRequest {
            name: payload.name,
            is_private: payload.is_private,
            creator_id: user_id,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(room)))
}

async fn get_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<i64>,
) -> Result<Json<ChatRoom>, ApiError> {
    let room = state.chat_service.get_room(RoomId::new(chat_id)).await?;
    Ok(Json(room))
}

async fn join_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(chat_id): Path<i64>,
) -> Result<Json<RoomMember>, ApiError> {
    let user_id = state.jwt_service.extract_user_from_headers(&headers)?;
    let member = state
        .chat_service
        .join_room(RoomId::new(chat_id), user_id)
        .await?;
    Ok(Json(member))
}

async fn add_member(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(chat_id): Path<i64>,
    Json(payload): Json<AddMemberPayload>,
) -> Result<(StatusCode, Json<RoomMember>), ApiError> {
    let operator_id = state.jwt_service.extract_user_from_headers(&headers)?;
    let member = state
        .chat_service
        .add_member(
            RoomId::new(chat_id),
            operator_id,
            UserId::new(payload.user_id),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(member)))
}

async fn chat_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(chat_id): Path<i64>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Page<MessageResponse>>, ApiError> {
    // 公开房间无需登录；带了令牌就必须是有效的
    let viewer = if headers.contains_key(axum::http::header::AUTHORIZATION) {
        Some(state.jwt_service.extract_user_from_headers(&headers)?)
    } else {
        None
    };

    let page = state
        .chat_service
        .room_messages(
            RoomId::new(chat_id),
            viewer,
            page_request(query.page, query.per_page),
        )
        .await?;
    Ok(Json(page.map(MessageResponse::from)))
}

/// 写入消息后推送给房间内的在线连接。
async fn send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(chat_id): Path<i64>,
    Json(payload): Json<SendMessagePayload>,
) -> Result<(StatusCode, Json<MessageResponse>), ApiError> {
    let user_id = state.jwt_service.extract_user_from_headers(&headers)?;
    let sender = state.user_service.get_user(user_id).await?;
    let message = state
        .chat_service
        .send_message(SendMessageRequest {
            room_id: RoomId::new(chat_id),
            sender_id: sender.id,
            content: payload.content,
        })
        .await?;

    state.realtime.publish_message(&message, &sender).await;
    Ok((StatusCode::CREATED, Json(MessageResponse::from(message))))
}

async fn search_messages(
    State(state): State<AppState>,
    Query(query): Query<MessageSearchQuery>,
) -> Result<Json<Page<MessageResponse>>, ApiError> {
    let filter = MessageFilter {
        user_id: query.user_id.map(UserId::new),
        room_id: query.chat_id.map(RoomId::new),
        text: query.q.filter(|text| !text.is_empty()),
        start: query.start_date,
        end: query.end_date,
    };
    let page = state
        .chat_service
        .search_messages(filter, page_request(query.page, query.per_page))
        .await?;
    Ok(Json(page.map(MessageResponse::from)))
}

async fn get_message(
    State(state): State<AppState>,
    Path(message_id): Path<i64>,
) -> Result<Json<MessageResponse>, ApiError> {
    let message = state
        .chat_service
        .get_message(MessageId::new(message_id))
        .await?;
    Ok(Json(message.into()))
}

async fn websocket_stats(State(state): State<AppState>) -> Json<RealtimeStats> {
    Json(state.realtime.stats().await)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::Request,
        response::Response,
    };
    use config::AppConfig;
    use infrastructure::{BcryptPasswordHasher, Infrastructure};
    use tower::ServiceExt;

    use super::*;

    fn app() -> Router {
        let infra = Infrastructure::in_memory(Arc::new(BcryptPasswordHasher::new(Some(4))));
        router(AppState::build(&infra, &AppConfig::default(), None))
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_ws_stats_starts_empty() {
        let response = app()
            .oneshot(Request::get("/ws/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(
            body_json(response).await,
            serde_json::json!({ "total_connections": 0, "rooms": {} })
        );
    }

    #[tokio::test]
    async fn test_create_chat_requires_bearer_token() {
        let request = Request::post("/chats")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"name":"General"}"#))
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn test_inverted_date_range_is_rejected() {
        let request = Request::get(
            "/messages?start_date=2024-02-01T00:00:00Z&end_date=2024-01-01T00:00:00Z",
        )
        .body(Body::empty())
        .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "INVALID_ARGUMENT");
    }

    #[test]
    fn test_page_request_defaults() {
        let page = page_request(None, None);
        assert_eq!(page.page(), 1);
        assert_eq!(page.per_page(), DEFAULT_PER_PAGE);
        assert_eq!(page_request(Some(0), Some(10_000)).per_page(), 250);
    }
}
