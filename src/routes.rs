use axum::{
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::handlers::{chats, messages, online, users, ws};
use crate::state::WsState;
use crate::AppState;

/// Extractor limit for JSON bodies. Avatar uploads get their own, larger one.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// Full application router: REST producers, the WebSocket endpoint, health and metrics.
pub fn build_router(state: AppState, cors_origins: &[String]) -> Router {
    let api = Router::new()
        .route("/users", get(users::get_users))
        .route("/user/{user_id}", get(users::get_user).put(users::put_user))
        .route(
            "/user/{user_id}/avatar",
            get(users::get_avatar)
                .post(users::post_avatar)
                .layer(DefaultBodyLimit::max(users::MAX_AVATAR_BYTES)),
        )
        .route("/chat", post(chats::post_chat))
        .route("/chats", get(chats::get_chats))
        .route(
            "/chat/{chat_id}",
            get(chats::get_chat)
                .put(chats::put_chat)
                .delete(chats::delete_chat),
        )
        .route("/chat/{chat_id}/message", post(messages::post_message))
        .route("/chat/{chat_id}/messages", get(messages::get_messages))
        .route(
            "/chat/{chat_id}/message/{message_id}",
            get(messages::get_message)
                .put(messages::put_message)
                .delete(messages::delete_message),
        )
        .route("/online", get(online::get_online))
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES));

    // The hard cap sits outside CORS: `Cors` needs a `Default` inner response body.
    api.with_state(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(RequestBodyLimitLayer::new(users::MAX_AVATAR_BYTES))
            .layer(cors(cors_origins)),
    )
}

/// Just the `/ws` endpoint, for hosts that serve no REST API. Needs no database.
pub fn ws_router() -> Router<WsState> {
    Router::new().route("/ws", get(ws::ws_handler))
}

fn cors(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

async fn health() -> &'static str {
    "ok"
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match crate::metrics::render(&state.metrics) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("render metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to render metrics").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use diesel::r2d2::{ConnectionManager, Pool};
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::hub::{Hub, SessionConfig, UserId};
    use crate::metrics::HubMetrics;
    use crate::utils::auth::CredentialValidator;

    const UID: Uuid = Uuid::from_u128(0x1234);
    const ORIGIN: &str = "http://localhost:3001";

    struct AnyTokenIsUid;

    impl CredentialValidator for AnyTokenIsUid {
        fn validate(&self, _token: &str) -> Option<UserId> {
            Some(UserId::from(UID))
        }
    }

    /// Full router over a pool that never connects. Requests that reach the database fail,
    /// so these tests only cover what the layers and extractors decide.
    fn app() -> Router {
        let manager = ConnectionManager::new("postgres://127.0.0.1:1/unused");
        let db = Pool::builder()
            .min_idle(Some(0))
            .build_unchecked(manager);
        let metrics = prometheus::Registry::new();
        let (hub, _task) = Hub::spawn(HubMetrics::new(&metrics).unwrap());
        let state = AppState {
            db,
            hub,
            validator: Arc::new(AnyTokenIsUid),
            session: SessionConfig::default(),
            metrics,
        };
        build_router(state, &[ORIGIN.to_string()])
    }

    fn upload(uri: String, content_type: &str, len: usize) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::AUTHORIZATION, "Bearer t")
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(vec![0u8; len]))
            .unwrap()
    }

    #[tokio::test]
    async fn health_passes_through_every_layer_with_request_id() {
        let response = app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn metrics_are_exposed_as_text() {
        let response = app()
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(String::from_utf8_lossy(&body).contains("hub_sessions"));
    }

    #[tokio::test]
    async fn cors_preflight_allows_configured_origin() {
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/chats")
            .header(header::ORIGIN, ORIGIN)
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .and_then(|v| v.to_str().ok()),
            Some(ORIGIN)
        );
    }

    #[tokio::test]
    async fn oversized_json_body_is_rejected() {
        let request = upload("/chat".into(), "application/json", MAX_BODY_BYTES + 1);
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn avatar_route_accepts_bodies_past_the_json_limit() {
        // Rejected on content type, which is only checked after the body was read.
        let request = upload(format!("/user/{UID}/avatar"), "text/plain", MAX_BODY_BYTES * 4);
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn avatar_upload_is_capped() {
        let request = upload(
            format!("/user/{UID}/avatar"),
            "image/png",
            users::MAX_AVATAR_BYTES + 1,
        );
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn avatar_of_another_user_is_forbidden() {
        let request = upload(format!("/user/{}/avatar", Uuid::nil()), "image/png", 16);
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
