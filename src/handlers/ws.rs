//! WebSocket handler: auth via `Sec-WebSocket-Protocol: access_token, <token>`, then a hub
//! session until either side goes away.

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::header::SEC_WEBSOCKET_PROTOCOL;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;

use crate::hub::{self, UserId};
use crate::state::WsState;

/// Marker the client lists before its token; echoed back as the accepted subprotocol.
pub const ACCESS_TOKEN_PROTOCOL: &str = "access_token";

/// Token from a `access_token, <token>` subprotocol header. Anything else is rejected.
pub fn parse_access_token(header: &str) -> Option<&str> {
    let mut parts = header.split(", ");
    match (parts.next(), parts.next(), parts.next()) {
        (Some(ACCESS_TOKEN_PROTOCOL), Some(token), None) if !token.is_empty() => Some(token),
        _ => None,
    }
}

/// Validates the token before upgrading; a rejected handshake never allocates a session.
pub async fn ws_handler(
    State(state): State<WsState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(token) = headers
        .get(SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_access_token)
    else {
        tracing::debug!("ws handshake without access token");
        return (StatusCode::UNAUTHORIZED, "Missing access token").into_response();
    };

    let Some(user_id) = state.validator.validate(token) else {
        tracing::debug!("ws handshake with invalid access token");
        return (StatusCode::UNAUTHORIZED, "Invalid access token").into_response();
    };

    ws.protocols([ACCESS_TOKEN_PROTOCOL])
        .max_message_size(state.session.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, user_id, state))
}

async fn handle_socket(socket: WebSocket, user_id: UserId, state: WsState) {
    let (guard, mailbox) = match state
        .hub
        .open_session(user_id.clone(), state.session.mailbox_capacity)
    {
        Ok(opened) => opened,
        Err(e) => {
            tracing::warn!(%user_id, error = %e, "ws session not opened");
            return;
        }
    };
    let (sink, stream) = socket.split();
    hub::session::run(guard, mailbox, sink, stream, &state.session).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_token_header_has_exactly_two_parts() {
        assert_eq!(parse_access_token("access_token, abc123"), Some("abc123"));
        assert_eq!(parse_access_token("access_token"), None);
        assert_eq!(parse_access_token("access_token, "), None);
        assert_eq!(parse_access_token("bearer, abc123"), None);
        assert_eq!(parse_access_token("access_token, abc, extra"), None);
        assert_eq!(parse_access_token("access_token,abc123"), None);
    }
}
