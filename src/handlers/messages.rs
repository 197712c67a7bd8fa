use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use super::{chat_member_ids, check_membership, db_conn, notify, ApiError};
use crate::db::DbConn;
use crate::hub::Event;
use crate::models::Message;
use crate::schema::{chats, messages};
use crate::utils::auth::CurrentUid;
use crate::AppState;

const DEFAULT_MESSAGES_LIMIT: i64 = 50;
const MAX_MESSAGES_LIMIT: i64 = 200;

#[derive(serde::Deserialize)]
pub struct ChatIdPath {
    chat_id: Uuid,
}

#[derive(serde::Deserialize)]
pub struct MessageIdPath {
    chat_id: Uuid,
    message_id: Uuid,
}

#[derive(serde::Deserialize)]
pub struct ListMessagesQuery {
    #[serde(default)]
    before: Option<DateTime<Utc>>,
    #[serde(default)]
    max: Option<i64>,
}

#[derive(serde::Deserialize)]
pub struct MessageBody {
    message: String,
}

fn clamp_limit(max: Option<i64>) -> i64 {
    max.unwrap_or(DEFAULT_MESSAGES_LIMIT)
        .clamp(1, MAX_MESSAGES_LIMIT)
}

fn validate_body(body: &MessageBody) -> Result<&str, ApiError> {
    let text = body.message.trim();
    if text.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Message is empty"));
    }
    Ok(text)
}

fn load_message(conn: &mut DbConn, chat_id: Uuid, message_id: Uuid) -> Result<Message, ApiError> {
    messages::table
        .filter(messages::id.eq(message_id).and(messages::chat_id.eq(chat_id)))
        .select(Message::as_select())
        .first(conn)
        .map_err(|e| match e {
            diesel::result::Error::NotFound => (StatusCode::NOT_FOUND, "Message not found"),
            e => {
                tracing::error!("load message: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error")
            }
        })
}

/// GET /chat/:chat_id/messages — Page of messages, oldest first. `before` pages backwards.
pub async fn get_messages(
    CurrentUid(uid): CurrentUid,
    State(state): State<AppState>,
    Path(ChatIdPath { chat_id }): Path<ChatIdPath>,
    Query(q): Query<ListMessagesQuery>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let conn = &mut db_conn(&state)?;
    check_membership(conn, chat_id, uid)?;

    let mut query = messages::table
        .filter(messages::chat_id.eq(chat_id))
        .select(Message::as_select())
        .into_boxed::<diesel::pg::Pg>();
    if let Some(before) = q.before {
        query = query.filter(messages::created_at.lt(before));
    }

    let mut rows: Vec<Message> = query
        .order(messages::created_at.desc())
        .limit(clamp_limit(q.max))
        .load(conn)
        .map_err(|e| {
            tracing::error!("list messages: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to list messages")
        })?;
    rows.reverse();

    Ok(Json(rows))
}

/// POST /chat/:chat_id/message — Post a message; every member is told.
pub async fn post_message(
    CurrentUid(uid): CurrentUid,
    State(state): State<AppState>,
    Path(ChatIdPath { chat_id }): Path<ChatIdPath>,
    Json(body): Json<MessageBody>,
) -> Result<impl IntoResponse, ApiError> {
    let text = validate_body(&body)?;

    let conn = &mut db_conn(&state)?;
    check_membership(conn, chat_id, uid)?;

    let now = Utc::now();
    let new_message = Message {
        id: Uuid::new_v4(),
        user_id: uid,
        chat_id,
        message: text.to_owned(),
        created_at: now,
        updated_at: None,
    };

    let message: Message = conn
        .transaction::<_, diesel::result::Error, _>(|conn| {
            let message = diesel::insert_into(messages::table)
                .values(&new_message)
                .returning(Message::as_returning())
                .get_result(conn)?;
            diesel::update(chats::table.find(chat_id))
                .set(chats::updated_at.eq(Some(now)))
                .execute(conn)?;
            Ok(message)
        })
        .map_err(|e| {
            tracing::error!("insert message: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to send message")
        })?;

    let member_uids = chat_member_ids(conn, chat_id)?;
    notify(&state, &member_uids, Event::message_create(chat_id, message.id));

    Ok((StatusCode::CREATED, Json(message)))
}

/// GET /chat/:chat_id/message/:message_id
pub async fn get_message(
    CurrentUid(uid): CurrentUid,
    State(state): State<AppState>,
    Path(MessageIdPath { chat_id, message_id }): Path<MessageIdPath>,
) -> Result<Json<Message>, ApiError> {
    let conn = &mut db_conn(&state)?;
    check_membership(conn, chat_id, uid)?;
    load_message(conn, chat_id, message_id).map(Json)
}

/// PUT /chat/:chat_id/message/:message_id — Edit a message. Author only.
pub async fn put_message(
    CurrentUid(uid): CurrentUid,
    State(state): State<AppState>,
    Path(MessageIdPath { chat_id, message_id }): Path<MessageIdPath>,
    Json(body): Json<MessageBody>,
) -> Result<Json<Message>, ApiError> {
    let text = validate_body(&body)?;

    let conn = &mut db_conn(&state)?;
    check_membership(conn, chat_id, uid)?;

    let existing = load_message(conn, chat_id, message_id)?;
    if existing.user_id != uid {
        return Err((StatusCode::FORBIDDEN, "You can only edit your own messages"));
    }

    let message: Message = diesel::update(messages::table.find(message_id))
        .set((
            messages::message.eq(text),
            messages::updated_at.eq(Some(Utc::now())),
        ))
        .returning(Message::as_returning())
        .get_result(conn)
        .map_err(|e| {
            tracing::error!("update message: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to update message")
        })?;

    let member_uids = chat_member_ids(conn, chat_id)?;
    notify(&state, &member_uids, Event::message_update(chat_id, message_id));

    Ok(Json(message))
}

/// DELETE /chat/:chat_id/message/:message_id — Author only.
pub async fn delete_message(
    CurrentUid(uid): CurrentUid,
    State(state): State<AppState>,
    Path(MessageIdPath { chat_id, message_id }): Path<MessageIdPath>,
) -> Result<StatusCode, ApiError> {
    let conn = &mut db_conn(&state)?;
    check_membership(conn, chat_id, uid)?;

    let existing = load_message(conn, chat_id, message_id)?;
    if existing.user_id != uid {
        return Err((StatusCode::FORBIDDEN, "You can only delete your own messages"));
    }

    diesel::delete(messages::table.find(message_id))
        .execute(conn)
        .map_err(|e| {
            tracing::error!("delete message: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to delete message")
        })?;

    let member_uids = chat_member_ids(conn, chat_id)?;
    notify(&state, &member_uids, Event::message_delete(chat_id, message_id));

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_defaults_and_clamps() {
        assert_eq!(clamp_limit(None), DEFAULT_MESSAGES_LIMIT);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(10_000)), MAX_MESSAGES_LIMIT);
    }

    #[test]
    fn blank_message_is_rejected() {
        let body = MessageBody {
            message: "  \n ".into(),
        };
        assert!(validate_body(&body).is_err());
        let body = MessageBody {
            message: " hi ".into(),
        };
        assert_eq!(validate_body(&body).ok(), Some("hi"));
    }
}
