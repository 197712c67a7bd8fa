pub mod chats;
pub mod messages;
pub mod online;
pub mod users;
pub mod ws;

use axum::http::StatusCode;
use diesel::prelude::*;
use uuid::Uuid;

use crate::db::DbConn;
use crate::hub::{Event, UserId};
use crate::schema::chat_users;
use crate::AppState;

pub(crate) type ApiError = (StatusCode, &'static str);

pub(crate) fn db_conn(state: &AppState) -> Result<DbConn, ApiError> {
    state
        .db
        .get()
        .map_err(|_| (StatusCode::INTERNAL_SERVER_ERROR, "Database connection failed"))
}

/// Check if user is a member of the chat; 404 if not, so non-members cannot probe chat ids.
pub(crate) fn check_membership(
    conn: &mut DbConn,
    chat_id: Uuid,
    uid: Uuid,
) -> Result<(), ApiError> {
    use crate::schema::chat_users::dsl;
    let exists = chat_users::table
        .filter(dsl::chat_id.eq(chat_id).and(dsl::user_id.eq(uid)))
        .count()
        .get_result::<i64>(conn)
        .map_err(|e| {
            tracing::error!("check membership: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Database error")
        })?;
    if exists == 0 {
        return Err((StatusCode::NOT_FOUND, "Chat not found"));
    }
    Ok(())
}

/// Everyone a chat-scoped event goes to.
pub(crate) fn chat_member_ids(conn: &mut DbConn, chat_id: Uuid) -> Result<Vec<UserId>, ApiError> {
    use crate::schema::chat_users::dsl;
    let uids: Vec<Uuid> = chat_users::table
        .filter(dsl::chat_id.eq(chat_id))
        .select(dsl::user_id)
        .load(conn)
        .map_err(|e| {
            tracing::error!("list members for broadcast: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Database error")
        })?;
    Ok(uids.into_iter().map(UserId::from).collect())
}

/// Publishes after a committed write. Failures are logged; the request still succeeds.
pub(crate) fn notify(state: &AppState, targets: &[UserId], event: Event) {
    if let Err(e) = state.hub.broadcast(targets, &event) {
        tracing::warn!(kind = event.kind(), error = %e, "broadcast failed");
    }
}

pub(crate) fn notify_all(state: &AppState, event: Event) {
    if let Err(e) = state.hub.broadcast_to_all(&event) {
        tracing::warn!(kind = event.kind(), error = %e, "broadcast failed");
    }
}
