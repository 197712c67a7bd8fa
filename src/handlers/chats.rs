use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use diesel::prelude::*;
use uuid::Uuid;

use super::{chat_member_ids, check_membership, db_conn, notify, ApiError};
use crate::db::DbConn;
use crate::hub::Event;
use crate::models::{Chat, NewChatUser};
use crate::schema::{chat_users, chats, messages, users};
use crate::utils::auth::CurrentUid;
use crate::AppState;

const MAX_TITLE_CHARS: usize = 255;

#[derive(serde::Deserialize)]
pub struct ChatIdPath {
    chat_id: Uuid,
}

fn load_chat(conn: &mut DbConn, chat_id: Uuid) -> Result<Chat, ApiError> {
    chats::table
        .find(chat_id)
        .select(Chat::as_select())
        .first(conn)
        .map_err(|e| match e {
            diesel::result::Error::NotFound => (StatusCode::NOT_FOUND, "Chat not found"),
            e => {
                tracing::error!("load chat: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error")
            }
        })
}

fn validate_title(title: &str) -> Result<(), ApiError> {
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err((StatusCode::BAD_REQUEST, "Title is not valid"));
    }
    Ok(())
}

/// GET /chats — Chats the current user belongs to, most recently active first.
pub async fn get_chats(
    CurrentUid(uid): CurrentUid,
    State(state): State<AppState>,
) -> Result<Json<Vec<Chat>>, ApiError> {
    let conn = &mut db_conn(&state)?;
    let rows: Vec<Chat> = chats::table
        .inner_join(chat_users::table)
        .filter(chat_users::user_id.eq(uid))
        .order((chats::updated_at.desc().nulls_last(), chats::created_at.desc()))
        .select(Chat::as_select())
        .load(conn)
        .map_err(|e| {
            tracing::error!("list chats: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to list chats")
        })?;
    Ok(Json(rows))
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatBody {
    #[serde(default)]
    title: String,
    #[serde(default)]
    direct_user_id: Option<Uuid>,
}

/// POST /chat — Create a chat. With `directUserId` it is a one-to-one chat with that user,
/// of which there can be only one per pair.
pub async fn post_chat(
    CurrentUid(uid): CurrentUid,
    State(state): State<AppState>,
    Json(body): Json<CreateChatBody>,
) -> Result<impl IntoResponse, ApiError> {
    validate_title(&body.title)?;

    let conn = &mut db_conn(&state)?;

    if let Some(direct_uid) = body.direct_user_id {
        let user_exists = users::table
            .filter(users::id.eq(direct_uid))
            .count()
            .get_result::<i64>(conn)
            .map_err(|e| {
                tracing::error!("check user exists: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error")
            })?;
        if user_exists == 0 {
            return Err((StatusCode::BAD_REQUEST, "User not found"));
        }

        use crate::schema::chats::dsl;
        let direct_exists = chats::table
            .filter(
                dsl::creator_id
                    .eq(uid)
                    .and(dsl::direct_user_id.eq(direct_uid))
                    .or(dsl::creator_id.eq(direct_uid).and(dsl::direct_user_id.eq(uid))),
            )
            .count()
            .get_result::<i64>(conn)
            .map_err(|e| {
                tracing::error!("check direct chat: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error")
            })?;
        if direct_exists > 0 {
            return Err((StatusCode::BAD_REQUEST, "Direct chat already exists"));
        }
    }

    let now = Utc::now();
    let chat = Chat {
        id: Uuid::new_v4(),
        creator_id: uid,
        direct_user_id: body.direct_user_id,
        title: body.title,
        created_at: now,
        updated_at: None,
    };
    let mut members = vec![NewChatUser {
        chat_id: chat.id,
        user_id: uid,
        created_at: now,
    }];
    if let Some(direct_uid) = chat.direct_user_id.filter(|d| *d != uid) {
        members.push(NewChatUser {
            chat_id: chat.id,
            user_id: direct_uid,
            created_at: now,
        });
    }

    conn.transaction::<_, diesel::result::Error, _>(|conn| {
        diesel::insert_into(chats::table).values(&chat).execute(conn)?;
        diesel::insert_into(chat_users::table)
            .values(&members)
            .execute(conn)?;
        Ok(())
    })
    .map_err(|e| {
        tracing::error!("insert chat: {:?}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Failed to create chat")
    })?;

    let member_uids = chat_member_ids(conn, chat.id)?;
    notify(&state, &member_uids, Event::ChatCreate {
        chat_id: chat.id.to_string(),
    });

    Ok((StatusCode::CREATED, Json(chat)))
}

/// GET /chat/:chat_id — One chat, members only.
pub async fn get_chat(
    CurrentUid(uid): CurrentUid,
    State(state): State<AppState>,
    Path(ChatIdPath { chat_id }): Path<ChatIdPath>,
) -> Result<Json<Chat>, ApiError> {
    let conn = &mut db_conn(&state)?;
    check_membership(conn, chat_id, uid)?;
    load_chat(conn, chat_id).map(Json)
}

#[derive(serde::Deserialize)]
pub struct UpdateChatBody {
    title: String,
}

/// PUT /chat/:chat_id — Rename a chat. Any member may.
pub async fn put_chat(
    CurrentUid(uid): CurrentUid,
    State(state): State<AppState>,
    Path(ChatIdPath { chat_id }): Path<ChatIdPath>,
    Json(body): Json<UpdateChatBody>,
) -> Result<Json<Chat>, ApiError> {
    validate_title(&body.title)?;

    let conn = &mut db_conn(&state)?;
    check_membership(conn, chat_id, uid)?;

    let chat: Chat = diesel::update(chats::table.find(chat_id))
        .set((
            chats::title.eq(&body.title),
            chats::updated_at.eq(Some(Utc::now())),
        ))
        .returning(Chat::as_returning())
        .get_result(conn)
        .map_err(|e| {
            tracing::error!("update chat: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to update chat")
        })?;

    let member_uids = chat_member_ids(conn, chat_id)?;
    notify(&state, &member_uids, Event::ChatUpdate {
        chat_id: chat_id.to_string(),
    });

    Ok(Json(chat))
}

/// DELETE /chat/:chat_id — Delete a chat with its messages. Creator only.
pub async fn delete_chat(
    CurrentUid(uid): CurrentUid,
    State(state): State<AppState>,
    Path(ChatIdPath { chat_id }): Path<ChatIdPath>,
) -> Result<StatusCode, ApiError> {
    let conn = &mut db_conn(&state)?;
    check_membership(conn, chat_id, uid)?;

    let chat = load_chat(conn, chat_id)?;
    if chat.creator_id != uid {
        return Err((StatusCode::FORBIDDEN, "Only the creator can delete a chat"));
    }

    // Resolve recipients while the memberships still exist.
    let member_uids = chat_member_ids(conn, chat_id)?;

    conn.transaction::<_, diesel::result::Error, _>(|conn| {
        diesel::delete(messages::table.filter(messages::chat_id.eq(chat_id))).execute(conn)?;
        diesel::delete(chat_users::table.filter(chat_users::chat_id.eq(chat_id))).execute(conn)?;
        diesel::delete(chats::table.find(chat_id)).execute(conn)?;
        Ok(())
    })
    .map_err(|e| {
        tracing::error!("delete chat: {:?}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Failed to delete chat")
    })?;

    notify(&state, &member_uids, Event::ChatDelete {
        chat_id: chat_id.to_string(),
    });

    Ok(StatusCode::NO_CONTENT)
}
