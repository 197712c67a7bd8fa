use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use diesel::prelude::*;
use diesel::upsert::excluded;
use uuid::Uuid;

use super::{db_conn, notify_all, ApiError};
use crate::hub::Event;
use crate::models::{User, UserAvatar};
use crate::schema::{user_avatars, users};
use crate::utils::auth::CurrentUid;
use crate::AppState;

const MAX_FULL_NAME_CHARS: usize = 255;

/// Largest avatar upload accepted, in bytes.
pub const MAX_AVATAR_BYTES: usize = 15 * 1024 * 1024;
const AVATAR_CONTENT_TYPES: [&str; 2] = ["image/jpeg", "image/png"];

#[derive(serde::Deserialize)]
pub struct UserIdPath {
    user_id: Uuid,
}

/// GET /users — List all users.
pub async fn get_users(
    CurrentUid(_uid): CurrentUid,
    State(state): State<AppState>,
) -> Result<Json<Vec<User>>, ApiError> {
    let conn = &mut db_conn(&state)?;
    let rows: Vec<User> = users::table
        .order(users::username.asc())
        .select(User::as_select())
        .load(conn)
        .map_err(|e| {
            tracing::error!("list users: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to list users")
        })?;
    Ok(Json(rows))
}

/// GET /user/:user_id — One user.
pub async fn get_user(
    CurrentUid(_uid): CurrentUid,
    State(state): State<AppState>,
    Path(UserIdPath { user_id }): Path<UserIdPath>,
) -> Result<Json<User>, ApiError> {
    let conn = &mut db_conn(&state)?;
    let user: Option<User> = users::table
        .find(user_id)
        .select(User::as_select())
        .first(conn)
        .optional()
        .map_err(|e| {
            tracing::error!("get user: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Database error")
        })?;
    user.map(Json).ok_or((StatusCode::NOT_FOUND, "User not found"))
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserBody {
    full_name: String,
}

/// PUT /user/:user_id — Update your own display name. Everyone is told.
pub async fn put_user(
    CurrentUid(uid): CurrentUid,
    State(state): State<AppState>,
    Path(UserIdPath { user_id }): Path<UserIdPath>,
    Json(body): Json<UpdateUserBody>,
) -> Result<Json<User>, ApiError> {
    if user_id != uid {
        return Err((StatusCode::FORBIDDEN, "You can only edit your own profile"));
    }
    if body.full_name.chars().count() > MAX_FULL_NAME_CHARS {
        return Err((StatusCode::BAD_REQUEST, "Full name is too long"));
    }

    let conn = &mut db_conn(&state)?;
    let user: User = diesel::update(users::table.find(uid))
        .set((
            users::full_name.eq(body.full_name.trim()),
            users::updated_at.eq(Some(Utc::now())),
        ))
        .returning(User::as_returning())
        .get_result(conn)
        .map_err(|e| match e {
            diesel::result::Error::NotFound => (StatusCode::NOT_FOUND, "User not found"),
            e => {
                tracing::error!("update user: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to update user")
            }
        })?;

    notify_all(&state, Event::UserUpdate {
        user_id: user.id.to_string(),
    });

    Ok(Json(user))
}

/// Permitted avatar media type named by the request's `Content-Type`, parameters ignored.
fn avatar_content_type(headers: &HeaderMap) -> Option<&'static str> {
    let value = headers.get(header::CONTENT_TYPE)?.to_str().ok()?;
    let essence = value.split(';').next()?.trim();
    AVATAR_CONTENT_TYPES
        .iter()
        .copied()
        .find(|t| t.eq_ignore_ascii_case(essence))
}

/// GET /user/:user_id/avatar — Raw image bytes with their stored content type.
pub async fn get_avatar(
    CurrentUid(_uid): CurrentUid,
    State(state): State<AppState>,
    Path(UserIdPath { user_id }): Path<UserIdPath>,
) -> Result<impl IntoResponse, ApiError> {
    let conn = &mut db_conn(&state)?;
    let avatar: Option<UserAvatar> = user_avatars::table
        .find(user_id)
        .select(UserAvatar::as_select())
        .first(conn)
        .optional()
        .map_err(|e| {
            tracing::error!("get avatar: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Database error")
        })?;
    let avatar = avatar.ok_or((StatusCode::NOT_FOUND, "Avatar not found"))?;
    Ok(([(header::CONTENT_TYPE, avatar.content_type)], avatar.data))
}

/// POST /user/:user_id/avatar — Create or replace your own avatar (JPEG or PNG body).
/// Everyone is told.
pub async fn post_avatar(
    CurrentUid(uid): CurrentUid,
    State(state): State<AppState>,
    Path(UserIdPath { user_id }): Path<UserIdPath>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    if user_id != uid {
        return Err((StatusCode::FORBIDDEN, "You can only change your own avatar"));
    }
    let Some(content_type) = avatar_content_type(&headers) else {
        return Err((StatusCode::BAD_REQUEST, "Avatar must be image/jpeg or image/png"));
    };
    if body.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Avatar is empty"));
    }

    let now = Utc::now();
    let avatar = UserAvatar {
        user_id: uid,
        content_type: content_type.to_string(),
        data: body.to_vec(),
        created_at: now,
        updated_at: None,
    };

    let conn = &mut db_conn(&state)?;
    conn.transaction::<_, diesel::result::Error, _>(|conn| {
        diesel::insert_into(user_avatars::table)
            .values(&avatar)
            .on_conflict(user_avatars::user_id)
            .do_update()
            .set((
                user_avatars::content_type.eq(excluded(user_avatars::content_type)),
                user_avatars::data.eq(excluded(user_avatars::data)),
                user_avatars::updated_at.eq(Some(now)),
            ))
            .execute(conn)?;
        diesel::update(users::table.find(uid))
            .set(users::updated_at.eq(Some(now)))
            .execute(conn)?;
        Ok(())
    })
    .map_err(|e| {
        tracing::error!("store avatar: {:?}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Failed to store avatar")
    })?;

    notify_all(&state, Event::UserAvatarUpdate {
        user_id: uid.to_string(),
    });

    Ok(StatusCode::NO_CONTENT)
}
