//! Access-token validation shared by the REST extractor and the WebSocket handshake.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::StatusCode;
use chrono::Utc;
use diesel::prelude::*;
use uuid::Uuid;

use crate::db::DbPool;
use crate::hub::UserId;
use crate::models::AccessToken;
use crate::schema::access_tokens;
use crate::AppState;

/// Resolves a pre-issued access token to the user it belongs to. `None` rejects the token,
/// whether it is unknown, expired, or could not be checked.
pub trait CredentialValidator: Send + Sync {
    fn validate(&self, token: &str) -> Option<UserId>;
}

pub type SharedValidator = Arc<dyn CredentialValidator>;

/// Tokens stored in `access_tokens`. Expired tokens are deleted when presented.
pub struct PgTokenValidator {
    db: DbPool,
}

impl PgTokenValidator {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

impl CredentialValidator for PgTokenValidator {
    fn validate(&self, token: &str) -> Option<UserId> {
        if token.is_empty() {
            return None;
        }
        let conn = &mut self
            .db
            .get()
            .map_err(|e| tracing::error!("token lookup connection: {:?}", e))
            .ok()?;

        use crate::schema::access_tokens::dsl;
        let found: AccessToken = access_tokens::table
            .filter(dsl::token.eq(token))
            .select(AccessToken::as_select())
            .first(conn)
            .optional()
            .map_err(|e| tracing::error!("token lookup: {:?}", e))
            .ok()??;

        if !found.is_valid_at(Utc::now()) {
            tracing::debug!(user_id = %found.user_id, "expired access token presented");
            let expired = access_tokens::table.filter(dsl::token.eq(token));
            if let Err(e) = diesel::delete(expired).execute(conn) {
                tracing::error!("delete expired token: {:?}", e);
            }
            return None;
        }
        Some(UserId::from(found.user_id))
    }
}

/// Value of an `Authorization: Bearer <token>` header.
pub fn bearer_token(header: &str) -> Option<&str> {
    match header.split_once(' ') {
        Some(("Bearer", token)) if !token.is_empty() => Some(token),
        _ => None,
    }
}

/// The authenticated caller of a REST request.
pub struct CurrentUid(pub Uuid);

impl FromRequestParts<AppState> for CurrentUid {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(bearer_token)
            .ok_or((StatusCode::UNAUTHORIZED, "Missing bearer token"))?;
        let user_id = state
            .validator
            .validate(token)
            .ok_or((StatusCode::UNAUTHORIZED, "Invalid access token"))?;
        let uid = Uuid::parse_str(user_id.as_str())
            .map_err(|_| (StatusCode::UNAUTHORIZED, "Invalid access token"))?;
        Ok(CurrentUid(uid))
    }
}
