use axum::{extract::State, http::StatusCode, Json};

use super::ApiError;
use crate::hub::UserId;
use crate::utils::auth::CurrentUid;
use crate::AppState;

/// GET /online — Users with at least one live session, sorted.
pub async fn get_online(
    CurrentUid(_uid): CurrentUid,
    State(state): State<AppState>,
) -> Result<Json<Vec<UserId>>, ApiError> {
    state.hub.active_user_ids().await.map(Json).map_err(|e| {
        tracing::error!("list online users: {}", e);
        (StatusCode::SERVICE_UNAVAILABLE, "Hub unavailable")
    })
}
