use axum::extract::FromRef;
use prometheus::Registry;

use crate::db::DbPool;
use crate::hub::{Hub, SessionConfig};
use crate::utils::auth::SharedValidator;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub hub: Hub,
    pub validator: SharedValidator,
    pub session: SessionConfig,
    pub metrics: Registry,
}

/// What the WebSocket endpoint needs; no database.
#[derive(Clone)]
pub struct WsState {
    pub hub: Hub,
    pub validator: SharedValidator,
    pub session: SessionConfig,
}

impl FromRef<AppState> for WsState {
    fn from_ref(state: &AppState) -> Self {
        WsState {
            hub: state.hub.clone(),
            validator: state.validator.clone(),
            session: state.session.clone(),
        }
    }
}
