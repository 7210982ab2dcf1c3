//! Read-only room introspection

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use roomcast_core::models::RoomId;
use roomcast_core::Error;
use serde::Serialize;

use crate::gateway::RoomSummary;
use crate::http::{AppError, AppResult, AppState};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomListResponse {
    pub rooms: Vec<RoomSummary>,
}

pub fn create_rooms_router() -> Router<AppState> {
    Router::new()
        .route("/api/rooms", get(list_rooms))
        .route("/api/rooms/{room_id}", get(get_room))
}

pub async fn list_rooms(State(state): State<AppState>) -> Json<RoomListResponse> {
    let mut rooms = Vec::new();
    for room_id in state.gateway.registry().room_ids() {
        // Rooms can disappear between listing and lookup
        if let Some(summary) = state.gateway.room_summary(&room_id).await {
            rooms.push(summary);
        }
    }
    rooms.sort_by(|a, b| a.stats.room_id.cmp(&b.stats.room_id));
    Json(RoomListResponse { rooms })
}

pub async fn get_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> AppResult<Json<RoomSummary>> {
    let room_id = RoomId::from(room_id);
    state
        .gateway
        .room_summary(&room_id)
        .await
        .map(Json)
        .ok_or_else(|| AppError::not_found(Error::room_not_found(&room_id).to_string()))
}
