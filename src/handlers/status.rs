//! Room status endpoints.

use crate::error::AppError;
use crate::room::DEFAULT_ROOM;
use crate::state::AppState;
use actix_web::{web, HttpResponse};

/// Status of the default room.
pub async fn get_status(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    room_status(&state, DEFAULT_ROOM).await
}

/// Status of a keyed room. Rooms only exist once someone has connected to them.
pub async fn get_room_status(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    room_status(&state, &path.into_inner()).await
}

async fn room_status(state: &AppState, room_id: &str) -> Result<HttpResponse, AppError> {
    let room = state
        .hub
        .rooms()
        .get(room_id)
        .ok_or_else(|| AppError::NotFound(format!("Room '{}' does not exist", room_id)))?;

    let snapshot = room.lock().await.snapshot();
    Ok(HttpResponse::Ok().json(snapshot))
}
