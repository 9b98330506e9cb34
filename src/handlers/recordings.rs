//! Listing of finished recording files.

use crate::error::AppError;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::Serialize;
use serde_json::json;
use std::io;
use std::path::Path;

const RECORDING_EXTENSIONS: [&str; 3] = ["wav", "mp4", "webm"];

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct RecordingEntry {
    pub name: String,
    pub size: u64,
}

/// Recording files in `dir`, sorted by name. A missing directory is empty.
pub fn list_recordings(dir: &Path) -> io::Result<Vec<RecordingEntry>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };

    let mut recordings = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let is_recording = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| RECORDING_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
        if !is_recording || !entry.file_type()?.is_file() {
            continue;
        }

        recordings.push(RecordingEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            size: entry.metadata()?.len(),
        });
    }

    recordings.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(recordings)
}

pub async fn get_recordings(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let dir = state.config().recording.output_dir.clone();
    let recordings = web::block(move || list_recordings(&dir))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

    Ok(HttpResponse::Ok().json(json!({
        "count": recordings.len(),
        "recordings": recordings
    })))
}
