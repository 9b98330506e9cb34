//! Session naming: `{sequence}-{role}-{timestamp}.{ext}`.
//!
//! The sequence number is one more than the highest numeric prefix already in
//! the output directory, so interviews keep counting up across restarts. The
//! timestamp is taken once per session and shared by all of its files.

use chrono::Local;
use serde::Serialize;
use std::fmt;
use std::io;
use std::path::Path;

use crate::media::TrackKind;

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Which file of a session a recorder produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordingRole {
    Interviewer,
    CandidateAudio,
    CandidateVideo,
}

impl RecordingRole {
    pub fn label(&self) -> &'static str {
        match self {
            RecordingRole::Interviewer => "interviewer",
            RecordingRole::CandidateAudio => "candidate-audio",
            RecordingRole::CandidateVideo => "candidate-video",
        }
    }

    pub fn kind(&self) -> TrackKind {
        match self {
            RecordingRole::Interviewer | RecordingRole::CandidateAudio => TrackKind::Audio,
            RecordingRole::CandidateVideo => TrackKind::Video,
        }
    }
}

impl fmt::Display for RecordingRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionNaming {
    pub sequence: u64,
    pub timestamp: String,
}

impl SessionNaming {
    /// Scan `dir` for the next sequence number and stamp the current local time.
    ///
    /// The sequence is never lower than `after + 1`, so sessions allocated in
    /// the same process stay distinct even before their files exist.
    pub fn allocate(dir: &Path, after: u64) -> io::Result<Self> {
        Ok(Self {
            sequence: next_sequence(dir)?.max(after.saturating_add(1)),
            timestamp: Local::now().format(TIMESTAMP_FORMAT).to_string(),
        })
    }

    pub fn file_name(&self, role: RecordingRole, extension: &str) -> String {
        format!("{}-{}-{}.{}", self.sequence, role.label(), self.timestamp, extension)
    }

    /// The session id is the shared timestamp.
    pub fn session_id(&self) -> &str {
        &self.timestamp
    }
}

/// Highest numeric filename prefix in `dir` plus one; 1 when there is none.
///
/// A missing directory counts as empty.
pub fn next_sequence(dir: &Path) -> io::Result<u64> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(1),
        Err(err) => return Err(err),
    };

    let mut highest = 0;
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(sequence) = sequence_prefix(name) {
            highest = highest.max(sequence);
        }
    }

    Ok(highest.saturating_add(1))
}

fn sequence_prefix(file_name: &str) -> Option<u64> {
    let stem = file_name.split('.').next()?;
    let prefix = stem.split('-').next()?;
    if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    prefix.parse().ok()
}
