//! # Recording Coordinator
//!
//! Turns the tracks attached to a room into a cohort of recorders and manages
//! the cohort as one unit.
//!
//! ## Lifecycle:
//! 1. `next_naming()` scans the output directory once per session
//! 2. `start()` subscribes to each available live track, wraps the
//!    subscription in a synchronizer, opens one recorder per track and
//!    starts them all concurrently
//! 3. `stop()` finalizes every recorder concurrently and reports per file
//!
//! If any recorder fails to start, the ones that did start are stopped again
//! before the error is returned, so a failed start leaves nothing running.

use crate::config::RecordingConfig;
use crate::error::RecorderError;
use crate::media::{ClockConfig, LiveTrack, MediaCodec, TrackKind, TrackSynchronizer};
use crate::recording::naming::{RecordingRole, SessionNaming};
use crate::recording::recorder::{MediaSink, RecordedFile, Recorder, SinkFactory};
use crate::recording::video::FfmpegVideoSink;
use crate::recording::wav::WavSink;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// The raw tracks available when recording starts. Any of them may be missing.
#[derive(Default, Clone)]
pub struct SessionTracks {
    pub interviewer_audio: Option<Arc<LiveTrack>>,
    pub candidate_audio: Option<Arc<LiveTrack>>,
    pub candidate_video: Option<Arc<LiveTrack>>,
}

impl SessionTracks {
    fn assignments(self) -> Vec<(RecordingRole, Arc<LiveTrack>)> {
        [
            (RecordingRole::Interviewer, self.interviewer_audio),
            (RecordingRole::CandidateAudio, self.candidate_audio),
            (RecordingRole::CandidateVideo, self.candidate_video),
        ]
        .into_iter()
        .filter_map(|(role, track)| track.map(|track| (role, track)))
        .collect()
    }
}

/// A running cohort of recorders.
pub struct ActiveRecording {
    naming: SessionNaming,
    started_at: DateTime<Utc>,
    recorders: Vec<Recorder>,
}

impl ActiveRecording {
    pub fn session_id(&self) -> &str {
        self.naming.session_id()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn roles(&self) -> Vec<RecordingRole> {
        self.recorders.iter().map(Recorder::role).collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecorderFailure {
    pub role: RecordingRole,
    pub path: PathBuf,
    pub error: String,
}

/// Outcome of stopping a cohort.
#[derive(Debug, Clone, Serialize)]
pub struct StopReport {
    pub session_id: String,
    pub finalized: Vec<RecordedFile>,
    pub failures: Vec<RecorderFailure>,
}

impl StopReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct RecordingCoordinator {
    config: RecordingConfig,
    sinks: Arc<dyn SinkFactory>,
    /// Highest sequence handed out so far, shared by every room.
    last_sequence: Mutex<u64>,
}

impl RecordingCoordinator {
    pub fn new(config: RecordingConfig, sinks: Arc<dyn SinkFactory>) -> Self {
        Self {
            config,
            sinks,
            last_sequence: Mutex::new(0),
        }
    }

    /// Recording into WAV files and ffmpeg-encoded MP4.
    pub fn with_file_sinks(config: RecordingConfig) -> Self {
        let sinks = Arc::new(FileSinkFactory::new(config.clone()));
        Self::new(config, sinks)
    }

    /// Create the output directory if needed and allocate the session name.
    ///
    /// Allocation is serialized across rooms, so two sessions starting in the
    /// same second never share a sequence.
    pub fn next_naming(&self) -> Result<SessionNaming, RecorderError> {
        std::fs::create_dir_all(&self.config.output_dir)?;
        let mut last = self.last_sequence.lock();
        let naming = SessionNaming::allocate(&self.config.output_dir, *last)?;
        *last = naming.sequence;
        Ok(naming)
    }

    fn extension(&self, role: RecordingRole) -> &str {
        match role.kind() {
            TrackKind::Audio => &self.config.audio.extension,
            TrackKind::Video => &self.config.video.extension,
        }
    }

    /// Start one recorder per available track, all or nothing.
    pub async fn start(
        &self,
        naming: SessionNaming,
        tracks: SessionTracks,
    ) -> Result<ActiveRecording, RecorderError> {
        std::fs::create_dir_all(&self.config.output_dir)?;

        // Subscribe every track before any recorder opens so all files share
        // one starting instant.
        let subscriptions: Vec<_> = tracks
            .assignments()
            .into_iter()
            .map(|(role, track)| (role, track.subscribe()))
            .collect();

        let starts = subscriptions.into_iter().map(|(role, track)| {
            let path = self
                .config
                .output_dir
                .join(naming.file_name(role, self.extension(role)));
            let clock = ClockConfig::for_kind(role.kind(), &self.config.audio, &self.config.video);
            let sync = TrackSynchronizer::new(track, clock);
            Recorder::start(role, path, sync, self.sinks.as_ref())
        });

        let mut recorders = Vec::new();
        let mut first_error = None;
        for result in join_all(starts).await {
            match result {
                Ok(recorder) => recorders.push(recorder),
                Err(err) => {
                    error!(session = naming.session_id(), error = %err, "Recorder failed to start");
                    first_error.get_or_insert(err);
                }
            }
        }

        if let Some(err) = first_error {
            let rollback = join_all(recorders.into_iter().map(Recorder::stop)).await;
            for result in rollback {
                if let Err(stop_err) = result {
                    warn!(error = %stop_err, "Rollback of started recorder failed");
                }
            }
            return Err(err);
        }

        info!(
            session = naming.session_id(),
            sequence = naming.sequence,
            recorders = recorders.len(),
            "Recording started"
        );

        Ok(ActiveRecording {
            naming,
            started_at: Utc::now(),
            recorders,
        })
    }

    /// Finalize every recorder of the cohort concurrently.
    pub async fn stop(&self, recording: ActiveRecording) -> StopReport {
        let session_id = recording.naming.session_id().to_string();
        let stops = recording.recorders.into_iter().map(|recorder| async move {
            let role = recorder.role();
            let path = recorder.path().to_path_buf();
            recorder
                .stop()
                .await
                .map_err(|err| RecorderFailure {
                    role,
                    path,
                    error: err.to_string(),
                })
        });

        let mut report = StopReport {
            session_id,
            finalized: Vec::new(),
            failures: Vec::new(),
        };
        for result in join_all(stops).await {
            match result {
                Ok(file) => report.finalized.push(file),
                Err(failure) => {
                    error!(
                        session = %report.session_id,
                        role = %failure.role,
                        error = %failure.error,
                        "Recorder failed to finalize"
                    );
                    report.failures.push(failure);
                }
            }
        }

        info!(
            session = %report.session_id,
            finalized = report.finalized.len(),
            failed = report.failures.len(),
            "Recording stopped"
        );
        report
    }
}

/// Audio into WAV, video through ffmpeg.
pub struct FileSinkFactory {
    config: RecordingConfig,
}

impl FileSinkFactory {
    pub fn new(config: RecordingConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SinkFactory for FileSinkFactory {
    async fn open(
        &self,
        role: RecordingRole,
        codec: MediaCodec,
        clock: ClockConfig,
        path: &Path,
    ) -> Result<Box<dyn MediaSink>, RecorderError> {
        if codec.kind() != role.kind() {
            return Err(RecorderError::UnsupportedCodec {
                role: role.to_string(),
                codec: codec.to_string(),
            });
        }

        match codec {
            MediaCodec::Opus => Ok(Box::new(WavSink::create(
                path,
                clock.rate(),
                self.config.audio.channels,
            )?)),
            MediaCodec::Vp8 | MediaCodec::Vp9 | MediaCodec::H264 => {
                Ok(Box::new(FfmpegVideoSink::spawn(
                    &self.config.ffmpeg_path,
                    &self.config.video,
                    codec,
                    clock.rate(),
                    path,
                )?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::media::{MediaFrame, MediaTrack};
    use crate::testing::{wait_until, MemorySinkFactory, MockTrack};

    fn coordinator(dir: &Path, sinks: Arc<MemorySinkFactory>) -> RecordingCoordinator {
        let mut config = AppConfig::default().recording;
        config.output_dir = dir.to_path_buf();
        RecordingCoordinator::new(config, sinks)
    }

    fn live(track: Arc<dyn MediaTrack>) -> Option<Arc<LiveTrack>> {
        Some(LiveTrack::spawn(track))
    }

    #[tokio::test]
    async fn test_frames_queued_before_start_are_not_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let sinks = Arc::new(MemorySinkFactory::default());
        let coordinator = coordinator(dir.path(), sinks.clone());

        let mic = MockTrack::audio("mic", Vec::new());
        let cam = MockTrack::video("cam", MediaCodec::Vp8, Vec::new());
        let mic_live = LiveTrack::spawn(mic.clone());
        let cam_live = LiveTrack::spawn(cam.clone());

        for _ in 0..500 {
            mic.push(MediaFrame::new(vec![0u8]).with_samples(960));
        }
        wait_until(|| mic_live.discarded() == 500).await;

        let tracks = SessionTracks {
            interviewer_audio: Some(mic_live),
            candidate_audio: None,
            candidate_video: Some(cam_live),
        };
        let naming = coordinator.next_naming().unwrap();
        let recording = coordinator.start(naming, tracks).await.unwrap();

        mic.push(MediaFrame::new(vec![1u8]).with_samples(960));
        cam.push(MediaFrame::new(vec![2u8]));
        sinks.wait_for_frames(RecordingRole::Interviewer, 1).await;
        sinks.wait_for_frames(RecordingRole::CandidateVideo, 1).await;
        assert!(coordinator.stop(recording).await.is_complete());

        assert_eq!(sinks.payloads(RecordingRole::Interviewer), vec![vec![1u8]]);
        assert_eq!(sinks.pts(RecordingRole::Interviewer), vec![0]);
        assert_eq!(sinks.payloads(RecordingRole::CandidateVideo), vec![vec![2u8]]);
        assert_eq!(sinks.pts(RecordingRole::CandidateVideo), vec![0]);
    }

    #[test]
    fn test_next_naming_is_unique_before_files_exist() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(dir.path(), Arc::new(MemorySinkFactory::default()));

        let first = coordinator.next_naming().unwrap();
        let second = coordinator.next_naming().unwrap();

        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_ne!(
            first.file_name(RecordingRole::Interviewer, "wav"),
            second.file_name(RecordingRole::Interviewer, "wav")
        );
    }

    #[tokio::test]
    async fn test_missing_tracks_produce_fewer_recorders() {
        let dir = tempfile::tempdir().unwrap();
        let sinks = Arc::new(MemorySinkFactory::default());
        let coordinator = coordinator(dir.path(), sinks.clone());

        let tracks = SessionTracks {
            interviewer_audio: live(MockTrack::audio("mic", Vec::new())),
            candidate_audio: None,
            candidate_video: live(MockTrack::video("cam", MediaCodec::Vp8, Vec::new())),
        };

        let naming = coordinator.next_naming().unwrap();
        let recording = coordinator.start(naming, tracks).await.unwrap();
        assert_eq!(
            recording.roles(),
            vec![RecordingRole::Interviewer, RecordingRole::CandidateVideo]
        );

        let report = coordinator.stop(recording).await;
        assert!(report.is_complete());
        assert_eq!(report.finalized.len(), 2);

        let names: Vec<String> = report
            .finalized
            .iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert!(names[0].starts_with("1-interviewer-") && names[0].ends_with(".wav"));
        assert!(names[1].starts_with("1-candidate-video-") && names[1].ends_with(".mp4"));
    }

    #[tokio::test]
    async fn test_start_failure_rolls_back_started_recorders() {
        let dir = tempfile::tempdir().unwrap();
        let sinks = Arc::new(MemorySinkFactory::default());
        sinks.fail_open(RecordingRole::CandidateVideo);
        let coordinator = coordinator(dir.path(), sinks.clone());

        let tracks = SessionTracks {
            interviewer_audio: live(MockTrack::audio("mic", Vec::new())),
            candidate_audio: live(MockTrack::audio("cand-mic", Vec::new())),
            candidate_video: live(MockTrack::video("cam", MediaCodec::Vp8, Vec::new())),
        };

        let naming = coordinator.next_naming().unwrap();
        assert!(coordinator.start(naming, tracks).await.is_err());
        assert!(sinks.is_finalized(RecordingRole::Interviewer));
        assert!(sinks.is_finalized(RecordingRole::CandidateAudio));
    }

    #[tokio::test]
    async fn test_stop_reports_failures_per_file() {
        let dir = tempfile::tempdir().unwrap();
        let sinks = Arc::new(MemorySinkFactory::default());
        sinks.fail_finalize(RecordingRole::CandidateAudio);
        let coordinator = coordinator(dir.path(), sinks.clone());

        let tracks = SessionTracks {
            interviewer_audio: live(MockTrack::audio("mic", Vec::new())),
            candidate_audio: live(MockTrack::audio("cand-mic", Vec::new())),
            candidate_video: None,
        };

        let naming = coordinator.next_naming().unwrap();
        let recording = coordinator.start(naming, tracks).await.unwrap();
        let report = coordinator.stop(recording).await;

        assert_eq!(report.finalized.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].role, RecordingRole::CandidateAudio);
    }

    #[tokio::test]
    async fn test_file_sinks_reject_mismatched_codec() {
        let dir = tempfile::tempdir().unwrap();
        let factory = FileSinkFactory::new(AppConfig::default().recording);
        let result = factory
            .open(
                RecordingRole::Interviewer,
                MediaCodec::Vp8,
                ClockConfig::video(30, 90_000),
                &dir.path().join("x.wav"),
            )
            .await;
        assert!(matches!(result, Err(RecorderError::UnsupportedCodec { .. })));
    }
}
