//! # Recorder
//!
//! A recorder pumps frames from one [`TrackSynchronizer`] into one
//! [`MediaSink`] on a background task until it is told to stop or the track
//! ends. The sink is then finalized on the same task so the file is complete
//! by the time [`Recorder::stop`] returns.

use crate::error::{RecorderError, TrackError};
use crate::media::{ClockConfig, MediaCodec, MediaFrame, TrackSynchronizer};
use crate::recording::naming::RecordingRole;
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Destination for one recorded track.
#[async_trait]
pub trait MediaSink: Send {
    async fn write(&mut self, frame: &MediaFrame) -> Result<(), RecorderError>;

    /// Flush and close the file, returning its path.
    async fn finalize(self: Box<Self>) -> Result<PathBuf, RecorderError>;
}

/// Opens sinks for the coordinator.
///
/// Split out from the recorder so tests can record into memory and the server
/// can record into WAV files and an ffmpeg pipe.
#[async_trait]
pub trait SinkFactory: Send + Sync {
    async fn open(
        &self,
        role: RecordingRole,
        codec: MediaCodec,
        clock: ClockConfig,
        path: &Path,
    ) -> Result<Box<dyn MediaSink>, RecorderError>;
}

/// What a stopped recorder produced.
#[derive(Debug, Clone, Serialize)]
pub struct RecordedFile {
    pub role: RecordingRole,
    pub path: PathBuf,
    pub frames: u64,
}

pub struct Recorder {
    role: RecordingRole,
    path: PathBuf,
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<Result<RecordedFile, RecorderError>>,
}

impl Recorder {
    /// Open the sink and start pumping frames.
    pub async fn start(
        role: RecordingRole,
        path: PathBuf,
        sync: TrackSynchronizer,
        sinks: &dyn SinkFactory,
    ) -> Result<Self, RecorderError> {
        let sink = sinks.open(role, sync.codec(), sync.clock(), &path).await?;
        let (stop_tx, stop_rx) = oneshot::channel();

        info!(role = %role, path = %path.display(), codec = %sync.codec(), "Recorder started");
        let handle = tokio::spawn(pump(role, sync, sink, stop_rx));

        Ok(Self {
            role,
            path,
            stop_tx,
            handle,
        })
    }

    pub fn role(&self) -> RecordingRole {
        self.role
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stop pumping, finalize the file and wait for the task to finish.
    pub async fn stop(self) -> Result<RecordedFile, RecorderError> {
        // The task may already have finished because the track ended.
        let _ = self.stop_tx.send(());

        match self.handle.await {
            Ok(result) => result,
            Err(err) => Err(RecorderError::Task(err.to_string())),
        }
    }
}

async fn pump(
    role: RecordingRole,
    mut sync: TrackSynchronizer,
    mut sink: Box<dyn MediaSink>,
    mut stop_rx: oneshot::Receiver<()>,
) -> Result<RecordedFile, RecorderError> {
    let mut frames = 0u64;
    let mut write_error = None;

    loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            next = sync.recv() => match next {
                Ok(frame) => {
                    if let Err(err) = sink.write(&frame).await {
                        warn!(role = %role, error = %err, "Recorder write failed");
                        write_error = Some(err);
                        break;
                    }
                    frames += 1;
                }
                Err(TrackError::Ended) => {
                    debug!(role = %role, "Track ended, finalizing early");
                    break;
                }
            }
        }
    }

    let finalized = sink.finalize().await;
    if let Some(err) = write_error {
        return Err(err);
    }

    let path = finalized?;
    info!(role = %role, path = %path.display(), frames, "Recorder finalized");
    Ok(RecordedFile { role, path, frames })
}
