//! # Recording Module
//!
//! Everything between "the room has tracks" and "the files are on disk":
//! - **naming**: sequence numbers and file names
//! - **recorder**: one background task per track, plus the sink traits
//! - **coordinator**: starts and stops recorders as one cohort
//! - **wav** / **video**: the file sinks used in production

pub mod coordinator;
pub mod naming;
pub mod recorder;
pub mod video;
pub mod wav;

pub use coordinator::{ActiveRecording, RecordingCoordinator, SessionTracks, StopReport};
pub use naming::{RecordingRole, SessionNaming};
pub use recorder::{MediaSink, RecordedFile, SinkFactory};
