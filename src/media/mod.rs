//! # Media Module
//!
//! Codec-agnostic view of inbound media:
//! - **frame**: frames, track kinds and the `MediaTrack` abstraction
//! - **live**: continuously drained tracks that recorders subscribe to
//! - **sync**: the track synchronizer that assigns synthetic timestamps

pub mod frame;
pub mod live;
pub mod sync;

pub use frame::{MediaCodec, MediaFrame, MediaTrack, TrackKind};
pub use live::LiveTrack;
pub use sync::{ClockConfig, TrackSynchronizer};
