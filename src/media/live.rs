//! # Live Tracks
//!
//! A remote track is read from the moment it is attached, whether or not a
//! recording is running. Frames that arrive with no subscriber are dropped,
//! so the transport never backs up and a recorder created later sees only
//! frames produced after it subscribed.
//!
//! [`LiveTrack::subscribe`] hands out an independent [`MediaTrack`] that
//! yields every frame read from that point on and ends when the source ends.

use crate::error::TrackError;
use crate::media::frame::{MediaCodec, MediaFrame, MediaTrack, TrackKind};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Default)]
struct Fanout {
    subscribers: Vec<mpsc::UnboundedSender<MediaFrame>>,
    ended: bool,
}

pub struct LiveTrack {
    id: String,
    codec: MediaCodec,
    fanout: Mutex<Fanout>,
    discarded: AtomicU64,
}

impl LiveTrack {
    /// Start draining `source` on the current runtime.
    pub fn spawn(source: Arc<dyn MediaTrack>) -> Arc<Self> {
        let live = Arc::new(Self {
            id: source.id().to_string(),
            codec: source.codec(),
            fanout: Mutex::new(Fanout::default()),
            discarded: AtomicU64::new(0),
        });
        tokio::spawn(drain(live.clone(), source));
        live
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.codec.kind()
    }

    pub fn codec(&self) -> MediaCodec {
        self.codec
    }

    /// Frames read while nobody was subscribed.
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    /// Receive every frame read from now on. Already ended tracks yield `Ended` at once.
    pub fn subscribe(&self) -> Arc<dyn MediaTrack> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut fanout = self.fanout.lock();
        if !fanout.ended {
            fanout.subscribers.push(tx);
        }

        Arc::new(Subscription {
            id: self.id.clone(),
            codec: self.codec,
            rx: tokio::sync::Mutex::new(rx),
        })
    }
}

async fn drain(live: Arc<LiveTrack>, source: Arc<dyn MediaTrack>) {
    while let Ok(frame) = source.recv().await {
        let mut fanout = live.fanout.lock();
        if fanout.subscribers.is_empty() {
            live.discarded.fetch_add(1, Ordering::Relaxed);
            continue;
        }
        fanout.subscribers.retain(|tx| tx.send(frame.clone()).is_ok());
    }

    let mut fanout = live.fanout.lock();
    fanout.ended = true;
    fanout.subscribers.clear();
    debug!(track = %live.id, discarded = live.discarded(), "Live track ended");
}

struct Subscription {
    id: String,
    codec: MediaCodec,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MediaFrame>>,
}

#[async_trait]
impl MediaTrack for Subscription {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.codec.kind()
    }

    fn codec(&self) -> MediaCodec {
        self.codec
    }

    async fn recv(&self) -> Result<MediaFrame, TrackError> {
        self.rx.lock().await.recv().await.ok_or(TrackError::Ended)
    }
}
