//! FIFO playback queue for listener audio.
//!
//! The room socket pushes raw little-endian 16-bit PCM chunks as binary
//! frames.  [`PlaybackQueue`] buffers them in arrival order and drains them
//! through a single [`AudioSink`] so playback never overlaps or reorders.
//!
//! Browser-style output contexts may start suspended (autoplay policy).  A
//! sink reporting [`AudioError::Suspended`] causes the drain task to call
//! [`AudioSink::resume`] and retry the same chunk instead of dropping it.
//!
//! Switching the local playback preference to text-only must leave no
//! delayed audio behind: [`PlaybackQueue::set_enabled(false)`] flushes the
//! queue immediately and the drain task discards anything still in flight.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

// ---------------------------------------------------------------------------
// AudioError
// ---------------------------------------------------------------------------

/// Errors surfaced by an [`AudioSink`].
#[derive(Debug, Clone, Error)]
pub enum AudioError {
    /// The output context is suspended (e.g. browser autoplay policy) and
    /// needs [`AudioSink::resume`] before playback can proceed.
    #[error("audio output context is suspended")]
    Suspended,

    /// The output device rejected the chunk; the chunk is dropped.
    #[error("audio device error: {0}")]
    Device(String),
}

// ---------------------------------------------------------------------------
// AudioSink trait
// ---------------------------------------------------------------------------

/// Object-safe seam to the platform audio stack.
///
/// Implementations must be `Send + Sync` so they can be held behind an
/// `Arc<dyn AudioSink>` and called from the drain task.  [`play`] must block
/// (asynchronously) until the chunk has been handed to the output pipeline,
/// preserving FIFO order across calls.
///
/// [`play`]: AudioSink::play
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Play one chunk of 16 kHz mono samples to completion.
    async fn play(&self, samples: &[i16]) -> Result<(), AudioError>;

    /// Attempt to wake a suspended output context.
    async fn resume(&self) -> Result<(), AudioError>;
}

// ---------------------------------------------------------------------------
// PCM decoding
// ---------------------------------------------------------------------------

/// Decode raw little-endian 16-bit PCM bytes into samples.
///
/// A trailing odd byte cannot form a sample and is discarded.
pub fn decode_pcm(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

// ---------------------------------------------------------------------------
// PlaybackQueue
// ---------------------------------------------------------------------------

/// Delay between resume attempts while the sink stays suspended.
const RESUME_RETRY_DELAY: Duration = Duration::from_millis(100);

struct QueueInner {
    chunks: Mutex<VecDeque<Vec<u8>>>,
    notify: Notify,
    enabled: AtomicBool,
    closed: AtomicBool,
}

/// In-memory FIFO of PCM chunks drained by a single background task.
///
/// Create with [`PlaybackQueue::new`]; push with [`push`](Self::push).
/// Dropping the queue (or calling [`shutdown`](Self::shutdown)) stops the
/// drain task.
pub struct PlaybackQueue {
    inner: Arc<QueueInner>,
    drain_task: JoinHandle<()>,
}

impl PlaybackQueue {
    /// Spawn the drain task on the current tokio runtime.
    pub fn new(sink: Arc<dyn AudioSink>) -> Self {
        let inner = Arc::new(QueueInner {
            chunks: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            enabled: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        });

        let drain_inner = Arc::clone(&inner);
        let drain_task = tokio::spawn(async move {
            Self::drain_loop(drain_inner, sink).await;
        });

        Self { inner, drain_task }
    }

    /// Enqueue one binary frame of raw PCM.  Ignored while disabled.
    pub fn push(&self, chunk: Vec<u8>) {
        if !self.inner.enabled.load(Ordering::SeqCst) {
            return;
        }
        self.inner.chunks.lock().unwrap().push_back(chunk);
        self.inner.notify.notify_one();
    }

    /// Discard all buffered chunks immediately.
    pub fn flush(&self) {
        self.inner.chunks.lock().unwrap().clear();
    }

    /// Enable or disable playback.  Disabling flushes synchronously, so no
    /// delayed audio can play after an explicit opt-out.
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
        if !enabled {
            self.flush();
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    /// Number of chunks waiting to be played.
    pub fn len(&self) -> usize {
        self.inner.chunks.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flush and stop the drain task.  Safe to call more than once.
    pub fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.flush();
        self.inner.notify.notify_one();
        self.drain_task.abort();
    }

    // -----------------------------------------------------------------------
    // Drain task
    // -----------------------------------------------------------------------

    async fn drain_loop(inner: Arc<QueueInner>, sink: Arc<dyn AudioSink>) {
        loop {
            if inner.closed.load(Ordering::SeqCst) {
                return;
            }

            let chunk = inner.chunks.lock().unwrap().pop_front();
            let Some(chunk) = chunk else {
                inner.notify.notified().await;
                continue;
            };

            if !inner.enabled.load(Ordering::SeqCst) {
                // Mode switched to text-only between push and drain.
                continue;
            }

            let samples = decode_pcm(&chunk);
            if samples.is_empty() {
                continue;
            }

            // Retry while the output context is suspended; give up only when
            // playback gets disabled or the queue shuts down.
            loop {
                match sink.play(&samples).await {
                    Ok(()) => break,
                    Err(AudioError::Suspended) => {
                        if inner.closed.load(Ordering::SeqCst)
                            || !inner.enabled.load(Ordering::SeqCst)
                        {
                            break;
                        }
                        log::debug!("audio: output suspended, attempting resume");
                        if let Err(e) = sink.resume().await {
                            log::debug!("audio: resume failed: {e}");
                        }
                        tokio::time::sleep(RESUME_RETRY_DELAY).await;
                    }
                    Err(e) => {
                        log::warn!("audio: dropping chunk after device error: {e}");
                        break;
                    }
                }
            }
        }
    }
}

impl Drop for PlaybackQueue {
    fn drop(&mut self) {
        self.drain_task.abort();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
