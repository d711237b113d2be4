//! Live capture sessions.
//!
//! A live session reads an unbounded camera source on a background thread and
//! classifies every frame independently. Nothing is aggregated: each result is
//! pushed to a `FrameSink` together with the frame and the time that frame
//! took to transform and classify.
//!
//! - `LiveCapture::start` returns once the device is open; the loop keeps
//!   running until the session is stopped, the source fails, or the sink goes
//!   away.
//! - Cancellation is cooperative: the flag is checked once per frame, so
//!   `LiveSession::stop` returns within one frame's processing time.
//! - At most one session per device. Devices are compared by the opener's
//!   `device_key`, so `0` and `/dev/video0` are the same device. A second
//!   `start` on a busy device fails with `DeviceBusy`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::{ClassifyError, Result};
use crate::frame::Frame;
use crate::infer::InferenceEngine;
use crate::ingest::{FrameSource, SourceGuard, SourceOpener};
use crate::transform::FrameTransformer;
use crate::Label;

// ----------------------------------------------------------------------------
// Reports and sinks
// ----------------------------------------------------------------------------

/// One classified live frame.
#[derive(Debug)]
pub struct LiveReport {
    pub label: Label,
    /// Transform + inference time for this frame alone.
    pub elapsed: Duration,
    pub frame: Frame,
}

impl LiveReport {
    /// Text drawn over the frame by a renderer.
    pub fn overlay_text(&self) -> String {
        format!("Pred: {} | {:.2}s", self.label, self.elapsed.as_secs_f64())
    }
}

/// Destination for live reports (renderer, channel, poll slot).
pub trait FrameSink: Send {
    /// Deliver one report. Returning `false` ends the session.
    fn emit(&mut self, report: LiveReport) -> bool;
}

/// Logs the overlay text of every report.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl FrameSink for LogSink {
    fn emit(&mut self, report: LiveReport) -> bool {
        log::info!("live frame {}: {}", report.frame.index, report.overlay_text());
        true
    }
}

/// Reports queued by `ChannelSink::new`.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 32;

/// Forwards reports over a bounded std channel.
///
/// A full queue drops the report so a slow reader never stalls capture or
/// cancellation. The session ends when the receiver drops.
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::SyncSender<LiveReport>,
    dropped: u64,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::Receiver<LiveReport>) {
        Self::bounded(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<LiveReport>) {
        let (tx, rx) = mpsc::sync_channel(capacity.max(1));
        (Self { tx, dropped: 0 }, rx)
    }

    /// Reports dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl FrameSink for ChannelSink {
    fn emit(&mut self, report: LiveReport) -> bool {
        match self.tx.try_send(report) {
            Ok(()) => true,
            Err(mpsc::TrySendError::Full(report)) => {
                self.dropped += 1;
                log::debug!(
                    "live queue full, dropping frame {} ({} dropped)",
                    report.frame.index,
                    self.dropped
                );
                true
            }
            Err(mpsc::TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Pixel-free summary of the latest live frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LiveSnapshot {
    pub predicted_class: Label,
    pub inference_time: f64,
    pub frame_index: u64,
}

/// Keeps only the most recent report, for polling. Frames are dropped.
#[derive(Clone, Debug, Default)]
pub struct LatestReportSink {
    latest: Arc<Mutex<Option<LiveSnapshot>>>,
}

impl LatestReportSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<LiveSnapshot> {
        self.latest.lock().ok().and_then(|guard| guard.clone())
    }
}

impl FrameSink for LatestReportSink {
    fn emit(&mut self, report: LiveReport) -> bool {
        let snapshot = LiveSnapshot {
            predicted_class: report.label,
            inference_time: report.elapsed.as_secs_f64(),
            frame_index: report.frame.index,
        };
        match self.latest.lock() {
            Ok(mut guard) => {
                *guard = Some(snapshot);
                true
            }
            Err(_) => false,
        }
    }
}

// ----------------------------------------------------------------------------
// Sessions
// ----------------------------------------------------------------------------

/// Why a session's loop ended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum StopReason {
    Cancelled,
    SourceEnded,
    SourceFailed(String),
    InferenceFailed(String),
    SinkClosed,
}

/// Outcome of a finished session.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LiveSummary {
    pub device: String,
    pub frames_processed: u64,
    pub reason: StopReason,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Running,
    Stopped,
}

/// Device-open retry policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LiveSettings {
    /// Total open attempts (at least one).
    pub open_attempts: u32,
    /// Delay before retry `n` is `retry_backoff * n`.
    pub retry_backoff: Duration,
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self {
            open_attempts: 3,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

/// Starts live sessions and tracks which devices are in use.
pub struct LiveCapture {
    opener: Arc<dyn SourceOpener>,
    engine: Arc<InferenceEngine>,
    transformer: FrameTransformer,
    settings: LiveSettings,
    active: Arc<Mutex<HashSet<String>>>,
}

impl LiveCapture {
    pub fn new(
        opener: Arc<dyn SourceOpener>,
        engine: Arc<InferenceEngine>,
        settings: LiveSettings,
    ) -> Self {
        Self {
            opener,
            engine,
            transformer: FrameTransformer::new(),
            settings,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Canonical key of the device behind `device`.
    pub fn device_key(&self, device: &str) -> String {
        self.opener.device_key(device)
    }

    /// Keys of the devices that currently have a running session.
    pub fn active_devices(&self) -> Vec<String> {
        let mut devices: Vec<String> = self
            .active
            .lock()
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        devices.sort();
        devices
    }

    /// Open `device` and start classifying its frames in the background.
    ///
    /// Returns once the device is open (after bounded retries) or has failed
    /// to open.
    pub fn start(&self, device: &str, sink: Box<dyn FrameSink>) -> Result<LiveSession> {
        let lease = DeviceLease::claim(&self.active, &self.device_key(device))?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel();

        let worker = Worker {
            device: device.to_string(),
            opener: self.opener.clone(),
            engine: self.engine.clone(),
            transformer: self.transformer,
            settings: self.settings.clone(),
            shutdown: shutdown.clone(),
        };
        let join = std::thread::Builder::new()
            .name(format!("live-{}", device))
            .spawn(move || worker.run(lease, sink, ready_tx))
            .map_err(|err| {
                ClassifyError::source_unavailable(format!("spawn live worker for {}: {}", device, err))
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                log::info!("live session started on {}", device);
                Ok(LiveSession {
                    device: device.to_string(),
                    shutdown,
                    join: Some(join),
                })
            }
            Ok(Err(err)) => {
                let _ = join.join();
                Err(err)
            }
            Err(_) => {
                let _ = join.join();
                Err(ClassifyError::WorkerPanicked(device.to_string()))
            }
        }
    }
}

/// Handle to a running live session. The caller owns its lifecycle.
///
/// Dropping the handle without `stop` signals cancellation but does not wait.
#[derive(Debug)]
pub struct LiveSession {
    device: String,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<LiveSummary>>,
}

impl LiveSession {
    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn state(&self) -> SessionState {
        match &self.join {
            Some(join) if !join.is_finished() => SessionState::Running,
            _ => SessionState::Stopped,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == SessionState::Running
    }

    /// Signal cancellation without waiting.
    pub fn cancel(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Cancel and wait for the worker to close the device.
    pub fn stop(mut self) -> Result<LiveSummary> {
        self.cancel();
        self.join_worker()
    }

    /// Wait for the session to end on its own (source end or failure).
    pub fn wait(mut self) -> Result<LiveSummary> {
        self.join_worker()
    }

    fn join_worker(&mut self) -> Result<LiveSummary> {
        let join = self
            .join
            .take()
            .ok_or_else(|| ClassifyError::WorkerPanicked(self.device.clone()))?;
        join.join()
            .map_err(|_| ClassifyError::WorkerPanicked(self.device.clone()))
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

/// Marks a device busy until dropped.
struct DeviceLease {
    device: String,
    active: Arc<Mutex<HashSet<String>>>,
}

impl DeviceLease {
    fn claim(active: &Arc<Mutex<HashSet<String>>>, device: &str) -> Result<Self> {
        let mut set = active
            .lock()
            .map_err(|_| ClassifyError::DeviceBusy(format!("{} (device table poisoned)", device)))?;
        if !set.insert(device.to_string()) {
            return Err(ClassifyError::DeviceBusy(device.to_string()));
        }
        Ok(Self {
            device: device.to_string(),
            active: active.clone(),
        })
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        if let Ok(mut set) = self.active.lock() {
            set.remove(&self.device);
        }
    }
}

struct Worker {
    device: String,
    opener: Arc<dyn SourceOpener>,
    engine: Arc<InferenceEngine>,
    transformer: FrameTransformer,
    settings: LiveSettings,
    shutdown: Arc<AtomicBool>,
}

impl Worker {
    fn run(
        self,
        lease: DeviceLease,
        mut sink: Box<dyn FrameSink>,
        ready: mpsc::Sender<Result<()>>,
    ) -> LiveSummary {
        let mut source = match open_with_retry(self.opener.as_ref(), &self.device, &self.settings)
        {
            Ok(source) => SourceGuard::new(source),
            Err(err) => {
                let reason = StopReason::SourceFailed(err.to_string());
                let _ = ready.send(Err(err));
                return self.summary(0, reason);
            }
        };
        let _ = ready.send(Ok(()));

        let mut frames_processed = 0u64;
        let reason = loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break StopReason::Cancelled;
            }
            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break StopReason::SourceEnded,
                Err(err) => break StopReason::SourceFailed(err.to_string()),
            };
            let started = Instant::now();
            let label = match self
                .transformer
                .transform(&frame)
                .and_then(|tensor| self.engine.apply(&tensor))
            {
                Ok(label) => label,
                Err(err) => break StopReason::InferenceFailed(err.to_string()),
            };
            let elapsed = started.elapsed();
            frames_processed += 1;
            if !sink.emit(LiveReport {
                label,
                elapsed,
                frame,
            }) {
                break StopReason::SinkClosed;
            }
        };

        source.close();
        drop(lease);
        match &reason {
            StopReason::Cancelled | StopReason::SourceEnded | StopReason::SinkClosed => {
                log::info!(
                    "live session on {} stopped after {} frames: {:?}",
                    self.device,
                    frames_processed,
                    reason
                )
            }
            StopReason::SourceFailed(_) | StopReason::InferenceFailed(_) => log::warn!(
                "live session on {} failed after {} frames: {:?}",
                self.device,
                frames_processed,
                reason
            ),
        }
        self.summary(frames_processed, reason)
    }

    fn summary(&self, frames_processed: u64, reason: StopReason) -> LiveSummary {
        LiveSummary {
            device: self.device.clone(),
            frames_processed,
            reason,
        }
    }
}

/// Open with bounded retry; only `SourceUnavailable` is treated as transient.
fn open_with_retry(
    opener: &dyn SourceOpener,
    device: &str,
    settings: &LiveSettings,
) -> Result<Box<dyn FrameSource>> {
    let attempts = settings.open_attempts.max(1);
    let mut attempt = 1;
    loop {
        match opener.open(device) {
            Ok(source) => return Ok(source),
            Err(err @ ClassifyError::SourceUnavailable(_)) if attempt < attempts => {
                log::warn!(
                    "open {} failed (attempt {}/{}): {}",
                    device,
                    attempt,
                    attempts,
                    err
                );
                std::thread::sleep(settings.retry_backoff * attempt);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
