//! Frame ingestion sources.
//!
//! This module provides sources of decoded frames:
//! - Local video files (feature: ingest-file-ffmpeg)
//! - Camera devices via V4L2 (feature: ingest-v4l2)
//! - Synthetic `stub://` sources (testing, demos)
//!
//! v1 deployments assume local-only ingestion: URL schemes other than
//! `stub://` are rejected.
//!
//! Every opened source is closed exactly once. Callers hold sources through a
//! `SourceGuard`, which closes on drop, so early returns and errors cannot leak
//! a device or file handle.

pub mod camera;
#[cfg(feature = "ingest-v4l2")]
pub(crate) mod camera_v4l2;
pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
pub(crate) mod synthetic;

pub use camera::{CameraSettings, CameraSource};
pub use file::FileSource;

use crate::error::{ClassifyError, Result};
use crate::frame::Frame;

/// A lazily decoded sequence of frames.
///
/// File-backed sources are finite and return `Ok(None)` at end-of-stream.
/// Camera sources are unbounded: they end only on device failure or when the
/// caller stops reading.
pub trait FrameSource {
    /// Identifier this source was opened with.
    fn identifier(&self) -> &str;

    /// Decode the next frame. `Ok(None)` marks end-of-stream.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Release the underlying device or file.
    fn close(&mut self);
}

/// Factory for frame sources. Shared across threads.
pub trait SourceOpener: Send + Sync {
    /// Open a source. Fails with `SourceUnavailable` when it cannot be opened
    /// or decoded; nothing is left open on failure.
    fn open(&self, identifier: &str) -> Result<Box<dyn FrameSource>>;

    /// Whether `identifier` names an unbounded camera rather than a finite file.
    fn is_camera(&self, _identifier: &str) -> bool {
        false
    }

    /// Canonical name of the device behind `identifier`.
    ///
    /// Different spellings of one device map to the same key, so exclusivity
    /// can be enforced on the device rather than on the string.
    fn device_key(&self, identifier: &str) -> String {
        identifier.trim().to_string()
    }
}

/// Scoped ownership of an opened source: closes exactly once.
pub(crate) struct SourceGuard {
    source: Box<dyn FrameSource>,
    closed: bool,
}

impl SourceGuard {
    pub(crate) fn new(source: Box<dyn FrameSource>) -> Self {
        Self {
            source,
            closed: false,
        }
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.closed {
            return Err(ClassifyError::SourceUnavailable(format!(
                "{} is closed",
                self.source.identifier()
            )));
        }
        self.source.next_frame()
    }

    pub(crate) fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.source.close();
        }
    }
}

impl Drop for SourceGuard {
    fn drop(&mut self) {
        self.close();
    }
}

/// Routes identifiers to file or camera sources.
///
/// - `camera:<index>`, `camera:<path>`, `/dev/video<n>` or a bare index → `CameraSource`
/// - `camera:stub://...` → synthetic unbounded camera
/// - `stub://...` → synthetic finite file
/// - anything else → `FileSource` (local path, optional `file:` prefix)
#[derive(Clone, Debug, Default)]
pub struct DefaultOpener {
    camera: CameraSettings,
}

impl DefaultOpener {
    pub fn new(camera: CameraSettings) -> Self {
        Self { camera }
    }
}

impl SourceOpener for DefaultOpener {
    fn open(&self, identifier: &str) -> Result<Box<dyn FrameSource>> {
        let identifier = identifier.trim();
        if let Some(device) = camera_device(identifier) {
            let source = CameraSource::open(&device, &self.camera)?;
            return Ok(Box::new(source));
        }
        Ok(Box::new(FileSource::open(identifier)?))
    }

    fn is_camera(&self, identifier: &str) -> bool {
        camera_device(identifier.trim()).is_some()
    }

    fn device_key(&self, identifier: &str) -> String {
        let identifier = identifier.trim();
        match camera_device(identifier) {
            Some(device) => camera::device_key(&device).unwrap_or(device),
            None => identifier.to_string(),
        }
    }
}

fn camera_device(identifier: &str) -> Option<String> {
    if let Some(rest) = identifier.strip_prefix("camera:") {
        return Some(rest.to_string());
    }
    if identifier.starts_with("/dev/video")
        || (!identifier.is_empty() && identifier.chars().all(|c| c.is_ascii_digit()))
    {
        return Some(identifier.to_string());
    }
    None
}
