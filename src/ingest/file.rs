//! Local file frame source.
//!
//! `FileSource` decodes frames from a local video file. It is finite: after
//! the last frame `next_frame` returns `Ok(None)`.
//!
//! The file source MUST NOT:
//! - Fetch remote URLs
//! - Store decoded frames to disk

use super::synthetic::{SyntheticSource, SyntheticSpec};
#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use super::FrameSource;
use crate::error::{ClassifyError, Result};
use crate::frame::Frame;

/// Local file frame source.
pub struct FileSource {
    backend: FileBackend,
}

enum FileBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
}

impl FileSource {
    /// Open a local file (optionally `file:`-prefixed) or a `stub://` clip.
    pub fn open(identifier: &str) -> Result<Self> {
        if !is_local_file_path(identifier) {
            return Err(ClassifyError::SourceUnavailable(format!(
                "file ingestion only supports local paths (no URL schemes): {}",
                identifier
            )));
        }
        if identifier.starts_with("stub://") {
            let spec = SyntheticSpec::parse(identifier, true)?;
            return Ok(Self {
                backend: FileBackend::Synthetic(SyntheticSource::open(identifier, spec)?),
            });
        }
        let path = identifier.strip_prefix("file:").unwrap_or(identifier);
        #[cfg(feature = "ingest-file-ffmpeg")]
        {
            Ok(Self {
                backend: FileBackend::Ffmpeg(FfmpegFileSource::open(path)?),
            })
        }
        #[cfg(not(feature = "ingest-file-ffmpeg"))]
        {
            Err(ClassifyError::SourceUnavailable(format!(
                "cannot decode {}: file ingestion requires the ingest-file-ffmpeg feature",
                path
            )))
        }
    }
}

impl FrameSource for FileSource {
    fn identifier(&self) -> &str {
        match &self.backend {
            FileBackend::Synthetic(source) => source.identifier(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.identifier(),
        }
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.next_frame(),
        }
    }

    fn close(&mut self) {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.close(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.close(),
        }
    }
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with("stub://") {
        return true;
    }
    !path.contains("://")
}
