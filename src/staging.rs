//! Scoped temporary storage for uploaded payloads.
//!
//! Uploaded videos are written to a uniquely named file in the staging
//! directory right before decoding and removed right after, whatever the
//! outcome. Concurrent requests never share a path.
//!
//! Payloads are validated before anything touches disk:
//! - size must not exceed the configured limit
//! - the leading bytes must look like a supported container (MP4/MOV, AVI,
//!   Matroska/WebM)

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::{ClassifyError, Result};

/// Default upload size limit (256 MiB).
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 256 * 1024 * 1024;

/// Container families accepted for upload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContainerKind {
    /// ISO base media (MP4, MOV).
    IsoBmff,
    Avi,
    Matroska,
}

impl ContainerKind {
    /// Identify a container from its leading bytes.
    pub fn sniff(payload: &[u8]) -> Option<Self> {
        const ISO_BOXES: [&[u8; 4]; 6] = [b"ftyp", b"moov", b"mdat", b"free", b"wide", b"skip"];
        if payload.len() >= 12 && &payload[..4] == b"RIFF" && &payload[8..12] == b"AVI " {
            return Some(Self::Avi);
        }
        if payload.len() >= 4 && payload[..4] == [0x1A, 0x45, 0xDF, 0xA3] {
            return Some(Self::Matroska);
        }
        if payload.len() >= 8 && ISO_BOXES.iter().any(|b| &payload[4..8] == *b) {
            return Some(Self::IsoBmff);
        }
        None
    }

    fn extension(self) -> &'static str {
        match self {
            Self::IsoBmff => ".mp4",
            Self::Avi => ".avi",
            Self::Matroska => ".mkv",
        }
    }
}

/// Writes validated payloads into a staging directory.
#[derive(Clone, Debug)]
pub struct PayloadStager {
    dir: PathBuf,
    max_bytes: usize,
}

impl PayloadStager {
    pub fn new(dir: impl Into<PathBuf>, max_bytes: usize) -> Self {
        Self {
            dir: dir.into(),
            max_bytes,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Validate and write a payload. The returned handle deletes the file on drop.
    pub fn stage(&self, payload: &[u8]) -> Result<StagedPayload> {
        if payload.len() > self.max_bytes {
            return Err(ClassifyError::PayloadTooLarge {
                size: payload.len(),
                limit: self.max_bytes,
            });
        }
        if payload.is_empty() {
            return Err(ClassifyError::SourceUnavailable("empty payload".into()));
        }
        let kind = ContainerKind::sniff(payload).ok_or_else(|| {
            ClassifyError::SourceUnavailable("payload is not a recognized video container".into())
        })?;

        std::fs::create_dir_all(&self.dir)?;
        let mut file = tempfile::Builder::new()
            .prefix("upload-")
            .suffix(kind.extension())
            .tempfile_in(&self.dir)?;
        file.write_all(payload)?;
        file.flush()?;
        log::debug!(
            "staged {} byte {:?} payload at {}",
            payload.len(),
            kind,
            file.path().display()
        );
        Ok(StagedPayload { file, kind })
    }
}

impl Default for PayloadStager {
    fn default() -> Self {
        Self::new(std::env::temp_dir(), DEFAULT_MAX_PAYLOAD_BYTES)
    }
}

/// A staged upload. Removed from disk when dropped.
#[derive(Debug)]
pub struct StagedPayload {
    file: NamedTempFile,
    kind: ContainerKind,
}

impl StagedPayload {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn kind(&self) -> ContainerKind {
        self.kind
    }

    /// Identifier to hand to a `SourceOpener`.
    pub fn identifier(&self) -> String {
        self.path().display().to_string()
    }

    /// Remove now, reporting failures instead of ignoring them as drop does.
    pub fn remove(self) -> Result<()> {
        let path = self.path().to_path_buf();
        self.file.close()?;
        log::debug!("removed staged payload {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mp4_header() -> Vec<u8> {
        let mut bytes = vec![0, 0, 0, 0x18];
        bytes.extend_from_slice(b"ftypisom");
        bytes.extend_from_slice(&[0u8; 32]);
        bytes
    }

    fn dir_entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    #[test]
    fn sniffs_supported_containers() {
        assert_eq!(ContainerKind::sniff(&mp4_header()), Some(ContainerKind::IsoBmff));
        assert_eq!(
            ContainerKind::sniff(b"RIFF\x00\x10\x00\x00AVI LIST"),
            Some(ContainerKind::Avi)
        );
        assert_eq!(
            ContainerKind::sniff(&[0x1A, 0x45, 0xDF, 0xA3, 0x01]),
            Some(ContainerKind::Matroska)
        );
        assert_eq!(ContainerKind::sniff(b"not a video at all"), None);
        assert_eq!(ContainerKind::sniff(b"RIFF"), None);
    }

    #[test]
    fn staged_file_is_removed_on_drop() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let stager = PayloadStager::new(dir.path(), 1024);
        let staged = stager.stage(&mp4_header())?;
        let path = staged.path().to_path_buf();
        assert!(path.exists());
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("mp4"));
        drop(staged);
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn concurrent_stages_get_distinct_paths() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let stager = PayloadStager::new(dir.path(), 1024);
        let a = stager.stage(&mp4_header())?;
        let b = stager.stage(&mp4_header())?;
        assert_ne!(a.path(), b.path());
        a.remove()?;
        b.remove()?;
        assert_eq!(dir_entries(dir.path()), 0);
        Ok(())
    }

    #[test]
    fn oversized_payload_is_rejected_before_writing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let stager = PayloadStager::new(dir.path(), 16);
        let err = stager.stage(&mp4_header()).unwrap_err();
        assert!(matches!(
            err,
            ClassifyError::PayloadTooLarge { size: 44, limit: 16 }
        ));
        assert_eq!(dir_entries(dir.path()), 0);
        Ok(())
    }

    #[test]
    fn unrecognized_payload_is_source_unavailable() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let stager = PayloadStager::new(dir.path(), 1024);
        assert!(matches!(
            stager.stage(b"garbage bytes that are not video"),
            Err(ClassifyError::SourceUnavailable(_))
        ));
        assert!(matches!(
            stager.stage(b""),
            Err(ClassifyError::SourceUnavailable(_))
        ));
        assert_eq!(dir_entries(dir.path()), 0);
        Ok(())
    }
}
