//! Camera frame source.
//!
//! `CameraSource` captures an unbounded stream of frames from a local camera.
//! It ends only when the device fails or the caller closes it.
//!
//! Device identifiers:
//! - `stub://name?...`: synthetic camera (see `synthetic` for options)
//! - `0`, `1`, ...: `/dev/video<n>`
//! - `/dev/video<n>`: device node path
//!
//! Only one live session may hold a given device; that is enforced by
//! `live::LiveCapture`, not here.

#[cfg(feature = "ingest-v4l2")]
use super::camera_v4l2::V4l2CameraSource;
use super::synthetic::{SyntheticSource, SyntheticSpec};
use super::FrameSource;
use crate::error::{ClassifyError, Result};
use crate::frame::Frame;

/// Capture parameters for real camera devices.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CameraSettings {
    /// Target frame rate requested from the device.
    pub target_fps: u32,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            target_fps: 10,
            width: 640,
            height: 480,
        }
    }
}

/// Camera frame source.
pub struct CameraSource {
    backend: CameraBackend,
}

enum CameraBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "ingest-v4l2")]
    Device(V4l2CameraSource),
}

impl CameraSource {
    pub fn open(device: &str, settings: &CameraSettings) -> Result<Self> {
        if device.starts_with("stub://") {
            let spec = SyntheticSpec::parse(device, false)?;
            return Ok(Self {
                backend: CameraBackend::Synthetic(SyntheticSource::open(device, spec)?),
            });
        }
        let node = device_node(device)?;
        #[cfg(feature = "ingest-v4l2")]
        {
            Ok(Self {
                backend: CameraBackend::Device(V4l2CameraSource::open(&node, settings)?),
            })
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            let _ = settings;
            Err(ClassifyError::SourceUnavailable(format!(
                "cannot open camera {}: camera capture requires the ingest-v4l2 feature",
                node
            )))
        }
    }
}

impl FrameSource for CameraSource {
    fn identifier(&self) -> &str {
        match &self.backend {
            CameraBackend::Synthetic(source) => source.identifier(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.identifier(),
        }
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.next_frame(),
        }
    }

    fn close(&mut self) {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.close(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.close(),
        }
    }
}

/// Canonical key for a camera device: the `/dev/video*` node, or the synthetic
/// camera's name without its options.
pub(crate) fn device_key(device: &str) -> Result<String> {
    if device.starts_with("stub://") {
        let name = device.split('?').next().unwrap_or(device);
        return Ok(name.to_string());
    }
    device_node(device)
}

/// Resolve a camera index or device path to a `/dev/video*` node.
fn device_node(device: &str) -> Result<String> {
    if device.starts_with("/dev/video") {
        return Ok(device.to_string());
    }
    if !device.is_empty() && device.chars().all(|c| c.is_ascii_digit()) {
        return Ok(format!("/dev/video{}", device));
    }
    Err(ClassifyError::SourceUnavailable(format!(
        "unrecognized camera device '{}'",
        device
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_camera_is_unbounded() -> Result<()> {
        let mut source = CameraSource::open("stub://front", &CameraSettings::default())?;
        for expected in 0..100 {
            let frame = source.next_frame()?.expect("camera frame");
            assert_eq!(frame.index, expected);
        }
        source.close();
        Ok(())
    }

    #[test]
    fn resolves_device_nodes() -> Result<()> {
        assert_eq!(device_node("0")?, "/dev/video0");
        assert_eq!(device_node("/dev/video3")?, "/dev/video3");
        assert!(device_node("front door").is_err());
        Ok(())
    }

    #[test]
    fn synthetic_keys_ignore_options() -> Result<()> {
        assert_eq!(device_key("stub://front?fps=5&labels=Arson")?, "stub://front");
        assert_eq!(device_key("3")?, "/dev/video3");
        Ok(())
    }

    #[cfg(not(feature = "ingest-v4l2"))]
    #[test]
    fn real_devices_need_the_v4l2_feature() {
        assert!(matches!(
            CameraSource::open("0", &CameraSettings::default()),
            Err(ClassifyError::SourceUnavailable(_))
        ));
    }
}
