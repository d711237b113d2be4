//! V4L2 camera capture.
//!
//! Opens a local device node, negotiates a packed RGB format when the driver
//! allows it, and captures frames through an mmap buffer stream.

use anyhow::Context;
use ouroboros::self_referencing;

use super::camera::CameraSettings;
use crate::error::{ClassifyError, Result};
use crate::frame::{Frame, PixelLayout};

pub(crate) struct V4l2CameraSource {
    device_path: String,
    state: Option<DeviceState>,
    layout: PixelLayout,
    width: u32,
    height: u32,
    frame_count: u64,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2CameraSource {
    pub(crate) fn open(device_path: &str, settings: &CameraSettings) -> Result<Self> {
        Self::connect(device_path, settings)
            .map_err(|err| ClassifyError::source_unavailable(format!("{:#}", err)))
    }

    fn connect(device_path: &str, settings: &CameraSettings) -> anyhow::Result<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let device = v4l::Device::with_path(device_path)
            .with_context(|| format!("open v4l2 device {}", device_path))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = settings.width;
        format.height = settings.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "CameraSource: failed to set format on {}: {}",
                    device_path,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        if settings.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(settings.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "CameraSource: failed to set fps on {}: {}",
                    device_path,
                    err
                );
            }
        }

        let layout = layout_for(&format.fourcc.repr)
            .with_context(|| format!("unsupported v4l2 pixel format {}", format.fourcc))?;

        let state = DeviceStateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .context("create v4l2 buffer stream")
            },
        }
        .try_build()?;

        log::info!(
            "CameraSource: connected to {} ({}x{} {:?})",
            device_path,
            format.width,
            format.height,
            layout
        );
        Ok(Self {
            device_path: device_path.to_string(),
            state: Some(state),
            layout,
            width: format.width,
            height: format.height,
            frame_count: 0,
        })
    }

    pub(crate) fn identifier(&self) -> &str {
        &self.device_path
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<Frame>> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().ok_or_else(|| {
            ClassifyError::SourceUnavailable(format!("{} is closed", self.device_path))
        })?;
        let pixels = state
            .with_stream_mut(|stream| stream.next().map(|(buf, _meta)| buf.to_vec()))
            .map_err(|err| {
                ClassifyError::SourceUnavailable(format!(
                    "capture v4l2 frame from {}: {}",
                    self.device_path, err
                ))
            })?;

        let expected = self.layout.buffer_len(self.width, self.height)?;
        if pixels.len() < expected {
            return Err(ClassifyError::SourceUnavailable(format!(
                "short v4l2 buffer from {}: expected {} bytes, got {}",
                self.device_path,
                expected,
                pixels.len()
            )));
        }
        let mut pixels = pixels;
        pixels.truncate(expected);

        let index = self.frame_count;
        self.frame_count += 1;
        Frame::new(pixels, self.width, self.height, self.layout, index).map(Some)
    }

    pub(crate) fn close(&mut self) {
        if self.state.take().is_some() {
            log::info!(
                "CameraSource: closed {} after {} frames",
                self.device_path,
                self.frame_count
            );
        }
    }
}

fn layout_for(fourcc: &[u8; 4]) -> Option<PixelLayout> {
    match fourcc {
        b"RGB3" => Some(PixelLayout::Rgb24),
        b"BGR3" => Some(PixelLayout::Bgr24),
        b"GREY" => Some(PixelLayout::Gray8),
        b"NV12" => Some(PixelLayout::Nv12),
        _ => None,
    }
}
