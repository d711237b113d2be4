//! Local file frame source using FFmpeg.
//!
//! Decodes the best video stream of a local file and converts each frame to
//! packed BGR in memory. Nothing is written to disk.

use anyhow::{anyhow, Context};
use ffmpeg_next as ffmpeg;

use crate::error::{ClassifyError, Result};
use crate::frame::{Frame, PixelLayout};

pub(crate) struct FfmpegFileSource {
    path: String,
    state: Option<DecodeState>,
    frame_count: u64,
}

struct DecodeState {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    eof_sent: bool,
}

impl FfmpegFileSource {
    pub(crate) fn open(path: &str) -> Result<Self> {
        let state = DecodeState::open(path)
            .map_err(|err| ClassifyError::source_unavailable(format!("{:#}", err)))?;
        log::info!("FileSource: connected to {} (ffmpeg)", path);
        Ok(Self {
            path: path.to_string(),
            state: Some(state),
            frame_count: 0,
        })
    }

    pub(crate) fn identifier(&self) -> &str {
        &self.path
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<Frame>> {
        let state = self.state.as_mut().ok_or_else(|| {
            ClassifyError::SourceUnavailable(format!("{} is closed", self.path))
        })?;
        let decoded = state
            .next_bgr()
            .map_err(|err| ClassifyError::source_unavailable(format!("{}: {:#}", self.path, err)))?;
        let Some((pixels, width, height)) = decoded else {
            return Ok(None);
        };
        let index = self.frame_count;
        self.frame_count += 1;
        Frame::new(pixels, width, height, PixelLayout::Bgr24, index).map(Some)
    }

    pub(crate) fn close(&mut self) {
        if self.state.take().is_some() {
            log::info!(
                "FileSource: closed {} after {} frames",
                self.path,
                self.frame_count
            );
        }
    }
}

impl DecodeState {
    fn open(path: &str) -> anyhow::Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&path)
            .with_context(|| format!("failed to open file input '{}' with ffmpeg", path))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("file has no video track"))?;
        let stream_index = input_stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::BGR24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        Ok(Self {
            input,
            stream_index,
            decoder,
            scaler,
            eof_sent: false,
        })
    }

    /// Drain buffered frames first, then feed packets until one decodes.
    fn next_bgr(&mut self) -> anyhow::Result<Option<(Vec<u8>, u32, u32)>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                let mut bgr = ffmpeg::frame::Video::empty();
                self.scaler
                    .run(&decoded, &mut bgr)
                    .context("scale frame to BGR")?;
                return frame_to_pixels(&bgr).map(Some);
            }
            if self.eof_sent {
                return Ok(None);
            }
            match self.input.packets().next() {
                Some((stream, packet)) => {
                    if stream.index() != self.stream_index {
                        continue;
                    }
                    self.decoder
                        .send_packet(&packet)
                        .context("send packet to ffmpeg decoder")?;
                }
                None => {
                    self.decoder.send_eof().context("flush ffmpeg decoder")?;
                    self.eof_sent = true;
                }
            }
        }
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> anyhow::Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let packed = data
            .get(..row_bytes * height as usize)
            .context("ffmpeg frame buffer is shorter than its dimensions")?;
        return Ok((packed.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
