//! Synthetic `stub://` sources for tests and demos.
//!
//! Query keys (`stub://name?key=value&flag`):
//! - `frames=N`: number of frames before end-of-stream (files default to 16,
//!   cameras are unbounded unless set)
//! - `width=W`, `height=H`: frame size (default 64x48)
//! - `labels=Abuse,Arrest,...`: frame `i` is a uniform gray frame that the stub
//!   backend classifies as `labels[i % len]`
//! - `fail_open`: opening fails
//! - `fail_at=K`: decoding frame `K` (0-based) fails
//! - `fps=N`: pace frames at N per second (0 = unpaced)
//!
//! `stub://empty` is shorthand for `frames=0`.

use std::str::FromStr;
use std::time::Duration;

use crate::error::{ClassifyError, Result};
use crate::frame::{Frame, PixelLayout};
use crate::infer::StubBackend;
use crate::Label;

const DEFAULT_FILE_FRAMES: u64 = 16;
const DEFAULT_WIDTH: u32 = 64;
const DEFAULT_HEIGHT: u32 = 48;

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct SyntheticSpec {
    pub frames: Option<u64>,
    pub width: u32,
    pub height: u32,
    pub labels: Vec<Label>,
    pub fail_open: bool,
    pub fail_at: Option<u64>,
    pub fps: u32,
}

impl SyntheticSpec {
    /// Parse a `stub://` identifier. `bounded` selects the file default length.
    pub(crate) fn parse(identifier: &str, bounded: bool) -> Result<Self> {
        let rest = identifier.strip_prefix("stub://").ok_or_else(|| {
            ClassifyError::SourceUnavailable(format!("{} is not a stub:// identifier", identifier))
        })?;
        let (name, query) = rest.split_once('?').unwrap_or((rest, ""));
        let mut spec = Self {
            frames: if bounded { Some(DEFAULT_FILE_FRAMES) } else { None },
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            labels: Vec::new(),
            fail_open: false,
            fail_at: None,
            fps: 0,
        };
        if name == "empty" {
            spec.frames = Some(0);
        }
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            match key {
                "frames" => spec.frames = Some(parse_number(identifier, key, value)?),
                "width" => spec.width = parse_number(identifier, key, value)?,
                "height" => spec.height = parse_number(identifier, key, value)?,
                "fps" => spec.fps = parse_number(identifier, key, value)?,
                "fail_at" => spec.fail_at = Some(parse_number(identifier, key, value)?),
                "fail_open" => spec.fail_open = true,
                "labels" => spec.labels = parse_labels(identifier, value)?,
                other => {
                    return Err(ClassifyError::SourceUnavailable(format!(
                        "{}: unknown stub option '{}'",
                        identifier, other
                    )))
                }
            }
        }
        if spec.width == 0 || spec.height == 0 {
            return Err(ClassifyError::SourceUnavailable(format!(
                "{}: stub frames need non-zero dimensions",
                identifier
            )));
        }
        Ok(spec)
    }
}

fn parse_number<T: FromStr>(identifier: &str, key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| {
        ClassifyError::SourceUnavailable(format!(
            "{}: stub option {} expects a number, got '{}'",
            identifier, key, value
        ))
    })
}

fn parse_labels(identifier: &str, value: &str) -> Result<Vec<Label>> {
    value
        .split(',')
        .filter(|name| !name.is_empty())
        .map(|name| {
            Label::CLASSES
                .iter()
                .copied()
                .find(|label| label.as_str().eq_ignore_ascii_case(name))
                .ok_or_else(|| {
                    ClassifyError::SourceUnavailable(format!(
                        "{}: unknown label '{}'",
                        identifier, name
                    ))
                })
        })
        .collect()
}

/// Deterministic frame generator backing stub file and camera sources.
pub(crate) struct SyntheticSource {
    identifier: String,
    spec: SyntheticSpec,
    frame_count: u64,
    closed: bool,
}

impl SyntheticSource {
    pub(crate) fn open(identifier: &str, spec: SyntheticSpec) -> Result<Self> {
        if spec.fail_open {
            return Err(ClassifyError::SourceUnavailable(format!(
                "{}: synthetic open failure",
                identifier
            )));
        }
        log::info!("SyntheticSource: connected to {}", identifier);
        Ok(Self {
            identifier: identifier.to_string(),
            spec,
            frame_count: 0,
            closed: false,
        })
    }

    pub(crate) fn identifier(&self) -> &str {
        &self.identifier
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.closed {
            return Err(ClassifyError::SourceUnavailable(format!(
                "{} is closed",
                self.identifier
            )));
        }
        if self.spec.frames.is_some_and(|total| self.frame_count >= total) {
            return Ok(None);
        }
        if self.spec.fail_at == Some(self.frame_count) {
            return Err(ClassifyError::SourceUnavailable(format!(
                "{}: synthetic decode failure at frame {}",
                self.identifier, self.frame_count
            )));
        }
        if self.spec.fps > 0 {
            std::thread::sleep(Duration::from_millis(1000 / self.spec.fps as u64));
        }

        let index = self.frame_count;
        self.frame_count += 1;
        let pixels = self.generate_pixels(index);
        Frame::new(
            pixels,
            self.spec.width,
            self.spec.height,
            PixelLayout::Bgr24,
            index,
        )
        .map(Some)
    }

    pub(crate) fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            log::info!(
                "SyntheticSource: closed {} after {} frames",
                self.identifier,
                self.frames_read()
            );
        }
    }

    pub(crate) fn frames_read(&self) -> u64 {
        self.frame_count
    }

    fn generate_pixels(&self, index: u64) -> Vec<u8> {
        let len = (self.spec.width as usize) * (self.spec.height as usize) * 3;
        if self.spec.labels.is_empty() {
            // Moving gradient.
            return (0..len)
                .map(|i| ((i as u64 + index) % 256) as u8)
                .collect();
        }
        let label = self.spec.labels[(index % self.spec.labels.len() as u64) as usize];
        vec![StubBackend::gray_level(label); len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_options() -> Result<()> {
        let spec = SyntheticSpec::parse(
            "stub://clip?frames=3&width=8&height=4&labels=abuse,Normal&fail_at=2&fps=5",
            true,
        )?;
        assert_eq!(spec.frames, Some(3));
        assert_eq!((spec.width, spec.height), (8, 4));
        assert_eq!(spec.labels, vec![Label::Abuse, Label::Normal]);
        assert_eq!(spec.fail_at, Some(2));
        assert_eq!(spec.fps, 5);
        assert!(!spec.fail_open);
        Ok(())
    }

    #[test]
    fn camera_stubs_are_unbounded_by_default() -> Result<()> {
        assert_eq!(SyntheticSpec::parse("stub://front", false)?.frames, None);
        assert_eq!(SyntheticSpec::parse("stub://clip", true)?.frames, Some(16));
        assert_eq!(SyntheticSpec::parse("stub://empty", true)?.frames, Some(0));
        Ok(())
    }

    #[test]
    fn rejects_unknown_options_and_labels() {
        assert!(SyntheticSpec::parse("stub://clip?color=red", true).is_err());
        assert!(SyntheticSpec::parse("stub://clip?labels=Theft", true).is_err());
        assert!(SyntheticSpec::parse("stub://clip?frames=many", true).is_err());
    }

    #[test]
    fn fail_at_interrupts_decoding() -> Result<()> {
        let spec = SyntheticSpec::parse("stub://clip?frames=5&fail_at=1", true)?;
        let mut source = SyntheticSource::open("stub://clip", spec)?;
        assert!(source.next_frame()?.is_some());
        assert!(source.next_frame().is_err());
        Ok(())
    }

    #[test]
    fn frames_carry_sequence_indices() -> Result<()> {
        let spec = SyntheticSpec::parse("stub://clip?frames=3", true)?;
        let mut source = SyntheticSource::open("stub://clip", spec)?;
        let mut indices = Vec::new();
        while let Some(frame) = source.next_frame()? {
            indices.push(frame.index);
        }
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(source.frames_read(), 3);
        Ok(())
    }
}
