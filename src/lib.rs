//! Incident classifier
//!
//! Classifies short videos, and separately a live camera feed, into a fixed set
//! of incident categories by running a per-frame model.
//!
//! # Architecture
//!
//! Two operations sit on top of three leaf components:
//!
//! 1. **Frame sources** (`ingest`): decode a file or camera into frames.
//! 2. **Frame transformer** (`transform`): luminance, rescale, resize into a tensor.
//! 3. **Inference engine** (`infer`): loaded once, applied read-only per frame.
//!
//! - `pipeline::ClassificationPipeline` runs one bounded pass over a file and
//!   reduces the per-frame labels with `aggregate::aggregate`.
//! - `live::LiveCapture` runs an unbounded, cancellable background loop over a
//!   camera and emits every per-frame result to a sink.
//!
//! The two operations share the leaf components but never depend on each other.
//!
//! # Module Structure
//!
//! - `frame`: decoded frames and their pixel layouts
//! - `ingest`: frame sources (local files, camera devices, synthetic stubs)
//! - `transform`, `infer`, `aggregate`: per-frame math and the vote
//! - `pipeline`, `live`: the two operations
//! - `staging`: scoped temporary storage for uploaded payloads
//! - `api`: HTTP request layer binding `classify` and live capture
//! - `config`: service configuration (file + environment)
//! - Core types: Label, ClassificationResult

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub mod aggregate;
pub mod api;
pub mod config;
pub mod error;
pub mod frame;
pub mod infer;
pub mod ingest;
pub mod live;
pub mod pipeline;
pub mod staging;
pub mod transform;

pub use aggregate::aggregate;
pub use error::{ClassifyError, Result};
pub use frame::{Frame, PixelLayout};
pub use infer::{ClassifierBackend, InferenceEngine, ModelSettings, StubBackend};
pub use ingest::{CameraSource, DefaultOpener, FileSource, FrameSource, SourceOpener};
pub use live::{
    ChannelSink, FrameSink, LatestReportSink, LiveCapture, LiveReport, LiveSession,
    LiveSettings, LiveSummary, StopReason,
};
pub use pipeline::{ClassificationPipeline, PipelineState};
pub use staging::{PayloadStager, StagedPayload};
pub use transform::{FrameTransformer, Tensor, RESOLUTION};

// -------------------- Labels --------------------

/// Number of real classes the model distinguishes.
pub const NUM_CLASSES: usize = 8;

/// Incident category produced per frame and per run.
///
/// The first eight variants are model classes, in model output order.
/// `Unknown` is reserved and never a model output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Label {
    Abuse,
    Arrest,
    Arson,
    Assault,
    Burglary,
    Explosion,
    Fighting,
    Normal,
    Unknown,
}

impl Label {
    /// Model classes in output-index order.
    pub const CLASSES: [Label; NUM_CLASSES] = [
        Label::Abuse,
        Label::Arrest,
        Label::Arson,
        Label::Assault,
        Label::Burglary,
        Label::Explosion,
        Label::Fighting,
        Label::Normal,
    ];

    /// Map a model output index to its class. Out-of-range indices have no class.
    pub fn from_index(index: usize) -> Option<Label> {
        Self::CLASSES.get(index).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Label::Abuse => "Abuse",
            Label::Arrest => "Arrest",
            Label::Arson => "Arson",
            Label::Assault => "Assault",
            Label::Burglary => "Burglary",
            Label::Explosion => "Explosion",
            Label::Fighting => "Fighting",
            Label::Normal => "Normal",
            Label::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// -------------------- Results --------------------

/// Terminal output of one classification run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClassificationResult {
    label: Label,
    elapsed: Duration,
}

impl ClassificationResult {
    pub(crate) fn new(label: Label, elapsed: Duration) -> Self {
        Self { label, elapsed }
    }

    pub fn label(&self) -> Label {
        self.label
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Wire form returned by the request layer.
    pub fn to_response(&self) -> PredictionResponse {
        PredictionResponse {
            predicted_class: self.label,
            inference_time: self.elapsed.as_secs_f64(),
        }
    }
}

/// JSON body for a completed classification.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PredictionResponse {
    pub predicted_class: Label,
    pub inference_time: f64,
}
