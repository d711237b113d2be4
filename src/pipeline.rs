//! Bounded classification runs.
//!
//! `ClassificationPipeline::classify` drives one file through
//! source → transform → inference → majority vote and reports the verdict with
//! the wall-clock time the whole run took.
//!
//! Run states:
//!
//! ```text
//! Idle → SourceOpen → Iterating → Aggregating → Done
//!           ↘             ↘
//!            Failed        Failed
//! ```
//!
//! The source is closed exactly once before `classify` returns, on success,
//! on failure, and when the source had no frames. Zero frames is not an
//! error: it resolves to `Label::Unknown`.

use std::sync::Arc;
use std::time::Instant;

use crate::aggregate::aggregate;
use crate::error::Result;
use crate::infer::InferenceEngine;
use crate::ingest::{SourceGuard, SourceOpener};
use crate::staging::PayloadStager;
use crate::transform::FrameTransformer;
use crate::{ClassificationResult, ClassifyError, Label};

/// Lifecycle of a single run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    SourceOpen,
    Iterating,
    Aggregating,
    Done,
    Failed,
}

/// Orchestrates one bounded run per call. Cheap to share across threads.
#[derive(Clone)]
pub struct ClassificationPipeline {
    opener: Arc<dyn SourceOpener>,
    transformer: FrameTransformer,
    engine: Arc<InferenceEngine>,
    stager: PayloadStager,
}

impl ClassificationPipeline {
    pub fn new(opener: Arc<dyn SourceOpener>, engine: Arc<InferenceEngine>) -> Self {
        Self {
            opener,
            transformer: FrameTransformer::new(),
            engine,
            stager: PayloadStager::default(),
        }
    }

    /// Use a specific staging directory and payload limit for uploads.
    pub fn with_stager(mut self, stager: PayloadStager) -> Self {
        self.stager = stager;
        self
    }

    pub fn engine(&self) -> &Arc<InferenceEngine> {
        &self.engine
    }

    pub fn stager(&self) -> &PayloadStager {
        &self.stager
    }

    /// Classify every frame of `identifier` and reduce to one label.
    ///
    /// Camera identifiers are refused: a camera never ends, so the run would
    /// never produce a result. Use `live::LiveCapture` for cameras.
    pub fn classify(&self, identifier: &str) -> Result<ClassificationResult> {
        let start = Instant::now();
        let mut run = Run::new(identifier);

        if self.opener.is_camera(identifier) {
            return Err(run.fail(ClassifyError::SourceUnavailable(format!(
                "{} is a camera; classify reads finite file sources only",
                identifier
            ))));
        }
        let source = match self.opener.open(identifier) {
            Ok(source) => source,
            Err(err) => return Err(run.fail(err)),
        };
        let mut source = SourceGuard::new(source);
        run.advance(PipelineState::SourceOpen);

        run.advance(PipelineState::Iterating);
        let collected = self.collect_labels(&mut source);
        source.close();
        let labels = match collected {
            Ok(labels) => labels,
            Err(err) => return Err(run.fail(err)),
        };

        run.advance(PipelineState::Aggregating);
        let label = aggregate(&labels);
        let elapsed = start.elapsed();
        run.advance(PipelineState::Done);

        if labels.is_empty() {
            log::warn!("{}: no frames decoded, resolving to {}", identifier, Label::Unknown);
        }
        log::info!(
            "classified {}: {} ({} frames, {:.3}s)",
            identifier,
            label,
            labels.len(),
            elapsed.as_secs_f64()
        );
        Ok(ClassificationResult::new(label, elapsed))
    }

    /// Stage an uploaded payload, classify it, and remove the staged file.
    ///
    /// The staged file is gone when this returns, whatever the outcome.
    pub fn classify_payload(&self, payload: &[u8]) -> Result<ClassificationResult> {
        let staged = self.stager.stage(payload)?;
        let result = self.classify(&staged.identifier());
        if let Err(err) = staged.remove() {
            log::warn!("failed to remove staged payload: {}", err);
        }
        result
    }

    fn collect_labels(&self, source: &mut SourceGuard) -> Result<Vec<Label>> {
        let mut labels = Vec::new();
        while let Some(frame) = source.next_frame()? {
            let tensor = self.transformer.transform(&frame)?;
            drop(frame);
            labels.push(self.engine.apply(&tensor)?);
        }
        Ok(labels)
    }
}

struct Run<'a> {
    identifier: &'a str,
    state: PipelineState,
}

impl<'a> Run<'a> {
    fn new(identifier: &'a str) -> Self {
        Self {
            identifier,
            state: PipelineState::Idle,
        }
    }

    fn advance(&mut self, next: PipelineState) {
        log::debug!("{}: {:?} -> {:?}", self.identifier, self.state, next);
        self.state = next;
    }

    fn fail(&mut self, err: ClassifyError) -> ClassifyError {
        log::warn!(
            "{}: run failed in {:?}: {}",
            self.identifier,
            self.state,
            err
        );
        self.advance(PipelineState::Failed);
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infer::StubBackend;
    use crate::ingest::DefaultOpener;

    fn pipeline() -> ClassificationPipeline {
        ClassificationPipeline::new(
            Arc::new(DefaultOpener::default()),
            Arc::new(InferenceEngine::new(StubBackend::new())),
        )
    }

    #[test]
    fn majority_label_wins() -> Result<()> {
        let result =
            pipeline().classify("stub://clip?frames=5&labels=Abuse,Arrest,Abuse,Normal,Abuse")?;
        assert_eq!(result.label(), Label::Abuse);
        Ok(())
    }

    #[test]
    fn tie_resolves_to_first_label_reaching_the_max() -> Result<()> {
        let result =
            pipeline().classify("stub://clip?frames=4&labels=Arrest,Arrest,Normal,Normal")?;
        assert_eq!(result.label(), Label::Arrest);
        Ok(())
    }

    #[test]
    fn empty_source_is_unknown() -> Result<()> {
        let result = pipeline().classify("stub://empty")?;
        assert_eq!(result.label(), Label::Unknown);
        Ok(())
    }

    #[test]
    fn open_failure_is_source_unavailable() {
        assert!(matches!(
            pipeline().classify("stub://clip?fail_open"),
            Err(ClassifyError::SourceUnavailable(_))
        ));
    }

    #[test]
    fn cameras_are_refused() {
        for identifier in ["camera:stub://front", "0", "/dev/video0"] {
            assert!(matches!(
                pipeline().classify(identifier),
                Err(ClassifyError::SourceUnavailable(_))
            ));
        }
    }

    #[test]
    fn mid_stream_decode_failure_aborts_the_run() {
        assert!(matches!(
            pipeline().classify("stub://clip?frames=6&fail_at=3"),
            Err(ClassifyError::SourceUnavailable(_))
        ));
    }
}
