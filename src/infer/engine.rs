use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, Context};

use super::backend::ClassifierBackend;
use super::backends::StubBackend;
use crate::error::{ClassifyError, Result};
use crate::transform::Tensor;
use crate::{Label, NUM_CLASSES};

/// Which classifier backend to load at startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Stub,
    Tract,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> anyhow::Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stub" => Ok(Self::Stub),
            "tract" | "onnx" => Ok(Self::Tract),
            other => Err(anyhow!("unknown model backend '{}'", other)),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stub => f.write_str("stub"),
            Self::Tract => f.write_str("tract"),
        }
    }
}

/// Model selection, resolved from configuration.
#[derive(Clone, Debug)]
pub struct ModelSettings {
    pub backend: BackendKind,
    /// Required for `BackendKind::Tract`.
    pub model_path: Option<PathBuf>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::Stub,
            model_path: None,
        }
    }
}

/// Process-wide model capability.
///
/// Built once at startup, then shared read-only (typically as
/// `Arc<InferenceEngine>`) by every pipeline run and live session. It is never
/// reloaded.
pub struct InferenceEngine {
    backend: Box<dyn ClassifierBackend>,
}

impl InferenceEngine {
    pub fn new<B: ClassifierBackend + 'static>(backend: B) -> Self {
        Self {
            backend: Box::new(backend),
        }
    }

    /// Construct the configured backend and run its warm-up hook.
    pub fn load(settings: &ModelSettings) -> anyhow::Result<Self> {
        let engine = match settings.backend {
            BackendKind::Stub => Self::new(StubBackend::new()),
            BackendKind::Tract => Self::load_tract(settings)?,
        };
        engine
            .backend
            .warm_up()
            .with_context(|| format!("warm up {} backend", engine.backend_name()))?;
        log::info!("inference engine loaded (backend={})", engine.backend_name());
        Ok(engine)
    }

    #[cfg(feature = "backend-tract")]
    fn load_tract(settings: &ModelSettings) -> anyhow::Result<Self> {
        let path = settings
            .model_path
            .as_ref()
            .ok_or_else(|| anyhow!("tract backend requires a model path"))?;
        Ok(Self::new(super::backends::TractBackend::new(path)?))
    }

    #[cfg(not(feature = "backend-tract"))]
    fn load_tract(_settings: &ModelSettings) -> anyhow::Result<Self> {
        Err(anyhow!("tract backend requires the backend-tract feature"))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Classify one tensor: arg-max over the fixed label set.
    pub fn apply(&self, input: &Tensor) -> Result<Label> {
        let scores = self
            .backend
            .scores(input)
            .map_err(|err| ClassifyError::model(format!("{:#}", err)))?;
        argmax(&scores)
    }
}

impl fmt::Debug for InferenceEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InferenceEngine")
            .field("backend", &self.backend.name())
            .finish()
    }
}

/// Index of the largest of the first `NUM_CLASSES` scores; the first wins ties.
fn argmax(scores: &[f32]) -> Result<Label> {
    let classes = scores.get(..NUM_CLASSES).ok_or_else(|| {
        ClassifyError::ModelInvocation(format!(
            "model produced {} scores, expected at least {}",
            scores.len(),
            NUM_CLASSES
        ))
    })?;
    if let Some(bad) = classes.iter().position(|s| !s.is_finite()) {
        return Err(ClassifyError::ModelInvocation(format!(
            "model produced a non-finite score for class {}",
            bad
        )));
    }
    let mut best = 0;
    for (index, score) in classes.iter().enumerate().skip(1) {
        if *score > classes[best] {
            best = index;
        }
    }
    Label::from_index(best)
        .ok_or_else(|| ClassifyError::ModelInvocation(format!("no class for index {}", best)))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedScores(Vec<f32>);

    impl ClassifierBackend for FixedScores {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn scores(&self, _input: &Tensor) -> anyhow::Result<Vec<f32>> {
            Ok(self.0.clone())
        }
    }

    struct Failing;

    impl ClassifierBackend for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn scores(&self, _input: &Tensor) -> anyhow::Result<Vec<f32>> {
            Err(anyhow!("device lost"))
        }
    }

    #[test]
    fn picks_highest_score() {
        let engine = InferenceEngine::new(FixedScores(vec![
            0.1, 0.2, 0.05, 0.9, 0.0, 0.0, 0.3, 0.1,
        ]));
        assert_eq!(engine.apply(&Tensor::filled(0.0)).unwrap(), Label::Assault);
    }

    #[test]
    fn extra_outputs_are_ignored() {
        let mut scores = vec![0.0; NUM_CLASSES];
        scores[6] = 1.0;
        scores.push(5.0);
        let engine = InferenceEngine::new(FixedScores(scores));
        assert_eq!(engine.apply(&Tensor::filled(0.0)).unwrap(), Label::Fighting);
    }

    #[test]
    fn first_maximum_wins() {
        let engine = InferenceEngine::new(FixedScores(vec![0.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0]));
        assert_eq!(engine.apply(&Tensor::filled(0.0)).unwrap(), Label::Arrest);
    }

    #[test]
    fn short_or_non_finite_outputs_fail() {
        let engine = InferenceEngine::new(FixedScores(vec![1.0; 3]));
        assert!(matches!(
            engine.apply(&Tensor::filled(0.0)),
            Err(ClassifyError::ModelInvocation(_))
        ));

        let mut scores = vec![0.0; NUM_CLASSES];
        scores[2] = f32::NAN;
        let engine = InferenceEngine::new(FixedScores(scores));
        assert!(matches!(
            engine.apply(&Tensor::filled(0.0)),
            Err(ClassifyError::ModelInvocation(_))
        ));
    }

    #[test]
    fn backend_errors_become_model_invocation_failures() {
        let engine = InferenceEngine::new(Failing);
        let err = engine.apply(&Tensor::filled(0.0)).unwrap_err();
        assert!(err.to_string().contains("device lost"));
    }

    #[test]
    fn backend_kind_parses_aliases() {
        assert_eq!("STUB".parse::<BackendKind>().unwrap(), BackendKind::Stub);
        assert_eq!("onnx".parse::<BackendKind>().unwrap(), BackendKind::Tract);
        assert!("torch".parse::<BackendKind>().is_err());
    }

    #[test]
    fn load_builds_stub_engine() {
        let engine = InferenceEngine::load(&ModelSettings::default()).unwrap();
        assert_eq!(engine.backend_name(), "stub");
    }
}
