mod backend;
mod backends;
mod engine;

pub use backend::ClassifierBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use engine::{BackendKind, InferenceEngine, ModelSettings};
