use anyhow::Result;

use crate::transform::Tensor;

/// Classifier backend trait.
///
/// Backends hold immutable model parameters after construction. `scores`
/// takes `&self` so one loaded backend can serve concurrent pipeline runs and
/// live sessions without a lock.
///
/// Implementations MUST NOT retain the tensor beyond the call.
pub trait ClassifierBackend: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Per-class scores for one tensor, in model output order.
    ///
    /// Only the first `NUM_CLASSES` entries are considered by the engine.
    fn scores(&self, input: &Tensor) -> Result<Vec<f32>>;

    /// Optional warm-up hook, run once at load.
    fn warm_up(&self) -> Result<()> {
        Ok(())
    }
}
