pub mod registry;
pub mod types;
pub mod variants;

use std::time::Duration;

pub use registry::{GenerationRegistry, RegistryError};
pub use types::{GenerationContext, GenerationPhase, MessageHandle};
pub use variants::{VariantResult, VariantStore};

/// Remaining time given the elapsed time and the provider's progress percent:
/// `elapsed * (100 / progress) - elapsed`. Undefined for `progress <= 0`.
pub fn estimate_remaining(elapsed: Duration, progress: f64) -> Option<Duration> {
    if !progress.is_finite() || progress <= 0.0 {
        return None;
    }
    let elapsed_secs = elapsed.as_secs_f64();
    let estimated_total = elapsed_secs * (100.0 / progress);
    Some(Duration::from_secs_f64((estimated_total - elapsed_secs).max(0.0)))
}
