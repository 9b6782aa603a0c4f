//! Process readiness flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Whether the plugin has passed every startup check.
///
/// Starts not-ready and flips to ready exactly once; it never goes back.
/// Clones share the same flag, so the lifecycle can publish while the
/// liveness handler reads.
#[derive(Debug, Clone, Default)]
pub struct Readiness(Arc<AtomicBool>);

impl Readiness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Publish readiness. Returns `false` if it was already published.
    pub fn mark_ready(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
