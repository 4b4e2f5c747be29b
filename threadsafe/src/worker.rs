use crate::pool::Pool;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// The type of the prelude function.
pub(super) type Prelude = dyn Fn() + Send + Sync + 'static;

/// Worker thread.
///
/// Runs admitted jobs until the pool has been shut down and every launched
/// job has settled.
pub(super) fn run(index: usize, prelude: Option<Arc<Prelude>>, pool: Arc<Pool>) {
    tracing::debug!(worker = index, "worker started");

    if let Some(prelude) = prelude {
        if panic::catch_unwind(AssertUnwindSafe(|| prelude())).is_err() {
            tracing::error!(worker = index, "worker prelude panicked");
        }
    }

    while let Some(job) = pool.next() {
        job.run();
    }

    tracing::debug!(worker = index, "worker stopped");
}
