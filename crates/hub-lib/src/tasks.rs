use std::future::Future;
use std::time::Duration;

use once_cell::sync::Lazy;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, warn};

/// Background tasks of the hub process and the token that tells them to stop.
struct Lifecycle {
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

static LIFECYCLE: Lazy<Lifecycle> = Lazy::new(|| Lifecycle {
    tracker: TaskTracker::new(),
    shutdown: CancellationToken::new(),
});

/// Token cancelled when the hub begins shutting down.
pub fn shutdown_token() -> CancellationToken {
    LIFECYCLE.shutdown.clone()
}

pub fn task_tracker() -> TaskTracker {
    LIFECYCLE.tracker.clone()
}

/// Request shutdown without waiting for it.
pub fn request_shutdown(reason: &str) {
    if !LIFECYCLE.shutdown.is_cancelled() {
        warn!("Shutdown requested: {}", reason);
        LIFECYCLE.shutdown.cancel();
    }
}

/// Cancel every task and wait up to `grace` for them to finish.
/// Returns false if some tasks were still running when the grace period ran out.
pub async fn shutdown(grace: Duration) -> bool {
    LIFECYCLE.shutdown.cancel();
    LIFECYCLE.tracker.close();
    match tokio::time::timeout(grace, LIFECYCLE.tracker.wait()).await {
        Ok(()) => true,
        Err(_) => {
            warn!(
                "{} background tasks still running after {:?}",
                LIFECYCLE.tracker.len(),
                grace
            );
            false
        }
    }
}

/// Spawn a tracked task. `name` shows up in the logs when it finishes.
pub fn spawn<F>(name: &'static str, fut: F)
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    LIFECYCLE.tracker.spawn(async move {
        fut.await;
        debug!("Background task {} finished", name);
    });
}
