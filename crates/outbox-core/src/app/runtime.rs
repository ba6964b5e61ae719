use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Handle to the spawned dispatchers and sweepers.
///
/// - `request_shutdown` (or dropping the handle's sender) stops every loop
///   at its next idle point; in-flight store and broker calls finish first
/// - `shutdown_and_join` additionally waits for every task to exit
pub struct OutboxRuntime {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<(&'static str, JoinHandle<()>)>,
}

impl OutboxRuntime {
    pub(crate) fn new(
        shutdown_tx: watch::Sender<bool>,
        joins: Vec<(&'static str, JoinHandle<()>)>,
    ) -> Self {
        Self { shutdown_tx, joins }
    }

    /// Number of spawned loops (dispatchers plus the two sweepers).
    pub fn task_count(&self) -> usize {
        self.joins.len()
    }

    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for (name, join) in self.joins {
            if let Err(err) = join.await {
                warn!(task = name, error = %err, "outbox task ended abnormally");
            }
        }
        info!("outbox runtime stopped");
    }
}
