//! Stale duty purge loop.
//!
//! Runs one purge immediately on start, then once per interval. Reads never
//! depend on it: `get_duty` already filters by today's date, the purge only
//! reclaims space.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, error, info};

use crate::storage::{Database, call_blocking};

/// Shortest allowed time between purges.
const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Messages that can be sent to the janitor.
#[derive(Debug, Clone)]
pub enum JanitorMessage {
    /// Stop the janitor.
    Shutdown,
}

/// Periodic purge of stale duty rows.
pub struct DutyJanitor {
    /// Shared database handle.
    db: Arc<Database>,

    /// Time between purges.
    interval: Duration,
}

impl DutyJanitor {
    /// Creates a new janitor. Intervals shorter than one second are raised to one second.
    #[must_use]
    pub fn new(db: Arc<Database>, interval: Duration) -> Self {
        Self {
            db,
            interval: interval.max(MIN_INTERVAL),
        }
    }

    /// Runs the purge loop until shutdown or until every sender is dropped.
    pub async fn run(&self, mut rx: mpsc::Receiver<JanitorMessage>) {
        info!("Duty janitor started (interval: {:?})", self.interval);

        let mut timer = interval(self.interval);

        loop {
            tokio::select! {
                biased;

                _ = timer.tick() => {
                    self.purge_once().await;
                }
                // Shutdown, or every sender dropped
                _ = rx.recv() => {
                    info!("Duty janitor shutting down");
                    break;
                }
            }
        }
    }

    /// Purges stale duty rows once. Returns the number removed, or `None` on failure.
    pub async fn purge_once(&self) -> Option<usize> {
        match call_blocking(Arc::clone(&self.db), Database::purge_stale_duty).await {
            Ok(removed) => {
                debug!("Duty purge removed {} row(s)", removed);
                Some(removed)
            }
            Err(e) => {
                error!("Failed to purge stale duty: {}", e);
                None
            }
        }
    }
}

impl std::fmt::Debug for DutyJanitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DutyJanitor")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}
