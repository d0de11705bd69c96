use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::Ledger;

#[derive(Debug, Clone)]
pub struct SystemProfile {
    pub logical_cores: usize,
    pub worker_threads: usize,
    pub strict_durability: bool, // true = fsync every append
}

impl SystemProfile {
    pub fn detect() -> Self {
        let cores = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self::for_cores(cores)
    }

    pub fn for_cores(cores: usize) -> Self {
        // Single core: one compute + one I/O worker, and skip fsync
        if cores <= 1 {
            warn!("single core detected, running without fsync");
            Self { logical_cores: cores, worker_threads: 2, strict_durability: false }
        } else {
            Self { logical_cores: cores, worker_threads: cores, strict_durability: true }
        }
    }
}

/// Compacts the ledger every `interval` on the blocking pool.
pub fn start_compaction_task(ledger: Arc<Ledger>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("background compaction every {:?}", interval);
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let ledger = ledger.clone();
            match tokio::task::spawn_blocking(move || ledger.compact()).await {
                Ok(Ok(stats)) => info!(
                    "compaction: {} live, {} dropped, {} -> {} bytes",
                    stats.live, stats.dropped, stats.bytes_before, stats.bytes_after
                ),
                Ok(Err(e)) => warn!("compaction failed: {}", e),
                Err(e) => warn!("compaction task panicked: {}", e),
            }
        }
    })
}
