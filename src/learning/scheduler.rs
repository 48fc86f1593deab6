//! Background promotion cycle
//!
//! Runs a promotion batch every analysis interval until shut down. A failed
//! cycle is logged and the next one runs on schedule.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::promotion::PromotionEngine;

pub struct PromotionScheduler {
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
    cycles: Arc<AtomicU64>,
}

impl PromotionScheduler {
    /// Spawn the cycle; `None` when `interval` is `None` or zero
    pub fn start(engine: Arc<PromotionEngine>, interval: Option<Duration>) -> Option<Self> {
        let interval = interval.filter(|i| !i.is_zero())?;
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let cycles = Arc::new(AtomicU64::new(0));
        let counter = cycles.clone();

        let handle = tokio::spawn(async move {
            info!("Promotion scheduler started (every {}s)", interval.as_secs_f64());
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        match engine.run_batch().await {
                            Ok(result) => info!(
                                "Scheduled promotion batch: {} promoted, {} demoted, {} retired",
                                result.promoted_count, result.demoted_count, result.retired_count
                            ),
                            Err(e) => error!("Scheduled promotion batch failed: {}", e),
                        }
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Promotion scheduler shutting down");
                        break;
                    }
                }
            }
        });

        Some(Self {
            shutdown_tx,
            handle,
            cycles,
        })
    }

    /// Cycles attempted so far, failed ones included
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }

    /// Stop after any running batch completes
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.handle.await {
            error!("Promotion scheduler task ended abnormally: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::knowledge::{KnowledgeStore, MockKnowledgeStore};
    use crate::learning::usage::UsageHistory;

    fn engine(dir: &std::path::Path, store: MockKnowledgeStore) -> Arc<PromotionEngine> {
        let mut config = Config::default();
        config.storage.data_dir = Some(dir.to_path_buf());
        let knowledge: Arc<dyn KnowledgeStore> = Arc::new(store);
        let usage = Arc::new(UsageHistory::new(knowledge.clone(), 10));
        Arc::new(PromotionEngine::new(&config, knowledge, usage).unwrap())
    }

    #[tokio::test]
    async fn test_disabled_without_interval() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), MockKnowledgeStore::new());
        assert!(PromotionScheduler::start(engine.clone(), None).is_none());
        assert!(PromotionScheduler::start(engine, Some(Duration::ZERO)).is_none());
    }

    #[tokio::test]
    async fn test_failed_cycles_keep_running() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = MockKnowledgeStore::new();
        store
            .expect_search_cards()
            .returning(|_| Err(anyhow::anyhow!("store offline")));
        let scheduler = PromotionScheduler::start(engine(dir.path(), store), Some(Duration::from_millis(10))).unwrap();

        for _ in 0..200 {
            if scheduler.cycles() >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(scheduler.cycles() >= 3);
        scheduler.shutdown().await;
    }
}
