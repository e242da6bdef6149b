//! 存储快照定时落盘
//!
//! 有修改时按固定间隔写快照；收到 shutdown 信号后再写最后一次并退出

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::persistence::MemoryStore;

/// 启动后台快照任务
pub fn spawn_flusher(
    store: Arc<MemoryStore>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "Snapshot flusher started");
        let mut ticker = tokio::time::interval(interval);
        // 第一次 tick 立即返回
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Snapshot flusher received shutdown signal");
                    break;
                }
                _ = ticker.tick() => flush(&store).await,
            }
        }

        flush(&store).await;
        info!("Snapshot flusher stopped");
    })
}

async fn flush(store: &MemoryStore) {
    match store.flush().await {
        Ok(true) => debug!("Store snapshot flushed"),
        Ok(false) => {}
        Err(e) => error!(error = %e, "Failed to flush store snapshot"),
    }
}
