// Background watchdog
//
// Periodically sweeps the connection pool:
// - removes entries whose transport died (exited subprocess, closed session)
// - logs the pool size for external monitoring

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::mcp::pool::ConnectionPool;

const SWEEP_TIMEOUT: Duration = Duration::from_secs(30);

pub fn spawn(pool: Arc<ConnectionPool>, interval: Duration, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("watchdog: started (interval={}s)", interval.as_secs());

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            sweep(&pool).await;
        }

        tracing::info!("watchdog: stopped");
    })
}

/// One pass over the pool. Returns the ids that were reaped.
pub async fn sweep(pool: &ConnectionPool) -> Vec<String> {
    match tokio::time::timeout(SWEEP_TIMEOUT, pool.reap_dead()).await {
        Ok(reaped) => {
            let active = pool.len().await;
            if reaped.is_empty() {
                tracing::debug!("watchdog: all checks passed ({} active connection(s))", active);
            } else {
                tracing::warn!(
                    "watchdog: reaped {} dead connection(s) {:?}, {} remain",
                    reaped.len(),
                    reaped,
                    active
                );
            }
            reaped
        }
        Err(_) => {
            tracing::error!("watchdog: pool sweep timed out after {}s", SWEEP_TIMEOUT.as_secs());
            Vec::new()
        }
    }
}
