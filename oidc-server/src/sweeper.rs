//! `ExpirySweeper` periodically purges expired authorization codes, tokens
//! and retired signing keys. Expiry is enforced on every read regardless; the
//! sweep only keeps the store from growing.

use log::{debug, error, info};
use oidc_engine::AuthorizationServer;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
pub struct SweeperStats {
    sweeps: AtomicUsize,
    removed: AtomicUsize,
    failures: AtomicUsize,
}

impl SweeperStats {
    pub fn sweeps(&self) -> usize {
        self.sweeps.load(Ordering::Relaxed)
    }

    /// Records removed across all sweeps
    pub fn removed(&self) -> usize {
        self.removed.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }
}

pub struct ExpirySweeper {
    stats: Arc<SweeperStats>,
    shutdown_token: CancellationToken,
}

impl ExpirySweeper {
    /// Start sweeping every `period`, the first sweep running immediately
    pub fn start(server: Arc<AuthorizationServer>, period: Duration) -> Self {
        let sweeper = Self {
            stats: Arc::new(SweeperStats::default()),
            shutdown_token: CancellationToken::new(),
        };
        sweeper.spawn(server, period);
        sweeper
    }

    fn spawn(&self, server: Arc<AuthorizationServer>, period: Duration) {
        let stats = Arc::clone(&self.stats);
        let shutdown_token = self.shutdown_token.clone();

        tokio::spawn(async move {
            info!("Starting expiry sweeper, interval {:?}", period);
            let mut ticks = interval(period);
            loop {
                tokio::select! {
                    _ = shutdown_token.cancelled() => {
                        info!("Expiry sweeper shutting down");
                        break;
                    }
                    _ = ticks.tick() => {}
                }

                stats.sweeps.fetch_add(1, Ordering::Relaxed);
                match server.sweep() {
                    Ok(report) => {
                        let removed = report.codes + report.tokens + report.keys;
                        stats.removed.fetch_add(removed, Ordering::Relaxed);
                    }
                    Err(e) => {
                        stats.failures.fetch_add(1, Ordering::Relaxed);
                        error!("Expiry sweep failed: {}", e);
                    }
                }
            }
        });
    }

    pub fn stats(&self) -> &SweeperStats {
        &self.stats
    }

    pub fn shutdown(&self) {
        self.shutdown_token.cancel();
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        debug!("Expiry sweeper dropping, cancelling");
        self.shutdown_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{TestFixture, WEB_CLIENT_ID};

    #[tokio::test(start_paused = true)]
    async fn test_sweeps_expired_codes() {
        let fixture = TestFixture::new().await;
        fixture.issue_code(WEB_CLIENT_ID, "alice");
        fixture.issue_code(WEB_CLIENT_ID, "alice");
        fixture.clock.advance(3_600);

        let sweeper = ExpirySweeper::start(fixture.state.server.clone(), Duration::from_secs(1));
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert!(sweeper.stats().sweeps() >= 1);
        assert_eq!(sweeper.stats().removed(), 2);
        assert_eq!(sweeper.stats().failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_sweeping() {
        let fixture = TestFixture::new().await;
        let sweeper = ExpirySweeper::start(fixture.state.server.clone(), Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(1_500)).await;

        sweeper.shutdown();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let sweeps = sweeper.stats().sweeps();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(sweeper.stats().sweeps(), sweeps);
    }
}
