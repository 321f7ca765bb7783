use crate::database::payout_repository::PayoutRepository;
use crate::services::payout::PayoutService;
use crate::services::retry::RetryPolicy;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct PayoutRetryConfig {
    pub poll_interval: Duration,
    pub batch_size: i64,
}

impl Default for PayoutRetryConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(120),
            batch_size: 25,
        }
    }
}

impl PayoutRetryConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.poll_interval = Duration::from_secs(
            std::env::var("PAYOUT_RETRY_POLL_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.poll_interval.as_secs()),
        );
        cfg.batch_size = std::env::var("PAYOUT_RETRY_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(cfg.batch_size);
        cfg
    }
}

/// Bounded re-disbursement of failed payouts. The selection query only
/// returns rows that are retryable, under the retry budget, and past
/// their cooldown, so the worker never busy-loops a broken payout.
pub struct PayoutRetryWorker {
    pool: PgPool,
    payout_service: Arc<PayoutService>,
    policy: RetryPolicy,
    config: PayoutRetryConfig,
}

impl PayoutRetryWorker {
    pub fn new(
        pool: PgPool,
        payout_service: Arc<PayoutService>,
        policy: RetryPolicy,
        config: PayoutRetryConfig,
    ) -> Self {
        Self {
            pool,
            payout_service,
            policy,
            config,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            max_retries = self.policy.max_retries,
            "payout retry worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("payout retry worker stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.run_cycle().await {
                        warn!(error = %e, "payout retry cycle failed");
                    }
                }
            }
        }

        info!("payout retry worker stopped");
    }

    async fn run_cycle(&self) -> anyhow::Result<()> {
        let repo = PayoutRepository::new(self.pool.clone());
        let due = repo
            .find_due_for_retry(self.policy.max_retries as i32, self.config.batch_size)
            .await?;

        if due.is_empty() {
            return Ok(());
        }
        info!(count = due.len(), "retrying failed payouts");

        for payout in due {
            match self.payout_service.retry_payout(&payout).await {
                Ok(updated) => {
                    info!(
                        payout_id = %updated.id,
                        status = %updated.status,
                        retry_count = updated.retry_count,
                        "payout retry attempted"
                    );
                }
                Err(e) => {
                    warn!(payout_id = %payout.id, error = %e, "payout retry failed");
                }
            }
        }

        Ok(())
    }
}
