use crate::database::refund_repository::RefundRepository;
use crate::payments::factory::ProviderRegistry;
use crate::payments::types::{PayoutStatus, RefundStatus};
use crate::services::cancellation::CancellationService;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RefundReconciliationConfig {
    pub poll_interval: Duration,
    pub staleness_threshold: Duration,
    pub batch_size: i64,
}

impl Default for RefundReconciliationConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(180),
            staleness_threshold: Duration::from_secs(300),
            batch_size: 50,
        }
    }
}

impl RefundReconciliationConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.poll_interval = Duration::from_secs(
            std::env::var("REFUND_RECONCILIATION_POLL_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.poll_interval.as_secs()),
        );
        cfg.staleness_threshold = Duration::from_secs(
            std::env::var("RECONCILIATION_STALENESS_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.staleness_threshold.as_secs()),
        );
        cfg.batch_size = std::env::var("REFUND_RECONCILIATION_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(cfg.batch_size);
        cfg
    }
}

/// Refunds ride the providers' disbursement rails, so their provider
/// check is the payout-status endpoint; the result is translated here.
pub fn refund_status_from_payout(status: PayoutStatus) -> RefundStatus {
    match status {
        PayoutStatus::Completed => RefundStatus::Completed,
        PayoutStatus::Failed => RefundStatus::Failed,
        PayoutStatus::Pending => RefundStatus::Pending,
        PayoutStatus::Processing => RefundStatus::Processing,
    }
}

/// Sweep for refund records stuck in flight. Rows whose external dispatch
/// never produced a transaction id stay `failed` for manual follow-up.
pub struct RefundReconciliationWorker {
    pool: PgPool,
    registry: Arc<ProviderRegistry>,
    cancellation: Arc<CancellationService>,
    config: RefundReconciliationConfig,
}

impl RefundReconciliationWorker {
    pub fn new(
        pool: PgPool,
        registry: Arc<ProviderRegistry>,
        cancellation: Arc<CancellationService>,
        config: RefundReconciliationConfig,
    ) -> Self {
        Self {
            pool,
            registry,
            cancellation,
            config,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            staleness_secs = self.config.staleness_threshold.as_secs(),
            "refund reconciliation worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("refund reconciliation worker stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.run_cycle().await {
                        warn!(error = %e, "refund reconciliation cycle failed");
                    }
                }
            }
        }

        info!("refund reconciliation worker stopped");
    }

    async fn run_cycle(&self) -> anyhow::Result<()> {
        let repo = RefundRepository::new(self.pool.clone());
        let stale = repo
            .find_stale(
                self.config.staleness_threshold.as_secs() as i64,
                self.config.batch_size,
            )
            .await?;

        if stale.is_empty() {
            return Ok(());
        }
        info!(count = stale.len(), "reconciling stale refunds");

        for refund in stale {
            let provider = match refund.provider() {
                Some(p) => p,
                None => {
                    warn!(refund_id = %refund.id, provider = %refund.provider, "unknown provider on refund");
                    continue;
                }
            };
            if self.registry.is_excluded_from_sweep(&provider) {
                continue;
            }
            let transaction_id = match refund.transaction_id.as_deref() {
                Some(id) => id,
                None => continue,
            };
            let adapter = match self.registry.get(&provider) {
                Some(a) => a,
                None => continue,
            };

            let check = match adapter.check_payout_status(transaction_id).await {
                Ok(check) => check,
                Err(e) => {
                    warn!(
                        refund_id = %refund.id,
                        provider = %provider,
                        error = %e,
                        "refund status check failed"
                    );
                    continue;
                }
            };

            let status = refund_status_from_payout(check.status);
            match self
                .cancellation
                .finalize_refund(&refund, status, check.failure_reason.as_deref())
                .await
            {
                Ok(Some(updated)) => {
                    info!(
                        refund_id = %updated.id,
                        status = %updated.status,
                        "stale refund reconciled"
                    );
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(refund_id = %refund.id, error = %e, "refund finalization failed");
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payout_states_translate_to_refund_states() {
        assert_eq!(
            refund_status_from_payout(PayoutStatus::Completed),
            RefundStatus::Completed
        );
        assert_eq!(
            refund_status_from_payout(PayoutStatus::Failed),
            RefundStatus::Failed
        );
        assert_eq!(
            refund_status_from_payout(PayoutStatus::Processing),
            RefundStatus::Processing
        );
    }
}
