use crate::database::payout_repository::PayoutRepository;
use crate::payments::factory::ProviderRegistry;
use crate::services::payout::PayoutService;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct PayoutReconciliationConfig {
    pub poll_interval: Duration,
    pub staleness_threshold: Duration,
    pub batch_size: i64,
}

impl Default for PayoutReconciliationConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(120),
            staleness_threshold: Duration::from_secs(300),
            batch_size: 50,
        }
    }
}

impl PayoutReconciliationConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.poll_interval = Duration::from_secs(
            std::env::var("PAYOUT_RECONCILIATION_POLL_INTERVAL_SECONDS")
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
        cfg.batch_size = std::env::var("PAYOUT_RECONCILIATION_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(cfg.batch_size);
        cfg
    }
}

/// Sweep for disbursements stuck in flight. Confirmed and failed outcomes
/// go through the payout finalizer, which also decides retryability for
/// failures.
pub struct PayoutReconciliationWorker {
    pool: PgPool,
    registry: Arc<ProviderRegistry>,
    payout_service: Arc<PayoutService>,
    config: PayoutReconciliationConfig,
}

impl PayoutReconciliationWorker {
    pub fn new(
        pool: PgPool,
        registry: Arc<ProviderRegistry>,
        payout_service: Arc<PayoutService>,
        config: PayoutReconciliationConfig,
    ) -> Self {
        Self {
            pool,
            registry,
            payout_service,
            config,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            staleness_secs = self.config.staleness_threshold.as_secs(),
            "payout reconciliation worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("payout reconciliation worker stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.run_cycle().await {
                        warn!(error = %e, "payout reconciliation cycle failed");
                    }
                }
            }
        }

        info!("payout reconciliation worker stopped");
    }

    async fn run_cycle(&self) -> anyhow::Result<()> {
        let repo = PayoutRepository::new(self.pool.clone());
        let stale = repo
            .find_stale(
                self.config.staleness_threshold.as_secs() as i64,
                self.config.batch_size,
            )
            .await?;

        if stale.is_empty() {
            return Ok(());
        }
        info!(count = stale.len(), "reconciling stale payouts");

        for payout in stale {
            let provider = match payout.provider() {
                Some(p) => p,
                None => {
                    warn!(payout_id = %payout.id, provider = %payout.provider, "unknown provider on payout");
                    continue;
                }
            };
            if self.registry.is_excluded_from_sweep(&provider) {
                continue;
            }
            let transaction_id = match payout.transaction_id.as_deref() {
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
                        payout_id = %payout.id,
                        provider = %provider,
                        error = %e,
                        "payout status check failed"
                    );
                    continue;
                }
            };

            match self.payout_service.finalize_from_check(&payout, &check).await {
                Ok(Some(updated)) => {
                    info!(
                        payout_id = %updated.id,
                        status = %updated.status,
                        "stale payout reconciled"
                    );
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(payout_id = %payout.id, error = %e, "payout finalization failed");
                }
            }
        }

        Ok(())
    }
}
