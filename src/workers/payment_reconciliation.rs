use crate::database::payment_repository::PaymentRepository;
use crate::payments::factory::ProviderRegistry;
use crate::services::orchestrator::PaymentOrchestrator;
use crate::services::webhook::WebhookProcessor;
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct PaymentReconciliationConfig {
    /// How often the worker wakes up to sweep.
    pub poll_interval: Duration,
    /// A payment still pending/processing after this long is "stuck" and
    /// worth asking the provider about.
    pub staleness_threshold: Duration,
    /// Maximum stale payments fetched per cycle.
    pub batch_size: i64,
}

impl Default for PaymentReconciliationConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            staleness_threshold: Duration::from_secs(300),
            batch_size: 100,
        }
    }
}

impl PaymentReconciliationConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.poll_interval = Duration::from_secs(
            std::env::var("RECONCILIATION_POLL_INTERVAL_SECONDS")
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
        cfg.batch_size = std::env::var("RECONCILIATION_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(cfg.batch_size);
        cfg
    }
}

/// Periodic sweep over payments stuck in a non-terminal state. Every
/// resolved status re-enters the orchestrator's single entry point, so a
/// sweep-triggered completion runs exactly the side effects a webhook
/// would have.
pub struct PaymentReconciliationWorker {
    pool: PgPool,
    registry: Arc<ProviderRegistry>,
    orchestrator: Arc<PaymentOrchestrator>,
    webhook_processor: Arc<WebhookProcessor>,
    config: PaymentReconciliationConfig,
}

impl PaymentReconciliationWorker {
    pub fn new(
        pool: PgPool,
        registry: Arc<ProviderRegistry>,
        orchestrator: Arc<PaymentOrchestrator>,
        webhook_processor: Arc<WebhookProcessor>,
        config: PaymentReconciliationConfig,
    ) -> Self {
        Self {
            pool,
            registry,
            orchestrator,
            webhook_processor,
            config,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            staleness_secs = self.config.staleness_threshold.as_secs(),
            "payment reconciliation worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("payment reconciliation worker stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.run_cycle().await {
                        warn!(error = %e, "payment reconciliation cycle failed");
                    }
                }
            }
        }

        info!("payment reconciliation worker stopped");
    }

    async fn run_cycle(&self) -> anyhow::Result<()> {
        self.reconcile_stale_payments().await?;

        // Failed webhook deliveries get their bounded retry pass here as
        // well, sharing the cycle cadence.
        match self.webhook_processor.retry_pending().await {
            Ok(count) if count > 0 => info!(processed = count, "retried pending webhooks"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "webhook retry pass failed"),
        }
        Ok(())
    }

    async fn reconcile_stale_payments(&self) -> anyhow::Result<()> {
        let repo = PaymentRepository::new(self.pool.clone());
        let stale = repo
            .find_stale(
                self.config.staleness_threshold.as_secs() as i64,
                self.config.batch_size,
            )
            .await?;

        if stale.is_empty() {
            return Ok(());
        }
        info!(count = stale.len(), "reconciling stale payments");

        for payment in stale {
            // Exclusive-provider mode: other providers' records are left
            // untouched, not failed.
            let provider = match payment.provider() {
                Some(p) => p,
                None => {
                    warn!(payment_id = %payment.id, provider = %payment.provider, "unknown provider on payment");
                    continue;
                }
            };
            if self.registry.is_excluded_from_sweep(&provider) {
                continue;
            }

            let transaction_id = match payment.transaction_id.as_deref() {
                Some(id) => id,
                None => continue,
            };

            let adapter = match self.registry.get(&provider) {
                Some(a) => a,
                None => continue,
            };

            let check = match adapter.check_payment(transaction_id).await {
                Ok(check) => check,
                Err(e) => {
                    // A single unreachable provider must not sink the
                    // whole sweep; the record stays stale and is retried
                    // next cycle.
                    warn!(
                        payment_id = %payment.id,
                        provider = %provider,
                        error = %e,
                        "provider status check failed"
                    );
                    continue;
                }
            };

            if payment.status() == Some(check.status) {
                continue; // no change; re-running the sweep writes nothing
            }

            let metadata = json!({
                "reconciled_at": chrono::Utc::now().to_rfc3339(),
                "provider_status": check.raw_status,
                "failure_reason": check.failure_reason,
            });

            match self
                .orchestrator
                .handle_payment_status_change(&payment, check.status, metadata)
                .await
            {
                Ok(outcome) => {
                    info!(
                        payment_id = %payment.id,
                        status = %check.status,
                        outcome = ?outcome,
                        "stale payment reconciled"
                    );
                }
                Err(e) => {
                    warn!(payment_id = %payment.id, error = %e, "reconciliation update rejected");
                }
            }
        }

        Ok(())
    }
}
