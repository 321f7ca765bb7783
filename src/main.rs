use axum::{
    routing::{get, post},
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use saferide_backend::api;
use saferide_backend::config::{AppConfig, LogFormat};
use saferide_backend::database::booking_repository::BookingRepository;
use saferide_backend::database::payment_repository::PaymentRepository;
use saferide_backend::database::payout_repository::PayoutRepository;
use saferide_backend::database::receipt_repository::ReceiptRepository;
use saferide_backend::database::refund_repository::RefundRepository;
use saferide_backend::database::ride_repository::RideRepository;
use saferide_backend::database::rpc::BookingRpc;
use saferide_backend::database::webhook_repository::WebhookRepository;
use saferide_backend::database::init_pool_from_config;
use saferide_backend::health::{HealthChecker, HealthState, HealthStatus};
use saferide_backend::middleware::logging::{request_logging_middleware, UuidRequestId};
use saferide_backend::payments::factory::{PaymentProviderFactory, ProviderRegistry};
use saferide_backend::services::booking::BookingService;
use saferide_backend::services::cancellation::CancellationService;
use saferide_backend::services::fees::FeeCalculator;
use saferide_backend::services::notification::NotificationService;
use saferide_backend::services::orchestrator::PaymentOrchestrator;
use saferide_backend::services::payment::PaymentService;
use saferide_backend::services::payout::PayoutService;
use saferide_backend::services::retry::RetryPolicy;
use saferide_backend::services::webhook::WebhookProcessor;
use saferide_backend::workers;

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    match config.logging.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
        LogFormat::Plain => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    config.validate()?;
    init_tracing(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.server.host,
        port = config.server.port,
        "🚀 Starting SafeRide backend service"
    );

    info!("📊 Initializing database connection pool...");
    let pool = init_pool_from_config(&config.database).await.map_err(|e| {
        error!("Failed to initialize database pool: {}", e);
        anyhow::anyhow!(e)
    })?;

    // Repositories
    let bookings = Arc::new(BookingRepository::new(pool.clone()));
    let rides = Arc::new(RideRepository::new(pool.clone()));
    let payments_repo = Arc::new(PaymentRepository::new(pool.clone()));
    let payouts_repo = Arc::new(PayoutRepository::new(pool.clone()));
    let refunds = Arc::new(RefundRepository::new(pool.clone()));
    let receipts = Arc::new(ReceiptRepository::new(pool.clone()));
    let webhook_repo = Arc::new(WebhookRepository::new(pool.clone()));
    let rpc = Arc::new(BookingRpc::new(pool.clone()));

    // Providers
    let factory = PaymentProviderFactory::from_env().map_err(|e| {
        error!("Failed to initialize payment provider factory: {}", e);
        anyhow::anyhow!(e.to_string())
    })?;
    let registry = Arc::new(ProviderRegistry::from_factory(&factory));

    // Services
    let notifier = Arc::new(NotificationService::new());
    let payment_service = Arc::new(PaymentService::new(PaymentRepository::new(pool.clone())));
    let orchestrator = Arc::new(PaymentOrchestrator::new(
        payment_service.clone(),
        bookings.clone(),
        rides.clone(),
        receipts.clone(),
        rpc.clone(),
        notifier.clone(),
        config.payments.retry_url.clone(),
    ));
    let cancellation = Arc::new(CancellationService::new(
        bookings.clone(),
        payments_repo.clone(),
        refunds.clone(),
        rpc.clone(),
        registry.clone(),
    ));
    let booking_service = Arc::new(BookingService::new(
        bookings.clone(),
        rides.clone(),
        payments_repo.clone(),
        rpc.clone(),
        cancellation.clone(),
    ));
    let retry_policy = RetryPolicy::from_env();
    let payout_service = Arc::new(PayoutService::new(
        bookings.clone(),
        rides.clone(),
        payments_repo.clone(),
        payouts_repo.clone(),
        rpc.clone(),
        registry.clone(),
        FeeCalculator::from_env(),
        notifier.clone(),
        retry_policy.clone(),
    ));
    let webhook_processor = Arc::new(WebhookProcessor::new(
        webhook_repo.clone(),
        registry.clone(),
        orchestrator.clone(),
        payment_service.clone(),
        payouts_repo.clone(),
        payout_service.clone(),
        refunds.clone(),
        cancellation.clone(),
        5,
    ));
    info!("✅ Services initialized");

    // Background workers
    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let mut worker_handles = Vec::new();
    let reconciliation_enabled = std::env::var("RECONCILIATION_ENABLED")
        .unwrap_or_else(|_| "true".to_string())
        .to_lowercase()
        != "false";

    if reconciliation_enabled {
        let payment_worker = workers::payment_reconciliation::PaymentReconciliationWorker::new(
            pool.clone(),
            registry.clone(),
            orchestrator.clone(),
            webhook_processor.clone(),
            workers::payment_reconciliation::PaymentReconciliationConfig::from_env(),
        );
        worker_handles.push(tokio::spawn(
            payment_worker.run(worker_shutdown_rx.clone()),
        ));

        let payout_worker = workers::payout_reconciliation::PayoutReconciliationWorker::new(
            pool.clone(),
            registry.clone(),
            payout_service.clone(),
            workers::payout_reconciliation::PayoutReconciliationConfig::from_env(),
        );
        worker_handles.push(tokio::spawn(payout_worker.run(worker_shutdown_rx.clone())));

        let refund_worker = workers::refund_reconciliation::RefundReconciliationWorker::new(
            pool.clone(),
            registry.clone(),
            cancellation.clone(),
            workers::refund_reconciliation::RefundReconciliationConfig::from_env(),
        );
        worker_handles.push(tokio::spawn(refund_worker.run(worker_shutdown_rx.clone())));

        let retry_worker = workers::payout_retry::PayoutRetryWorker::new(
            pool.clone(),
            payout_service.clone(),
            retry_policy,
            workers::payout_retry::PayoutRetryConfig::from_env(),
        );
        worker_handles.push(tokio::spawn(retry_worker.run(worker_shutdown_rx)));

        info!("✅ Reconciliation and retry workers started");
    } else {
        info!("Reconciliation workers disabled (RECONCILIATION_ENABLED=false)");
    }

    // HTTP surface
    let health_checker = HealthChecker::new(Some(pool.clone()));

    let booking_state = Arc::new(api::bookings::BookingApiState {
        bookings: booking_service,
        payouts: payout_service,
    });
    let booking_routes = Router::new()
        .route("/api/bookings", post(api::bookings::create_booking))
        .route(
            "/api/bookings/{id}/cancel",
            post(api::bookings::cancel_booking),
        )
        .route(
            "/api/bookings/{id}/seats",
            post(api::bookings::change_seats),
        )
        .route(
            "/api/bookings/{id}/verify",
            post(api::bookings::verify_code),
        )
        .route(
            "/api/bookings/{id}/code",
            get(api::bookings::get_verification_code),
        )
        .with_state(booking_state);

    let payment_state = Arc::new(api::payments::PaymentApiState {
        payments: payment_service,
        orchestrator,
        registry,
        default_currency: config.payments.default_currency.clone(),
    });
    let payment_routes = Router::new()
        .route(
            "/api/payments/initiate",
            post(api::payments::initiate_payment),
        )
        .route("/api/payments/{id}", get(api::payments::get_payment))
        .route(
            "/api/bookings/{id}/payments",
            get(api::payments::list_booking_payments),
        )
        .with_state(payment_state);

    let callback_state = Arc::new(api::callbacks::CallbackState {
        processor: webhook_processor,
    });
    let callback_routes = Router::new()
        .route(
            "/callbacks/{provider}",
            post(api::callbacks::handle_callback),
        )
        .with_state(callback_state);

    let health_routes = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/health/ready", get(health))
        .route("/health/live", get(liveness))
        .with_state(health_checker);

    let app = Router::new()
        .merge(health_routes)
        .merge(booking_routes)
        .merge(payment_routes)
        .merge(callback_routes)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        );

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!(address = %addr, "🚀 Server listening, ready to accept connections");

    let shutdown_tx = worker_shutdown_tx.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(shutdown_tx))
        .await?;

    let _ = worker_shutdown_tx.send(true);
    for handle in worker_handles {
        if let Err(e) =
            tokio::time::timeout(std::time::Duration::from_secs(5), handle).await
        {
            error!(error = %e, "Timed out waiting for worker shutdown");
        }
    }

    info!("👋 Server shutdown complete");
    Ok(())
}

async fn root() -> &'static str {
    "SafeRide backend API"
}

async fn health(
    axum::extract::State(checker): axum::extract::State<HealthChecker>,
) -> Result<Json<HealthStatus>, (axum::http::StatusCode, String)> {
    let status = checker.check_health().await;
    if matches!(status.status, HealthState::Unhealthy) {
        error!("Health check failed - service unhealthy");
        return Err((
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            "Service Unavailable".to_string(),
        ));
    }
    Ok(Json(status))
}

async fn liveness() -> &'static str {
    "OK"
}
