//! Application startup and lifecycle management.

use crate::config::ReminderConfig;
use crate::handlers::{
    create_client, delete_client, get_client, health_check, list_clients, metrics_handler,
    readiness_check, revenue_total, update_client, update_payment,
};
use crate::services::{
    init_metrics, BillingEngine, Clock, DispatchGateway, EngineSettings, InMemoryClientStore,
    InMemoryRevenueLedger, JobScheduler, MockGateway, SmtpGateway, StaticCredentialProvider,
    SystemClock,
};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::request_id_middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<BillingEngine>,
}

/// HTTP surface: probes, metrics, and client administration.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .route("/clients", post(create_client).get(list_clients))
        .route(
            "/clients/:client_id",
            get(get_client).put(update_client).delete(delete_client),
        )
        .route("/clients/:client_id/payment", post(update_payment))
        .route("/revenue", get(revenue_total))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Wire the engine from configuration, with the in-memory store and ledger.
pub fn build_engine(config: &ReminderConfig, clock: Arc<dyn Clock>) -> Arc<BillingEngine> {
    let gateway: Arc<dyn DispatchGateway> = if config.smtp.enabled {
        tracing::info!(host = %config.smtp.host, port = config.smtp.port, "SMTP gateway initialized");
        Arc::new(SmtpGateway::new(
            config.smtp.host.clone(),
            config.smtp.port,
            config.scheduler.dispatch_timeout(),
        ))
    } else {
        tracing::info!("SMTP disabled, using mock gateway");
        Arc::new(MockGateway::new())
    };

    let scheduler = Arc::new(JobScheduler::new(
        clock.clone(),
        config.scheduler.tick_interval(),
    ));

    let settings = EngineSettings {
        default_send_hour: config.scheduler.default_send_hour,
        reset_sweep_hour: config.scheduler.reset_sweep_hour,
        dispatch_timeout: config.scheduler.dispatch_timeout(),
        sender_name: config.smtp.from_name.clone(),
    };

    Arc::new(BillingEngine::new(
        Arc::new(InMemoryClientStore::new()),
        Arc::new(InMemoryRevenueLedger::new()),
        Arc::new(StaticCredentialProvider::new(
            config.sender.username.clone(),
            config.sender.password.clone(),
        )),
        gateway,
        scheduler,
        clock,
        settings,
    ))
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    http_listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: ReminderConfig) -> Result<Self, AppError> {
        init_metrics();

        let engine = build_engine(&config, Arc::new(SystemClock));
        engine.restore_schedules().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to restore schedules");
            AppError::from(e)
        })?;
        engine.scheduler().start(engine.clone());

        // port 0 = random port for testing
        let http_addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let http_listener = TcpListener::bind(http_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %http_addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        tracing::info!(http_port = http_port, "Invoice reminder service listener bound");

        Ok(Self {
            http_port,
            http_listener,
            state: AppState { engine },
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn engine(&self) -> Arc<BillingEngine> {
        self.state.engine.clone()
    }

    /// Serve HTTP until `shutdown` resolves, then stop the scheduler.
    pub async fn run_until_stopped<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let engine = self.state.engine.clone();
        let app = router(self.state);

        tracing::info!(
            service = "invoice-reminder-service",
            version = env!("CARGO_PKG_VERSION"),
            http_port = self.http_port,
            "Service ready to accept connections"
        );

        let result = axum::serve(self.http_listener, app)
            .with_graceful_shutdown(shutdown)
            .await;

        engine.scheduler().stop().await;

        result.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}
