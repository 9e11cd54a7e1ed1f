//! Application startup and lifecycle management.

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::get,
    Router,
};
use service_core::auth::ClaimsDecoder;
use service_core::broker::{
    retry_broker_op, BrokerConnection, BrokerTransport, RetryConfig, RpcClient, RpcConfig,
};
use service_core::error::AppError;
use service_core::middleware::{
    metrics::metrics_middleware,
    tracing::{request_id_middleware, REQUEST_ID_HEADER},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;

use crate::authz::{authorize_request, Authorizer, AuthzLayer, ResourceKind};
use crate::config::BankConfig;
use crate::handlers;
use crate::ledger::{InMemoryLedger, LedgerStore};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: BankConfig,
    pub authorizer: Authorizer,
    pub ledger: Arc<dyn LedgerStore>,
}

impl AppState {
    pub fn new(
        config: BankConfig,
        rpc: RpcClient,
        ledger: Arc<dyn LedgerStore>,
    ) -> Result<Self, AppError> {
        let claims = ClaimsDecoder::new(&config.jwt.secret, config.jwt.algorithm()?);
        let authorizer = Authorizer::new(rpc, ledger.clone(), claims);
        Ok(Self {
            config,
            authorizer,
            ledger,
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    let accounts = Router::new()
        .route(
            "/accounts",
            get(handlers::accounts::list_accounts).post(handlers::accounts::create_account),
        )
        .route(
            "/accounts/:id",
            get(handlers::accounts::get_account).put(handlers::accounts::update_account),
        )
        .route_layer(from_fn_with_state(
            AuthzLayer::new(state.authorizer.clone(), ResourceKind::Account),
            authorize_request,
        ));

    let transactions = Router::new()
        .route(
            "/transactions",
            get(handlers::transactions::list_transactions)
                .post(handlers::transactions::create_transaction),
        )
        .route(
            "/transactions/:id",
            get(handlers::transactions::get_transaction),
        )
        .route_layer(from_fn_with_state(
            AuthzLayer::new(state.authorizer.clone(), ResourceKind::Transaction),
            authorize_request,
        ));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics))
        .merge(accounts)
        .merge(transactions)
        .with_state(state)
        .layer(from_fn(metrics_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        .layer(from_fn(request_id_middleware))
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
    rpc: RpcClient,
    connection: Arc<BrokerConnection>,
}

impl Application {
    /// Connect to the broker, start the reply dispatcher and bind the HTTP
    /// listener (port 0 picks a random port).
    pub async fn build(config: BankConfig) -> Result<Self, AppError> {
        let connection = Arc::new(BrokerConnection::new(config.broker.clone()));

        retry_broker_op(&RetryConfig::default(), "broker_connect", || {
            let connection = connection.clone();
            async move { connection.acquire_channel().await.map(|_| ()) }
        })
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to message broker");
            AppError::from(e)
        })?;

        let transport: Arc<dyn BrokerTransport> = connection.clone();
        let rpc = RpcClient::start(transport, RpcConfig::from(&config.broker)).await?;

        let ledger: Arc<dyn LedgerStore> = Arc::new(InMemoryLedger::new());
        let state = AppState::new(config.clone(), rpc.clone(), ledger)?;
        let router = build_router(state);

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port, "Bank service ready");

        Ok(Self {
            port,
            listener,
            router,
            rpc,
            connection,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Serve until SIGINT/SIGTERM, then stop the reply dispatcher and close
    /// the broker connection.
    pub async fn run_until_stopped(self) -> Result<(), AppError> {
        tracing::info!("Listening on port {}", self.port);

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        self.rpc.shutdown();
        self.connection.close().await?;

        tracing::info!("Service shutdown complete");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
