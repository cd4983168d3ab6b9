//! HTTP service around the access gateway.

use crate::api::{VerifyRequest, VerifyResponse};
use crate::chain::{ContractRegistry, RpcTransactionSource};
use crate::config::GatewayConfig;
use crate::error::{Error, Result};
use crate::event::GatewayEventsChannel;
use crate::gateway::{AccessGateway, GatewayComponents};
use crate::payment::{EtherscanIndexer, PaymentProver};
use crate::registry::RegistryClient;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

impl IntoResponse for VerifyResponse {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

/// Build the HTTP router.
#[must_use]
pub fn router(gateway: Arc<AccessGateway>) -> Router {
    Router::new()
        .route("/verify", post(verify))
        .route("/status/:address", get(status))
        .route("/health", get(health))
        .with_state(gateway)
}

async fn verify(
    State(gateway): State<Arc<AccessGateway>>,
    payload: std::result::Result<Json<VerifyRequest>, JsonRejection>,
) -> VerifyResponse {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => return VerifyResponse::bad_request(rejection.body_text()),
    };

    match gateway.verify(&request.into()).await {
        Ok(outcome) => VerifyResponse::from(&outcome.decision),
        Err(e) => {
            if e.is_identity_failure() {
                warn!("Rejected access proof: {e}");
            }
            VerifyResponse::from(&e)
        }
    }
}

async fn status(
    State(gateway): State<Arc<AccessGateway>>,
    Path(address): Path<String>,
) -> VerifyResponse {
    match gateway.status(&address).await {
        Ok(decision) => VerifyResponse::from(&decision),
        Err(e) => VerifyResponse::from(&e),
    }
}

async fn health(State(gateway): State<Arc<AccessGateway>>) -> Json<serde_json::Value> {
    let stats = gateway.nonce_stats();
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "noncesConsumed": stats.nonces_consumed,
        "replaysRejected": stats.replays_rejected,
    }))
}

/// Builder for the gateway service.
pub struct GatewayBuilder {
    config: GatewayConfig,
}

impl GatewayBuilder {
    /// Create a new builder with the given configuration.
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        Self { config }
    }

    /// Connect to the ledger and indexer, then bind the listener.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the listen
    /// address cannot be bound.
    pub async fn build(self) -> Result<RunningGateway> {
        self.config.validate()?;
        let components = connect_components(&self.config)?;
        self.build_with(components).await
    }

    /// Bind the listener around already assembled components.
    ///
    /// # Errors
    ///
    /// Returns an error if the listen address cannot be bound.
    pub async fn build_with(self, components: GatewayComponents) -> Result<RunningGateway> {
        let listener = TcpListener::bind(self.config.server.listen).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(RunningGateway {
            gateway: Arc::new(AccessGateway::new(components)),
            listener: Some(listener),
            local_addr,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        })
    }
}

fn connect_components(config: &GatewayConfig) -> Result<GatewayComponents> {
    let read_timeout = Duration::from_secs(config.sync.read_timeout_secs);
    let write_timeout = Duration::from_secs(config.sync.write_timeout_secs);

    let backend = ContractRegistry::connect(
        &config.chain.rpc_url,
        config.registry_address()?,
        config.chain.operator_key.as_deref(),
        write_timeout,
    )?;
    if !backend.can_write() {
        warn!("No operator key configured - paid grants will not be written back");
    }

    let registry = RegistryClient::new(Arc::new(backend), read_timeout, write_timeout);
    let chain = RpcTransactionSource::connect(&config.chain.rpc_url)?;
    let indexer = EtherscanIndexer::new(config.etherscan())?;
    let prover = PaymentProver::new(
        config.payment_terms()?,
        Arc::new(chain),
        Arc::new(indexer),
        config.prover(),
    );

    Ok(GatewayComponents {
        registry,
        prover,
        sync_policy: config.sync_policy(),
        nonces: config.nonce_guard(),
        throttle: config.scan_throttle(),
    })
}

/// Cloneable trigger for stopping a [`RunningGateway`].
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Request shutdown.
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

/// A bound gateway service.
pub struct RunningGateway {
    gateway: Arc<AccessGateway>,
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl RunningGateway {
    /// Address the service is listening on.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The gateway serving requests.
    #[must_use]
    pub fn gateway(&self) -> Arc<AccessGateway> {
        Arc::clone(&self.gateway)
    }

    /// Subscribe to gateway events.
    #[must_use]
    pub fn subscribe_events(&self) -> GatewayEventsChannel {
        self.gateway.subscribe_events()
    }

    /// Handle that stops the service from another task.
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.shutdown_tx),
        }
    }

    /// Serve requests until shutdown is requested or Ctrl-C is received.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails or was already run.
    pub async fn run(&mut self) -> Result<()> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| Error::Config("gateway has already been run".to_string()))?;

        info!("Serving on http://{}", self.local_addr);

        let mut shutdown_rx = self.shutdown_rx.clone();
        let shutdown_tx = Arc::clone(&self.shutdown_tx);
        let signal = async move {
            tokio::select! {
                _ = shutdown_rx.wait_for(|stop| *stop) => {
                    info!("Shutdown signal received");
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Ctrl-C received, initiating shutdown");
                    let _ = shutdown_tx.send(true);
                }
            }
        };

        axum::serve(listener, router(Arc::clone(&self.gateway)))
            .with_graceful_shutdown(signal)
            .await?;

        info!("Gateway shutdown complete");
        Ok(())
    }

    /// Request the service to shut down.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}
