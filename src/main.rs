//! Pod Control Plane
//!
//! Standalone control plane serving the pod REST API, with rack controllers
//! provided by a backend (the simulated backend reads a YAML inventory).

use anyhow::Context;
use clap::Parser;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pod_control_plane::power::PowerDriverRegistry;
use pod_control_plane::{
    ApiServer, ApiServerConfig, BackendConfig, BackendFactory, OrchestratorConfig,
    PodOrchestrator, PodRequest, PowerParameters,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Pod Control Plane - discovery, compose and decompose of pod-hosted machines
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// REST API bind address
    #[arg(long, env = "API_ADDR", default_value = "0.0.0.0:8090")]
    api_addr: String,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Rack backend
    #[arg(long, env = "RACK_BACKEND", default_value = "simulated")]
    backend: String,

    /// YAML inventory of racks and pods for the simulated backend
    #[arg(long, env = "INVENTORY")]
    inventory: Option<PathBuf>,

    /// Create every inventory pod at startup
    #[arg(long, env = "ENLIST_PODS")]
    enlist_pods: bool,

    /// Compose and decompose timeout in seconds
    #[arg(long, env = "COMPOSE_TIMEOUT", default_value = "120")]
    compose_timeout_secs: u64,

    /// REST request timeout in seconds
    #[arg(long, env = "API_TIMEOUT", default_value = "300")]
    api_timeout_secs: u64,

    /// Per-rack discovery timeout in seconds
    #[arg(long, env = "DISCOVERY_TIMEOUT", default_value = "60")]
    discovery_timeout_secs: u64,

    /// Name of the default resource pool
    #[arg(long, env = "DEFAULT_POOL", default_value = "default")]
    default_pool: String,

    /// Name of the default zone
    #[arg(long, env = "DEFAULT_ZONE", default_value = "default")]
    default_zone: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    info!("Starting Pod Control Plane");
    info!("  Version: {}", pod_control_plane::VERSION);
    info!("  REST API: {}", args.api_addr);
    info!("  Rack backend: {}", args.backend);

    let backend = BackendFactory::create(
        &args.backend,
        &BackendConfig {
            inventory: args.inventory.clone(),
        },
    )
    .context("unable to start the rack backend")?;
    info!("{} rack controllers connected", backend.registry.len());

    let config = OrchestratorConfig {
        compose_timeout: Duration::from_secs(args.compose_timeout_secs),
        discovery_timeout: Duration::from_secs(args.discovery_timeout_secs),
        default_pool_name: args.default_pool.clone(),
        default_zone_name: args.default_zone.clone(),
        ..Default::default()
    };
    let store = config.new_store();
    let drivers = Arc::new(PowerDriverRegistry::with_builtin()?);
    let orchestrator = PodOrchestrator::with_store_commissioning(
        config,
        store,
        backend.registry.clone(),
        drivers,
    )?;

    for rack in backend.racks {
        orchestrator.register_rack(rack).await?;
    }

    if args.enlist_pods {
        for pod in &backend.pods {
            let request = PodRequest {
                power_type: pod.power_type().to_string(),
                power_parameters: PowerParameters::from([(
                    "power_address".to_string(),
                    pod.power_address().to_string(),
                )]),
                ..Default::default()
            };
            match orchestrator.create_pod(request).await {
                Ok(summary) => info!(
                    "{}: enlisted with {} machines",
                    summary.pod.name, summary.machine_count
                ),
                Err(e) => warn!("Unable to enlist pod at {}: {}", pod.power_address(), e),
            }
        }
    }

    // Start health server
    let health_addr: SocketAddr = args
        .health_addr
        .parse()
        .context("invalid health server address")?;
    let health_orchestrator = orchestrator.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(health_addr, health_orchestrator).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr: SocketAddr = args
        .metrics_addr
        .parse()
        .context("invalid metrics server address")?;
    let metrics_orchestrator = orchestrator.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(metrics_addr, metrics_orchestrator).await {
            error!("Metrics server error: {}", e);
        }
    });

    let api_config = ApiServerConfig {
        rest_addr: args.api_addr.parse().context("invalid REST API address")?,
        request_timeout: Duration::from_secs(args.api_timeout_secs),
        ..Default::default()
    };
    let api_server = Arc::new(ApiServer::new(api_config, orchestrator));

    let server = api_server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            server.shutdown();
        }
    });

    api_server.run().await?;

    info!("Control plane shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse()?)
        .add_directive("tower=warn".parse()?)
        .add_directive("tower_http=info".parse()?)
        .add_directive("axum=info".parse()?);

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
    Ok(())
}

// =============================================================================
// Health Server
// =============================================================================

fn text_response(
    status: hyper::StatusCode,
    body: impl Into<hyper::Body>,
) -> hyper::Response<hyper::Body> {
    let mut response = hyper::Response::new(body.into());
    *response.status_mut() = status;
    response
}

async fn run_health_server(
    addr: SocketAddr,
    orchestrator: Arc<PodOrchestrator>,
) -> anyhow::Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let orchestrator = orchestrator.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let orchestrator = orchestrator.clone();
                async move {
                    let response = match req.uri().path() {
                        "/healthz" | "/livez" => text_response(StatusCode::OK, "ok"),
                        "/readyz" if orchestrator.connected_racks() > 0 => {
                            text_response(StatusCode::OK, "ok")
                        }
                        "/readyz" => text_response(
                            StatusCode::SERVICE_UNAVAILABLE,
                            "no rack controllers connected",
                        ),
                        _ => text_response(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, Infallible>(response)
                }
            }))
        }
    });

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .context("health server failed")?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(
    addr: SocketAddr,
    orchestrator: Arc<PodOrchestrator>,
) -> anyhow::Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let orchestrator = orchestrator.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let orchestrator = orchestrator.clone();
                async move {
                    let response = match req.uri().path() {
                        "/metrics" => match orchestrator.metrics().encode() {
                            Ok(text) => {
                                let mut response = text_response(StatusCode::OK, text);
                                response.headers_mut().insert(
                                    hyper::header::CONTENT_TYPE,
                                    hyper::header::HeaderValue::from_static(
                                        "text/plain; version=0.0.4",
                                    ),
                                );
                                response
                            }
                            Err(e) => {
                                error!("Unable to encode metrics: {}", e);
                                text_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
                            }
                        },
                        _ => text_response(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, Infallible>(response)
                }
            }))
        }
    });

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .context("metrics server failed")?;

    Ok(())
}
