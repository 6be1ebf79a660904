//! Threat Forge
//!
//! A per-IOC enrichment pipeline: fans each indicator out to every
//! supporting threat-intel provider, scores the aggregated results, and
//! drives the job that does this across an upload's worth of IOCs.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod cache;
mod errors;
mod http_harness;
mod job;
mod models;
mod orchestrator;
mod providers;
mod scorer;
mod storage;

use api::{create_router, AppState};
use cache::ResultCache;
use job::JobProcessor;
use orchestrator::EnrichmentOrchestrator;
use providers::ProviderAdapter;
use storage::PgGateway;

/// Threat Forge
#[derive(Parser, Debug)]
#[command(name = "threat-forge")]
#[command(about = "Enrich and score indicators of compromise across threat-intel providers")]
struct Args {
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "PORT", default_value = "8080")]
    port: u16,

    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    #[arg(long, default_value = "false")]
    migrate: bool,

    #[arg(long, env = "VIRUSTOTAL_API_KEY")]
    virustotal_api_key: Option<String>,

    #[arg(long, env = "URLSCAN_API_KEY")]
    urlscan_api_key: Option<String>,

    #[arg(long, env = "CROWDSTRIKE_CLIENT_ID")]
    crowdstrike_client_id: Option<String>,

    #[arg(long, env = "CROWDSTRIKE_CLIENT_SECRET")]
    crowdstrike_client_secret: Option<String>,

    #[arg(long, env = "FLASHPOINT_API_KEY")]
    flashpoint_api_key: Option<String>,

    #[arg(long, env = "RECORDED_FUTURE_API_KEY")]
    recorded_future_api_key: Option<String>,

    /// Positive-hit cache TTL in seconds, clamped to [60, 604800].
    #[arg(long, env = "CACHE_TTL_POSITIVE_SECS", default_value = "86400")]
    cache_ttl_positive_secs: i64,

    /// Unknown/negative-hit cache TTL in seconds, clamped to [30, 86400].
    #[arg(long, env = "CACHE_TTL_NEGATIVE_SECS", default_value = "21600")]
    cache_ttl_negative_secs: i64,

    /// Port the Prometheus metrics exporter listens on.
    #[arg(long, env = "METRICS_PORT", default_value = "9090")]
    metrics_port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "threat_forge=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    tracing::info!("Starting Threat Forge");

    let metrics_addr: SocketAddr = format!("0.0.0.0:{}", args.metrics_port).parse()?;
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .context("Failed to install Prometheus metrics exporter")?;
    tracing::info!("Metrics listening on http://{}", metrics_addr);

    let gateway = PgGateway::new(&args.database_url)
        .await
        .context("Failed to connect to database")?;

    if args.migrate {
        tracing::info!("Running database migrations...");
        gateway.migrate().await?;
        tracing::info!("Migrations complete");
    }

    let cache = ResultCache::new();
    cache.set_ttls(args.cache_ttl_positive_secs, args.cache_ttl_negative_secs);

    let providers: Vec<Arc<dyn ProviderAdapter>> = vec![
        Arc::new(providers::virustotal::VirusTotalAdapter::new(args.virustotal_api_key)),
        Arc::new(providers::urlscan::UrlScanAdapter::new(args.urlscan_api_key)),
        Arc::new(providers::crowdstrike::CrowdStrikeAdapter::new(
            args.crowdstrike_client_id,
            args.crowdstrike_client_secret,
        )),
        Arc::new(providers::flashpoint::FlashpointAdapter::new(args.flashpoint_api_key)),
        Arc::new(providers::recorded_future::RecordedFutureAdapter::new(
            args.recorded_future_api_key,
        )),
        Arc::new(providers::osint::OsintAdapter::new()),
        Arc::new(providers::forensic::ForensicAdapter::new()),
    ];

    let orchestrator = Arc::new(EnrichmentOrchestrator::new(providers, cache.clone()));
    let job_processor = Arc::new(JobProcessor::new(orchestrator, Arc::new(gateway.clone())));

    let state = Arc::new(AppState {
        gateway,
        job_processor,
        cache,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    tracing::info!("Listening on http://{}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
