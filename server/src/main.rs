use anyhow::{Context, Result};
use clap::Parser;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use packbattle_server::{
    Api, Server, ServerConfig, DEFAULT_BOX_CACHE_TTL_MS, DEFAULT_HTTP_BODY_LIMIT_BYTES,
    DEFAULT_HTTP_RATE_LIMIT_BURST, DEFAULT_HTTP_RATE_LIMIT_PER_SECOND,
};
use packbattle_types::pack::BASIS_POINTS;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// OTLP span pipeline, enabled by `OTEL_EXPORTER_OTLP_ENDPOINT`.
fn otlp_provider(endpoint: String) -> Result<opentelemetry_sdk::trace::SdkTracerProvider> {
    let service_name = non_empty_env("OTEL_SERVICE_NAME")
        .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string());
    let sampling_rate = parse_env::<f64>("OTEL_SAMPLING_RATE")
        .map(|rate| rate.clamp(0.0, 1.0))
        .unwrap_or(1.0);
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .context("failed to build OTLP exporter")?;
    let resource = opentelemetry_sdk::Resource::builder_empty()
        .with_attributes([opentelemetry::KeyValue::new("service.name", service_name)])
        .build();
    Ok(opentelemetry_sdk::trace::SdkTracerProvider::builder()
        .with_sampler(opentelemetry_sdk::trace::Sampler::TraceIdRatioBased(
            sampling_rate,
        ))
        .with_resource(resource)
        .with_batch_exporter(exporter)
        .build())
}

fn init_tracing() -> Result<()> {
    let Some(endpoint) = non_empty_env("OTEL_EXPORTER_OTLP_ENDPOINT") else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
        return Ok(());
    };
    let provider = otlp_provider(endpoint)?;
    let tracer = provider.tracer(env!("CARGO_PKG_NAME"));
    opentelemetry::global::set_tracer_provider(provider);
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(LevelFilter::INFO))
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .init();
    Ok(())
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host interface to bind (default: localhost).
    #[arg(long, default_value = "127.0.0.1")]
    host: IpAddr,
    #[arg(short, long, default_value_t = 8080)]
    port: u16,
    /// Path to the SQLite state database (in-memory when omitted).
    #[arg(long)]
    database: Option<PathBuf>,
    /// Path to a YAML catalog loaded at startup.
    #[arg(long)]
    catalog: Option<PathBuf>,
    /// Seed for deterministic draws (optional).
    #[arg(long)]
    deterministic_seed: Option<u64>,
    /// Share of every battle pot kept by the house, in basis points.
    #[arg(long, default_value_t = 0)]
    house_edge_bps: u16,
    /// Box cache TTL in milliseconds (0 disables the cache).
    #[arg(long)]
    box_cache_ttl_ms: Option<u64>,
    /// HTTP rate limit per IP in requests per second (0 disables rate limiting).
    #[arg(long)]
    http_rate_limit_per_second: Option<u64>,
    /// HTTP rate limit burst size (0 disables rate limiting).
    #[arg(long)]
    http_rate_limit_burst: Option<u32>,
    /// Max request body size in bytes (0 disables limit).
    #[arg(long)]
    http_body_limit_bytes: Option<usize>,
}

fn non_empty_env(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_env<T: std::str::FromStr>(var: &str) -> Option<T> {
    non_empty_env(var).and_then(|value| value.parse().ok())
}

fn env_flag(var: &str) -> bool {
    non_empty_env(var).is_some_and(|value| {
        matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes")
    })
}

fn is_production() -> bool {
    matches!(non_empty_env("NODE_ENV").as_deref(), Some("production" | "prod"))
}

/// `Some(0)` disables the limit; an absent flag keeps the default.
fn limit_or_default<T: Copy + PartialEq + Default>(arg: Option<T>, default: T) -> Option<T> {
    match arg {
        Some(value) if value == T::default() => None,
        Some(value) => Some(value),
        None => Some(default),
    }
}

fn build_config(args: &Args) -> Result<ServerConfig> {
    if u64::from(args.house_edge_bps) > BASIS_POINTS {
        anyhow::bail!(
            "house_edge_bps must be <= {BASIS_POINTS} (got {})",
            args.house_edge_bps
        );
    }
    Ok(ServerConfig {
        database: args.database.clone(),
        catalog: args.catalog.clone(),
        deterministic_seed: args.deterministic_seed,
        house_edge_bps: args.house_edge_bps,
        box_cache_ttl_ms: args.box_cache_ttl_ms.unwrap_or(DEFAULT_BOX_CACHE_TTL_MS),
        http_rate_limit_per_second: limit_or_default(
            args.http_rate_limit_per_second,
            DEFAULT_HTTP_RATE_LIMIT_PER_SECOND,
        ),
        http_rate_limit_burst: limit_or_default(
            args.http_rate_limit_burst,
            DEFAULT_HTTP_RATE_LIMIT_BURST,
        ),
        http_body_limit_bytes: limit_or_default(
            args.http_body_limit_bytes,
            DEFAULT_HTTP_BODY_LIMIT_BYTES,
        ),
        ..ServerConfig::default()
    })
}

/// Environment variables override the command line.
fn apply_env(mut config: ServerConfig) -> ServerConfig {
    if let Some(rate) = parse_env::<u64>("RATE_LIMIT_HTTP_PER_SEC") {
        config.http_rate_limit_per_second = (rate > 0).then_some(rate);
    }
    if let Some(burst) = parse_env::<u32>("RATE_LIMIT_HTTP_BURST") {
        config.http_rate_limit_burst = (burst > 0).then_some(burst);
    }
    config.allowed_origins = non_empty_env("ALLOWED_HTTP_ORIGINS")
        .map(|origins| {
            origins
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    config.allow_no_origin = env_flag("ALLOW_HTTP_NO_ORIGIN");
    config.admin_token = non_empty_env("ADMIN_AUTH_TOKEN");
    config.metrics_token = non_empty_env("METRICS_AUTH_TOKEN");
    config
}

/// Settings that must be present when `NODE_ENV=production`.
fn ensure_production_env() -> Result<()> {
    if !is_production() {
        return Ok(());
    }
    for var in ["ALLOWED_HTTP_ORIGINS", "ADMIN_AUTH_TOKEN"] {
        if non_empty_env(var).is_none() {
            anyhow::bail!("missing required env: {var}");
        }
    }
    for var in ["RATE_LIMIT_HTTP_PER_SEC", "RATE_LIMIT_HTTP_BURST"] {
        let value = non_empty_env(var).with_context(|| format!("missing required env: {var}"))?;
        match value.parse::<u64>() {
            Ok(parsed) if parsed > 0 => {}
            _ => anyhow::bail!("invalid {var}: {value}"),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing()?;
    ensure_production_env()?;

    let config = apply_env(build_config(&args)?);
    let server = Arc::new(Server::from_config(config).context("failed to start engine")?);
    let app = Api::new(server).router();

    let addr = SocketAddr::new(args.host, args.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("axum server error")?;

    Ok(())
}
