use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ytdlp_gateway::auth::AuthConfig;
use ytdlp_gateway::metrics;
use ytdlp_gateway::resolver::{YtDlpConfig, YtDlpResolver};
use ytdlp_gateway::server::{self, AppState};

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ytdlp_gateway=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_ansi(false),
        )
        .init();

    info!("ytdlp-gateway starting...");

    let metrics_handle = metrics::init_metrics();
    info!("Prometheus metrics initialized");

    let auth = AuthConfig::from_env();
    if auth.enabled() {
        info!("API key authentication enabled");
    } else {
        warn!("API_KEY not configured - authentication disabled");
    }

    let resolver_config = YtDlpConfig::from_env();
    info!(?resolver_config, "Resolver configuration loaded");

    let state = Arc::new(AppState {
        auth,
        resolver: Arc::new(YtDlpResolver::new(resolver_config)),
        metrics_handle,
    });

    let app = server::router(state)
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(tower_http::trace::DefaultMakeSpan::default())
                .on_response(tower_http::trace::DefaultOnResponse::default()),
        )
        .layer(tower_http::cors::CorsLayer::permissive());

    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
