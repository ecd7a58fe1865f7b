use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use axum::Router;
use camino::Utf8PathBuf as PathBuf;
use clap::Parser;
use eyre::{self, Context, Result};
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    request_id::MakeRequestUuid,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
    ServiceBuilderExt,
};
use tracing::{info, warn};
use tracing_error::ErrorLayer;
use tracing_subscriber::{prelude::*, EnvFilter};

use tube::{
    app_state::{AppState, SharedState},
    routes,
};
use tube_core::{
    catalog::{Catalog, MetadataReader, Synchronizer},
    config::Config,
    ingest::{DirectUrlResolver, Downloader, IngestSettings, Ingester},
    model::Collection,
    processing::{encoder::MediaEncoder, ffmpeg::FFmpeg},
    store::ViewStore,
    streaming::TranscodeLimiter,
};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

/// Registers every configured library. Duplicate paths or prefixes are fatal.
fn build_catalog(config: &Config) -> Result<Catalog> {
    let catalog = Catalog::new();
    for library in &config.library {
        catalog
            .add_collection(Collection::new(
                library.path.clone(),
                &library.prefix,
                library.preserve_upload_filename,
            ))
            .wrap_err("invalid library configuration")?;
    }
    Ok(catalog)
}

async fn ensure_upload_dir(config: &Config) -> Result<()> {
    let upload_path = &config.server.upload_path;
    if !tokio::fs::try_exists(upload_path).await.unwrap_or(false) {
        warn!(%upload_path, "upload path does not exist, creating it");
        tokio::fs::create_dir_all(upload_path)
            .await
            .wrap_err(format!("could not create upload path {}", upload_path))?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "1")
    }
    if std::env::var("RUST_SPANTRACE").is_err() {
        std::env::set_var("RUST_SPANTRACE", "1");
    }
    color_eyre::install()?;
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("TUBE_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(ErrorLayer::default())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config_path = PathBuf::from(args.config);
    let config = tube_core::config::read_config(&config_path).await?;

    let addr: IpAddr = config
        .server
        .address
        .parse()
        .wrap_err("error parsing listening address")?;
    let port = config.server.port;

    info!("Starting up...");
    let views = ViewStore::open(&config.server.store_path)
        .await
        .wrap_err(format!(
            "could not open view store {}",
            config.server.store_path
        ))?;
    let catalog = build_catalog(&config)?;
    ensure_upload_dir(&config).await?;

    let ffprobe = config
        .bin_paths
        .ffprobe
        .clone()
        .unwrap_or_else(|| PathBuf::from("ffprobe"));
    let synchronizer = Synchronizer::new(catalog.clone(), MetadataReader::new(Some(ffprobe)));
    for collection in catalog.collections() {
        if let Err(err) = synchronizer.import(&collection).await {
            warn!(path = %collection.path, "error importing collection: {:#}", err);
        }
    }
    let roots: Vec<PathBuf> = catalog.collections().into_iter().map(|c| c.path).collect();
    let sync_handle = synchronizer.watch(&roots)?;
    info!(videos = catalog.len(), "catalog ready");

    let encoder: Arc<dyn MediaEncoder> = Arc::new(FFmpeg::new(&config.bin_paths));
    let ingester = Ingester::new(
        catalog.clone(),
        encoder.clone(),
        Arc::new(DirectUrlResolver),
        Downloader::default(),
        IngestSettings::from_config(&config),
    );
    let shared_state: SharedState = Arc::new(AppState {
        catalog,
        views,
        ingester,
        encoder,
        limiter: TranscodeLimiter::new(config.transcoder.max_on_the_fly),
        sizes: config.transcoder.sizes.clone(),
    });

    let app = Router::new()
        .merge(routes::router(config.server.max_upload_size))
        .layer(
            ServiceBuilder::new()
                .set_x_request_id(MakeRequestUuid)
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().include_headers(true))
                        .on_response(DefaultOnResponse::new().include_headers(true)),
                ),
        )
        .with_state(shared_state);
    let listener = tokio::net::TcpListener::bind(SocketAddr::new(addr, port))
        .await
        .wrap_err("Error binding socket")?;
    info!(%addr, port, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .wrap_err("server error")?;
    info!("Shutting down...");
    sync_handle.stop();

    Ok(())
}

async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => {}
        Err(err) => {
            eprintln!("Unable to listen for shutdown signal: {}", err);
            // we also shut down in case of error
        }
    }
}
