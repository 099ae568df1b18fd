mod api;
mod config;
mod crypto;
mod db;
mod dsde;
mod error;
mod kms;
mod split;
mod storage;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api::AppState;
use config::Config;
use dsde::Service;
use split::fg::FeatureGen;

/// Bit positions drawn per partition split.
const PG_B: usize = 3;

/// Uploads are fully buffered, so cap request bodies (1 GiB).
const MAX_UPLOAD_BYTES: usize = 1024 * 1024 * 1024;

#[tokio::main]
async fn main() {
    let cfg = Config::from_env();

    // Initialize logging; RUST_LOG wins over the configured level.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cfg.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Shared AWS config; AWS_ENDPOINT_URL points both clients at
    // LocalStack/MinIO in development.
    let mut aws_loader = aws_config::from_env();
    if !cfg.aws_region.is_empty() {
        aws_loader = aws_loader.region(aws_config::Region::new(cfg.aws_region.clone()));
    }
    if let Ok(endpoint) = std::env::var("AWS_ENDPOINT_URL") {
        aws_loader = aws_loader.endpoint_url(endpoint);
    }
    let aws_cfg = aws_loader.load().await;

    let kms_client = aws_sdk_kms::Client::new(&aws_cfg);
    let s3_client = aws_sdk_s3::Client::new(&aws_cfg);

    let key_manager: Arc<dyn kms::KeyManager> = Arc::new(
        kms::KmsKeyManager::new(kms_client, &cfg).expect("Failed to initialize KMS client"),
    );
    let store: Arc<dyn storage::ObjectStore> = Arc::new(
        storage::S3Store::new(s3_client, &cfg).expect("Failed to initialize S3 store"),
    );
    let metadata: Arc<dyn db::MetadataStore> = Arc::new(
        db::Client::connect(&cfg.postgres_dsn)
            .await
            .expect("Failed to initialize metadata store"),
    );
    tracing::info!("metadata store ready");

    let fg = FeatureGen::new(vec![1, 3, 5], vec![0, 0, 0]);
    let service = Service::new(fg, PG_B, key_manager, metadata, store.clone());
    let state = Arc::new(AppState { service, store });

    let app = api::router(state)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = cfg
        .server_addr
        .parse()
        .expect("Invalid DSDE_SERVER_ADDR");
    tracing::info!("starting server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind server address");
    axum::serve(listener, app).await.expect("server failed");
}
