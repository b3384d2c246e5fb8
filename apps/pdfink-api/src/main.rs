//! pdfink API Server
//!
//! Backend for the in-browser PDF annotator. Provides REST endpoints for:
//!
//! - Document upload and storage (`/api/upload`, `/api/save`, `/d/<name>`)
//! - Flattening annotation overlays into a final PDF (`/api/export`)
//! - OCR word geometry for scanned pages (`/api/ocr`)
//!
//! PDF work and recognition run on the blocking pool with per-request
//! timeouts; see `pdfink_core::task`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue},
    routing::{get, post},
    Router,
};
use clap::Parser;
use pdfink_core::ocr::{OcrEngine, TesseractConfig, TesseractEngine, DEFAULT_LANGUAGE};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod error;
mod handlers;
mod models;
mod state;
mod storage;

use state::{AppState, Limits};
use storage::FileStore;

/// Stored files never change once written
const IMMUTABLE_CACHE: &str = "public, max-age=31536000";

/// Command-line arguments for the pdfink server
#[derive(Parser, Debug)]
#[command(name = "pdfink-api")]
#[command(about = "PDF annotation export, storage and OCR server")]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "10000")]
    port: u16,

    /// Host address to bind to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Directory for uploaded and saved files
    #[arg(long, env = "STORAGE_DIR", default_value = "./storage/files")]
    storage_dir: PathBuf,

    /// OCR language when a request does not specify one
    #[arg(long, env = "OCR_LANGUAGE", default_value = DEFAULT_LANGUAGE)]
    ocr_language: String,

    /// Path to the tesseract program
    #[arg(long, env = "TESSERACT_BIN", default_value = "tesseract")]
    tesseract_bin: PathBuf,

    /// Export timeout in milliseconds
    #[arg(long, env = "EXPORT_TIMEOUT_MS", default_value = "30000")]
    export_timeout_ms: u64,

    /// OCR timeout in milliseconds
    #[arg(long, env = "OCR_TIMEOUT_MS", default_value = "60000")]
    ocr_timeout_ms: u64,

    /// Largest accepted file, in bytes
    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value = "31457280")]
    max_upload_bytes: usize,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Build the full router over `state`
pub fn build_router(state: Arc<AppState>) -> Router {
    // CORS configuration for web clients
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let files = ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static(IMMUTABLE_CACHE),
        ))
        .service(ServeDir::new(state.store.root()));

    Router::new()
        // Health check
        .route("/health", get(handlers::health))
        // Storage
        .route("/api/upload", post(handlers::upload))
        .route("/api/save", post(handlers::save))
        .nest_service("/d", files)
        // Processing
        .route("/api/export", post(handlers::export_document))
        .route("/api/ocr", post(handlers::ocr))
        // Add middleware
        .layer(DefaultBodyLimit::max(state.max_request_bytes()))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present, before clap reads the environment
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("pdfink_api={}", level).parse()?)
                .add_directive(format!("pdfink_core={}", level).parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    info!("Initializing pdfink API...");
    let store = FileStore::open(&args.storage_dir)?;
    let limits = Limits {
        max_upload_bytes: args.max_upload_bytes,
        export_timeout_ms: args.export_timeout_ms,
        ocr_timeout_ms: args.ocr_timeout_ms,
        ..Limits::default()
    };
    let state = AppState::new(store, limits, args.ocr_language.clone());

    let state = match acquire_ocr_engine(&args) {
        Ok(engine) => state.with_ocr_engine(engine),
        Err(e) => {
            warn!("OCR disabled: {}", e);
            state.without_ocr_engine(e.to_string())
        }
    };

    let app = build_router(Arc::new(state));

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Server listening on http://{}", addr);
    info!("Storage directory: {}", args.storage_dir.display());
    info!(
        "Timeouts: export {}ms, OCR {}ms",
        args.export_timeout_ms, args.ocr_timeout_ms
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// The linked library when built with `leptess`, else the `tesseract` program
fn acquire_ocr_engine(args: &Args) -> pdfink_core::error::Result<Arc<dyn OcrEngine>> {
    #[cfg(feature = "leptess")]
    match pdfink_core::ocr::LeptessEngine::acquire(&args.ocr_language) {
        Ok(engine) => return Ok(Arc::new(engine)),
        Err(e) => warn!("libtesseract unavailable, trying the tesseract program: {}", e),
    }

    let config = TesseractConfig {
        binary: args.tesseract_bin.clone(),
        ..TesseractConfig::default()
    };
    Ok(Arc::new(TesseractEngine::acquire(config)?))
}
