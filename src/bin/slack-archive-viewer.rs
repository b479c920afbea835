//! Slack Archive Viewer - read-only HTTP viewer over an exported json_data tree
//!
//! Serves an index of conversation types, per-type channel lists and
//! per-channel message pages, plus the raw export files under `/json_data`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use slack_exporter::init_tracing;
use slack_exporter::layout::ChannelType;
use slack_exporter::viewer::{Config, ViewerService};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Slack Archive Viewer - HTTP viewer for an exported Slack workspace
#[derive(Parser)]
#[command(name = "slack-archive-viewer")]
#[command(about = "Read-only HTTP viewer for an exported Slack workspace")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Path to the configuration file (TOML format)
        #[arg(value_name = "CONFIG_FILE")]
        config: PathBuf,
    },
}

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    viewer: Arc<ViewerService>,
}

/// Error response
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

impl ErrorResponse {
    fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

fn not_found(message: String) -> Response {
    (StatusCode::NOT_FOUND, Json(ErrorResponse::new(message))).into_response()
}

fn parse_type(raw: &str) -> Result<ChannelType, Response> {
    ChannelType::from_api_name(raw).ok_or_else(|| not_found(format!("Unknown conversation type: {}", raw)))
}

/// Handler for GET /
async fn get_index(State(state): State<AppState>) -> Html<String> {
    Html(state.viewer.render_index())
}

/// Handler for GET /list/{type}
async fn get_channel_list(State(state): State<AppState>, Path(channel_type): Path<String>) -> Response {
    match parse_type(&channel_type) {
        Ok(ct) => Html(state.viewer.render_channel_list(ct)).into_response(),
        Err(response) => response,
    }
}

/// Handler for GET /list/{type}/channel/{id}
async fn get_channel(
    State(state): State<AppState>,
    Path((channel_type, channel_id)): Path<(String, String)>,
) -> Response {
    let ct = match parse_type(&channel_type) {
        Ok(ct) => ct,
        Err(response) => return response,
    };
    match state.viewer.render_channel(ct, &channel_id) {
        Some(html) => Html(html).into_response(),
        None => not_found(format!("Channel not found: {}", channel_id)),
    }
}

/// Build the router with all viewer pages and the raw export files
fn build_router(state: AppState) -> Router {
    let files = ServeDir::new(state.viewer.base_path());
    Router::new()
        .route("/", get(get_index))
        .route("/list/{type}", get(get_channel_list))
        .route("/list/{type}/channel/{id}", get(get_channel))
        .nest_service("/json_data", files)
        .with_state(state)
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config } => {
            if let Err(e) = run_server(&config).await {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }
}

async fn run_server(config_path: &std::path::Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_file(config_path)?;

    let viewer = Arc::new(ViewerService::load(&config.slack_archive.base_path)?);
    let app = build_router(AppState { viewer }).layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;

    println!("Starting Slack Archive Viewer on http://{}", addr);
    println!("Export base path: {}", config.slack_archive.base_path);
    println!();
    println!("Pages:");
    println!("  GET  /                              - Conversation types");
    println!("  GET  /list/{{type}}                   - Channels of a type");
    println!("  GET  /list/{{type}}/channel/{{id}}      - Messages of a channel");
    println!("  GET  /json_data/...                 - Raw export files");
    info!(%addr, "viewer listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
