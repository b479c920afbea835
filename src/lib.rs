pub mod archive;
pub mod channels;
pub mod cli;
pub mod commands;
pub mod error;
pub mod files;
pub mod layout;
pub mod output;
pub mod paginate;
pub mod pipeline;
pub mod replies;
pub mod settings;
pub mod slack;
pub mod threads;
pub mod users;
pub mod viewer;

pub use cli::{Cli, Commands, Step};
pub use commands::{run_export, run_users};
pub use error::{AppError, Result};
pub use layout::{ChannelType, ExportLayout, Partition};

use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Logs to stderr, filtered by `RUST_LOG` (default `info`).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Returns a token cancelled on the first Ctrl+C.
///
/// In-flight requests finish or time out; every stage checks the token
/// between units of work and stops early.
pub fn install_cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let on_signal = token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, stopping after the current request");
            on_signal.cancel();
        }
    });

    token
}
