use clap::Parser;
use slack_exporter::{Cli, Commands};

#[tokio::main]
async fn main() {
    slack_exporter::init_tracing();
    let cli = Cli::parse();
    let cancel = slack_exporter::install_cancel_on_ctrl_c();

    let result = match cli.command {
        Commands::Users => slack_exporter::run_users(&cli.config, cancel).await,
        Commands::Export { channel_type, step } => {
            slack_exporter::run_export(&cli.config, channel_type, step, cancel).await
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
