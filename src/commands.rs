use std::path::Path;

use tokio_util::sync::CancellationToken;

use crate::cli::Step;
use crate::error::Result;
use crate::layout::ChannelType;
use crate::pipeline::Exporter;
use crate::settings::Settings;

fn exporter(config: &Path, cancel: CancellationToken) -> Result<Exporter> {
    let settings = Settings::load(config)?;
    let token = settings.resolve_token()?;
    Exporter::new(&settings, token, cancel)
}

pub async fn run_users(config: &Path, cancel: CancellationToken) -> Result<()> {
    let exporter = exporter(config, cancel)?;

    println!(
        "Exporting users to {}...",
        exporter.layout().users_dir().display()
    );

    let users = exporter.refresh_users().await?;

    println!(
        "Export completed successfully! {} users exported ({} active, {} deleted, {} bots).",
        users.total(),
        users.active.len(),
        users.deleted.len(),
        users.bots.len()
    );
    Ok(())
}

pub async fn run_export(
    config: &Path,
    channel_type: ChannelType,
    step: Step,
    cancel: CancellationToken,
) -> Result<()> {
    let exporter = exporter(config, cancel)?;

    match step {
        Step::Channel => {
            println!("Listing {}...", channel_type.display_name());

            let summary = exporter.run_channel_step(channel_type).await?;

            println!(
                "Listing completed successfully! {} archived, {} unarchived.",
                summary.archived, summary.unarchived
            );
        }
        Step::Data => {
            println!("Exporting {} data...", channel_type.display_name());

            let outcome = exporter.run_data_step(channel_type).await?;

            for report in &outcome.reports {
                println!(
                    "  {}: {} channels, {} threads, {} replies, {} files downloaded, {} failed",
                    report.partition,
                    report.channels,
                    report.threads,
                    report.replies,
                    report.files_downloaded,
                    report.files_failed
                );
                if !report.is_complete() {
                    println!(
                        "  {}: incomplete, see {}",
                        report.partition,
                        exporter
                            .layout()
                            .report_json(channel_type, report.partition)
                            .display()
                    );
                }
            }
            match &outcome.archive {
                Some(archive) if archive.parts.is_empty() => {
                    println!("Archive written to {}", archive.zip_path.display())
                }
                Some(archive) => println!(
                    "Archive written to {} and split into {} parts",
                    archive.zip_path.display(),
                    archive.parts.len()
                ),
                None => println!("Archive was not written, see the log for details"),
            }
        }
    }
    Ok(())
}
