use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::layout::ChannelType;
use crate::settings::SETTINGS_FILE;

#[derive(Parser)]
#[command(name = "slack-exporter")]
#[command(about = "Export a Slack workspace to a local JSON/CSV tree")]
pub struct Cli {
    /// Settings file path
    #[arg(short, long, global = true, default_value = SETTINGS_FILE)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Refresh the workspace user list and its active/deleted/bot partitions
    Users,

    /// Export one conversation type
    Export {
        /// Conversation type to export
        #[arg(short = 't', long = "type", value_enum)]
        channel_type: ChannelType,

        /// Which stage to run
        #[arg(short, long, value_enum)]
        step: Step,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Step {
    /// List channels into archiveList/unArchiveList
    Channel,
    /// Fetch threads, replies and files, then archive
    Data,
}
