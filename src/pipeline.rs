//! Per channel-type orchestration of the export stages.
//!
//! Stages hand off through the on-disk tree only: the data step reads the
//! lists the channel step wrote, and the file stage scans what the thread and
//! reply stages wrote. Any stage can be re-run on its own.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::archive::{ArchiveOutcome, Archiver, SplitPolicy};
use crate::channels::{ChannelLister, ListingSummary};
use crate::files::{DownloadOutcome, FileDownloader};
use crate::layout::{ChannelType, ExportLayout, Partition, ThreadKey};
use crate::output::{read_json_array_or_empty, write_json};
use crate::settings::Settings;
use crate::slack::SlackClient;
use crate::threads::{ThreadFetcher, ThreadOutcome};
use crate::users::{UserDirectory, UserPartitions};
use crate::{AppError, Result};

/// What one data step run did for one partition, written to
/// `<type>/<partition>/export_report.json`.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub channel_type: ChannelType,
    pub partition: Partition,
    pub started_at: String,
    pub finished_at: String,
    pub channels: usize,
    pub threads: usize,
    pub replies: usize,
    /// Channels whose stage failed outright.
    pub failed_channels: Vec<String>,
    /// Channels whose history walk stopped before the last page.
    pub incomplete_channels: Vec<String>,
    pub incomplete_threads: Vec<ThreadKey>,
    pub files_downloaded: usize,
    pub files_failed: usize,
    pub files_excluded: usize,
    pub cancelled: bool,
}

impl RunReport {
    fn new(channel_type: ChannelType, partition: Partition) -> Self {
        Self {
            channel_type,
            partition,
            started_at: Utc::now().to_rfc3339(),
            finished_at: String::new(),
            channels: 0,
            threads: 0,
            replies: 0,
            failed_channels: Vec::new(),
            incomplete_channels: Vec::new(),
            incomplete_threads: Vec::new(),
            files_downloaded: 0,
            files_failed: 0,
            files_excluded: 0,
            cancelled: false,
        }
    }

    fn record_channel(&mut self, outcome: ThreadOutcome) {
        self.threads += outcome.threads;
        self.replies += outcome.replies.replies;
        if !outcome.complete {
            self.incomplete_channels.push(outcome.channel_id);
        }
        self.incomplete_threads.extend(outcome.replies.incomplete);
        self.cancelled |= outcome.replies.cancelled;
    }

    fn record_files(&mut self, outcome: &DownloadOutcome) {
        self.files_downloaded = outcome.downloaded;
        self.files_failed = outcome.failed;
        self.files_excluded = outcome.excluded;
        self.cancelled |= outcome.cancelled;
    }

    /// True when everything listed was fetched to the last page.
    pub fn is_complete(&self) -> bool {
        !self.cancelled
            && self.failed_channels.is_empty()
            && self.incomplete_channels.is_empty()
            && self.incomplete_threads.is_empty()
    }
}

#[derive(Debug)]
pub struct DataStepOutcome {
    pub reports: Vec<RunReport>,
    pub archive: Option<ArchiveOutcome>,
}

pub struct Exporter {
    client: SlackClient,
    layout: ExportLayout,
    users: UserDirectory,
    archiver: Archiver,
    list_limit: u32,
    history_limit: u32,
    concurrency: usize,
}

impl Exporter {
    pub fn new(settings: &Settings, token: String, cancel: CancellationToken) -> Result<Self> {
        let client = SlackClient::new(&settings.slack, token, cancel)?;
        let layout = ExportLayout::new(&settings.export.output_dir);
        let archiver = Archiver::new(SplitPolicy::from_settings(&settings.archive));
        let users = UserDirectory::new(client.clone(), layout.clone(), archiver.clone());

        Ok(Self {
            client,
            layout,
            users,
            archiver,
            list_limit: settings.export.list_limit,
            history_limit: settings.export.history_limit,
            concurrency: settings.export.concurrency.max(1),
        })
    }

    pub fn layout(&self) -> &ExportLayout {
        &self.layout
    }

    fn cancellation(&self) -> &CancellationToken {
        self.client.cancellation()
    }

    pub async fn refresh_users(&self) -> Result<UserPartitions> {
        self.users.refresh_user_list().await
    }

    pub async fn run_channel_step(&self, channel_type: ChannelType) -> Result<ListingSummary> {
        ChannelLister::new(&self.client, &self.users, &self.layout, self.list_limit)
            .list_channels(channel_type)
            .await
    }

    /// Threads, replies and files for the unarchived then the archived
    /// partition, followed by archiving the channel type's folder.
    pub async fn run_data_step(&self, channel_type: ChannelType) -> Result<DataStepOutcome> {
        let mut reports = Vec::new();
        for partition in [Partition::Unarchive, Partition::Archive] {
            let report = self.run_partition(channel_type, partition).await?;
            let cancelled = report.cancelled;
            reports.push(report);
            if cancelled {
                return Err(AppError::Cancelled);
            }
        }

        let archive = self
            .archiver
            .archive_best_effort(
                &self.layout.type_root(channel_type),
                &self.layout.archive_zip(channel_type.archive_label()),
                channel_type.archive_label(),
            )
            .await;

        Ok(DataStepOutcome { reports, archive })
    }

    async fn run_partition(
        &self,
        channel_type: ChannelType,
        partition: Partition,
    ) -> Result<RunReport> {
        let mut report = RunReport::new(channel_type, partition);

        let list_path = self.layout.list_json(channel_type, partition);
        if !list_path.exists() {
            warn!(
                channel_type = %channel_type,
                partition = %partition,
                "no channel list found, run the channel step first"
            );
        }
        let channels = read_json_array_or_empty(&list_path).unwrap_or_else(|e| {
            error!(
                channel_type = %channel_type,
                partition = %partition,
                error = %e,
                "unreadable channel list, treating it as empty"
            );
            Vec::new()
        });
        let channel_ids: Vec<String> = channels
            .iter()
            .filter_map(|c| c.get("id").and_then(Value::as_str).map(str::to_string))
            .collect();
        report.channels = channel_ids.len();
        info!(
            channel_type = %channel_type,
            partition = %partition,
            channels = channel_ids.len(),
            "starting data step"
        );

        for (channel_id, result) in self.fetch_channels(channel_type, partition, channel_ids).await {
            match result {
                Ok(outcome) => report.record_channel(outcome),
                Err(AppError::Cancelled) => report.cancelled = true,
                Err(_) => report.failed_channels.push(channel_id),
            }
        }

        if !report.cancelled && !self.cancellation().is_cancelled() {
            let downloader = FileDownloader::new(self.client.clone(), self.layout.clone());
            match downloader
                .resolve_and_download_files(channel_type, partition)
                .await
            {
                Ok(outcome) => report.record_files(&outcome),
                Err(e) => error!(channel_type = %channel_type, error = %e, "file stage failed"),
            }
        }
        report.cancelled |= self.cancellation().is_cancelled();

        report.finished_at = Utc::now().to_rfc3339();
        write_json(&self.layout.report_json(channel_type, partition), &report)?;
        if !report.is_complete() {
            warn!(
                channel_type = %channel_type,
                partition = %partition,
                failed = report.failed_channels.len(),
                incomplete_channels = report.incomplete_channels.len(),
                incomplete_threads = report.incomplete_threads.len(),
                cancelled = report.cancelled,
                "partition exported with gaps"
            );
        }
        Ok(report)
    }

    async fn fetch_channels(
        &self,
        channel_type: ChannelType,
        partition: Partition,
        channel_ids: Vec<String>,
    ) -> Vec<(String, Result<ThreadOutcome>)> {
        let fetcher = ThreadFetcher::new(self.client.clone(), self.layout.clone(), self.history_limit);
        for_each_channel(
            channel_ids,
            self.concurrency,
            self.cancellation().clone(),
            move |channel_id| {
                let fetcher = fetcher.clone();
                async move {
                    fetcher
                        .fetch_threads(channel_type, partition, &channel_id)
                        .await
                }
            },
        )
        .await
    }
}

/// Runs `work` for every channel with at most `concurrency` channels in
/// flight. Results come back in list order, and a task that panics is
/// reported as a failure of its own channel.
async fn for_each_channel<T, F, Fut>(
    channel_ids: Vec<String>,
    concurrency: usize,
    cancel: CancellationToken,
    work: F,
) -> Vec<(String, Result<T>)>
where
    T: Send + 'static,
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();
    let mut spawned = HashMap::new();

    for (index, channel_id) in channel_ids.into_iter().enumerate() {
        let permits = Arc::clone(&permits);
        let cancel = cancel.clone();
        let task = work(channel_id.clone());
        let handle = tasks.spawn(async move {
            match permits.acquire_owned().await {
                Ok(_permit) if cancel.is_cancelled() => Err(AppError::Cancelled),
                Ok(_permit) => task.await,
                Err(_) => Err(AppError::Cancelled),
            }
        });
        spawned.insert(handle.id(), (index, channel_id));
    }

    let mut results = Vec::new();
    while let Some(joined) = tasks.join_next_with_id().await {
        let (id, result) = match joined {
            Ok((id, result)) => (id, result),
            Err(e) => {
                let message = format!("channel task failed: {}", e);
                (e.id(), Err(AppError::SlackApi(message)))
            }
        };
        let Some((index, channel_id)) = spawned.remove(&id) else {
            continue;
        };
        if let Err(e) = &result {
            if !matches!(e, AppError::Cancelled) {
                error!(channel_id = %channel_id, error = %e, "channel fetch failed");
            }
        }
        results.push((index, channel_id, result));
    }
    results.sort_by_key(|(index, _, _)| *index);
    results
        .into_iter()
        .map(|(_, channel_id, result)| (channel_id, result))
        .collect()
}
