//! Attachment discovery and download.
//!
//! Every `messages/<channel>/<ts>/<ts>.json` written by the reply stage is
//! scanned for messages carrying `files`. Valid attachments are downloaded
//! next to the thread, into `files/<message_ts>_<index>.<ext>`, and each
//! successful download becomes one row of the partition's `files.csv`.

use std::fs;
use std::path::Path;

use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;
use walkdir::WalkDir;

use crate::layout::{ChannelType, ExportLayout, Partition, ThreadKey};
use crate::output::{CsvTable, ensure_dir, read_json};
use crate::slack::SlackClient;
use crate::{AppError, Result};

pub const MANIFEST_HEADERS: [&str; 7] = [
    "Channel/DM ID",
    "Thread TS",
    "Reply TS",
    "User ID",
    "Slack File ID",
    "Slack File Download URL",
    "Local File Path",
];

const FALLBACK_EXTENSION: &str = "bin";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invalidity {
    Tombstone,
    External,
    Inaccessible,
}

/// Why a file cannot be downloaded, if it cannot.
pub fn invalid_reason(file: &Value) -> Option<Invalidity> {
    let text = |key: &str| file.get(key).and_then(Value::as_str);

    if text("mode") == Some("tombstone") {
        return Some(Invalidity::Tombstone);
    }
    if file.get("external_url").is_some() {
        return Some(Invalidity::External);
    }
    match text("file_access") {
        Some("file_not_found") | Some("access_denied") => Some(Invalidity::Inaccessible),
        _ => None,
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileSelection {
    pub valid: Vec<Value>,
    pub excluded: usize,
}

pub fn filter_valid_files(files: &[Value]) -> FileSelection {
    let mut selection = FileSelection::default();
    for file in files {
        match invalid_reason(file) {
            None => selection.valid.push(file.clone()),
            Some(reason) => {
                let file_id = file.get("id").and_then(Value::as_str).unwrap_or_default();
                debug!(
                    file_id,
                    ?reason,
                    "skipping file"
                );
                selection.excluded += 1;
            }
        }
    }
    selection
}

/// `filetype` when Slack set one, else the download URL's extension, else `bin`.
pub fn file_extension(file: &Value) -> String {
    if let Some(filetype) = file
        .get("filetype")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
    {
        return filetype.to_string();
    }

    file.get("url_private_download")
        .and_then(Value::as_str)
        .and_then(url_extension)
        .unwrap_or_else(|| FALLBACK_EXTENSION.to_string())
}

fn url_extension(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    let last = url.path_segments()?.next_back()?;
    let (stem, ext) = last.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_string())
}

/// A message with attachments, tagged with the thread it was found in.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageWithFiles {
    pub key: ThreadKey,
    pub message: Value,
}

/// Collects every message carrying a `files` key under a partition's
/// messages folder, in path order.
///
/// Unreadable message files are logged and skipped.
pub fn scan_messages_with_files(
    layout: &ExportLayout,
    channel_type: ChannelType,
    partition: Partition,
) -> Vec<MessageWithFiles> {
    let messages_dir = layout.messages_dir(channel_type, partition);
    if !messages_dir.is_dir() {
        return Vec::new();
    }

    let mut found = Vec::new();
    for entry in WalkDir::new(&messages_dir).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "cannot walk messages folder");
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_json(entry.path()) {
            continue;
        }
        let Some(key) = layout.thread_key(channel_type, partition, entry.path()) else {
            continue;
        };

        let messages: Vec<Value> = match read_json(entry.path()) {
            Ok(messages) => messages,
            Err(e) => {
                warn!(error = %e, "skipping unreadable message file");
                continue;
            }
        };

        found.extend(
            messages
                .into_iter()
                .filter(|m| m.get("files").is_some())
                .map(|message| MessageWithFiles {
                    key: key.clone(),
                    message,
                }),
        );
    }
    found
}

fn is_json(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "json")
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DownloadOutcome {
    pub messages: usize,
    pub downloaded: usize,
    pub excluded: usize,
    pub failed: usize,
    pub cancelled: bool,
}

#[derive(Debug, Clone)]
pub struct FileDownloader {
    client: SlackClient,
    layout: ExportLayout,
}

impl FileDownloader {
    pub fn new(client: SlackClient, layout: ExportLayout) -> Self {
        Self { client, layout }
    }

    /// Downloads every valid attachment of a partition, one at a time, and
    /// rewrites `files.csv` with the successful downloads.
    pub async fn resolve_and_download_files(
        &self,
        channel_type: ChannelType,
        partition: Partition,
    ) -> Result<DownloadOutcome> {
        let found = scan_messages_with_files(&self.layout, channel_type, partition);
        info!(
            channel_type = %channel_type,
            partition = %partition,
            messages = found.len(),
            "messages with files found"
        );

        let mut outcome = DownloadOutcome {
            messages: found.len(),
            ..Default::default()
        };
        let mut manifest = CsvTable::new(&MANIFEST_HEADERS);

        'messages: for MessageWithFiles { key, message } in &found {
            let files = message
                .get("files")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let selection = filter_valid_files(files);
            outcome.excluded += selection.excluded;
            if selection.valid.is_empty() {
                continue;
            }

            let files_dir = self.layout.thread_files_dir(channel_type, partition, key);
            if let Err(e) = ensure_dir(&files_dir) {
                warn!(
                    channel_id = %key.channel_id,
                    thread_ts = %key.thread_ts,
                    error = %e,
                    "cannot create files folder, skipping this message's files"
                );
                outcome.failed += selection.valid.len();
                continue;
            }
            let message_ts = message.get("ts").and_then(Value::as_str).unwrap_or(&key.thread_ts);

            for (index, file) in selection.valid.iter().enumerate() {
                if self.client.cancellation().is_cancelled() {
                    warn!(channel_type = %channel_type, "file download cancelled");
                    outcome.cancelled = true;
                    break 'messages;
                }

                let local_path =
                    files_dir.join(format!("{}_{}.{}", message_ts, index, file_extension(file)));
                match self.download_one(file, &local_path).await {
                    Ok(url) => {
                        outcome.downloaded += 1;
                        manifest.push(vec![
                            key.channel_id.clone(),
                            key.thread_ts.clone(),
                            message_ts.to_string(),
                            message.get("user").and_then(Value::as_str).unwrap_or_default().to_string(),
                            file.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
                            url,
                            local_path.display().to_string(),
                        ]);
                    }
                    Err(e) => {
                        warn!(
                            channel_id = %key.channel_id,
                            thread_ts = %key.thread_ts,
                            error = %e,
                            "file download failed"
                        );
                        outcome.failed += 1;
                    }
                }
            }
        }

        manifest.write_atomic(&self.layout.files_manifest(channel_type, partition))?;
        info!(
            channel_type = %channel_type,
            partition = %partition,
            downloaded = outcome.downloaded,
            failed = outcome.failed,
            excluded = outcome.excluded,
            "file manifest written"
        );
        Ok(outcome)
    }

    async fn download_one(&self, file: &Value, local_path: &Path) -> Result<String> {
        let url = file
            .get("url_private_download")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::Http("file has no url_private_download".to_string()))?;

        let bytes = self.client.download(url).await?;
        fs::write(local_path, &bytes).map_err(|e| AppError::WriteFile {
            path: local_path.display().to_string(),
            source: e,
        })?;
        debug!(path = %local_path.display(), bytes = bytes.len(), "file downloaded");
        Ok(url.to_string())
    }
}
