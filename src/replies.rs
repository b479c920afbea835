use serde_json::Value;
use tracing::{debug, info, warn};

use crate::layout::{ChannelType, ExportLayout, Partition, ThreadKey};
use crate::output::{CsvTable, ensure_dir, remove_if_exists, write_json};
use crate::paginate::walk_pages;
use crate::slack::SlackClient;
use crate::Result;

pub const REPLY_HEADERS: [&str; 4] = ["Channel/DM ID", "Thread TS", "Reply TS", "Reply User ID"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplyOutcome {
    pub threads: usize,
    pub replies: usize,
    /// Threads whose reply walk stopped before the last page.
    pub incomplete: Vec<ThreadKey>,
    pub cancelled: bool,
}

fn has_replies(thread: &Value) -> bool {
    thread.get("reply_count").is_some()
}

fn str_field<'v>(message: &'v Value, key: &str) -> &'v str {
    message.get(key).and_then(Value::as_str).unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct ReplyFetcher {
    client: SlackClient,
    layout: ExportLayout,
}

impl ReplyFetcher {
    pub fn new(client: SlackClient, layout: ExportLayout) -> Self {
        Self { client, layout }
    }

    /// Writes `<ts>/<ts>.json` for every thread of a channel, one thread at a
    /// time, plus `replies.csv` for threads that have replies.
    pub async fn fetch_replies(
        &self,
        channel_type: ChannelType,
        partition: Partition,
        channel_id: &str,
        threads: &[Value],
    ) -> Result<ReplyOutcome> {
        let mut outcome = ReplyOutcome::default();

        for thread in threads {
            if self.client.cancellation().is_cancelled() {
                warn!(channel_id, "reply fetch cancelled");
                outcome.cancelled = true;
                break;
            }

            let Some(thread_ts) = thread.get("ts").and_then(Value::as_str) else {
                warn!(channel_id, "thread without ts, skipping");
                continue;
            };
            let key = ThreadKey {
                channel_id: channel_id.to_string(),
                thread_ts: thread_ts.to_string(),
            };
            ensure_dir(&self.layout.thread_dir(channel_type, partition, &key))?;
            let json_path = self.layout.thread_json(channel_type, partition, &key);
            let csv_path = self.layout.replies_csv(channel_type, partition, &key);

            if !has_replies(thread) {
                write_json(&json_path, std::slice::from_ref(thread))?;
                remove_if_exists(&csv_path)?;
                debug!(channel_id, thread_ts, "thread has no replies");
                outcome.threads += 1;
                continue;
            }

            let collected = walk_pages(
                "conversations.replies",
                self.client.cancellation(),
                |cursor| self.client.conversations_replies(channel_id, thread_ts, cursor),
            )
            .await;

            if collected.items.is_empty() {
                // Keep the thread directory uniform even when the walk got nothing.
                write_json(&json_path, std::slice::from_ref(thread))?;
                remove_if_exists(&csv_path)?;
                warn!(channel_id, thread_ts, "no replies received for a thread with reply_count");
                outcome.incomplete.push(key);
                outcome.threads += 1;
                continue;
            }

            write_json(&json_path, &collected.items)?;

            let mut table = CsvTable::new(&REPLY_HEADERS);
            for reply in &collected.items {
                table.push(vec![
                    channel_id.to_string(),
                    thread_ts.to_string(),
                    str_field(reply, "ts").to_string(),
                    str_field(reply, "user").to_string(),
                ]);
            }
            table.write(&csv_path)?;

            info!(channel_id, thread_ts, replies = table.len(), "thread replies written");
            outcome.replies += table.len();
            outcome.threads += 1;
            if collected.is_partial() {
                outcome.incomplete.push(key);
            }
        }

        Ok(outcome)
    }
}
