use serde_json::Value;
use tracing::{info, warn};

use crate::Result;
use crate::layout::{ChannelType, ExportLayout, Partition};
use crate::output::{ensure_dir, write_json};
use crate::paginate::walk_pages;
use crate::replies::{ReplyFetcher, ReplyOutcome};
use crate::slack::SlackClient;

#[derive(Debug, Clone, PartialEq)]
pub struct ThreadOutcome {
    pub channel_id: String,
    pub threads: usize,
    /// False when the history walk stopped before the last page.
    pub complete: bool,
    pub replies: ReplyOutcome,
}

#[derive(Debug, Clone)]
pub struct ThreadFetcher {
    client: SlackClient,
    layout: ExportLayout,
    history_limit: u32,
    replies: ReplyFetcher,
}

impl ThreadFetcher {
    pub fn new(client: SlackClient, layout: ExportLayout, history_limit: u32) -> Self {
        let replies = ReplyFetcher::new(client.clone(), layout.clone());
        Self {
            client,
            layout,
            history_limit,
            replies,
        }
    }

    /// Walks a channel's history into `threads/<channel_id>.json`, written
    /// even when empty, then fetches the replies of every thread found.
    pub async fn fetch_threads(
        &self,
        channel_type: ChannelType,
        partition: Partition,
        channel_id: &str,
    ) -> Result<ThreadOutcome> {
        info!(channel_id, channel_type = %channel_type, partition = %partition, "fetching threads");

        let collected = walk_pages(
            "conversations.history",
            self.client.cancellation(),
            |cursor| {
                self.client
                    .conversations_history(channel_id, self.history_limit, cursor)
            },
        )
        .await;
        if collected.is_partial() {
            warn!(channel_id, received = collected.items.len(), "channel history incomplete");
        }

        ensure_dir(&self.layout.threads_dir(channel_type, partition))?;
        ensure_dir(&self.layout.messages_dir(channel_type, partition))?;
        write_json(
            &self.layout.threads_json(channel_type, partition, channel_id),
            &collected.items,
        )?;

        let replies = if collected.items.is_empty() {
            ReplyOutcome::default()
        } else {
            self.replies
                .fetch_replies(channel_type, partition, channel_id, &collected.items)
                .await?
        };

        info!(channel_id, threads = collected.items.len(), replies = replies.replies, "channel done");
        Ok(ThreadOutcome {
            channel_id: channel_id.to_string(),
            threads: collected.items.len(),
            complete: collected.complete,
            replies,
        })
    }
}
