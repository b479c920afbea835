use std::path::Path;

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::layout::{ChannelType, ExportLayout, Partition};
use crate::output::{CsvTable, StagedFiles};
use crate::paginate::walk_pages;
use crate::slack::SlackClient;
use crate::users::{UserDirectory, user_real_name};
use crate::{AppError, Result};

const DM_HEADERS: [&str; 4] = ["DM ID", "Slack User ID", "Slack User Name", "Slack Bot"];
const MEMBER_HEADERS: [&str; 3] = ["Channel ID", "Slack User IDs", "Slack User Names"];

#[derive(Debug, Clone, Serialize)]
pub struct ListingSummary {
    pub channel_type: ChannelType,
    pub archived: usize,
    pub unarchived: usize,
    pub pages: usize,
}

impl ListingSummary {
    pub fn total(&self) -> usize {
        self.archived + self.unarchived
    }
}

/// Channels of one partition, with the CSV row resolved for each.
struct PartitionedList {
    channels: Vec<Value>,
    table: CsvTable,
}

impl PartitionedList {
    fn new(headers: &[&'static str]) -> Self {
        Self {
            channels: Vec::new(),
            table: CsvTable::new(headers),
        }
    }

    fn stage(&self, staged: &mut StagedFiles, json_path: &Path, csv_path: &Path) -> Result<()> {
        staged.json(json_path, &self.channels)?;
        if self.table.is_empty() {
            staged.remove(csv_path);
            Ok(())
        } else {
            staged.csv(csv_path, &self.table)
        }
    }
}

pub struct ChannelLister<'a> {
    client: &'a SlackClient,
    users: &'a UserDirectory,
    layout: &'a ExportLayout,
    list_limit: u32,
}

impl<'a> ChannelLister<'a> {
    pub fn new(
        client: &'a SlackClient,
        users: &'a UserDirectory,
        layout: &'a ExportLayout,
        list_limit: u32,
    ) -> Self {
        Self {
            client,
            users,
            layout,
            list_limit,
        }
    }

    /// Lists every conversation of `channel_type` and replaces the
    /// archived/unarchived lists and their CSV summaries.
    ///
    /// Nothing is written unless the listing and every member lookup
    /// succeeded, so a failed run leaves the previous lists in place.
    pub async fn list_channels(&self, channel_type: ChannelType) -> Result<ListingSummary> {
        info!(channel_type = %channel_type, "listing channels");

        let collected = walk_pages(
            "conversations.list",
            self.client.cancellation(),
            |cursor| {
                self.client
                    .conversations_list(channel_type.api_name(), self.list_limit, cursor)
            },
        )
        .await;
        if collected.is_partial() {
            return Err(AppError::IncompleteListing(channel_type.to_string()));
        }

        let headers: &[&'static str] = if channel_type.is_direct_message() {
            &DM_HEADERS
        } else {
            &MEMBER_HEADERS
        };
        let mut archived = PartitionedList::new(headers);
        let mut unarchived = PartitionedList::new(headers);

        for channel in collected.items {
            if self.client.cancellation().is_cancelled() {
                return Err(AppError::Cancelled);
            }

            let row = if channel_type.is_direct_message() {
                self.direct_message_row(&channel).await?
            } else {
                self.member_row(&channel).await?
            };

            let is_archived = channel
                .get("is_archived")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let target = match Partition::from_archived(is_archived) {
                Partition::Archive => &mut archived,
                Partition::Unarchive => &mut unarchived,
            };
            target.table.push(row);
            target.channels.push(channel);
        }

        let mut staged = StagedFiles::new();
        archived.stage(
            &mut staged,
            &self.layout.list_json(channel_type, Partition::Archive),
            &self.layout.list_csv(channel_type, Partition::Archive),
        )?;
        unarchived.stage(
            &mut staged,
            &self.layout.list_json(channel_type, Partition::Unarchive),
            &self.layout.list_csv(channel_type, Partition::Unarchive),
        )?;
        staged.commit()?;

        let summary = ListingSummary {
            channel_type,
            archived: archived.channels.len(),
            unarchived: unarchived.channels.len(),
            pages: collected.pages,
        };
        info!(
            channel_type = %channel_type,
            archived = summary.archived,
            unarchived = summary.unarchived,
            "channel lists written"
        );
        Ok(summary)
    }

    async fn direct_message_row(&self, channel: &Value) -> Result<Vec<String>> {
        let channel_id = channel_id(channel)?;
        let user_id = channel
            .get("user")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::SlackApi(format!("im {} has no user", channel_id)))?;
        let user = self.users.get_user_info(user_id).await?;
        let is_bot = user.get("is_bot").and_then(Value::as_bool).unwrap_or(false);

        Ok(vec![
            channel_id.to_string(),
            user_id.to_string(),
            user_real_name(&user),
            is_bot.to_string(),
        ])
    }

    async fn member_row(&self, channel: &Value) -> Result<Vec<String>> {
        let channel_id = channel_id(channel)?;
        let members = walk_pages(
            "conversations.members",
            self.client.cancellation(),
            |cursor| self.client.conversations_members(channel_id, cursor),
        )
        .await;
        if members.is_partial() {
            return Err(AppError::IncompleteListing(format!(
                "members of {}",
                channel_id
            )));
        }

        let ids: Vec<&str> = members.items.iter().filter_map(Value::as_str).collect();
        let names: Vec<String> = ids
            .iter()
            .filter_map(|id| match self.users.lookup_user_locally(id) {
                Some(user) => Some(user_real_name(&user)),
                None => {
                    warn!(channel_id, user_id = id, "member not found in users.json");
                    None
                }
            })
            .collect();

        Ok(vec![channel_id.to_string(), ids.join(","), names.join(",")])
    }
}

fn channel_id(channel: &Value) -> Result<&str> {
    channel
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::SlackApi("conversation without id".to_string()))
}
