//! On-disk layout of an export.
//!
//! The viewer reads this tree verbatim, so every path the pipeline writes is
//! computed here and nowhere else:
//!
//! ```text
//! json_data/
//!   users/{users,active_users,delete_users,bot_users}.json + csv
//!   <type root>/
//!     archiveList.json  unArchiveList.json  archiveList.csv  unArchiveList.csv
//!     archive|unarchive/
//!       threads/<channelId>.json
//!       messages/<channelId>/<threadTs>/<threadTs>.json
//!       messages/<channelId>/<threadTs>/replies.csv
//!       messages/<channelId>/<threadTs>/files/<messageTs>_<n>.<ext>
//!       files.csv
//!       export_report.json
//!   <label>.zip
//!   <label>_split_zipfiles/<label>_part_NNN
//! ```

use std::fmt;
use std::path::{Component, Path, PathBuf};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

const THREADS: &str = "threads";
const MESSAGES: &str = "messages";
const FILES: &str = "files";
const USERS: &str = "users";

/// The four conversation kinds Slack's `conversations.list` can filter by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
pub enum ChannelType {
    #[value(name = "public_channel", alias = "public")]
    #[serde(rename = "public_channel")]
    PublicChannel,
    #[value(name = "private_channel", alias = "private")]
    #[serde(rename = "private_channel")]
    PrivateChannel,
    #[value(name = "im", alias = "direct_message")]
    #[serde(rename = "im")]
    DirectMessage,
    #[value(name = "mpim", alias = "multi_direct_message")]
    #[serde(rename = "mpim")]
    MultiDirectMessage,
}

impl ChannelType {
    pub fn all() -> [ChannelType; 4] {
        [
            ChannelType::DirectMessage,
            ChannelType::MultiDirectMessage,
            ChannelType::PrivateChannel,
            ChannelType::PublicChannel,
        ]
    }

    /// Value of the `types` parameter of `conversations.list`.
    pub fn api_name(&self) -> &'static str {
        match self {
            ChannelType::PublicChannel => "public_channel",
            ChannelType::PrivateChannel => "private_channel",
            ChannelType::DirectMessage => "im",
            ChannelType::MultiDirectMessage => "mpim",
        }
    }

    pub fn from_api_name(name: &str) -> Option<Self> {
        Self::all().into_iter().find(|t| t.api_name() == name)
    }

    /// Root folder of this type, relative to the export root.
    pub fn root_path(&self) -> &'static str {
        match self {
            ChannelType::PublicChannel => "channels/public_channels",
            ChannelType::PrivateChannel => "channels/private_channels",
            ChannelType::DirectMessage => "direct_message",
            ChannelType::MultiDirectMessage => "multi_direct_message",
        }
    }

    /// Name used for the zip archive and its split parts.
    pub fn archive_label(&self) -> &'static str {
        match self {
            ChannelType::PublicChannel => "public_channel",
            ChannelType::PrivateChannel => "private_channel",
            ChannelType::DirectMessage => "direct_message",
            ChannelType::MultiDirectMessage => "multi_direct_message",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ChannelType::PublicChannel => "Public Channels",
            ChannelType::PrivateChannel => "Private Channels",
            ChannelType::DirectMessage => "Direct Messages",
            ChannelType::MultiDirectMessage => "Multi Direct Messages (Groups)",
        }
    }

    /// Direct messages have a single counterpart instead of a member list.
    pub fn is_direct_message(&self) -> bool {
        matches!(self, ChannelType::DirectMessage)
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.api_name())
    }
}

/// Archived/unarchived split fixed at listing time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Partition {
    Archive,
    Unarchive,
}

impl Partition {
    pub fn from_archived(is_archived: bool) -> Self {
        if is_archived {
            Partition::Archive
        } else {
            Partition::Unarchive
        }
    }

    pub fn is_archived(&self) -> bool {
        matches!(self, Partition::Archive)
    }

    pub fn folder(&self) -> &'static str {
        match self {
            Partition::Archive => "archive",
            Partition::Unarchive => "unarchive",
        }
    }

    fn list_stem(&self) -> &'static str {
        match self {
            Partition::Archive => "archiveList",
            Partition::Unarchive => "unArchiveList",
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.folder())
    }
}

/// Identity of a thread directory: `messages/<channel_id>/<thread_ts>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadKey {
    pub channel_id: String,
    pub thread_ts: String,
}

#[derive(Debug, Clone)]
pub struct ExportLayout {
    root: PathBuf,
}

impl ExportLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn users_dir(&self) -> PathBuf {
        self.root.join(USERS)
    }

    pub fn users_json(&self) -> PathBuf {
        self.users_dir().join("users.json")
    }

    pub fn users_zip(&self) -> PathBuf {
        self.root.join("users.zip")
    }

    pub fn type_root(&self, channel_type: ChannelType) -> PathBuf {
        self.root.join(channel_type.root_path())
    }

    pub fn list_json(&self, channel_type: ChannelType, partition: Partition) -> PathBuf {
        self.type_root(channel_type)
            .join(format!("{}.json", partition.list_stem()))
    }

    pub fn list_csv(&self, channel_type: ChannelType, partition: Partition) -> PathBuf {
        self.type_root(channel_type)
            .join(format!("{}.csv", partition.list_stem()))
    }

    pub fn partition_dir(&self, channel_type: ChannelType, partition: Partition) -> PathBuf {
        self.type_root(channel_type).join(partition.folder())
    }

    pub fn threads_dir(&self, channel_type: ChannelType, partition: Partition) -> PathBuf {
        self.partition_dir(channel_type, partition).join(THREADS)
    }

    pub fn threads_json(
        &self,
        channel_type: ChannelType,
        partition: Partition,
        channel_id: &str,
    ) -> PathBuf {
        self.threads_dir(channel_type, partition)
            .join(format!("{}.json", channel_id))
    }

    pub fn messages_dir(&self, channel_type: ChannelType, partition: Partition) -> PathBuf {
        self.partition_dir(channel_type, partition).join(MESSAGES)
    }

    pub fn channel_messages_dir(
        &self,
        channel_type: ChannelType,
        partition: Partition,
        channel_id: &str,
    ) -> PathBuf {
        self.messages_dir(channel_type, partition).join(channel_id)
    }

    pub fn thread_dir(
        &self,
        channel_type: ChannelType,
        partition: Partition,
        key: &ThreadKey,
    ) -> PathBuf {
        self.channel_messages_dir(channel_type, partition, &key.channel_id)
            .join(&key.thread_ts)
    }

    pub fn thread_json(
        &self,
        channel_type: ChannelType,
        partition: Partition,
        key: &ThreadKey,
    ) -> PathBuf {
        self.thread_dir(channel_type, partition, key)
            .join(format!("{}.json", key.thread_ts))
    }

    pub fn replies_csv(
        &self,
        channel_type: ChannelType,
        partition: Partition,
        key: &ThreadKey,
    ) -> PathBuf {
        self.thread_dir(channel_type, partition, key)
            .join("replies.csv")
    }

    pub fn thread_files_dir(
        &self,
        channel_type: ChannelType,
        partition: Partition,
        key: &ThreadKey,
    ) -> PathBuf {
        self.thread_dir(channel_type, partition, key).join(FILES)
    }

    pub fn files_manifest(&self, channel_type: ChannelType, partition: Partition) -> PathBuf {
        self.partition_dir(channel_type, partition).join("files.csv")
    }

    pub fn report_json(&self, channel_type: ChannelType, partition: Partition) -> PathBuf {
        self.partition_dir(channel_type, partition)
            .join("export_report.json")
    }

    pub fn archive_zip(&self, label: &str) -> PathBuf {
        self.root.join(format!("{}.zip", label))
    }

    /// Inverse of [`ExportLayout::thread_json`]: recovers the thread identity
    /// of a message file found under the messages folder.
    ///
    /// Returns `None` unless the path has exactly the
    /// `<channel_id>/<thread_ts>/<thread_ts>.json` shape.
    pub fn thread_key(
        &self,
        channel_type: ChannelType,
        partition: Partition,
        message_file: &Path,
    ) -> Option<ThreadKey> {
        let messages_dir = self.messages_dir(channel_type, partition);
        let relative = message_file.strip_prefix(&messages_dir).ok()?;

        let mut parts = relative.components().map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        });
        let channel_id = parts.next()??;
        let thread_ts = parts.next()??;
        let file_name = parts.next()??;
        if parts.next().is_some() {
            return None;
        }

        let stem = file_name.strip_suffix(".json")?;
        if stem != thread_ts {
            return None;
        }

        Some(ThreadKey {
            channel_id: channel_id.to_string(),
            thread_ts: thread_ts.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> ExportLayout {
        ExportLayout::new("/data/json_data")
    }

    fn key(channel_id: &str, ts: &str) -> ThreadKey {
        ThreadKey {
            channel_id: channel_id.to_string(),
            thread_ts: ts.to_string(),
        }
    }

    #[test]
    fn test_channel_type_api_names_round_trip() {
        for channel_type in ChannelType::all() {
            assert_eq!(
                ChannelType::from_api_name(channel_type.api_name()),
                Some(channel_type)
            );
        }
        assert_eq!(ChannelType::from_api_name("unknown"), None);
    }

    #[test]
    fn test_type_roots() {
        let layout = layout();
        assert_eq!(
            layout.type_root(ChannelType::PublicChannel),
            PathBuf::from("/data/json_data/channels/public_channels")
        );
        assert_eq!(
            layout.type_root(ChannelType::DirectMessage),
            PathBuf::from("/data/json_data/direct_message")
        );
    }

    #[test]
    fn test_list_files() {
        let layout = layout();
        assert!(layout
            .list_json(ChannelType::DirectMessage, Partition::Archive)
            .ends_with("direct_message/archiveList.json"));
        assert!(layout
            .list_json(ChannelType::DirectMessage, Partition::Unarchive)
            .ends_with("direct_message/unArchiveList.json"));
        assert!(layout
            .list_csv(ChannelType::MultiDirectMessage, Partition::Unarchive)
            .ends_with("multi_direct_message/unArchiveList.csv"));
    }

    #[test]
    fn test_partition_subtree() {
        let layout = layout();
        let ct = ChannelType::PrivateChannel;
        let k = key("C123", "1700000000.000100");

        assert!(layout
            .threads_json(ct, Partition::Archive, "C123")
            .ends_with("private_channels/archive/threads/C123.json"));
        assert!(layout
            .thread_json(ct, Partition::Unarchive, &k)
            .ends_with("unarchive/messages/C123/1700000000.000100/1700000000.000100.json"));
        assert!(layout
            .replies_csv(ct, Partition::Unarchive, &k)
            .ends_with("messages/C123/1700000000.000100/replies.csv"));
        assert!(layout
            .thread_files_dir(ct, Partition::Unarchive, &k)
            .ends_with("messages/C123/1700000000.000100/files"));
        assert!(layout
            .files_manifest(ct, Partition::Archive)
            .ends_with("private_channels/archive/files.csv"));
    }

    #[test]
    fn test_archive_paths() {
        let layout = layout();
        assert_eq!(
            layout.archive_zip("direct_message"),
            PathBuf::from("/data/json_data/direct_message.zip")
        );
        assert_eq!(
            layout.users_zip(),
            PathBuf::from("/data/json_data/users.zip")
        );
    }

    #[test]
    fn test_thread_key_inverts_thread_json() {
        let layout = layout();
        let ct = ChannelType::MultiDirectMessage;
        let k = key("G42", "1699999999.123456");

        let path = layout.thread_json(ct, Partition::Archive, &k);
        assert_eq!(layout.thread_key(ct, Partition::Archive, &path), Some(k));
    }

    #[test]
    fn test_thread_key_rejects_other_shapes() {
        let layout = layout();
        let ct = ChannelType::PublicChannel;
        let messages = layout.messages_dir(ct, Partition::Unarchive);

        assert_eq!(
            layout.thread_key(ct, Partition::Unarchive, &messages.join("C1/1.0/2.0.json")),
            None
        );
        assert_eq!(
            layout.thread_key(ct, Partition::Unarchive, &messages.join("C1/1.0.json")),
            None
        );
        assert_eq!(
            layout.thread_key(ct, Partition::Unarchive, &messages.join("C1/1.0/files/1.0.json")),
            None
        );
        // Same file, wrong partition.
        assert_eq!(
            layout.thread_key(ct, Partition::Archive, &messages.join("C1/1.0/1.0.json")),
            None
        );
    }

    #[test]
    fn test_partition_from_archived() {
        assert_eq!(Partition::from_archived(true), Partition::Archive);
        assert_eq!(Partition::from_archived(false), Partition::Unarchive);
        assert!(Partition::Archive.is_archived());
        assert_eq!(Partition::Unarchive.to_string(), "unarchive");
    }
}
