//! Read-only viewer logic over an export tree.
//!
//! Loads the user list and every channel list once, then renders HTML pages
//! straight from the on-disk layout. The HTTP layer lives in the
//! `slack-archive-viewer` binary; everything here is testable without a
//! server.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::DateTime;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::files::{file_extension, filter_valid_files};
use crate::layout::{ChannelType, ExportLayout, Partition};
use crate::output::read_json;
use crate::{AppError, Result};

const UNKNOWN_USER: &str = "Unknown User";

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host address to bind to (e.g., "127.0.0.1" or "0.0.0.0")
    pub host: String,
    /// Port to listen on
    pub port: u16,
}

/// Export tree configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SlackArchiveConfig {
    /// Folder the exporter wrote to (the `json_data` folder)
    #[serde(rename = "base-path")]
    pub base_path: String,
}

/// Complete viewer configuration file structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(rename = "slack-archive")]
    pub slack_archive: SlackArchiveConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| AppError::ReadFile {
            path: path.display().to_string(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| AppError::TomlParse(e.to_string()))
    }
}

/// Messages of one thread directory.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageGroup {
    pub name: String,
    pub messages: Vec<Value>,
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// `:shortcode:` to its emoji, honoring `::skin-tone-N` suffixes.
fn emoji_for(name: &str) -> Option<String> {
    let mut parts = name.split("::skin-tone-");
    let emoji = emojis::get_by_shortcode(parts.next()?)?;
    let Some(tone) = parts.next().and_then(|s| s.parse::<usize>().ok()) else {
        return Some(emoji.to_string());
    };
    let skinned = emoji
        .skin_tones()
        .and_then(|mut tones| tones.nth(tone.checked_sub(1)?));
    Some(skinned.unwrap_or(emoji).to_string())
}

/// Slack message text → HTML.
///
/// Slack already escapes `&`, `<` and `>` in message text, so the remaining
/// angle-bracket sequences are its own markup.
#[derive(Debug, Clone)]
pub struct MessageFormatter {
    mention: Regex,
    code_block: Regex,
    inline_code: Regex,
    link: Regex,
    bold: Regex,
    emoji: Regex,
}

impl MessageFormatter {
    pub fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| AppError::InvalidSettings(format!("{}: {}", pattern, e)))
        };
        Ok(Self {
            mention: compile(r"<@([A-Z0-9]+)>")?,
            code_block: compile(r"(?s)```(.+?)```")?,
            inline_code: compile(r"`([^\n`]+)`")?,
            link: compile(r"<(https?://[^>]+)>")?,
            bold: compile(r"\*([^*]+)\*")?,
            emoji: compile(r":([a-z0-9_+\-]+(?:::skin-tone-[1-6])?):")?,
        })
    }

    pub fn format<F>(&self, text: &str, user_name: F) -> String
    where
        F: Fn(&str) -> String,
    {
        let text = self.mention.replace_all(text, |caps: &Captures| {
            format!(
                "<span class=\"mention\">@{}</span>",
                escape_html(&user_name(&caps[1]))
            )
        });
        let text = self
            .code_block
            .replace_all(&text, |caps: &Captures| format!("<pre>{}</pre>", &caps[1]));
        let text = self
            .inline_code
            .replace_all(&text, |caps: &Captures| format!("<code>{}</code>", &caps[1]));
        let text = self.link.replace_all(&text, |caps: &Captures| {
            let (url, title) = match caps[1].split_once('|') {
                Some((url, title)) if !title.is_empty() => (url.to_string(), title.to_string()),
                Some((url, _)) => (url.to_string(), url.to_string()),
                None => (caps[1].to_string(), caps[1].to_string()),
            };
            format!(
                "<a target=\"_blank\" href=\"{}\">{}</a>",
                escape_html(&url),
                escape_html(&title)
            )
        });
        let text = self
            .bold
            .replace_all(&text, |caps: &Captures| format!("<strong>{}</strong>", &caps[1]));
        let text = self.emoji.replace_all(&text, |caps: &Captures| {
            emoji_for(&caps[1]).unwrap_or_else(|| caps[0].to_string())
        });
        text.into_owned()
    }
}

#[derive(Debug, Clone)]
pub struct ViewerService {
    layout: ExportLayout,
    users: HashMap<String, Value>,
    channels: HashMap<ChannelType, Vec<Value>>,
    formatter: MessageFormatter,
}

fn read_list_or_empty(path: &Path) -> Vec<Value> {
    match read_json(path) {
        Ok(list) => list,
        Err(e) => {
            warn!(error = %e, "list unavailable, showing it as empty");
            Vec::new()
        }
    }
}

fn format_ts(ts: &str) -> String {
    let (secs, fraction) = ts.split_once('.').unwrap_or((ts, ""));
    let Ok(secs) = secs.parse::<i64>() else {
        return ts.to_string();
    };
    let micros: u32 = format!("{:0<6}", fraction)
        .get(..6)
        .and_then(|m| m.parse().ok())
        .unwrap_or(0);
    DateTime::from_timestamp(secs, micros * 1000)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn str_field<'v>(value: &'v Value, key: &str) -> Option<&'v str> {
    value.get(key).and_then(Value::as_str)
}

impl ViewerService {
    /// Reads `users/users.json` and, per type, the unarchived then archived
    /// lists. Missing files count as empty.
    pub fn load(base_path: impl Into<PathBuf>) -> Result<Self> {
        let layout = ExportLayout::new(base_path);

        let users = read_list_or_empty(&layout.users_json())
            .into_iter()
            .filter_map(|u| Some((str_field(&u, "id")?.to_string(), u)))
            .collect();

        let channels = ChannelType::all()
            .into_iter()
            .map(|ct| {
                let mut list = read_list_or_empty(&layout.list_json(ct, Partition::Unarchive));
                list.extend(read_list_or_empty(&layout.list_json(ct, Partition::Archive)));
                (ct, list)
            })
            .collect();

        Ok(Self {
            layout,
            users,
            channels,
            formatter: MessageFormatter::new()?,
        })
    }

    pub fn base_path(&self) -> &Path {
        self.layout.root()
    }

    pub fn channels(&self, channel_type: ChannelType) -> &[Value] {
        self.channels
            .get(&channel_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn find_channel(&self, channel_type: ChannelType, channel_id: &str) -> Option<&Value> {
        self.channels(channel_type)
            .iter()
            .find(|c| str_field(c, "id") == Some(channel_id))
    }

    /// `profile.display_name`, then `real_name`, then `name`.
    pub fn user_name(&self, user_id: &str) -> String {
        let Some(user) = self.users.get(user_id) else {
            return UNKNOWN_USER.to_string();
        };
        user.get("profile")
            .and_then(|p| str_field(p, "display_name"))
            .filter(|s| !s.is_empty())
            .or_else(|| str_field(user, "real_name").filter(|s| !s.is_empty()))
            .or_else(|| str_field(user, "name"))
            .unwrap_or(UNKNOWN_USER)
            .to_string()
    }

    pub fn channel_name(&self, channel_type: ChannelType, channel: &Value) -> String {
        match channel_type {
            ChannelType::PublicChannel | ChannelType::PrivateChannel => {
                format!("#{}", str_field(channel, "name").unwrap_or_default())
            }
            ChannelType::DirectMessage => {
                self.user_name(str_field(channel, "user").unwrap_or_default())
            }
            ChannelType::MultiDirectMessage => channel
                .get("purpose")
                .and_then(|p| str_field(p, "value"))
                .filter(|s| !s.is_empty())
                .or_else(|| str_field(channel, "name"))
                .unwrap_or_default()
                .to_string(),
        }
    }

    fn partition_of(channel: &Value) -> Partition {
        Partition::from_archived(
            channel
                .get("is_archived")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        )
    }

    /// One group per thread directory, in directory name order, each holding
    /// the messages of every `.json` file in it.
    pub fn message_groups(&self, channel_type: ChannelType, channel_id: &str) -> Vec<MessageGroup> {
        let Some(channel) = self.find_channel(channel_type, channel_id) else {
            return Vec::new();
        };
        let channel_dir = self.layout.channel_messages_dir(
            channel_type,
            Self::partition_of(channel),
            channel_id,
        );

        let mut thread_dirs = sorted_entries(&channel_dir);
        thread_dirs.retain(|p| p.is_dir());

        thread_dirs
            .into_iter()
            .map(|dir| {
                let name = dir
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let messages = sorted_entries(&dir)
                    .into_iter()
                    .filter(|p| p.is_file() && p.extension().is_some_and(|e| e == "json"))
                    .flat_map(|p| read_list_or_empty(&p))
                    .collect();
                MessageGroup { name, messages }
            })
            .collect()
    }

    pub fn format_message(&self, text: &str) -> String {
        self.formatter.format(text, |id| self.user_name(id))
    }

    pub fn render_index(&self) -> String {
        let mut body = String::from("<ul class=\"types\">\n");
        for ct in ChannelType::all() {
            let _ = writeln!(
                body,
                "<li><a href=\"/list/{}\">{}</a> ({})</li>",
                ct.api_name(),
                ct.display_name(),
                self.channels(ct).len()
            );
        }
        body.push_str("</ul>\n");
        page("Home", &[], &body)
    }

    pub fn render_channel_list(&self, channel_type: ChannelType) -> String {
        let mut body = format!("<p>{} conversations</p>\n<ul class=\"channels\">\n", self.channels(channel_type).len());
        for channel in self.channels(channel_type) {
            let id = str_field(channel, "id").unwrap_or_default();
            let archived = if Self::partition_of(channel).is_archived() {
                " <em>(archived)</em>"
            } else {
                ""
            };
            let _ = writeln!(
                body,
                "<li><a href=\"/list/{}/channel/{}\">{}</a>{}</li>",
                channel_type.api_name(),
                escape_html(id),
                escape_html(&self.channel_name(channel_type, channel)),
                archived
            );
        }
        body.push_str("</ul>\n");
        page(
            channel_type.display_name(),
            &[(format!("/list/{}", channel_type.api_name()), channel_type.display_name().to_string())],
            &body,
        )
    }

    /// `None` when the channel is not in the loaded lists.
    pub fn render_channel(&self, channel_type: ChannelType, channel_id: &str) -> Option<String> {
        let channel = self.find_channel(channel_type, channel_id)?;
        let title = self.channel_name(channel_type, channel);
        let partition = Self::partition_of(channel);
        let groups = self.message_groups(channel_type, channel_id);
        let count: usize = groups.iter().map(|g| g.messages.len()).sum();

        let mut body = format!("<p>{} messages</p>\n", count);
        for group in &groups {
            let _ = writeln!(body, "<section class=\"thread\" id=\"{}\">", escape_html(&group.name));
            for message in &group.messages {
                self.render_message(&mut body, channel_type, partition, channel_id, &group.name, message);
            }
            body.push_str("</section>\n");
        }

        Some(page(
            &title,
            &[
                (format!("/list/{}", channel_type.api_name()), channel_type.display_name().to_string()),
                (
                    format!("/list/{}/channel/{}", channel_type.api_name(), channel_id),
                    title.clone(),
                ),
            ],
            &body,
        ))
    }

    fn render_message(
        &self,
        body: &mut String,
        channel_type: ChannelType,
        partition: Partition,
        channel_id: &str,
        thread_ts: &str,
        message: &Value,
    ) {
        let ts = str_field(message, "ts").unwrap_or_default();
        let author = match str_field(message, "user") {
            Some(user_id) => self.user_name(user_id),
            None => str_field(message, "username").unwrap_or(UNKNOWN_USER).to_string(),
        };
        let _ = writeln!(
            body,
            "<div class=\"message\"><span class=\"author\">{}</span> <span class=\"ts\">{}</span>\n<div class=\"text\">{}</div>",
            escape_html(&author),
            format_ts(ts),
            self.format_message(str_field(message, "text").unwrap_or_default())
        );

        let files = message
            .get("files")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let valid = filter_valid_files(files).valid;
        if !valid.is_empty() {
            body.push_str("<ul class=\"files\">\n");
            for (index, file) in valid.iter().enumerate() {
                let href = format!(
                    "/json_data/{}/{}/messages/{}/{}/files/{}_{}.{}",
                    channel_type.root_path(),
                    partition.folder(),
                    channel_id,
                    thread_ts,
                    ts,
                    index,
                    file_extension(file)
                );
                let name = str_field(file, "name").or_else(|| str_field(file, "id")).unwrap_or_default();
                let _ = writeln!(
                    body,
                    "<li><a target=\"_blank\" href=\"{}\">{}</a></li>",
                    escape_html(&href),
                    escape_html(name)
                );
            }
            body.push_str("</ul>\n");
        }
        body.push_str("</div>\n");
    }
}

fn sorted_entries(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut paths: Vec<PathBuf> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
    paths.sort();
    paths
}

fn page(title: &str, breadcrumbs: &[(String, String)], body: &str) -> String {
    let mut nav = String::from("<a href=\"/\">Home</a>");
    for (href, text) in breadcrumbs {
        let _ = write!(nav, " / <a href=\"{}\">{}</a>", escape_html(href), escape_html(text));
    }
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{title}</title>\n</head>\n<body>\n<nav>{nav}</nav>\n<h1>{title}</h1>\n{body}</body>\n</html>\n",
        title = escape_html(title),
        nav = nav,
        body = body
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::ThreadKey;
    use crate::output::write_json;
    use serde_json::json;
    use tempfile::tempdir;

    fn fixture() -> (tempfile::TempDir, ViewerService) {
        let dir = tempdir().unwrap();
        let layout = ExportLayout::new(dir.path());
        write_json(
            &layout.users_json(),
            &json!([
                {"id": "U1", "name": "ada", "real_name": "Ada Lovelace", "profile": {"display_name": "ada.l"}},
                {"id": "U2", "name": "grace", "real_name": "Grace Hopper", "profile": {"display_name": ""}},
                {"id": "U3", "name": "linus", "profile": {}}
            ]),
        )
        .unwrap();
        let public = ChannelType::PublicChannel;
        write_json(
            &layout.list_json(public, Partition::Unarchive),
            &json!([{"id": "C1", "name": "general", "is_archived": false}]),
        )
        .unwrap();
        write_json(
            &layout.list_json(public, Partition::Archive),
            &json!([{"id": "C0", "name": "old", "is_archived": true}]),
        )
        .unwrap();
        write_json(
            &layout.list_json(ChannelType::DirectMessage, Partition::Unarchive),
            &json!([{"id": "D1", "user": "U2", "is_archived": false}]),
        )
        .unwrap();
        write_json(
            &layout.list_json(ChannelType::MultiDirectMessage, Partition::Unarchive),
            &json!([
                {"id": "G1", "name": "mpdm-a--b", "purpose": {"value": "Group chat"}},
                {"id": "G2", "name": "mpdm-c--d", "purpose": {"value": ""}}
            ]),
        )
        .unwrap();

        for (ts, messages) in [
            ("100.000000", json!([{"ts": "100.000000", "user": "U1", "text": "hello <@U2>"}])),
            (
                "200.000000",
                json!([
                    {"ts": "200.000000", "user": "U2", "text": "first", "files": [
                        {"id": "F1", "name": "plot.png", "filetype": "png"},
                        {"id": "F2", "mode": "tombstone"}
                    ]},
                    {"ts": "200.500000", "user": "U9", "text": "reply"}
                ]),
            ),
        ] {
            let key = ThreadKey {
                channel_id: "C1".to_string(),
                thread_ts: ts.to_string(),
            };
            write_json(&layout.thread_json(public, Partition::Unarchive, &key), &messages).unwrap();
        }

        let service = ViewerService::load(dir.path()).unwrap();
        (dir, service)
    }

    #[test]
    fn test_config_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("viewer.toml");
        fs::write(
            &path,
            "[server]\nhost = \"127.0.0.1\"\nport = 3000\n\n[slack-archive]\nbase-path = \"json_data\"\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.slack_archive.base_path, "json_data");
    }

    #[test]
    fn test_config_missing_section() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("viewer.toml");
        fs::write(&path, "[server]\nhost = \"0.0.0.0\"\nport = 80\n").unwrap();

        assert!(matches!(Config::from_file(&path), Err(AppError::TomlParse(_))));
    }

    #[test]
    fn test_load_orders_unarchived_before_archived() {
        let (_dir, service) = fixture();
        let ids: Vec<&str> = service
            .channels(ChannelType::PublicChannel)
            .iter()
            .map(|c| c["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["C1", "C0"]);
        assert!(service.channels(ChannelType::PrivateChannel).is_empty());
    }

    #[test]
    fn test_user_name_fallbacks() {
        let (_dir, service) = fixture();
        assert_eq!(service.user_name("U1"), "ada.l");
        assert_eq!(service.user_name("U2"), "Grace Hopper");
        assert_eq!(service.user_name("U3"), "linus");
        assert_eq!(service.user_name("U404"), "Unknown User");
    }

    #[test]
    fn test_channel_names_per_type() {
        let (_dir, service) = fixture();
        let general = service.find_channel(ChannelType::PublicChannel, "C1").unwrap();
        assert_eq!(service.channel_name(ChannelType::PublicChannel, general), "#general");

        let dm = service.find_channel(ChannelType::DirectMessage, "D1").unwrap();
        assert_eq!(service.channel_name(ChannelType::DirectMessage, dm), "Grace Hopper");

        let mpim = ChannelType::MultiDirectMessage;
        let g1 = service.find_channel(mpim, "G1").unwrap();
        assert_eq!(service.channel_name(mpim, g1), "Group chat");
        let g2 = service.find_channel(mpim, "G2").unwrap();
        assert_eq!(service.channel_name(mpim, g2), "mpdm-c--d");
    }

    #[test]
    fn test_message_groups_follow_thread_dirs() {
        let (_dir, service) = fixture();
        let groups = service.message_groups(ChannelType::PublicChannel, "C1");

        let names: Vec<&str> = groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["100.000000", "200.000000"]);
        assert_eq!(groups[1].messages.len(), 2);
        assert!(service.message_groups(ChannelType::PublicChannel, "C404").is_empty());
    }

    #[test]
    fn test_format_message() {
        let formatter = MessageFormatter::new().unwrap();
        let name = |id: &str| if id == "U1" { "Ada".to_string() } else { "Unknown User".to_string() };

        assert_eq!(
            formatter.format("hi <@U1>", name),
            "hi <span class=\"mention\">@Ada</span>"
        );
        assert_eq!(formatter.format("```let x = 1;```", name), "<pre>let x = 1;</pre>");
        assert_eq!(formatter.format("run `ls`", name), "run <code>ls</code>");
        assert_eq!(
            formatter.format("see <https://example.com|docs>", name),
            "see <a target=\"_blank\" href=\"https://example.com\">docs</a>"
        );
        assert_eq!(
            formatter.format("<https://example.com>", name),
            "<a target=\"_blank\" href=\"https://example.com\">https://example.com</a>"
        );
        assert_eq!(
            formatter.format("<https://example.com/a\"onmouseover=\"x|click>", name),
            "<a target=\"_blank\" href=\"https://example.com/a&quot;onmouseover=&quot;x\">click</a>"
        );
        assert_eq!(formatter.format("*bold*", name), "<strong>bold</strong>");
        assert_eq!(formatter.format("ok :thumbsup:", name), "ok 👍");
        assert_eq!(formatter.format(":not_an_emoji_name:", name), ":not_an_emoji_name:");
    }

    #[test]
    fn test_emoji_skin_tone() {
        assert_eq!(emoji_for("wave").as_deref(), Some("👋"));
        assert_eq!(emoji_for("wave::skin-tone-2").as_deref(), Some("👋🏻"));
        assert_eq!(emoji_for("nope_nope"), None);
    }

    #[test]
    fn test_format_ts() {
        assert_eq!(format_ts("0.000000"), "1970-01-01 00:00:00 UTC");
        assert_eq!(format_ts("1700000000.000100"), "2023-11-14 22:13:20 UTC");
        assert_eq!(format_ts("garbage"), "garbage");
    }

    #[test]
    fn test_render_pages() {
        let (_dir, service) = fixture();

        let index = service.render_index();
        assert!(index.contains("<a href=\"/list/public_channel\">Public Channels</a> (2)"));

        let list = service.render_channel_list(ChannelType::PublicChannel);
        assert!(list.contains("/list/public_channel/channel/C1\">#general</a>"));
        assert!(list.contains("#old</a> <em>(archived)</em>"));

        let channel = service.render_channel(ChannelType::PublicChannel, "C1").unwrap();
        assert!(channel.contains("<p>3 messages</p>"));
        assert!(channel.contains("@Grace Hopper"));
        assert!(channel.contains(
            "/json_data/channels/public_channels/unarchive/messages/C1/200.000000/files/200.000000_0.png"
        ));
        assert!(!channel.contains("200.000000_1"));
        assert!(channel.contains("Unknown User"));

        assert!(service.render_channel(ChannelType::PublicChannel, "C404").is_none());
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("<a href=\"x\">&'"), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;");
    }
}
