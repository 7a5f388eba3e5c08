//! Scope text assembly over an immutable snapshot.
//!
//! A snapshot yields one text unit per channel and one per canvas, in
//! snapshot order. Channel text is thread-ordered: each thread root is
//! followed by its replies (reassembled from the flat message list via
//! `thread_root_id`), indented one level. Filtering — channel selection,
//! message age, canvas inclusion — happens here, not in the caller, so the
//! pipeline only ever sees the units it should process.
//!
//! Author ids that do not resolve to a user entry render as "unknown user";
//! a dangling reference never fails the pipeline.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::config::AgeBasis;
use crate::models::{Canvas, Channel, Message, Snapshot, TaskOptions};

/// The kind of scope a text unit was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    Channel,
    Canvas,
}

/// One analyzable unit of scope text.
#[derive(Debug, Clone)]
pub struct TextUnit {
    pub scope_id: String,
    pub scope_kind: ScopeKind,
    /// Channel name or canvas title, for prompt labelling.
    pub label: String,
    pub text: String,
}

/// Resolved filtering parameters for one pass over a snapshot.
#[derive(Debug, Clone)]
pub struct UnitFilter {
    selected_channel_ids: Option<HashSet<String>>,
    cutoff: Option<DateTime<Utc>>,
    include_canvases: bool,
}

impl UnitFilter {
    /// Resolve task options against a snapshot. `now` is the processing
    /// time; with [`AgeBasis::Extraction`] the age cutoff counts back from
    /// the snapshot's extraction time instead.
    pub fn from_options(
        options: &TaskOptions,
        snapshot: &Snapshot,
        age_basis: AgeBasis,
        now: DateTime<Utc>,
    ) -> Self {
        let selected_channel_ids = options
            .selected_channel_ids
            .as_ref()
            .filter(|ids| !ids.is_empty())
            .map(|ids| ids.iter().cloned().collect());

        let cutoff = options.max_message_age_days.map(|days| {
            let basis = match age_basis {
                AgeBasis::Processing => now,
                AgeBasis::Extraction => snapshot.extracted_at,
            };
            basis - Duration::days(days)
        });

        Self {
            selected_channel_ids,
            cutoff,
            include_canvases: options.include_canvases,
        }
    }

    fn keeps_channel(&self, channel: &Channel) -> bool {
        match &self.selected_channel_ids {
            Some(ids) => ids.contains(&channel.id),
            None => true,
        }
    }

    fn keeps_message(&self, message: &Message) -> bool {
        match self.cutoff {
            Some(cutoff) => message.timestamp >= cutoff,
            None => true,
        }
    }
}

impl Snapshot {
    /// Lazily yield one text unit per surviving channel and canvas, in
    /// snapshot order. Channels whose messages are all filtered out (and
    /// canvases with no extractable text) yield nothing. The iterator is
    /// restartable: calling again replays the same finite sequence.
    pub fn text_units<'a>(
        &'a self,
        filter: &'a UnitFilter,
    ) -> impl Iterator<Item = TextUnit> + 'a {
        let user_names: HashMap<&str, &str> = self
            .users
            .iter()
            .map(|u| (u.id.as_str(), u.display_name.as_str()))
            .collect();

        let channels = self
            .channels
            .iter()
            .filter(move |c| filter.keeps_channel(c))
            .filter_map(move |c| {
                channel_text(c, &user_names, filter).map(|text| TextUnit {
                    scope_id: c.id.clone(),
                    scope_kind: ScopeKind::Channel,
                    label: c.name.clone(),
                    text,
                })
            });

        let canvases = self
            .canvases
            .iter()
            .filter(move |_| filter.include_canvases)
            .filter_map(|c| {
                canvas_text(c).map(|text| TextUnit {
                    scope_id: c.id.clone(),
                    scope_kind: ScopeKind::Canvas,
                    label: c.title.clone(),
                    text,
                })
            });

        channels.chain(canvases)
    }

    /// Channel name lookup for prompt labelling.
    pub fn channel_name(&self, id: &str) -> Option<&str> {
        self.channels
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.name.as_str())
    }
}

/// Render one message as a single line: inner newlines become spaces so a
/// line stays the atomic unit the chunker can rely on.
fn render_message(message: &Message, user_names: &HashMap<&str, &str>, indent: &str) -> String {
    let author = user_names
        .get(message.author_id.as_str())
        .copied()
        .unwrap_or("unknown user");
    let flat = message.text.split_whitespace().collect::<Vec<_>>().join(" ");
    format!(
        "{}{} {}: {}",
        indent,
        message.timestamp.format("%Y-%m-%d %H:%M"),
        author,
        flat
    )
}

/// Build thread-ordered channel text. Returns `None` when no messages
/// survive filtering.
fn channel_text(
    channel: &Channel,
    user_names: &HashMap<&str, &str>,
    filter: &UnitFilter,
) -> Option<String> {
    let kept: Vec<&Message> = channel
        .messages
        .iter()
        .filter(|m| !m.text.trim().is_empty() && filter.keeps_message(m))
        .collect();

    if kept.is_empty() {
        return None;
    }

    let root_ids: HashSet<&str> = kept
        .iter()
        .filter(|m| m.thread_root_id.is_none())
        .map(|m| m.id.as_str())
        .collect();

    let mut replies: HashMap<&str, Vec<&Message>> = HashMap::new();
    for m in &kept {
        if let Some(root) = m.thread_root_id.as_deref() {
            if root_ids.contains(root) {
                replies.entry(root).or_default().push(m);
            }
        }
    }

    let mut lines = Vec::with_capacity(kept.len());
    for m in &kept {
        match m.thread_root_id.as_deref() {
            None => {
                lines.push(render_message(m, user_names, ""));
                if let Some(children) = replies.get(m.id.as_str()) {
                    for reply in children {
                        lines.push(render_message(reply, user_names, "    "));
                    }
                }
            }
            // A reply whose root was filtered out (or missing from the
            // export) surfaces as a top-level line at its own position.
            Some(root) if !root_ids.contains(root) => {
                lines.push(render_message(m, user_names, ""));
            }
            Some(_) => {} // emitted under its root above
        }
    }

    Some(lines.join("\n"))
}

/// Extract readable text from a canvas's freeform blocks. Returns `None`
/// when nothing extractable remains.
fn canvas_text(canvas: &Canvas) -> Option<String> {
    let mut lines = vec![format!("Canvas: {}", canvas.title)];
    let before = lines.len();

    for block in &canvas.blocks {
        if let Some(text) = block.get("text").and_then(|v| v.as_str()) {
            if !text.trim().is_empty() {
                lines.push(text.split_whitespace().collect::<Vec<_>>().join(" "));
            }
        } else if let Some(elements) = block.get("rich_text").and_then(|v| v.as_array()) {
            for element in elements {
                if let Some(text) = element.get("text").and_then(|v| v.as_str()) {
                    if !text.trim().is_empty() {
                        lines.push(text.split_whitespace().collect::<Vec<_>>().join(" "));
                    }
                }
            }
        }
    }

    if lines.len() == before {
        return None;
    }
    Some(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::User;
    use serde_json::json;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn msg(id: &str, author: &str, text: &str, when: &str, root: Option<&str>) -> Message {
        Message {
            id: id.to_string(),
            author_id: author.to_string(),
            text: text.to_string(),
            timestamp: ts(when),
            thread_root_id: root.map(|r| r.to_string()),
            reactions: Vec::new(),
            attachments: Vec::new(),
        }
    }

    fn fixture() -> Snapshot {
        Snapshot {
            workspace_id: "W1".to_string(),
            name: "Acme".to_string(),
            domain: "acme".to_string(),
            extracted_at: ts("2025-06-10T00:00:00Z"),
            users: vec![User {
                id: "U1".to_string(),
                display_name: "Alice".to_string(),
                email: None,
                title: None,
                is_admin: true,
            }],
            channels: vec![
                Channel {
                    id: "C1".to_string(),
                    name: "general".to_string(),
                    is_private: false,
                    created_at: ts("2025-01-01T00:00:00Z"),
                    creator_id: Some("U1".to_string()),
                    messages: vec![
                        msg("m1", "U1", "kickoff today", "2025-06-01T09:00:00Z", None),
                        msg("m2", "U2", "on my way", "2025-06-01T09:05:00Z", Some("m1")),
                        msg("m3", "U1", "notes posted", "2025-06-02T10:00:00Z", None),
                    ],
                },
                Channel {
                    id: "C2".to_string(),
                    name: "random".to_string(),
                    is_private: false,
                    created_at: ts("2025-01-01T00:00:00Z"),
                    creator_id: None,
                    messages: vec![msg(
                        "m4",
                        "U1",
                        "old news",
                        "2025-01-15T08:00:00Z",
                        None,
                    )],
                },
            ],
            canvases: vec![Canvas {
                id: "K1".to_string(),
                title: "Roadmap".to_string(),
                created_at: ts("2025-03-01T00:00:00Z"),
                creator_id: "U1".to_string(),
                channel_id: Some("C1".to_string()),
                blocks: vec![
                    json!({"text": "Q3 goals"}),
                    json!({"rich_text": [{"text": "ship v2"}, {"text": "hire two"}]}),
                ],
            }],
        }
    }

    fn no_filter() -> UnitFilter {
        UnitFilter::from_options(
            &TaskOptions::default(),
            &fixture(),
            AgeBasis::Processing,
            Utc::now(),
        )
    }

    #[test]
    fn yields_channels_then_canvases_in_order() {
        let snap = fixture();
        let filter = no_filter();
        let units: Vec<TextUnit> = snap.text_units(&filter).collect();
        assert_eq!(units.len(), 3);
        assert_eq!(units[0].scope_id, "C1");
        assert_eq!(units[0].scope_kind, ScopeKind::Channel);
        assert_eq!(units[1].scope_id, "C2");
        assert_eq!(units[2].scope_id, "K1");
        assert_eq!(units[2].scope_kind, ScopeKind::Canvas);
    }

    #[test]
    fn thread_replies_follow_their_root() {
        let snap = fixture();
        let filter = no_filter();
        let units: Vec<TextUnit> = snap.text_units(&filter).collect();
        let lines: Vec<&str> = units[0].text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("kickoff today"));
        assert!(lines[1].starts_with("    "), "reply is indented");
        assert!(lines[1].contains("on my way"));
        assert!(lines[2].contains("notes posted"));
    }

    #[test]
    fn unknown_author_renders_without_failing() {
        let snap = fixture();
        let filter = no_filter();
        let units: Vec<TextUnit> = snap.text_units(&filter).collect();
        // m2's author U2 has no user entry
        assert!(units[0].text.contains("unknown user"));
        assert!(units[0].text.contains("Alice"));
    }

    #[test]
    fn channel_selection_restricts_units() {
        let snap = fixture();
        let opts = TaskOptions {
            selected_channel_ids: Some(vec!["C2".to_string()]),
            ..TaskOptions::default()
        };
        let filter = UnitFilter::from_options(&opts, &snap, AgeBasis::Processing, Utc::now());
        let units: Vec<TextUnit> = snap.text_units(&filter).collect();
        let channel_ids: Vec<&str> = units
            .iter()
            .filter(|u| u.scope_kind == ScopeKind::Channel)
            .map(|u| u.scope_id.as_str())
            .collect();
        assert_eq!(channel_ids, vec!["C2"]);
    }

    #[test]
    fn empty_selection_means_all_channels() {
        let snap = fixture();
        let opts = TaskOptions {
            selected_channel_ids: Some(Vec::new()),
            ..TaskOptions::default()
        };
        let filter = UnitFilter::from_options(&opts, &snap, AgeBasis::Processing, Utc::now());
        let channels = snap
            .text_units(&filter)
            .filter(|u| u.scope_kind == ScopeKind::Channel)
            .count();
        assert_eq!(channels, 2);
    }

    #[test]
    fn age_filter_drops_old_messages_and_empty_channels() {
        let snap = fixture();
        let opts = TaskOptions {
            max_message_age_days: Some(30),
            include_canvases: false,
            ..TaskOptions::default()
        };
        // Extraction basis: cutoff = 2025-05-11; C2's only message (January)
        // is dropped, so C2 yields no unit at all.
        let filter = UnitFilter::from_options(&opts, &snap, AgeBasis::Extraction, Utc::now());
        let units: Vec<TextUnit> = snap.text_units(&filter).collect();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].scope_id, "C1");
    }

    #[test]
    fn orphan_reply_surfaces_top_level() {
        let mut snap = fixture();
        snap.channels[0].messages = vec![msg(
            "m9",
            "U1",
            "late reply to a pruned thread",
            "2025-06-05T12:00:00Z",
            Some("gone"),
        )];
        let filter = no_filter();
        let units: Vec<TextUnit> = snap.text_units(&filter).collect();
        let unit = units.iter().find(|u| u.scope_id == "C1").unwrap();
        assert!(unit.text.starts_with("2025-06-05"));
    }

    #[test]
    fn canvas_text_includes_rich_text_blocks() {
        let snap = fixture();
        let filter = no_filter();
        let unit = snap
            .text_units(&filter)
            .find(|u| u.scope_kind == ScopeKind::Canvas)
            .unwrap();
        assert!(unit.text.starts_with("Canvas: Roadmap"));
        assert!(unit.text.contains("Q3 goals"));
        assert!(unit.text.contains("ship v2"));
        assert!(unit.text.contains("hire two"));
    }

    #[test]
    fn canvases_excluded_when_disabled() {
        let snap = fixture();
        let opts = TaskOptions {
            include_canvases: false,
            ..TaskOptions::default()
        };
        let filter = UnitFilter::from_options(&opts, &snap, AgeBasis::Processing, Utc::now());
        assert!(snap
            .text_units(&filter)
            .all(|u| u.scope_kind == ScopeKind::Channel));
    }

    #[test]
    fn multiline_message_renders_as_one_line() {
        let mut snap = fixture();
        snap.channels[0].messages = vec![msg(
            "m1",
            "U1",
            "first\nsecond\nthird",
            "2025-06-01T09:00:00Z",
            None,
        )];
        let filter = no_filter();
        let units: Vec<TextUnit> = snap.text_units(&filter).collect();
        let unit = units.iter().find(|u| u.scope_id == "C1").unwrap();
        assert_eq!(unit.text.lines().count(), 1);
        assert!(unit.text.contains("first second third"));
    }
}
