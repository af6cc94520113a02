//! Parsing of the player's `status.html` response.
//!
//! The body is a single call expression:
//!
//! ```text
//! OnStatus("title", "Playing", 12000, "00:00:12", 1440000, "00:24:00", 0, 100, "D:\Shows\ep01.mkv")
//! ```
//!
//! Fields are comma separated; single or double quotes group a field and a
//! backslash protects the next character (the backslash itself is kept so
//! Windows paths survive). Text fields may be percent-encoded UTF-8; when
//! that does not decode, the bytes are tried as GBK before giving up.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

use crate::rules::folder_of;

const FIELD_TITLE: usize = 0;
const FIELD_STATE: usize = 1;
const FIELD_POS_MS: usize = 2;
const FIELD_POS_TEXT: usize = 3;
const FIELD_DUR_MS: usize = 4;
const FIELD_DUR_TEXT: usize = 5;
const FIELD_MUTED: usize = 6;
const FIELD_VOLUME: usize = 7;
const FIELD_PATH: usize = 8;

/// Play state as reported by the player. The label is localized by the
/// player, so both English and Chinese spellings are recognised.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlayState {
    Playing,
    Paused,
    Stopped,
    #[default]
    Unknown,
    Other(String),
}

impl PlayState {
    pub fn from_label(label: &str) -> Self {
        match label.trim() {
            "" => PlayState::Unknown,
            "Playing" | "正在播放" | "播放中" => PlayState::Playing,
            "Paused" | "暂停" | "已暂停" => PlayState::Paused,
            "Stopped" | "停止" | "已停止" => PlayState::Stopped,
            other => PlayState::Other(other.to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            PlayState::Playing => "Playing",
            PlayState::Paused => "Paused",
            PlayState::Stopped => "Stopped",
            PlayState::Unknown => "Unknown",
            PlayState::Other(s) => s,
        }
    }
}

/// One normalized poll of the player. Built fresh on every tick and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSnapshot {
    pub window_title: String,
    pub state: PlayState,
    pub position_ms: u64,
    pub position_text: String,
    pub duration_ms: u64,
    pub duration_text: String,
    pub muted: bool,
    pub volume: u32,
    pub file_path: String,
    /// Scope used for rule matching, derived from `file_path`.
    pub folder: String,
    pub fetched_at: DateTime<Local>,
}

impl PlaybackSnapshot {
    pub fn is_playing(&self) -> bool {
        self.state == PlayState::Playing
    }

    /// Progress in percent, 0 when the duration is unknown.
    pub fn progress_percent(&self) -> f64 {
        if self.duration_ms == 0 {
            return 0.0;
        }
        (self.position_ms as f64 / self.duration_ms as f64 * 100.0).min(100.0)
    }

    /// True when the fields a consumer reacts to differ from `other`.
    /// Title, volume and the timestamp are deliberately not compared.
    pub fn differs_from(&self, other: &PlaybackSnapshot) -> bool {
        self.position_ms != other.position_ms
            || self.state != other.state
            || self.file_path != other.file_path
    }

    /// Parses a full `OnStatus(...)` body. Returns `None` when the call
    /// expression is missing or empty.
    pub fn parse(text: &str) -> Option<Self> {
        let fields = split_status_fields(text)?;
        let field = |idx: usize| fields.get(idx).map(String::as_str).unwrap_or("");

        let file_path = decode_text(field(FIELD_PATH));
        Some(Self {
            window_title: decode_text(field(FIELD_TITLE)),
            state: PlayState::from_label(&decode_text(field(FIELD_STATE))),
            position_ms: parse_number(field(FIELD_POS_MS)),
            position_text: non_empty_or(field(FIELD_POS_TEXT), "00:00:00"),
            duration_ms: parse_number(field(FIELD_DUR_MS)),
            duration_text: non_empty_or(field(FIELD_DUR_TEXT), "00:00:00"),
            muted: parse_number(field(FIELD_MUTED)) == 1,
            volume: parse_number(field(FIELD_VOLUME)) as u32,
            folder: folder_of(&file_path),
            file_path,
            fetched_at: Local::now(),
        })
    }
}

/// Extracts the argument list between `OnStatus(` and the last `)` and
/// splits it into trimmed fields.
pub fn split_status_fields(text: &str) -> Option<Vec<String>> {
    let start = text.find("OnStatus(")? + "OnStatus(".len();
    let end = text.rfind(')')?;
    if end <= start {
        return None;
    }
    let args = &text[start..end];

    let mut fields = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    let mut quote: Option<char> = None;

    for c in args.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' => {
                escaped = true;
                current.push(c);
            }
            '"' | '\'' if quote.is_none() => quote = Some(c),
            '"' | '\'' if quote == Some(c) => quote = None,
            ',' if quote.is_none() => {
                fields.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    fields.push(current.trim().to_string());
    Some(fields)
}

/// Percent-decodes `raw` as UTF-8, falling back to GBK, then to the raw text.
pub fn decode_text(raw: &str) -> String {
    if let Ok(decoded) = urlencoding::decode(raw) {
        return decoded.into_owned();
    }

    let bytes = urlencoding::decode_binary(raw.as_bytes());
    match encoding_rs::GBK.decode_without_bom_handling_and_without_replacement(&bytes) {
        Some(Cow::Borrowed(s)) => s.to_string(),
        Some(Cow::Owned(s)) => s,
        None => {
            tracing::debug!("status field is neither UTF-8 nor GBK, keeping raw text");
            raw.to_string()
        }
    }
}

fn parse_number(raw: &str) -> u64 {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v as u64)
        .unwrap_or(0)
}

fn non_empty_or(raw: &str, fallback: &str) -> String {
    if raw.is_empty() {
        fallback.to_string()
    } else {
        raw.to_string()
    }
}
