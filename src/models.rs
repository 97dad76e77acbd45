//! Moderation data model.
use std::{fmt, str::FromStr};

use anyhow::bail;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};

/// The kind of moderation event recorded against a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViolationType {
    /// An advisory warning.
    Warned,
    /// An enforced ban.
    Banned,
}

impl ViolationType {
    /// The persisted name of this type.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Warned => "warned",
            Self::Banned => "banned",
        }
    }
}

impl FromStr for ViolationType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "warned" => Ok(Self::Warned),
            "banned" => Ok(Self::Banned),
            other => bail!("unknown violation type {other:?}"),
        }
    }
}

impl fmt::Display for ViolationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of a violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BanPriority {
    Green,
    Red,
}

impl BanPriority {
    /// The persisted name of this priority.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Green => "green",
            Self::Red => "red",
        }
    }
}

impl FromStr for BanPriority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "green" => Ok(Self::Green),
            "red" => Ok(Self::Red),
            other => bail!("unknown ban priority {other:?}"),
        }
    }
}

/// A single entry in a user's violation ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Warning or ban.
    #[serde(rename = "type")]
    pub kind: ViolationType,
    /// The group the violation was committed in.
    pub group_id: i64,
    /// Severity.
    pub priority: BanPriority,
    /// Whether the violation is enforced.
    pub active: bool,
    /// The day the violation was issued.
    pub date: NaiveDate,
    /// The last day the violation still counts, if it expires at all.
    pub until: Option<NaiveDate>,
}

impl Violation {
    /// A violation past its expiry no longer counts.
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.until.is_some_and(|until| today > until)
    }

    /// `active` and not expired.
    pub fn is_active(&self, today: NaiveDate) -> bool {
        self.active && !self.is_expired(today)
    }
}

/// A user's verification and violation history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustRecord {
    pub user_id: i64,
    pub admin: bool,
    pub verified: bool,
    /// Every violation ever recorded, oldest first.
    pub violations: Vec<Violation>,
}

impl TrustRecord {
    /// The record of a user the store has never seen.
    pub const fn new(user_id: i64) -> Self {
        Self {
            user_id,
            admin: false,
            verified: false,
            violations: Vec::new(),
        }
    }

    /// Warnings that have not expired as of `today`.
    pub fn active_warnings(&self, today: NaiveDate) -> usize {
        self.violations
            .iter()
            .filter(|v| v.kind == ViolationType::Warned && !v.is_expired(today))
            .count()
    }
}

/// A managed community.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::FromRow)]
pub struct Group {
    pub group_id: i64,
}

/// The natural key a scraped comment is deduplicated on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommentKey {
    pub comment_vk_id: i64,
    pub group_id: i64,
    pub target_group_id: Option<i64>,
    pub author_id: i64,
}

/// A comment as reported by the comment-log scraper.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    #[serde(default)]
    pub comment_vk_id: Option<i64>,
    #[serde(default)]
    pub group_id: Option<i64>,
    /// Set when the comment was posted under another group's wall.
    #[serde(default)]
    pub target_group_id: Option<i64>,
    #[serde(default)]
    pub post_id: Option<i64>,
    #[serde(default)]
    pub author_id: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_posted_on")]
    pub posted_on: Option<NaiveDateTime>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub attachments: Vec<String>,
}

impl Comment {
    /// The dedup key, or `None` when a required identifier is missing.
    pub fn key(&self) -> Option<CommentKey> {
        Some(CommentKey {
            comment_vk_id: self.comment_vk_id?,
            group_id: self.group_id?,
            target_group_id: self.target_group_id,
            author_id: self.author_id?,
        })
    }

    /// Non-empty text, if any.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.text().is_none() && self.attachments.is_empty()
    }
}

/// Scrapers write timestamps either as `2024-01-31 18:04:00` or as RFC 3339.
fn deserialize_posted_on<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };

    if let Ok(dt) = NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(Some(dt));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(dt.naive_utc()));
    }
    if let Ok(dt) = DateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Ok(Some(dt.naive_utc()));
    }

    Err(serde::de::Error::custom(format!(
        "unrecognized timestamp {raw:?}"
    )))
}
