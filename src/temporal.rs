// ⏰ Temporal Model - watermarks and timestamp formats
//
// A watermark is the timestamp of the newest session already merged from a
// host. Watermarks only move forward; the aggregator refuses to commit a scan
// whose newest session is older than the stored watermark.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{LeaderboardError, Result};

/// Format used for watermarks everywhere they are persisted or sent
pub const WATERMARK_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(WATERMARK_FORMAT).to_string()
}

pub fn format_last_updated(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse any timestamp shape seen in stored leaderboards or session listings:
/// RFC 3339, `2022-06-17T02:51:55+0000`, RFC 2822, and the listing form
/// `Thu, 10 Feb 2022 23:29:07 UTC`.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let text = raw.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%z") {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_rfc2822(text) {
        return Ok(ts.with_timezone(&Utc));
    }

    // Listing pages print a zone name instead of an offset
    for zone in [" UTC", " GMT", "Z"] {
        if let Some(naive) = text.strip_suffix(zone) {
            for format in ["%a, %d %b %Y %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
                if let Ok(ts) = NaiveDateTime::parse_from_str(naive.trim(), format) {
                    return Ok(Utc.from_utc_datetime(&ts));
                }
            }
        }
    }

    Err(LeaderboardError::Parse(format!("unrecognised timestamp: {:?}", raw)))
}

// ============================================================================
// WATERMARKS
// ============================================================================

/// Per-host watermark map (host -> newest merged session timestamp).
///
/// Ordered by host name so persisted output is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermarks {
    marks: BTreeMap<String, DateTime<Utc>>,
}

impl Watermarks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every host starts at the same instant (usually a season start)
    pub fn seeded<I, S>(hosts: I, start: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Watermarks {
            marks: hosts.into_iter().map(|h| (h.into(), start)).collect(),
        }
    }

    pub fn get(&self, host: &str) -> Option<DateTime<Utc>> {
        self.marks.get(host).copied()
    }

    /// Set a watermark unconditionally (used when hydrating stored state)
    pub fn set(&mut self, host: impl Into<String>, ts: DateTime<Utc>) {
        self.marks.insert(host.into(), ts);
    }

    /// Add a host at `start` unless it already has a watermark
    pub fn seed_missing(&mut self, host: &str, start: DateTime<Utc>) {
        self.marks.entry(host.to_string()).or_insert(start);
    }

    /// Move a host's watermark forward. Refuses to move it backwards.
    pub fn advance(&mut self, host: &str, observed: DateTime<Utc>) -> Result<()> {
        if let Some(stored) = self.get(host) {
            if observed < stored {
                return Err(LeaderboardError::WatermarkRegression {
                    host: host.to_string(),
                    stored: format_timestamp(&stored),
                    observed: format_timestamp(&observed),
                });
            }
        }
        self.marks.insert(host.to_string(), observed);
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DateTime<Utc>)> {
        self.marks.iter().map(|(h, ts)| (h.as_str(), ts))
    }

    pub fn len(&self) -> usize {
        self.marks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }

    /// Host -> formatted timestamp, the shape the leaderboard service uses
    pub fn to_string_map(&self) -> BTreeMap<String, String> {
        self.marks
            .iter()
            .map(|(h, ts)| (h.clone(), format_timestamp(ts)))
            .collect()
    }

    pub fn from_string_map<'a, I>(map: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let mut marks = Watermarks::new();
        for (host, ts) in map {
            marks.set(host.clone(), parse_timestamp(ts)?);
        }
        Ok(marks)
    }
}
