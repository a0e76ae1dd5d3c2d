// 🔌 Leaderboard Service Contract - JSON bodies of the remote API
//
// GET  /leaderboard/get/{track}/{condition}?season=N  -> LeaderboardResponse
// POST /leaderboard/update                            <- PublishDocument
//
// Shared by the HTTP client (publish) and the bundled server (bin/server.rs).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::catalog::{car, Condition, Track};
use crate::entry::Entry;
use crate::error::{LeaderboardError, Result};
use crate::leaderboard::{LeaderboardKey, LeaderboardState};
use crate::temporal::{format_last_updated, parse_timestamp, Watermarks};

/// Error text the service uses for an unknown leaderboard
pub const DOES_NOT_EXIST: &str = "leaderboard does not exist";

// ============================================================================
// PUBLISH DOCUMENT (POST body)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishDocument {
    pub track: TrackInfo,
    pub drivers: Vec<DriverRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    /// Track key, e.g. "brands_hatch"
    pub name: String,
    /// Condition as 0 (dry) / 1 (wet) / 2 (all)
    pub is_wet: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season: Option<u32>,
    /// host -> watermark
    #[serde(default)]
    pub most_recent_sessions: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverRow {
    pub rank: usize,
    pub first_name: String,
    pub last_name: String,
    pub short_name: String,
    pub steam_id: String,
    pub car_id: u32,
    pub lap_time: u32,
    pub sector_1: u32,
    pub sector_2: u32,
    pub sector_3: u32,
}

impl PublishDocument {
    /// Ranked by ascending best time; ties keep stored order
    pub fn from_state(state: &LeaderboardState) -> Self {
        let drivers = state
            .ranked()
            .map(|(rank, e)| DriverRow {
                rank,
                first_name: e.first_name.clone(),
                last_name: e.last_name.clone(),
                short_name: e.short_name.clone(),
                steam_id: e.driver_id.clone(),
                car_id: e.car_id,
                lap_time: e.best_time,
                sector_1: e.sector_1,
                sector_2: e.sector_2,
                sector_3: e.sector_3,
            })
            .collect();

        PublishDocument {
            track: TrackInfo {
                name: state.key.track.key().to_string(),
                is_wet: state.key.condition.as_int(),
                season: Some(state.key.season),
                most_recent_sessions: state.watermarks.to_string_map(),
            },
            drivers,
        }
    }

    /// Key this document targets; `fallback_season` fills a missing season
    pub fn key(&self, fallback_season: u32) -> Result<LeaderboardKey> {
        let track = Track::from_key(&self.track.name)
            .ok_or_else(|| LeaderboardError::Parse(format!("unknown track {:?}", self.track.name)))?;
        let condition = Condition::from_int(self.track.is_wet as i64)
            .ok_or_else(|| LeaderboardError::Parse(format!("unknown condition {}", self.track.is_wet)))?;
        Ok(LeaderboardKey {
            track,
            condition,
            season: self.track.season.unwrap_or(fallback_season),
        })
    }

    pub fn into_state(self, key: LeaderboardKey) -> Result<LeaderboardState> {
        let is_wet = key.condition == Condition::Wet;
        let mut rows = self.drivers;
        rows.sort_by_key(|r| r.rank);

        let entries = rows
            .into_iter()
            .map(|r| Entry {
                driver_id: r.steam_id,
                car_id: r.car_id,
                first_name: r.first_name,
                last_name: r.last_name,
                short_name: r.short_name,
                best_time: r.lap_time,
                sector_1: r.sector_1,
                sector_2: r.sector_2,
                sector_3: r.sector_3,
                is_wet,
            })
            .collect();

        Ok(LeaderboardState {
            key,
            entries,
            watermarks: Watermarks::from_string_map(self.track.most_recent_sessions.iter())?,
            last_updated: None,
        })
    }
}

// ============================================================================
// GET RESPONSE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<LeaderboardData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardData {
    pub leaderboard_data: Vec<LeaderboardRow>,
    pub leaderboard: LeaderboardMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardMeta {
    #[serde(default)]
    pub last_updated_iso_8601: Option<String>,
    #[serde(default)]
    pub most_recent_sessions: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardRow {
    pub lap_time: Millis,
    pub sector_1: Millis,
    pub sector_2: Millis,
    pub sector_3: Millis,
    pub driver: DriverInfo,
    pub car: CarInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverInfo {
    pub first_name: String,
    pub last_name: String,
    pub short_name: String,
    pub steam_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub year: Option<u16>,
    pub car_id: Millis,
}

/// The service sends integers either as JSON numbers or numeric strings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Millis {
    Number(u32),
    Text(String),
}

impl Millis {
    pub fn value(&self) -> Result<u32> {
        match self {
            Millis::Number(n) => Ok(*n),
            Millis::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| LeaderboardError::Parse(format!("not an integer: {:?}", s))),
        }
    }
}

impl LeaderboardResponse {
    pub fn does_not_exist() -> Self {
        LeaderboardResponse {
            error: Some(DOES_NOT_EXIST.to_string()),
            data: None,
        }
    }

    pub fn from_state(state: &LeaderboardState) -> Self {
        let rows = state
            .entries
            .iter()
            .map(|e| {
                let model = car::lookup(e.car_id);
                LeaderboardRow {
                    lap_time: Millis::Number(e.best_time),
                    sector_1: Millis::Number(e.sector_1),
                    sector_2: Millis::Number(e.sector_2),
                    sector_3: Millis::Number(e.sector_3),
                    driver: DriverInfo {
                        first_name: e.first_name.clone(),
                        last_name: e.last_name.clone(),
                        short_name: e.short_name.clone(),
                        steam_id: e.driver_id.clone(),
                    },
                    car: CarInfo {
                        name: model.map(|m| m.name.to_string()).unwrap_or_default(),
                        year: model.map(|m| m.year),
                        car_id: Millis::Number(e.car_id),
                    },
                }
            })
            .collect();

        LeaderboardResponse {
            error: None,
            data: Some(LeaderboardData {
                leaderboard_data: rows,
                leaderboard: LeaderboardMeta {
                    last_updated_iso_8601: state.last_updated.as_ref().map(format_last_updated),
                    most_recent_sessions: state.watermarks.to_string_map(),
                },
            }),
        }
    }

    /// `NotFound` for the does-not-exist error, `Parse` for anything malformed
    pub fn into_state(self, key: LeaderboardKey) -> Result<LeaderboardState> {
        if let Some(error) = self.error {
            if error == DOES_NOT_EXIST {
                return Err(LeaderboardError::NotFound(key.to_string()));
            }
            return Err(LeaderboardError::Parse(format!("service error: {}", error)));
        }
        let data = self
            .data
            .ok_or_else(|| LeaderboardError::Parse("response has neither data nor error".to_string()))?;

        let is_wet = key.condition == Condition::Wet;
        let mut entries = Vec::with_capacity(data.leaderboard_data.len());
        for row in data.leaderboard_data {
            entries.push(Entry {
                driver_id: row.driver.steam_id,
                car_id: row.car.car_id.value()?,
                first_name: row.driver.first_name,
                last_name: row.driver.last_name,
                short_name: row.driver.short_name,
                best_time: row.lap_time.value()?,
                sector_1: row.sector_1.value()?,
                sector_2: row.sector_2.value()?,
                sector_3: row.sector_3.value()?,
                is_wet,
            });
        }

        let last_updated = match data.leaderboard.last_updated_iso_8601 {
            Some(raw) if !raw.trim().is_empty() => Some(parse_timestamp(&raw)?),
            _ => None,
        };

        Ok(LeaderboardState {
            key,
            entries,
            watermarks: Watermarks::from_string_map(data.leaderboard.most_recent_sessions.iter())?,
            last_updated,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
