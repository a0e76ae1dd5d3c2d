// 🏗️ Session Framework - what a race-server host gives us
//
// A host exposes a paged listing of sessions (newest first) and one results
// file per session. The merge engine only sees the `SessionFetcher` trait, so
// it runs the same against real hosts, local files, or in-memory fixtures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::{Condition, Track};
use crate::entry::Entry;
use crate::error::{LeaderboardError, Result};

// ============================================================================
// CORE TYPES
// ============================================================================

/// One row of a host's session listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRef {
    /// Results file stem, e.g. "220210_232907_FP"
    pub filename: String,
    pub timestamp: DateTime<Utc>,
    /// Track as printed in the listing
    pub track_label: String,
    pub session_type: String,
    /// Session page carries one of the league password markers
    pub password_protected: bool,
}

/// Result of one page request
#[derive(Debug, Clone, PartialEq)]
pub enum PageListing {
    /// Sessions on this page, newest first. Empty means no more results.
    Sessions(Vec<SessionRef>),
    /// Host answered 404 for this page: stop paging
    NotFound,
}

/// Listing filter for one leaderboard scope
#[derive(Debug, Clone, PartialEq)]
pub struct SessionQuery {
    pub track: Track,
    pub condition: Condition,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Entries extracted from one session's results file.
/// Consumed by the merge step and then dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionResult {
    pub filename: String,
    /// `trackName` from the results file
    pub track: String,
    pub session_type: String,
    pub is_wet: bool,
    /// In leaderboard-line order
    pub entries: Vec<Entry>,
}

impl SessionResult {
    pub fn is_track(&self, track: Track) -> bool {
        Track::from_key(&self.track) == Some(track)
    }

    /// Parse a downloaded results file.
    ///
    /// Fails with `NoLapsRecorded` when the file has no laps at all.
    pub fn from_json(filename: &str, body: &str) -> Result<SessionResult> {
        let body = body.trim_start_matches('\u{feff}');
        let raw: RawResultsFile = serde_json::from_str(body)?;
        SessionResult::from_raw(filename, raw)
    }

    pub fn from_raw(filename: &str, raw: RawResultsFile) -> Result<SessionResult> {
        if raw.laps.is_empty() {
            return Err(LeaderboardError::NoLapsRecorded {
                filename: filename.to_string(),
            });
        }

        let is_wet = raw.session_result.is_wet_session.is_set();
        let mut entries = Vec::new();

        // Each leaderboard line is a car; each driver of that car with at
        // least one valid lap becomes an entry.
        for line in &raw.session_result.leader_board_lines {
            let car = &line.car;
            for (driver_index, driver) in car.drivers.iter().enumerate() {
                let Some(best) = best_valid_lap(&raw.laps, car.car_id, driver_index as i64) else {
                    continue;
                };

                entries.push(Entry {
                    driver_id: driver.player_id.clone(),
                    car_id: car.car_model,
                    first_name: driver.first_name.clone(),
                    last_name: driver.last_name.clone(),
                    short_name: driver.short_name.clone(),
                    best_time: best.laptime as u32,
                    sector_1: best.split(0),
                    sector_2: best.split(1),
                    sector_3: best.split(2),
                    is_wet,
                });
            }
        }

        Ok(SessionResult {
            filename: filename.to_string(),
            track: raw.track_name,
            session_type: raw.session_type,
            is_wet,
            entries,
        })
    }
}

/// Laps slower than 59:59.999 never count
pub const MAX_LAP_MS: i64 = 3_599_999;

/// Fastest valid lap for one (car, driver index).
/// `<=` so the latest of several equal laps supplies the sectors.
fn best_valid_lap(laps: &[RawLap], car_id: i64, driver_index: i64) -> Option<&RawLap> {
    let mut best: Option<&RawLap> = None;

    for lap in laps {
        if !lap.is_valid_for_best || lap.car_id != car_id || lap.driver_index != driver_index {
            continue;
        }
        if lap.laptime < 0 || lap.laptime > MAX_LAP_MS {
            continue;
        }
        match best {
            Some(current) if lap.laptime > current.laptime => {}
            _ => best = Some(lap),
        }
    }

    best
}

// ============================================================================
// RAW RESULTS FILE (server JSON schema)
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawResultsFile {
    #[serde(default)]
    pub track_name: String,
    #[serde(default)]
    pub session_type: String,
    pub session_result: RawSessionResult,
    #[serde(default)]
    pub laps: Vec<RawLap>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSessionResult {
    #[serde(default)]
    pub is_wet_session: Flag,
    #[serde(default)]
    pub leader_board_lines: Vec<RawLeaderBoardLine>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawLeaderBoardLine {
    pub car: RawCar,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCar {
    /// Per-session car number used to link laps
    pub car_id: i64,
    /// Game car-model id
    pub car_model: u32,
    #[serde(default)]
    pub drivers: Vec<RawDriver>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDriver {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub short_name: String,
    pub player_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLap {
    pub car_id: i64,
    pub driver_index: i64,
    pub laptime: i64,
    #[serde(default)]
    pub is_valid_for_best: bool,
    #[serde(default)]
    pub splits: Vec<i64>,
}

impl RawLap {
    fn split(&self, index: usize) -> u32 {
        self.splits
            .get(index)
            .copied()
            .filter(|v| *v >= 0)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(0)
    }
}

/// Servers write `isWetSession` as 0/1; some tools write a bool
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
pub enum Flag {
    Bool(bool),
    Int(i64),
}

impl Flag {
    pub fn is_set(&self) -> bool {
        match self {
            Flag::Bool(b) => *b,
            Flag::Int(i) => *i != 0,
        }
    }
}

impl Default for Flag {
    fn default() -> Self {
        Flag::Int(0)
    }
}

// ============================================================================
// SOURCE TRAIT
// ============================================================================

/// SessionFetcher - the only way the merge engine reaches session data
///
/// Listing pages must come back newest first: incremental updates stop at the
/// first session at or below the watermark.
pub trait SessionFetcher: Send + Sync {
    /// One page of the host's session listing for `query`
    fn list_sessions(&self, host: &str, query: &SessionQuery, page: usize) -> Result<PageListing>;

    /// Download and extract one session.
    /// `NoLapsRecorded` means "skip", not failure.
    fn fetch_session(&self, host: &str, filename: &str) -> Result<SessionResult>;

    /// Name for log lines
    fn name(&self) -> &str {
        "session-source"
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const RESULTS: &str = r#"{
        "trackName": "zandvoort",
        "sessionType": "FP",
        "sessionResult": {
            "isWetSession": 1,
            "leaderBoardLines": [
                { "car": { "carId": 1001, "carModel": 22, "drivers": [
                    { "firstName": "Ana", "lastName": "Silva", "shortName": "SIL", "playerId": "S1" },
                    { "firstName": "Ben", "lastName": "Cole", "shortName": "COL", "playerId": "S2" }
                ] } },
                { "car": { "carId": 1002, "carModel": 999, "drivers": [
                    { "firstName": "Cy", "lastName": "Dunn", "shortName": "DUN", "playerId": "S3" }
                ] } },
                { "car": { "carId": 1003, "carModel": 1, "drivers": [
                    { "firstName": "No", "lastName": "Laps", "shortName": "NOL", "playerId": "S4" }
                ] } }
            ]
        },
        "laps": [
            { "carId": 1001, "driverIndex": 0, "laptime": 96000, "isValidForBest": true,  "splits": [32000, 32000, 32000] },
            { "carId": 1001, "driverIndex": 0, "laptime": 94000, "isValidForBest": false, "splits": [31000, 31000, 32000] },
            { "carId": 1001, "driverIndex": 0, "laptime": 95000, "isValidForBest": true,  "splits": [31000, 32000, 32000] },
            { "carId": 1001, "driverIndex": 0, "laptime": 95000, "isValidForBest": true,  "splits": [30000, 33000, 32000] },
            { "carId": 1001, "driverIndex": 1, "laptime": 97500, "isValidForBest": true,  "splits": [32500, 32500, 32500] },
            { "carId": 1002, "driverIndex": 0, "laptime": 99000, "isValidForBest": true,  "splits": [33000, 33000, 33000] },
            { "carId": 1003, "driverIndex": 0, "laptime": 90000, "isValidForBest": false, "splits": [30000, 30000, 30000] }
        ]
    }"#;

    #[test]
    fn test_extracts_one_entry_per_driver_with_valid_laps() {
        let session = SessionResult::from_json("220210_232907_FP", RESULTS).unwrap();

        assert_eq!(session.track, "zandvoort");
        assert!(session.is_wet);
        assert!(session.is_track(Track::Zandvoort));
        let ids: Vec<&str> = session.entries.iter().map(|e| e.driver_id.as_str()).collect();
        assert_eq!(ids, vec!["S1", "S2", "S3"]);
    }

    #[test]
    fn test_best_lap_ignores_invalid_and_keeps_latest_tie() {
        let session = SessionResult::from_json("x", RESULTS).unwrap();
        let ana = &session.entries[0];

        assert_eq!(ana.best_time, 95_000);
        // Second 95.000 lap wins the tie
        assert_eq!((ana.sector_1, ana.sector_2, ana.sector_3), (30_000, 33_000, 32_000));
        assert_eq!(ana.car_id, 22);
        assert!(ana.is_wet);
    }

    #[test]
    fn test_driver_index_links_laps_to_drivers() {
        let session = SessionResult::from_json("x", RESULTS).unwrap();
        assert_eq!(session.entries[1].best_time, 97_500);
        assert_eq!(session.entries[1].short_name, "COL");
    }

    #[test]
    fn test_unknown_car_model_keeps_raw_id() {
        let session = SessionResult::from_json("x", RESULTS).unwrap();
        let cy = &session.entries[2];
        assert_eq!(cy.car_id, 999);
        assert_eq!(cy.car_label(), crate::catalog::UNKNOWN_CAR_LABEL);
    }

    #[test]
    fn test_no_laps_is_reported() {
        let body = r#"{"trackName":"spa","sessionResult":{"isWetSession":false,"leaderBoardLines":[]},"laps":[]}"#;
        match SessionResult::from_json("empty", body) {
            Err(LeaderboardError::NoLapsRecorded { filename }) => assert_eq!(filename, "empty"),
            other => panic!("expected NoLapsRecorded, got {:?}", other),
        }
    }

    #[test]
    fn test_bom_and_bool_wet_flag() {
        let body = "\u{feff}{\"trackName\":\"spa\",\"sessionResult\":{\"isWetSession\":true,\"leaderBoardLines\":[]},\"laps\":[{\"carId\":1,\"driverIndex\":0,\"laptime\":1,\"isValidForBest\":true,\"splits\":[]}]}";
        let session = SessionResult::from_json("bom", body).unwrap();
        assert!(session.is_wet);
        assert!(session.entries.is_empty());
    }

    #[test]
    fn test_lap_over_an_hour_is_ignored() {
        let laps = vec![
            RawLap { car_id: 1, driver_index: 0, laptime: 3_600_000, is_valid_for_best: true, splits: vec![] },
            RawLap { car_id: 1, driver_index: 0, laptime: MAX_LAP_MS, is_valid_for_best: true, splits: vec![] },
        ];
        assert_eq!(best_valid_lap(&laps, 1, 0).map(|l| l.laptime), Some(MAX_LAP_MS));
        assert!(best_valid_lap(&laps[..1], 1, 0).is_none());
    }

    #[test]
    fn test_malformed_json_is_error() {
        assert!(matches!(
            SessionResult::from_json("bad", "{not json"),
            Err(LeaderboardError::Json(_))
        ));
    }
}
