// 📅 Seasons - fixed calendar windows a leaderboard is scoped to
//
// A new season is a new leaderboard: nothing carries over except the season
// number being "current".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LeaderboardError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Season {
    pub number: u32,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Season {
    pub fn contains(&self, ts: &DateTime<Utc>) -> bool {
        self.start <= *ts && *ts <= self.end
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonCalendar {
    seasons: Vec<Season>,
}

impl SeasonCalendar {
    pub fn new(mut seasons: Vec<Season>) -> Self {
        seasons.sort_by_key(|s| s.number);
        SeasonCalendar { seasons }
    }

    pub fn get(&self, number: u32) -> Result<&Season> {
        self.seasons
            .iter()
            .find(|s| s.number == number)
            .ok_or_else(|| LeaderboardError::NotFound(format!("season {}", number)))
    }

    /// Highest-numbered season
    pub fn current(&self) -> Option<&Season> {
        self.seasons.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn season(number: u32, start_month: u32, end_month: u32) -> Season {
        Season {
            number,
            start: Utc.with_ymd_and_hms(2022, start_month, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2022, end_month, 28, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_lookup_and_current() {
        let calendar = SeasonCalendar::new(vec![season(3, 6, 9), season(2, 2, 5)]);
        assert_eq!(calendar.get(2).unwrap().number, 2);
        assert_eq!(calendar.current().unwrap().number, 3);
        assert!(matches!(calendar.get(7), Err(LeaderboardError::NotFound(_))));
    }

    #[test]
    fn test_contains_is_inclusive() {
        let s = season(1, 1, 3);
        assert!(s.contains(&s.start));
        assert!(s.contains(&s.end));
        assert!(!s.contains(&Utc.with_ymd_and_hms(2022, 4, 1, 0, 0, 0).unwrap()));
    }
}
