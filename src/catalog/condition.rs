use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::LeaderboardError;

/// Track state a leaderboard (or a query) is restricted to.
///
/// Integer form: 0 = dry, 1 = wet, 2 = all. This is what session queries and
/// the leaderboard service use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    Dry,
    Wet,
    All,
}

impl Condition {
    pub fn as_int(&self) -> u8 {
        match self {
            Condition::Dry => 0,
            Condition::Wet => 1,
            Condition::All => 2,
        }
    }

    pub fn from_int(value: i64) -> Option<Condition> {
        match value {
            0 => Some(Condition::Dry),
            1 => Some(Condition::Wet),
            2 => Some(Condition::All),
            _ => None,
        }
    }

    /// Whether a session with the given wet flag satisfies this condition
    pub fn accepts(&self, is_wet: bool) -> bool {
        match self {
            Condition::All => true,
            Condition::Dry => !is_wet,
            Condition::Wet => is_wet,
        }
    }

    /// Flag value for the `sessionResult.isWetSession:` query term.
    /// `All` has no flag and the term is left out of the query.
    pub fn query_flag(&self) -> Option<u8> {
        match self {
            Condition::Dry => Some(0),
            Condition::Wet => Some(1),
            Condition::All => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Condition::Dry => "Dry",
            Condition::Wet => "Wet",
            Condition::All => "All",
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Condition {
    type Err = LeaderboardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "0" | "dry" => Ok(Condition::Dry),
            "1" | "wet" => Ok(Condition::Wet),
            "2" | "all" => Ok(Condition::All),
            other => Err(LeaderboardError::Parse(format!("unknown condition: {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts() {
        assert!(Condition::All.accepts(true));
        assert!(Condition::All.accepts(false));
        assert!(Condition::Dry.accepts(false));
        assert!(!Condition::Dry.accepts(true));
        assert!(Condition::Wet.accepts(true));
        assert!(!Condition::Wet.accepts(false));
    }

    #[test]
    fn test_parse_forms() {
        assert_eq!("0".parse::<Condition>().unwrap(), Condition::Dry);
        assert_eq!("Wet".parse::<Condition>().unwrap(), Condition::Wet);
        assert_eq!("all".parse::<Condition>().unwrap(), Condition::All);
        assert!("3".parse::<Condition>().is_err());
    }

    #[test]
    fn test_int_round_trip() {
        for c in [Condition::Dry, Condition::Wet, Condition::All] {
            assert_eq!(Condition::from_int(c.as_int() as i64), Some(c));
        }
    }
}
