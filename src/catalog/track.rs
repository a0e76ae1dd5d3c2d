// 🏁 Track catalog - the closed set of circuits a leaderboard can exist for
//
// The key (e.g. "brands_hatch") is what results files, session queries and the
// remote leaderboard service use. The display name is for humans.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::LeaderboardError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Track {
    Barcelona,
    BrandsHatch,
    Cota,
    Donington,
    Hungaroring,
    Imola,
    Indianapolis,
    Kyalami,
    LagunaSeca,
    Misano,
    Monza,
    MountPanorama,
    Nurburgring,
    OultonPark,
    PaulRicard,
    RedBullRing,
    Silverstone,
    Snetterton,
    Spa,
    Suzuka,
    Valencia,
    WatkinsGlen,
    Zandvoort,
    Zolder,
}

impl Track {
    pub const ALL: [Track; 24] = [
        Track::Barcelona,
        Track::BrandsHatch,
        Track::Cota,
        Track::Donington,
        Track::Hungaroring,
        Track::Imola,
        Track::Indianapolis,
        Track::Kyalami,
        Track::LagunaSeca,
        Track::Misano,
        Track::Monza,
        Track::MountPanorama,
        Track::Nurburgring,
        Track::OultonPark,
        Track::PaulRicard,
        Track::RedBullRing,
        Track::Silverstone,
        Track::Snetterton,
        Track::Spa,
        Track::Suzuka,
        Track::Valencia,
        Track::WatkinsGlen,
        Track::Zandvoort,
        Track::Zolder,
    ];

    /// Key used by results files and the leaderboard service
    pub fn key(&self) -> &'static str {
        match self {
            Track::Barcelona => "barcelona",
            Track::BrandsHatch => "brands_hatch",
            Track::Cota => "cota",
            Track::Donington => "donington",
            Track::Hungaroring => "hungaroring",
            Track::Imola => "imola",
            Track::Indianapolis => "indianapolis",
            Track::Kyalami => "kyalami",
            Track::LagunaSeca => "laguna_seca",
            Track::Misano => "misano",
            Track::Monza => "monza",
            Track::MountPanorama => "mount_panorama",
            Track::Nurburgring => "nurburgring",
            Track::OultonPark => "oulton_park",
            Track::PaulRicard => "paul_ricard",
            Track::RedBullRing => "red_bull_ring",
            Track::Silverstone => "silverstone",
            Track::Snetterton => "snetterton",
            Track::Spa => "spa",
            Track::Suzuka => "suzuka",
            Track::Valencia => "valencia",
            Track::WatkinsGlen => "watkins_glen",
            Track::Zandvoort => "zandvoort",
            Track::Zolder => "zolder",
        }
    }

    /// Human-readable name for display
    pub fn display_name(&self) -> &'static str {
        match self {
            Track::Barcelona => "Barcelona",
            Track::BrandsHatch => "Brands Hatch",
            Track::Cota => "Circuit of the Americas",
            Track::Donington => "Donington",
            Track::Hungaroring => "Hungaroring",
            Track::Imola => "Imola",
            Track::Indianapolis => "Indianapolis",
            Track::Kyalami => "Kyalami",
            Track::LagunaSeca => "Laguna Seca",
            Track::Misano => "Misano",
            Track::Monza => "Monza",
            Track::MountPanorama => "Mount Panorama",
            Track::Nurburgring => "Nurburgring",
            Track::OultonPark => "Oulton Park",
            Track::PaulRicard => "Paul Ricard",
            Track::RedBullRing => "Red Bull Ring",
            Track::Silverstone => "Silverstone",
            Track::Snetterton => "Snetterton",
            Track::Spa => "Spa-Francorchamps",
            Track::Suzuka => "Suzuka",
            Track::Valencia => "Valencia",
            Track::WatkinsGlen => "Watkins Glen",
            Track::Zandvoort => "Zandvoort",
            Track::Zolder => "Zolder",
        }
    }

    /// Resolve a key, a display name, or a results-file track name.
    ///
    /// Results files from older game versions carry a year suffix
    /// ("monza_2019"), which is ignored.
    pub fn from_key(raw: &str) -> Option<Track> {
        let lower = raw.trim().to_lowercase();
        let base = strip_year_suffix(&lower);

        Track::ALL.iter().copied().find(|track| {
            track.key() == base || track.display_name().to_lowercase() == lower
        })
    }
}

fn strip_year_suffix(key: &str) -> &str {
    match key.rsplit_once('_') {
        Some((head, tail)) if tail.len() == 4 && tail.bytes().all(|b| b.is_ascii_digit()) => head,
        _ => key,
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for Track {
    type Err = LeaderboardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Track::from_key(s).ok_or_else(|| LeaderboardError::Parse(format!("unknown track: {}", s)))
    }
}
