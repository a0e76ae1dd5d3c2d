// 🏎️ Entry - one driver in one car, best lap + sectors
//
// Identity is the (driver_id, car_id) pair, not the driver alone: the same
// driver in two different cars is two entries (multi-class leaderboards).

use serde::{Deserialize, Serialize};

use crate::catalog::car_label;
use crate::laptime::format_ms;

/// Identity of an Entry within a leaderboard
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryKey {
    pub driver_id: String,
    pub car_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    // ========================================================================
    // IDENTITY
    // ========================================================================
    /// Platform player id (e.g. "S76561198000000000")
    pub driver_id: String,

    /// Car model id; unknown ids are kept as-is
    pub car_id: u32,

    // ========================================================================
    // DRIVER
    // ========================================================================
    pub first_name: String,
    pub last_name: String,
    pub short_name: String,

    // ========================================================================
    // TIMES (milliseconds)
    // ========================================================================
    pub best_time: u32,
    pub sector_1: u32,
    pub sector_2: u32,
    pub sector_3: u32,

    /// Whether the lap was set in a wet session
    pub is_wet: bool,
}

impl Entry {
    pub fn key(&self) -> EntryKey {
        EntryKey {
            driver_id: self.driver_id.clone(),
            car_id: self.car_id,
        }
    }

    /// "First Last (SHO)"
    pub fn display_name(&self) -> String {
        format!("{} {} ({})", self.first_name, self.last_name, self.short_name)
    }

    pub fn car_label(&self) -> String {
        car_label(self.car_id)
    }

    pub fn best_time_display(&self) -> String {
        format_ms(self.best_time)
    }

    /// Take the incoming lap if it is strictly faster.
    ///
    /// Only times and sectors change; identity and name fields are left as
    /// first observed. Returns whether anything changed.
    pub fn absorb(&mut self, incoming: &Entry) -> bool {
        if incoming.best_time >= self.best_time {
            return false;
        }
        self.best_time = incoming.best_time;
        self.sector_1 = incoming.sector_1;
        self.sector_2 = incoming.sector_2;
        self.sector_3 = incoming.sector_3;
        true
    }
}
