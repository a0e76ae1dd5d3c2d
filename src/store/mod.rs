// 💾 Persistence - load/save whole leaderboard states
//
// Every backend replaces the complete state of one key on save. A reader
// never sees half of a save.

pub mod csv_file;
pub mod sqlite;

pub use csv_file::{read_leaderboard_csv, write_leaderboard_csv, CsvStore};
pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::leaderboard::{LeaderboardKey, LeaderboardState};

pub trait LeaderboardStore {
    /// Stored state for `key`, or `LeaderboardError::NotFound`
    fn load(&self, key: &LeaderboardKey) -> Result<LeaderboardState>;

    /// Replace everything stored for `state.key`
    fn save(&self, state: &LeaderboardState) -> Result<()>;

    fn name(&self) -> &str;
}
