// SRA Leaderboard - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod error;
pub mod laptime;        // Time codec: ms <-> MM:SS.mmm
pub mod catalog;        // Tracks, cars, conditions, seasons
pub mod entry;          // Driver-in-car best lap
pub mod temporal;       // Timestamps + per-host watermarks
pub mod session;        // Results files + SessionFetcher trait
pub mod source;         // HTTP / in-memory session sources
pub mod leaderboard;    // Merge engine
pub mod api;            // Leaderboard service JSON contract
pub mod store;          // CSV / SQLite persistence
pub mod publish;        // Remote service client
pub mod config;         // TOML configuration
pub mod sync;           // Update cycle runner

// Re-export commonly used types
pub use error::{LeaderboardError, Result};
pub use laptime::{format_ms, parse_display, to_display};
pub use catalog::{car_label, CarModel, Condition, Season, SeasonCalendar, Track, UNKNOWN_CAR_LABEL};
pub use entry::{Entry, EntryKey};
pub use temporal::{format_timestamp, parse_timestamp, Watermarks};
pub use session::{PageListing, SessionFetcher, SessionQuery, SessionRef, SessionResult};
pub use source::{build_query, HttpSessionSource, StaticSessionSource};
pub use leaderboard::{
    Leaderboard, LeaderboardKey, LeaderboardState, MergeOutcome, Phase,
    UpdateOptions, UpdateReport, DEFAULT_MAX_PAGES,
};
pub use api::{LeaderboardResponse, PublishDocument};
pub use store::{CsvStore, LeaderboardStore, SqliteStore};
pub use publish::{PublishReceipt, Publisher, RemoteService};
pub use config::{Backend, Config};
pub use sync::{Cycle, CycleOptions, CycleReport, HostOutcome, Written};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
