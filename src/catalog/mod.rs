// Catalog - closed, immutable lookup tables
//
// Each table has:
// - A fixed key set known at compile time
// - A human-readable display form
// - An explicit fallback for anything outside the set (cars only)

pub mod car;
pub mod condition;
pub mod season;
pub mod track;

pub use car::{car_label, CarModel, UNKNOWN_CAR_LABEL};
pub use condition::Condition;
pub use season::{Season, SeasonCalendar};
pub use track::Track;
