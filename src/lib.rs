pub mod clock;
pub mod config;
pub mod errors;
pub mod logging;
pub mod services;

pub use config::settings::Settings;
pub use errors::{DedupError, StoreError, StoreErrorKind, StorePhase};
pub use services::dedup::{DedupFilter, FilterStats};
