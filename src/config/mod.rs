//! Node configuration: listen address, optional mining payout address, and
//! node id, seeded from environment variables.

pub mod settings;

pub use settings::{Config, GLOBAL_CONFIG};
