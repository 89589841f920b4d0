pub mod config;
pub mod error;
pub mod types;

pub use config::CityPulseConfig;
pub use error::{CityPulseError, Result};
pub use types::*;
