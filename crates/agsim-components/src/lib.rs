//! Domain models that plug into the `agsim-core` simulation machinery.
//!
//! Each model registers itself with the model type registry, so linking this crate is
//! enough for simulation files to refer to them by `$type`.

pub mod report;
pub mod stock;
pub mod weather;

pub use report::Report;
pub use stock::{AnimalGroup, DMPool, Sex, Stock};
pub use weather::{DailyWeather, Weather};

/// `$type` names of the models provided by this crate.
pub const MODEL_TYPES: &[&str] = &["Weather", "Report", "Stock"];
