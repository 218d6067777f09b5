pub mod config;
pub mod model;
pub mod safe_display;
pub mod tracing;

pub use safe_display::SafeDisplay;

#[cfg(test)]
test_r::enable!();

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
