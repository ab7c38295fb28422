//! CLI command implementations

mod config;
mod demo;
mod probe;
mod scale;

pub use config::{ConfigArgs, config};
pub use demo::{DemoArgs, demo};
pub use probe::{ProbeArgs, probe};
pub use scale::{ScaleArgs, scale};
