//! Divide-by-zero detection by abstract interpretation over lir programs.

pub mod commons;
pub mod config;
pub mod middle_end;

pub use config::Config;
