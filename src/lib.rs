//! RVExt - load and exercise RVExtension libraries outside their host

pub mod config;
pub mod extension;
pub mod func_timer;

pub use extension::{Extension, ExtensionError};
