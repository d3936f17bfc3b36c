pub mod config;
pub mod contract;
pub mod error;
pub mod ids;
pub mod linker;
pub mod model;
pub mod query;
pub mod time;

pub use error::{Result, TracebaseError};
