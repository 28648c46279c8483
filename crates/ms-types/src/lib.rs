pub mod config;
pub mod cost;
pub mod errors;

pub use config::*;
pub use cost::*;
pub use errors::*;
