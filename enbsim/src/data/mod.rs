mod config;
mod ue_context;

pub use config::*;
pub use ue_context::*;
