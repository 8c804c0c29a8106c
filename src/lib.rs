#![forbid(unsafe_code)]

pub mod bridge;
pub mod config;
pub mod errors;
pub mod game;
pub mod http;
pub mod models;
pub mod orchestrator;
pub mod scripts;
pub mod state;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
