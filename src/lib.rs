pub mod archive;
pub mod config;
pub mod deletion;
pub mod error;
pub mod file_system;
pub mod handlers;
pub mod models;
pub mod sandbox;

pub use config::Config;
pub use error::{Result, StoreError};
