pub mod commands;
pub mod config;
pub mod discovery;
pub mod file_sd;
pub mod http;
pub mod metrics;
pub mod query;
pub mod target;

#[cfg(test)]
mod testing;

pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;
pub type Result<T> = std::result::Result<T, Error>;
