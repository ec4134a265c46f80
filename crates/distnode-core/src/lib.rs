pub mod config;
pub mod logging;

pub mod body;
pub mod content;
pub mod directory;
pub mod endpoint;
pub mod error;
pub mod health;
pub mod node;
pub mod object;
pub mod orchestrator;
pub mod pending;
pub mod state_db;
pub mod storage;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;
