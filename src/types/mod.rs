//! Core types module

mod config;

#[cfg(test)]
mod tests;

pub use config::{DEFAULT_IPC_NODE, MAX_PORT_NUMBER_LIMIT, NetConfig, NetConfigBuilder};
