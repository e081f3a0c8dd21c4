pub mod artifacts;
pub mod chain;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod executor;
pub mod registry;
pub mod resolver;
pub mod rpc;
pub mod schema;
