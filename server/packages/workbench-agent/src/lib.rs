//! Workbench agent core utilities.

pub mod agent;
pub mod cli;
pub mod config;
pub mod events;
pub mod lifecycle;
pub mod registry;
pub mod remote;
pub mod router;
pub mod terminal;
pub mod workspace;
