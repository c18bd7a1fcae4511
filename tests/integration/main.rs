//! Integration tests for planwright.

mod cli_commands;
mod scheduling;
mod stage_routing;
mod state_store;
