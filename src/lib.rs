// ABOUTME: Library module for stage-migrator
// ABOUTME: Exports all core functionality for use in binary and tests

pub mod commands;
pub mod config;
pub mod database;
pub mod manifest;
pub mod migration;
pub mod storage;
pub mod utils;
