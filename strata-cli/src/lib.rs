//! Strata CLI - command-line interface for the strata migration engine.
//!
//! This crate provides the `strata` binary for enabling migrations in a
//! project, scaffolding migrations from a model file, listing their state
//! and bringing a database to a given migration.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod output;
