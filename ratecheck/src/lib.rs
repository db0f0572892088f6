//! ratecheck -- black-box verification of a room's upload rate limit.
//!
//! For each test case the harness provisions an isolated fixture, starts the
//! entrypoint and room roles, drives a client role to download a payload, and
//! checks that the transfer took at least the expected time.
//!
//! # Modules
//! - [`fixture`]: per-case directory tree, payload and credentials
//! - [`process`], [`orchestrator`]: role processes and ordered startup
//! - [`scanner`]: download trigger and sentinel scanning
//! - [`validator`]: duration rule
//! - [`scope`]: per-case teardown
//! - [`runner`]: sequential case execution
//! - [`report`], [`output`]: text and JSON results

pub mod cli;
pub mod commands;
pub mod error;
pub mod fixture;
pub mod logging;
pub mod orchestrator;
pub mod output;
pub mod ports;
pub mod process;
pub mod report;
pub mod runner;
pub mod scanner;
pub mod scope;
pub mod validator;

pub use runner::Harness;
