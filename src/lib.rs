//! Client for a streaming chat backend.
//!
//! [`client::ChatClient`] is the entry point: it owns the displayed chat
//! state, talks to the backend through [`api::ChatBackend`] and turns the
//! newline-delimited JSON reply stream into message list updates.

pub mod api;
pub mod cli;
pub mod client;
pub mod config;
pub mod conversations;
pub mod error;
pub mod models;
pub mod reconcile;
pub mod state;
pub mod stream;

pub use api::{ChatBackend, HttpBackend};
pub use client::{ChatClient, ClientEvent};
pub use error::ChatError;

use anyhow::Context;
use clap::Parser;

/// Entry point of the `convochat` terminal front-end.
pub fn run() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    let args = cli::Args::parse();
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(cli::run(args))
}
