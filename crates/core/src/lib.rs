//! Core library for the conductor daemon.
//!
//! Runs AI-agent CLIs as supervised subprocesses: a persistent task store, a
//! priority queue feeding a bounded process pool, an event router with retry
//! and dead letters, a rule-driven automation engine, and a JSON-RPC 2.0
//! control plane over a Unix socket used by the CLI.
//!
//! Quick start:
//! - Load config via `config::load(None)` and resolve paths with `daemon::DaemonOptions::from_env()`.
//! - Start everything with `daemon::start(config, options)` and keep the returned handle.
//! - Talk to a running daemon through `rpc::IpcClient::connect(socket)`.

pub mod adapters;
pub mod agent;
pub mod automation;
pub mod config;
pub mod daemon;
pub mod domain;
pub mod events;
pub mod logging;
pub mod rpc;
pub mod store;
pub mod supervisor;
